use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{Config, OutputFormat};
use crate::core::{render_mermaid, CallFlowEngine, EntryPoint, ExtractOptions, ExtractionMode};

#[derive(Parser)]
#[command(name = "callflow")]
#[command(about = "Call-flow graphs and sequence diagrams rooted at any function")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a default configuration file
    Init {
        /// Target directory (defaults to current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// List the functions and methods of a file
    EntryPoints {
        file: PathBuf,

        /// Project root used for ids and relative paths
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Build the call graph of one function
    Extract {
        file: PathBuf,

        /// `name`, `Class.name` or `Class::name`
        function: String,

        #[arg(short, long)]
        depth: Option<usize>,

        /// lazy or full
        #[arg(short, long)]
        mode: Option<ExtractionMode>,

        /// Branch id to walk in lazy mode (repeatable)
        #[arg(long = "expand")]
        expand: Vec<String>,

        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Print only what expanding one branch adds to a lazy graph
    Expand {
        file: PathBuf,
        function: String,
        branch_id: String,

        #[arg(short, long)]
        depth: Option<usize>,

        /// Branches already expanded by the client (repeatable)
        #[arg(long = "expanded")]
        expanded: Vec<String>,

        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Render a sequence diagram of a full extraction
    Sequence {
        file: PathBuf,
        function: String,

        #[arg(short, long)]
        depth: Option<usize>,

        /// Output format (defaults to the configured one)
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// List entry points of every supported file under a directory
    Scan {
        /// Project directory (defaults to current directory)
        dir: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct FileEntryPoints {
    file: String,
    entry_points: Vec<EntryPoint>,
}

impl Cli {
    pub async fn execute(self, config: Config) -> Result<()> {
        let engine = Arc::new(CallFlowEngine::new(&config));
        let pretty = config.output.pretty;

        match self.command {
            Commands::Init { path, force } => init(path, force, &config),
            Commands::EntryPoints { file, root } => {
                let entries = engine.list_entry_points(&file, root.as_deref());
                print_json(&entries, pretty)
            }
            Commands::Extract { file, function, depth, mode, expand, root } => {
                let options = ExtractOptions {
                    max_depth: depth.unwrap_or(config.extraction.max_depth),
                    project_root: root,
                    mode: mode.unwrap_or(config.extraction.mode),
                    expand_branches: expand.into_iter().collect(),
                };
                let graph = engine
                    .extract(&file, &function, &options)
                    .with_context(|| format!("no call graph for {} in {}", function, file.display()))?;
                print_json(&graph, pretty)
            }
            Commands::Expand { file, function, branch_id, depth, expanded, root } => {
                let options = ExtractOptions {
                    max_depth: depth.unwrap_or(config.extraction.max_depth),
                    project_root: root,
                    mode: ExtractionMode::Lazy,
                    expand_branches: expanded.into_iter().collect::<HashSet<_>>(),
                };
                let partial = engine
                    .expand_branch(&file, &function, &branch_id, &options)
                    .with_context(|| format!("cannot expand {} of {}", branch_id, function))?;
                print_json(&partial, pretty)
            }
            Commands::Sequence { file, function, depth, format, root } => {
                let options = ExtractOptions {
                    max_depth: depth.unwrap_or(config.extraction.max_depth),
                    project_root: root,
                    mode: ExtractionMode::Full,
                    expand_branches: HashSet::new(),
                };
                let graph = engine
                    .extract(&file, &function, &options)
                    .with_context(|| format!("no call graph for {} in {}", function, file.display()))?;
                let diagram = engine.transform(&graph);

                match format.unwrap_or(config.output.format) {
                    OutputFormat::Json => print_json(&diagram, pretty),
                    OutputFormat::Mermaid => {
                        println!("{}", render_mermaid(&diagram)?);
                        Ok(())
                    }
                }
            }
            Commands::Scan { dir } => {
                let dir = dir.unwrap_or_else(|| PathBuf::from("."));
                let results = scan(engine, &dir).await?;
                print_json(&results, pretty)
            }
        }
    }
}

fn init(path: Option<PathBuf>, force: bool, config: &Config) -> Result<()> {
    let dir = path.unwrap_or_else(|| PathBuf::from("."));
    let target = dir.join("callflow.toml");
    if target.exists() && !force {
        warn!("{} already exists, use --force to overwrite", target.display());
        return Ok(());
    }
    config.save(&target)?;
    info!("Wrote {}", target.display());
    Ok(())
}

/// Each file is handled on the blocking pool with its own session; the
/// tasks share nothing but the engine's grammar registry
async fn scan(engine: Arc<CallFlowEngine>, dir: &Path) -> Result<Vec<FileEntryPoints>> {
    let files = engine.discover_files(dir)?;
    info!("Scanning {} files under {}", files.len(), dir.display());

    let root = dir.to_path_buf();
    let mut tasks = Vec::with_capacity(files.len());
    for file in files {
        let engine = Arc::clone(&engine);
        let root = root.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            let entry_points = engine.list_entry_points(&file, Some(&root));
            (file, entry_points)
        }));
    }

    let mut results = Vec::new();
    for task in tasks {
        let (file, entry_points) = task.await.context("scan task panicked")?;
        if entry_points.is_empty() {
            continue;
        }
        let file = file.strip_prefix(&root).unwrap_or(&file).display().to_string();
        results.push(FileEntryPoints { file, entry_points });
    }
    Ok(results)
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    #[test]
    fn test_parse_extract_arguments() {
        let cli = Cli::parse_from([
            "callflow", "extract", "app.py", "Service.run", "--mode", "full", "--expand", "a", "--expand", "b",
        ]);
        match cli.command {
            Commands::Extract { function, mode, expand, depth, .. } => {
                assert_eq!(function, "Service.run");
                assert_eq!(mode, Some(ExtractionMode::Full));
                assert_eq!(expand, vec!["a", "b"]);
                assert_eq!(depth, None);
            }
            _ => panic!("expected extract"),
        }
    }

    #[test]
    fn test_init_writes_config_once() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("callflow.toml");
        let mut config = Config::default();
        config.extraction.max_depth = 3;

        init(Some(temp.path().to_path_buf()), false, &config).unwrap();
        assert!(predicate::str::contains("max_depth = 3").eval(&std::fs::read_to_string(&target).unwrap()));

        init(Some(temp.path().to_path_buf()), false, &Config::default()).unwrap();
        assert_eq!(Config::load(&target).unwrap().extraction.max_depth, 3);

        init(Some(temp.path().to_path_buf()), true, &Config::default()).unwrap();
        assert_eq!(Config::load(&target).unwrap().extraction.max_depth, 5);
    }

    #[tokio::test]
    async fn test_scan_lists_entry_points_per_file() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("a.py").write_str("def one():\n    two()\n\ndef two():\n    pass\n").unwrap();
        temp.child("b.ts").write_str("export function three(): void {}\n").unwrap();
        temp.child("empty.py").write_str("x = 1\n").unwrap();

        let engine = Arc::new(CallFlowEngine::new(&Config::default()));
        let results = scan(engine, temp.path()).await.unwrap();

        let files: Vec<&str> = results.iter().map(|r| r.file.as_str()).collect();
        assert_eq!(files, vec!["a.py", "b.ts"]);
        assert_eq!(results[0].entry_points.len(), 2);
        assert_eq!(results[0].entry_points[0].call_count, 1);
        assert_eq!(results[1].entry_points[0].name, "three");
    }
}
