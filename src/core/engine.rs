// src/core/engine.rs
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{CallflowError, Result};
use super::call_graph::{count_call_sites, BuildOptions, CallGraph, Diagnostic, ExtractionMode, GraphBuilder};
use super::languages::{CallerContext, Definition, DefinitionKind, LanguageExtractor};
use super::parser::{ParsedUnit, ParserRegistry, Session};
use super::sequence::{self, SequenceDiagram};

/// A function or method offered as an extraction starting point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryPoint {
    pub name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub line: usize,
    pub kind: DefinitionKind,
    pub class_name: Option<String>,
    /// Call sites in the body
    pub call_count: usize,
}

/// Per-request extraction settings
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub max_depth: usize,
    /// Defaults to the directory containing the file
    pub project_root: Option<PathBuf>,
    pub mode: ExtractionMode,
    pub expand_branches: HashSet<String>,
}

impl ExtractOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_depth: config.extraction.max_depth,
            project_root: None,
            mode: config.extraction.mode,
            expand_branches: HashSet::new(),
        }
    }
}

/// Main entry point of the extraction core.
///
/// Holds only the immutable grammar registry, so one engine can serve any
/// number of concurrent requests. Failures never cross this boundary: they
/// are logged and surface as `None`, an empty list or a diagnostic.
pub struct CallFlowEngine {
    registry: ParserRegistry,
    max_file_size: usize,
    ignore_patterns: Vec<String>,
}

impl CallFlowEngine {
    pub fn new(config: &Config) -> Self {
        let registry = ParserRegistry::new(&config.parsing.languages);
        Self {
            registry,
            max_file_size: config.extraction.max_file_size,
            ignore_patterns: config.parsing.ignore_patterns.clone(),
        }
    }

    pub fn supports(&self, file: &Path) -> bool {
        self.registry.supports(file)
    }

    /// Functions and methods of `file`, with their call counts
    pub fn list_entry_points(&self, file: &Path, project_root: Option<&Path>) -> Vec<EntryPoint> {
        let root = project_root.map_or_else(|| default_root(file), Path::to_path_buf);
        let mut session = Session::new(&self.registry, &root, self.max_file_size);

        let unit = match self.load_entry_file(&mut session, file) {
            Ok(unit) => unit,
            Err(e) => {
                warn!("Cannot list entry points of {}: {}", file.display(), e);
                return Vec::new();
            }
        };

        let extractor = unit.language.extractor();
        unit.callables()
            .map(|definition| EntryPoint {
                name: definition.name.clone(),
                qualified_name: extractor.qualified_name(definition, &unit),
                file_path: unit.relative_path.clone(),
                line: definition.line,
                kind: definition.kind,
                class_name: definition.class_name.clone(),
                call_count: count_call_sites(&unit, definition),
            })
            .collect()
    }

    /// Build the call graph rooted at `function_name` (`name`, `Class.name` or `Class::name`)
    pub fn extract(&self, file: &Path, function_name: &str, options: &ExtractOptions) -> Option<CallGraph> {
        let root = options.project_root.clone().unwrap_or_else(|| default_root(file));
        let mut session = Session::new(&self.registry, &root, self.max_file_size);

        let unit = match self.load_entry_file(&mut session, file) {
            Ok(unit) => unit,
            Err(e) => {
                warn!("Extraction from {} failed: {}", file.display(), e);
                return None;
            }
        };
        let definition = match find_entry(&unit, function_name) {
            Ok(definition) => definition,
            Err(e) => {
                warn!("{}", e);
                return None;
            }
        };

        info!(
            "Extracting {} from {} ({:?}, depth {})",
            function_name, unit.relative_path, options.mode, options.max_depth
        );
        let entry = CallerContext {
            node_id: unit.symbol_id(&definition, &session.project_root),
            unit,
            definition,
        };
        let build_options = BuildOptions {
            max_depth: options.max_depth,
            mode: options.mode,
            expand_branches: options.expand_branches.clone(),
        };
        let mut graph = GraphBuilder::new(&mut session, &entry, build_options).build(&entry);

        if options.mode == ExtractionMode::Lazy {
            let mut requested: Vec<&String> = options.expand_branches.iter().collect();
            requested.sort();
            for branch_id in requested {
                if graph.decision_for_branch(branch_id).is_none() {
                    debug!("Requested branch {} not found", branch_id);
                    graph.diagnostics.push(Diagnostic::BranchNotFound { branch_id: branch_id.clone() });
                }
            }
        }

        info!(
            "Extracted {} nodes, {} edges, {} decisions ({} unresolved)",
            graph.nodes.len(),
            graph.edges.len(),
            graph.decision_nodes.len(),
            graph.unresolved_calls.len()
        );
        Some(graph)
    }

    /// Only what expanding `branch_id` adds on top of the lazy graph built
    /// with `options.expand_branches`
    pub fn expand_branch(&self, file: &Path, function_name: &str, branch_id: &str, options: &ExtractOptions) -> Option<CallGraph> {
        let mut baseline_options = options.clone();
        baseline_options.mode = ExtractionMode::Lazy;
        baseline_options.expand_branches.remove(branch_id);

        let mut expanded_options = baseline_options.clone();
        expanded_options.expand_branches.insert(branch_id.to_string());

        let baseline = self.extract(file, function_name, &baseline_options)?;
        let expanded = self.extract(file, function_name, &expanded_options)?;
        let partial = expanded.difference(&baseline);

        info!(
            "Expanded {}: {} new nodes, {} new edges",
            branch_id,
            partial.nodes.len(),
            partial.edges.len()
        );
        Some(partial)
    }

    pub fn transform(&self, graph: &CallGraph) -> SequenceDiagram {
        sequence::transform(graph)
    }

    /// Supported source files under `dir`, honouring .gitignore and the
    /// configured ignore patterns
    pub fn discover_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut overrides = OverrideBuilder::new(dir);
        for pattern in &self.ignore_patterns {
            overrides
                .add(&format!("!{}", pattern))
                .map_err(|e| CallflowError::Config(format!("ignore pattern '{}': {}", pattern, e)))?;
        }
        let overrides = overrides
            .build()
            .map_err(|e| CallflowError::Config(e.to_string()))?;

        let walker = WalkBuilder::new(dir)
            .hidden(false)
            .git_ignore(true)
            .overrides(overrides)
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if path.is_file() && self.supports(path) {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }

    fn load_entry_file(&self, session: &mut Session, file: &Path) -> Result<std::rc::Rc<ParsedUnit>> {
        if !self.supports(file) {
            return Err(CallflowError::ParserUnavailable(file.display().to_string()));
        }
        session.load(file)
    }
}

fn default_root(file: &Path) -> PathBuf {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Locate the entry definition; a `Class.method` / `Class::method` qualifier
/// picks between same-named methods
fn find_entry(unit: &ParsedUnit, function_name: &str) -> Result<Definition> {
    let qualified = function_name
        .rsplit_once("::")
        .or_else(|| function_name.rsplit_once('.'));

    let found = match qualified {
        Some((owner, method)) => {
            let class_name = owner.rsplit([':', '.']).next().unwrap_or(owner);
            unit.find_method(class_name, method)
        }
        None => unit
            .find_function(function_name)
            .or_else(|| unit.callables().find(|d| d.name == function_name)),
    };

    found
        .cloned()
        .ok_or_else(|| CallflowError::SymbolNotFound(format!("{} in {}", function_name, unit.relative_path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    const ORDERS: &str = r#"def validate(order):
    return order

def notify(order):
    pass

def process_priority(order):
    notify(order)

def process_standard(order):
    pass

def process_order(order):
    validate(order)
    if order.priority:
        process_priority(order)
    else:
        process_standard(order)
"#;

    fn engine() -> CallFlowEngine {
        CallFlowEngine::new(&Config::default())
    }

    fn lazy() -> ExtractOptions {
        ExtractOptions {
            max_depth: 5,
            project_root: None,
            mode: ExtractionMode::Lazy,
            expand_branches: HashSet::new(),
        }
    }

    fn project() -> assert_fs::TempDir {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("orders.py").write_str(ORDERS).unwrap();
        temp
    }

    #[test]
    fn test_list_entry_points() {
        let temp = project();
        let entries = engine().list_entry_points(temp.child("orders.py").path(), None);

        let names: Vec<&str> = entries.iter().map(|e| e.qualified_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "orders.validate",
                "orders.notify",
                "orders.process_priority",
                "orders.process_standard",
                "orders.process_order"
            ]
        );
        let process_order = entries.iter().find(|e| e.name == "process_order").unwrap();
        assert_eq!(process_order.call_count, 3);
        assert_eq!(process_order.kind, DefinitionKind::Function);
        assert_eq!(process_order.line, 13);
        assert!(entries.iter().all(|e| e.class_name.is_none()));
    }

    #[test]
    fn test_missing_inputs_are_absent_not_errors() {
        let temp = project();
        let engine = engine();

        assert!(engine.extract(temp.child("orders.py").path(), "nope", &lazy()).is_none());
        assert!(engine.extract(temp.child("missing.py").path(), "main", &lazy()).is_none());
        assert!(engine.list_entry_points(temp.child("notes.txt").path(), None).is_empty());

        let python_off = Config {
            parsing: crate::config::ParsingConfig {
                languages: vec!["cpp".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let engine = CallFlowEngine::new(&python_off);
        assert!(engine.extract(temp.child("orders.py").path(), "process_order", &lazy()).is_none());
    }

    #[test]
    fn test_process_order_lazy_then_expanded() {
        let temp = project();
        let engine = engine();
        let file = temp.child("orders.py");

        let graph = engine.extract(file.path(), "process_order", &lazy()).unwrap();
        let mut names: Vec<&str> = graph.nodes.values().map(|n| n.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["process_order", "validate"]);
        assert_eq!(graph.decision_nodes.len(), 1);
        assert_eq!(graph.unexpanded_branches.len(), 2);

        let true_branch = graph.unexpanded_branches[0].clone();
        let mut options = lazy();
        options.expand_branches.insert(true_branch.clone());
        let expanded = engine.extract(file.path(), "process_order", &options).unwrap();

        assert!(graph.nodes.keys().all(|id| expanded.nodes.contains_key(id)));
        let added: Vec<&str> = expanded
            .nodes
            .values()
            .filter(|n| !graph.nodes.contains_key(&n.id))
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(added, vec!["process_priority", "notify"]);
        let decision_id = graph.decision_nodes.keys().next().unwrap();
        assert!(expanded
            .edges
            .iter()
            .any(|e| &e.source_id == decision_id && e.branch_id.as_deref() == Some(true_branch.as_str())));
        assert_eq!(expanded.nodes.values().find(|n| n.name == "notify").unwrap().depth, 2);
    }

    #[test]
    fn test_expand_branch_is_partial_and_idempotent() {
        let temp = project();
        let engine = engine();
        let file = temp.child("orders.py");

        let graph = engine.extract(file.path(), "process_order", &lazy()).unwrap();
        let branch = graph.unexpanded_branches[1].clone();

        let first = engine.expand_branch(file.path(), "process_order", &branch, &lazy()).unwrap();
        let second = engine.expand_branch(file.path(), "process_order", &branch, &lazy()).unwrap();

        let names: Vec<&str> = first.nodes.values().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["process_standard"]);
        assert_eq!(first.edges.len(), 1);
        assert_eq!(first.decision_nodes.len(), 1);
        assert_eq!(first.nodes.keys().collect::<Vec<_>>(), second.nodes.keys().collect::<Vec<_>>());
        assert_eq!(
            first.edges.iter().map(|e| e.key()).collect::<Vec<_>>(),
            second.edges.iter().map(|e| e.key()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_unknown_branch_is_a_diagnostic() {
        let temp = project();
        let partial = engine()
            .expand_branch(temp.child("orders.py").path(), "process_order", "decision:orders.py:99:if_else:branch:0", &lazy())
            .unwrap();

        assert!(partial.nodes.is_empty());
        assert_eq!(
            partial.diagnostics,
            vec![Diagnostic::BranchNotFound { branch_id: "decision:orders.py:99:if_else:branch:0".to_string() }]
        );
    }

    #[test]
    fn test_class_qualified_entry_and_transform() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("svc.py")
            .write_str("class A:\n    def run(self):\n        self.step()\n\n    def step(self):\n        print('x')\n\nclass B:\n    def run(self):\n        pass\n")
            .unwrap();
        let engine = engine();
        let mut options = lazy();
        options.mode = ExtractionMode::Full;

        let graph = engine.extract(temp.child("svc.py").path(), "A.run", &options).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.entry_node().unwrap().class_name.as_deref(), Some("A"));

        let diagram = engine.transform(&graph);
        assert_eq!(diagram.lifelines.len(), 1);
        assert_eq!(diagram.messages.len(), 1);
        assert_eq!(diagram.messages[0].label, "step()");
    }

    #[test]
    fn test_discover_files_respects_ignore_patterns() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("src/app.py").write_str("def main():\n    pass\n").unwrap();
        temp.child("src/view.tsx").write_str("export function View() { return null; }\n").unwrap();
        temp.child("node_modules/lib/index.ts").write_str("export const x = 1;\n").unwrap();
        temp.child("README.md").write_str("# readme\n").unwrap();

        let files = engine().discover_files(temp.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["app.py", "view.tsx"]);
    }
}
