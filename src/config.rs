use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::ExtractionMode;
use crate::error::{CallflowError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Graph construction settings
    pub extraction: ExtractionConfig,

    /// Source code parsing configuration
    pub parsing: ParsingConfig,

    /// Output settings
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Deepest call level materialized below the entry point
    pub max_depth: usize,

    /// `lazy` stops at the first decision point, `full` walks everything
    pub mode: ExtractionMode,

    /// Maximum file size to parse (in bytes)
    pub max_file_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsingConfig {
    /// Languages to support
    pub languages: Vec<String>,

    /// Extra glob patterns skipped by `scan`, on top of .gitignore
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Mermaid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Default output format
    pub format: OutputFormat,

    /// Pretty-print JSON output
    pub pretty: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            mode: ExtractionMode::Lazy,
            max_file_size: 1024 * 1024, // 1MB
        }
    }
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            languages: vec!["python".to_string(), "cpp".to_string(), "typescript".to_string()],
            ignore_patterns: vec![
                "node_modules/".to_string(),
                "target/".to_string(),
                "build/".to_string(),
                ".venv/".to_string(),
            ],
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Json,
            pretty: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            extraction: ExtractionConfig::default(),
            parsing: ParsingConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| CallflowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CallflowError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)
                } else {
                    Ok(Self::default())
                }
            }
            None => {
                // Try common config file locations
                let candidates = [
                    "Callflow.toml",
                    "callflow.toml",
                    ".callflow.toml",
                ];

                for candidate in &candidates {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                Ok(Self::default())
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.parsing.languages.is_empty() {
            return Err(CallflowError::Config("parsing.languages must name at least one language".to_string()));
        }
        if self.extraction.max_file_size == 0 {
            return Err(CallflowError::Config("extraction.max_file_size must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    #[test]
    fn test_save_and_load_round_trip() {
        let temp = assert_fs::TempDir::new().unwrap();
        let path = temp.child("callflow.toml");

        let mut config = Config::default();
        config.extraction.max_depth = 9;
        config.extraction.mode = ExtractionMode::Full;
        config.output.format = OutputFormat::Mermaid;
        config.save(path.path()).unwrap();

        path.assert(predicate::str::contains("[extraction]"));
        path.assert(predicate::str::contains("mode = \"full\""));

        let loaded = Config::load(path.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = assert_fs::TempDir::new().unwrap();
        let path = temp.child("callflow.toml");
        path.write_str("[extraction]\nmax_depth = 2\n").unwrap();

        let config = Config::load(path.path()).unwrap();
        assert_eq!(config.extraction.max_depth, 2);
        assert_eq!(config.extraction.mode, ExtractionMode::Lazy);
        assert_eq!(config.parsing.languages.len(), 3);
        assert_eq!(config.output.format, OutputFormat::Json);
    }

    #[test]
    fn test_invalid_files_are_config_errors() {
        let temp = assert_fs::TempDir::new().unwrap();
        let broken = temp.child("broken.toml");
        broken.write_str("[extraction\nmax_depth = ").unwrap();
        assert!(matches!(Config::load(broken.path()), Err(CallflowError::Config(_))));

        let empty_languages = temp.child("empty.toml");
        empty_languages.write_str("[parsing]\nlanguages = []\n").unwrap();
        assert!(matches!(Config::load(empty_languages.path()), Err(CallflowError::Config(_))));
    }

    #[test]
    fn test_missing_explicit_path_falls_back_to_defaults() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = Config::load_or_default(Some(temp.child("absent.toml").path())).unwrap();
        assert_eq!(config, Config::default());
    }
}
