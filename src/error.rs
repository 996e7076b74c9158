use std::path::PathBuf;
use thiserror::Error;

/// Main error type for callflow operations
#[derive(Error, Debug)]
pub enum CallflowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No parser available for {0}")]
    ParserUnavailable(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Failed to read {path}: {message}")]
    CrossFileRead { path: PathBuf, message: String },

    #[error("File {path} exceeds maximum size limit ({limit} bytes)")]
    FileTooLarge { path: PathBuf, limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CallflowError>;
