//! Stable symbol identifiers.
//!
//! Format: `{path-relative-to-root}:{line}:{col}:{kind}:{name}`. The path is
//! normalized to forward slashes so ids are identical across platforms.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// The five fields encoded in a symbol id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolId {
    pub path: String,
    pub line: usize,
    pub column: usize,
    pub kind: String,
    pub name: String,
}

const KNOWN_KINDS: &[&str] = &["function", "method", "class", "external", "builtin"];

/// Path of `path` relative to `root`, falling back to the path as given
pub fn relative_path(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.to_string_lossy().replace('\\', "/")
}

pub fn make_symbol_id(path: &Path, line: usize, column: usize, kind: &str, name: &str, root: &Path) -> String {
    format!("{}:{}:{}:{}:{}", relative_path(path, root), line, column, kind, name)
}

/// Parse an id produced by [`make_symbol_id`].
///
/// Names may contain `:` (C++ `Class::method`) and so may unusual paths, so
/// the id is anchored on the first `line:col:kind` triple instead of a plain
/// split.
pub fn parse_symbol_id(id: &str) -> Option<SymbolId> {
    let parts: Vec<&str> = id.split(':').collect();
    if parts.len() < 5 {
        return None;
    }

    for i in 1..parts.len().saturating_sub(3) {
        let (Ok(line), Ok(column)) = (parts[i].parse::<usize>(), parts[i + 1].parse::<usize>()) else {
            continue;
        };
        if !KNOWN_KINDS.contains(&parts[i + 2]) {
            continue;
        }
        return Some(SymbolId {
            path: parts[..i].join(":"),
            line,
            column,
            kind: parts[i + 2].to_string(),
            name: parts[i + 3..].join(":"),
        });
    }

    None
}
