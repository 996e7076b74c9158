use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, warn};
use tree_sitter::{Language, Node, Parser, Tree};

use crate::error::{CallflowError, Result};
use super::languages::{Definition, DefinitionKind, ImportTable, SourceLanguage};
use super::symbol_id::{make_symbol_id, relative_path};
use super::type_resolver::ScopeInfo;

/// Concrete tree-sitter grammars; TypeScript files use two of them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grammar {
    Python,
    Cpp,
    TypeScript,
    Tsx,
}

impl Grammar {
    pub fn for_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "py" | "pyi" => Some(Grammar::Python),
            "c" | "cc" | "cpp" | "cxx" | "h" | "hh" | "hpp" | "hxx" => Some(Grammar::Cpp),
            "ts" | "mts" | "cts" => Some(Grammar::TypeScript),
            "tsx" | "js" | "jsx" | "mjs" | "cjs" => Some(Grammar::Tsx),
            _ => None,
        }
    }

    pub fn source_language(self) -> SourceLanguage {
        match self {
            Grammar::Python => SourceLanguage::Python,
            Grammar::Cpp => SourceLanguage::Cpp,
            Grammar::TypeScript | Grammar::Tsx => SourceLanguage::TypeScript,
        }
    }

    fn load(self) -> Language {
        match self {
            Grammar::Python => tree_sitter_python::LANGUAGE.into(),
            Grammar::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            Grammar::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Grammar::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        }
    }

    fn all() -> [Grammar; 4] {
        [Grammar::Python, Grammar::Cpp, Grammar::TypeScript, Grammar::Tsx]
    }
}

/// Grammar handles loaded once at startup.
///
/// Immutable after construction and shared by reference; every parse gets a
/// fresh `Parser`, so concurrent requests never contend.
pub struct ParserRegistry {
    grammars: HashMap<Grammar, Language>,
}

impl ParserRegistry {
    pub fn new(languages: &[String]) -> Self {
        let mut grammars = HashMap::new();

        for grammar in Grammar::all() {
            let language_name = grammar.source_language().name();
            if !languages.iter().any(|l| l.eq_ignore_ascii_case(language_name)) {
                continue;
            }

            let language = grammar.load();
            let mut probe = Parser::new();
            match probe.set_language(&language) {
                Ok(()) => {
                    grammars.insert(grammar, language);
                }
                Err(e) => warn!("Grammar {:?} unavailable: {}", grammar, e),
            }
        }

        debug!("Parser registry loaded {} grammars", grammars.len());
        Self { grammars }
    }

    pub fn with_all_languages() -> Self {
        let names: Vec<String> = SourceLanguage::all().iter().map(|l| l.name().to_string()).collect();
        Self::new(&names)
    }

    pub fn supports(&self, path: &Path) -> bool {
        Grammar::for_path(path).map_or(false, |g| self.grammars.contains_key(&g))
    }

    pub fn parse(&self, grammar: Grammar, source: &str) -> Result<Tree> {
        let language = self
            .grammars
            .get(&grammar)
            .ok_or_else(|| CallflowError::ParserUnavailable(format!("{:?}", grammar)))?;

        let mut parser = Parser::new();
        parser
            .set_language(language)
            .map_err(|e| CallflowError::ParserUnavailable(format!("{:?}: {}", grammar, e)))?;

        parser
            .parse(source, None)
            .ok_or_else(|| CallflowError::ParserUnavailable(format!("{:?}: parse aborted", grammar)))
    }
}

/// A parsed file together with its definition and import index
pub struct ParsedUnit {
    /// Canonical path on disk
    pub path: PathBuf,
    /// Path relative to the project root, `/`-separated
    pub relative_path: String,
    pub language: SourceLanguage,
    pub source: String,
    pub tree: Tree,
    pub definitions: Vec<Definition>,
    pub imports: ImportTable,
}

impl ParsedUnit {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// Re-locate the syntax node of a definition
    pub fn node_for(&self, definition: &Definition) -> Option<Node<'_>> {
        let mut node = self
            .root()
            .descendant_for_byte_range(definition.start_byte, definition.end_byte)?;
        loop {
            if node.kind() == definition.node_kind && node.start_byte() == definition.start_byte {
                return Some(node);
            }
            node = node.parent()?;
        }
    }

    pub fn symbol_id(&self, definition: &Definition, project_root: &Path) -> String {
        make_symbol_id(
            &self.path,
            definition.line,
            definition.column,
            definition.kind.as_str(),
            &definition.name,
            project_root,
        )
    }

    pub fn find_function(&self, name: &str) -> Option<&Definition> {
        self.definitions
            .iter()
            .find(|d| d.kind == DefinitionKind::Function && d.name == name)
    }

    pub fn find_class(&self, name: &str) -> Option<&Definition> {
        self.definitions
            .iter()
            .find(|d| d.kind == DefinitionKind::Class && d.name == name)
    }

    pub fn find_method(&self, class_name: &str, name: &str) -> Option<&Definition> {
        self.definitions.iter().find(|d| {
            d.kind == DefinitionKind::Method
                && d.name == name
                && d.class_name.as_deref() == Some(class_name)
        })
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.definitions
            .iter()
            .any(|d| d.namespace.as_deref() == Some(namespace))
    }

    /// Classes in this file that declare a method called `name`
    pub fn classes_with_method(&self, name: &str) -> Vec<&str> {
        let mut classes: Vec<&str> = self
            .definitions
            .iter()
            .filter(|d| d.kind == DefinitionKind::Method && d.name == name)
            .filter_map(|d| d.class_name.as_deref())
            .collect();
        classes.dedup();
        classes
    }

    /// Entry-point candidates: every function and method
    pub fn callables(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.iter().filter(|d| d.kind != DefinitionKind::Class)
    }
}

/// Per-request state: the parsed files touched by one extraction.
///
/// Units are reference counted so syntax nodes from one file can stay alive
/// while another file is loaded into the cache.
pub struct Session<'r> {
    registry: &'r ParserRegistry,
    pub project_root: PathBuf,
    max_file_size: usize,
    units: HashMap<PathBuf, Rc<ParsedUnit>>,
    failures: HashMap<PathBuf, String>,
    /// Type scopes keyed by the id of the function they were built for
    pub scope_cache: HashMap<String, Rc<ScopeInfo>>,
}

impl<'r> Session<'r> {
    pub fn new(registry: &'r ParserRegistry, project_root: &Path, max_file_size: usize) -> Self {
        let project_root = project_root
            .canonicalize()
            .unwrap_or_else(|_| project_root.to_path_buf());
        Self {
            registry,
            project_root,
            max_file_size,
            units: HashMap::new(),
            failures: HashMap::new(),
            scope_cache: HashMap::new(),
        }
    }

    /// Parse and index a file, reusing earlier results for the same path
    pub fn load(&mut self, path: &Path) -> Result<Rc<ParsedUnit>> {
        let canonical = path.canonicalize().map_err(|e| CallflowError::CrossFileRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        if let Some(unit) = self.units.get(&canonical) {
            return Ok(Rc::clone(unit));
        }
        if let Some(message) = self.failures.get(&canonical) {
            return Err(CallflowError::CrossFileRead {
                path: canonical,
                message: message.clone(),
            });
        }

        match self.parse_unit(&canonical) {
            Ok(unit) => {
                let unit = Rc::new(unit);
                debug!("Loaded {} ({} definitions)", unit.relative_path, unit.definitions.len());
                self.units.insert(canonical, Rc::clone(&unit));
                Ok(unit)
            }
            Err(e) => {
                self.failures.insert(canonical, e.to_string());
                Err(e)
            }
        }
    }

    fn parse_unit(&self, path: &Path) -> Result<ParsedUnit> {
        let grammar = Grammar::for_path(path)
            .ok_or_else(|| CallflowError::ParserUnavailable(path.display().to_string()))?;

        let metadata = std::fs::metadata(path)?;
        if metadata.len() as usize > self.max_file_size {
            return Err(CallflowError::FileTooLarge {
                path: path.to_path_buf(),
                limit: self.max_file_size,
            });
        }

        // Non-UTF-8 bytes (Latin-1 sources) become U+FFFD; offsets stay
        // consistent because the tree is built from the decoded text
        let bytes = std::fs::read(path).map_err(|e| CallflowError::CrossFileRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let source = String::from_utf8_lossy(&bytes).into_owned();
        let tree = self.registry.parse(grammar, &source)?;

        let language = grammar.source_language();
        let extractor = language.extractor();
        let root = tree.root_node();
        let definitions = extractor.collect_definitions(root, &source);
        let imports = extractor.collect_imports(root, &source, path, &self.project_root);

        Ok(ParsedUnit {
            path: path.to_path_buf(),
            relative_path: relative_path(path, &self.project_root),
            language,
            source,
            tree,
            definitions,
            imports,
        })
    }
}
