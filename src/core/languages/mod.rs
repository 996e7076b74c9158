//! Language front-ends for call-flow extraction
//!
//! Each supported language implements [`LanguageExtractor`]. The set is
//! closed: [`SourceLanguage`] names every front-end and hands out its
//! extractor, so there is no runtime registration.

mod cpp;
mod python;
mod typescript;

pub use cpp::CppExtractor;
pub use python::PythonExtractor;
pub use typescript::TypeScriptExtractor;

use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tree_sitter::Node;

use super::call_graph::{CallType, DecisionType, ResolutionStatus};
use super::metrics::ComplexityRules;
use super::parser::{ParsedUnit, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLanguage {
    Python,
    Cpp,
    TypeScript,
}

static PYTHON: PythonExtractor = PythonExtractor;
static CPP: CppExtractor = CppExtractor;
static TYPESCRIPT: TypeScriptExtractor = TypeScriptExtractor;

impl SourceLanguage {
    pub fn all() -> [SourceLanguage; 3] {
        [SourceLanguage::Python, SourceLanguage::Cpp, SourceLanguage::TypeScript]
    }

    pub fn name(self) -> &'static str {
        match self {
            SourceLanguage::Python => "python",
            SourceLanguage::Cpp => "cpp",
            SourceLanguage::TypeScript => "typescript",
        }
    }

    pub fn extractor(self) -> &'static dyn LanguageExtractor {
        match self {
            SourceLanguage::Python => &PYTHON,
            SourceLanguage::Cpp => &CPP,
            SourceLanguage::TypeScript => &TYPESCRIPT,
        }
    }
}

/// Node-kind tables that drive the language-independent builder
pub struct GrammarRules {
    pub call_kinds: &'static [&'static str],
    /// Definitions whose bodies do not run as part of the enclosing function
    pub nested_scope_kinds: &'static [&'static str],
    pub decision_kinds: &'static [(&'static str, DecisionType)],
    pub ternary_kinds: &'static [&'static str],
    pub loop_kinds: &'static [&'static str],
    pub block_kinds: &'static [&'static str],
    /// Receivers that refer to the current instance
    pub self_receivers: &'static [&'static str],
    /// Separator used in qualified names
    pub scope_separator: &'static str,
    pub complexity: ComplexityRules,
}

impl GrammarRules {
    pub fn decision_type(&self, kind: &str) -> Option<DecisionType> {
        self.decision_kinds
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, t)| *t)
    }

    pub fn is_loop(&self, kind: &str) -> bool {
        self.loop_kinds.contains(&kind)
    }

    pub fn is_block(&self, kind: &str) -> bool {
        self.block_kinds.contains(&kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    Function,
    Method,
    Class,
}

impl DefinitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DefinitionKind::Function => "function",
            DefinitionKind::Method => "method",
            DefinitionKind::Class => "class",
        }
    }
}

/// A function, method or class found while indexing a file
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub name: String,
    pub kind: DefinitionKind,
    pub class_name: Option<String>,
    pub namespace: Option<String>,
    /// Syntax node kind, used to re-locate the node later
    pub node_kind: &'static str,
    pub start_byte: usize,
    pub end_byte: usize,
    pub line: usize,
    pub column: usize,
    pub docstring: Option<String>,
    pub return_type: Option<String>,
    /// Base classes (classes only)
    pub bases: Vec<String>,
}

/// A parsed call expression
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    /// Called name without receiver (`save` in `self.repo.save()`)
    pub name: String,
    /// Receiver or qualifier text (`self.repo`, `std`, `Foo`)
    pub receiver: Option<String>,
    pub call_type: CallType,
    /// Callee expression as written (`self.repo.save`)
    pub expression: String,
    pub arguments: Option<String>,
    pub line: usize,
    pub column: usize,
}

impl CallSite {
    /// First segment of the receiver (`os` for `os.path`)
    pub fn receiver_root(&self) -> Option<&str> {
        self.receiver.as_deref().map(|r| {
            r.split(|c: char| c == '.' || c == ':' || c == '-' || c == '>' || c == '(')
                .next()
                .unwrap_or(r)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportTarget {
    /// Resolved to a file inside the project root
    Project(PathBuf),
    Stdlib,
    ThirdParty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    /// Name visible in the importing file
    pub local_name: String,
    /// Module path as written
    pub module: String,
    /// Imported member, `None` when the whole module is bound
    pub imported_name: Option<String>,
    pub target: ImportTarget,
}

/// Imports and includes of one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportTable {
    pub bindings: Vec<ImportBinding>,
    /// Star imports and `#include`s: every name they define is visible
    pub wildcards: Vec<ImportBinding>,
}

impl ImportTable {
    pub fn lookup(&self, local_name: &str) -> Option<&ImportBinding> {
        self.bindings.iter().rev().find(|b| b.local_name == local_name)
    }
}

/// One arm of a decision point
#[derive(Debug, Clone)]
pub struct BranchBlock<'t> {
    pub label: String,
    pub condition: Option<String>,
    pub statements: Vec<Node<'t>>,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafKind {
    Return,
    Break,
    Continue,
    Pass,
    Raise,
    Assignment,
}

/// A non-call statement materialized inside an expanded branch
#[derive(Debug, Clone, PartialEq)]
pub struct LeafStatement {
    pub kind: LeafKind,
    pub text: String,
    /// Returned or raised expression
    pub value: Option<String>,
}

/// The function whose body is being scanned
#[derive(Clone)]
pub struct CallerContext {
    pub unit: Rc<ParsedUnit>,
    pub definition: Definition,
    pub node_id: String,
}

/// Shared contract of the language front-ends
pub trait LanguageExtractor: Send + Sync {
    fn language(&self) -> SourceLanguage;

    fn rules(&self) -> &'static GrammarRules;

    /// Index functions, methods and classes of a file
    fn collect_definitions(&self, root: Node, source: &str) -> Vec<Definition>;

    /// Resolve imports/includes of `file` against the project root
    fn collect_imports(&self, root: Node, source: &str, file: &Path, project_root: &Path) -> ImportTable;

    fn function_body<'t>(&self, function: Node<'t>) -> Option<Node<'t>> {
        function.child_by_field_name("body")
    }

    /// Turn a call node into a [`CallSite`]; `None` for nodes that are not
    /// real call sites (an IIFE is inlined instead)
    fn parse_call(&self, node: Node, source: &str) -> Option<CallSite>;

    /// Arms of a decision node, in source order
    fn decision_branches<'t>(&self, node: Node<'t>, source: &str) -> Vec<BranchBlock<'t>>;

    /// Condition or subject text of a decision node
    fn decision_condition(&self, node: Node, source: &str) -> String;

    /// Return/break/continue/pass/raise/assignment statements
    fn leaf_statement(&self, node: Node, source: &str) -> Option<LeafStatement>;

    /// Language builtins callable without a receiver
    fn is_builtin(&self, name: &str) -> bool;

    /// Methods of builtin types, used when the receiver type is unknown
    fn is_builtin_method(&self, name: &str) -> bool;

    /// Standard-library functions callable without a receiver
    fn is_stdlib_function(&self, _name: &str) -> bool {
        false
    }

    /// Classification of a well-known receiver namespace (`os`, `std`, `console`)
    fn classify_namespace(&self, root: &str) -> Option<ResolutionStatus>;

    /// Name of the initializer method of `class_name`
    fn constructor_name(&self, class_name: &str) -> String;

    /// Whether an unqualified call inside a method may target a sibling method
    fn implicit_self_calls(&self) -> bool {
        false
    }

    fn qualified_name(&self, definition: &Definition, unit: &ParsedUnit) -> String {
        let separator = self.rules().scope_separator;
        let mut parts = Vec::new();
        if let Some(namespace) = &definition.namespace {
            parts.push(namespace.clone());
        }
        if let Some(class_name) = &definition.class_name {
            parts.push(class_name.clone());
        }
        parts.push(definition.name.clone());
        if separator == "." {
            let module = module_name(&unit.relative_path);
            if !module.is_empty() {
                parts.insert(0, module);
            }
        }
        parts.join(separator)
    }

    /// Best-effort type of a receiver expression inside `caller`
    fn infer_receiver_type(&self, receiver: &str, caller: &CallerContext, session: &mut Session) -> Option<String>;
}

/// Dotted module path of a relative file path (`app/orders.py` → `app.orders`)
pub fn module_name(relative_path: &str) -> String {
    let without_extension = match relative_path.rfind('.') {
        Some(dot) if dot > relative_path.rfind('/').map_or(0, |s| s + 1) => &relative_path[..dot],
        _ => relative_path,
    };
    without_extension.trim_start_matches("./").replace('/', ".")
}

/// First existing candidate path
pub(crate) fn first_existing(candidates: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    candidates.into_iter().find(|p| p.is_file())
}

/// Whether `path` lies under `root`
pub(crate) fn within_root(path: &Path, root: &Path) -> bool {
    match (path.canonicalize(), root.canonicalize()) {
        (Ok(path), Ok(root)) => path.starts_with(root),
        _ => false,
    }
}
