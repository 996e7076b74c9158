//! Heuristic receiver typing for the Python front-end.
//!
//! Types come only from parameter annotations, annotated assignments,
//! constructor-shaped assignments and declared return types. There is no
//! dataflow: the first candidate of the strongest source wins.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tree_sitter::Node;

use super::tree_utils::{first_named_child, named_children, node_text, walk_tree};

/// Where a type came from, strongest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeSource {
    Parameter,
    Annotation,
    Constructor,
    ReturnType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeInfo {
    pub name: String,
    pub source: TypeSource,
}

impl TypeInfo {
    pub fn new(name: impl Into<String>, source: TypeSource) -> Self {
        Self { name: name.into(), source }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeInfo {
    pub parameters: HashMap<String, TypeInfo>,
    pub variables: HashMap<String, TypeInfo>,
}

impl ScopeInfo {
    /// Record a variable type unless a stronger (or equally strong, earlier)
    /// candidate is already known
    pub fn record_variable(&mut self, name: &str, info: TypeInfo) {
        record(&mut self.variables, name, info);
    }
}

fn record(map: &mut HashMap<String, TypeInfo>, name: &str, info: TypeInfo) {
    match map.get(name) {
        Some(existing) if existing.source <= info.source => {}
        _ => {
            map.insert(name.to_string(), info);
        }
    }
}

const BUILTIN_TYPE_NAMES: &[&str] = &[
    "Any", "Callable", "ClassVar", "Dict", "DefaultDict", "Deque", "Final", "FrozenSet", "Generator",
    "Iterable", "Iterator", "List", "Literal", "Mapping", "MutableMapping", "NamedTuple", "None",
    "NoReturn", "Optional", "OrderedDict", "Counter", "Sequence", "Set", "Tuple", "Type", "TypeVar",
    "Union", "True", "False", "Exception", "BaseException", "ValueError", "TypeError", "KeyError",
    "IndexError", "RuntimeError", "AttributeError", "NotImplementedError", "StopIteration",
    "OSError", "IOError",
];

/// PascalCase identifier that is not a builtin/typing name
pub fn is_class_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_uppercase()
        && name.chars().all(|c| c.is_alphanumeric() || c == '_')
        && name.chars().any(|c| c.is_ascii_lowercase())
        && !BUILTIN_TYPE_NAMES.contains(&name)
}

fn annotation_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<name>[A-Za-z_][A-Za-z0-9_\.]*)\s*(?:\[(?P<inner>.*)\])?$").ok())
        .as_ref()
}

/// Reduce an annotation to a single type name.
///
/// Unwraps one layer: `Optional[X]` → `X`, `Union[X, Y]` → `X`,
/// `X | None` → `X`, `List[X]` → `List`, `"X"` → `X`, `mod.X` → `X`.
pub fn unwrap_type(annotation: &str) -> Option<String> {
    let text = annotation.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    if text.is_empty() {
        return None;
    }

    let alternatives = split_top_level(text, '|');
    if alternatives.len() > 1 {
        let first = alternatives.iter().find(|a| a.trim() != "None")?;
        return unwrap_type(first);
    }

    let captures = annotation_regex()?.captures(text)?;
    let name = captures.name("name")?.as_str();
    let short = name.rsplit('.').next().unwrap_or(name);

    match (short, captures.name("inner")) {
        ("Optional" | "Union", Some(inner)) => {
            let args = split_top_level(inner.as_str(), ',');
            let first = args.iter().find(|a| a.trim() != "None")?;
            let first = first.trim().trim_matches(|c| c == '"' || c == '\'');
            let base = first.split('[').next().unwrap_or(first).trim();
            Some(base.rsplit('.').next().unwrap_or(base).to_string())
        }
        _ => Some(short.to_string()),
    }
}

fn split_top_level(text: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => depth -= 1,
            _ => {}
        }
        if c == separator && depth == 0 {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

const SCOPE_BOUNDARIES: &[&str] = &["function_definition", "class_definition", "lambda"];

/// Build the type scope of a Python function.
///
/// `return_types` maps callable names visible in the file (local or
/// imported) to their declared return annotation.
pub fn analyze_scope(function: Node, source: &str, return_types: &HashMap<String, String>) -> ScopeInfo {
    let mut scope = ScopeInfo::default();

    if let Some(parameters) = function.child_by_field_name("parameters") {
        for param in named_children(parameters) {
            if let Some((name, annotation)) = typed_parameter(param, source) {
                if let Some(type_name) = unwrap_type(&annotation) {
                    record(&mut scope.parameters, &name, TypeInfo::new(type_name, TypeSource::Parameter));
                }
            }
        }
    }

    if let Some(body) = function.child_by_field_name("body") {
        walk_tree(body, |node| {
            if node.id() != body.id() && SCOPE_BOUNDARIES.contains(&node.kind()) {
                return false;
            }
            if node.kind() == "assignment" {
                if let Some(left) = node.child_by_field_name("left") {
                    if left.kind() == "identifier" {
                        if let Some(info) = assignment_type(node, source, return_types) {
                            scope.record_variable(node_text(left, source), info);
                        }
                    }
                }
            }
            true
        });
    }

    scope
}

/// Types of `self.<attr>` assigned in a class's `__init__`
pub fn analyze_class_attributes(
    init: Node,
    source: &str,
    return_types: &HashMap<String, String>,
) -> HashMap<String, TypeInfo> {
    let init_scope = analyze_scope(init, source, return_types);
    let mut attributes = HashMap::new();

    let Some(body) = init.child_by_field_name("body") else {
        return attributes;
    };

    walk_tree(body, |node| {
        if node.id() != body.id() && SCOPE_BOUNDARIES.contains(&node.kind()) {
            return false;
        }
        if node.kind() != "assignment" {
            return true;
        }
        let Some(left) = node.child_by_field_name("left") else {
            return true;
        };
        if left.kind() != "attribute" {
            return true;
        }
        let object = left.child_by_field_name("object").map(|o| node_text(o, source));
        let attribute = left.child_by_field_name("attribute").map(|a| node_text(a, source));
        if let (Some("self"), Some(attribute)) = (object, attribute) {
            let from_parameter = node
                .child_by_field_name("right")
                .filter(|r| r.kind() == "identifier")
                .and_then(|r| resolve_type(node_text(r, source), &init_scope))
                .map(|info| TypeInfo::new(info.name, TypeSource::Parameter));

            if let Some(info) = from_parameter.or_else(|| assignment_type(node, source, return_types)) {
                record(&mut attributes, attribute, info);
            }
        }
        true
    });

    attributes
}

/// Look a name up in parameter scope, then variable scope
pub fn resolve_type(name: &str, scope: &ScopeInfo) -> Option<TypeInfo> {
    scope
        .parameters
        .get(name)
        .or_else(|| scope.variables.get(name))
        .cloned()
}

fn typed_parameter(param: Node, source: &str) -> Option<(String, String)> {
    let annotation = param.child_by_field_name("type")?;
    let name = match param.kind() {
        "typed_parameter" => first_named_child(param).filter(|n| n.kind() == "identifier")?,
        "typed_default_parameter" => param.child_by_field_name("name")?,
        _ => return None,
    };
    Some((node_text(name, source).to_string(), node_text(annotation, source).to_string()))
}

fn assignment_type(assignment: Node, source: &str, return_types: &HashMap<String, String>) -> Option<TypeInfo> {
    if let Some(annotation) = assignment.child_by_field_name("type") {
        if let Some(name) = unwrap_type(node_text(annotation, source)) {
            return Some(TypeInfo::new(name, TypeSource::Annotation));
        }
    }

    let right = assignment.child_by_field_name("right")?;
    if right.kind() != "call" {
        return None;
    }
    let function = right.child_by_field_name("function")?;
    let callee = match function.kind() {
        "identifier" => node_text(function, source),
        "attribute" => node_text(function.child_by_field_name("attribute")?, source),
        _ => return None,
    };

    if function.kind() == "identifier" && is_class_name(callee) {
        return Some(TypeInfo::new(callee, TypeSource::Constructor));
    }
    if function.kind() == "attribute" && is_class_name(callee) {
        // models.User(...)
        return Some(TypeInfo::new(callee, TypeSource::Constructor));
    }

    return_types
        .get(callee)
        .and_then(|annotation| unwrap_type(annotation))
        .map(|name| TypeInfo::new(name, TypeSource::ReturnType))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tree_utils::first_descendant_by_type;
    use tree_sitter::{Parser, Tree};

    fn parse(source: &str) -> Tree {
        let mut parser = Parser::new();
        parser.set_language(&tree_sitter_python::LANGUAGE.into()).unwrap();
        parser.parse(source, None).unwrap()
    }

    #[test]
    fn test_unwrap_type() {
        assert_eq!(unwrap_type("Optional[User]").as_deref(), Some("User"));
        assert_eq!(unwrap_type("typing.Optional[models.User]").as_deref(), Some("User"));
        assert_eq!(unwrap_type("User | None").as_deref(), Some("User"));
        assert_eq!(unwrap_type("None | User").as_deref(), Some("User"));
        assert_eq!(unwrap_type("List[User]").as_deref(), Some("List"));
        assert_eq!(unwrap_type("Union[Repo, None]").as_deref(), Some("Repo"));
        assert_eq!(unwrap_type("'Order'").as_deref(), Some("Order"));
        assert_eq!(unwrap_type("").as_deref(), None);
    }

    #[test]
    fn test_class_name_heuristic() {
        assert!(is_class_name("OrderService"));
        assert!(is_class_name("Repo"));
        assert!(!is_class_name("dict"));
        assert!(!is_class_name("MAX_SIZE"));
        assert!(!is_class_name("Optional"));
        assert!(!is_class_name("ValueError"));
    }

    #[test]
    fn test_scope_priorities() {
        let source = r#"
def handle(repo: Repository, count: int, plain):
    service = OrderService()
    service: BillingService = build()
    other = make_client()
    items = list()
    data = dict(a=1)
    repo = FakeRepo()
"#;
        let tree = parse(source);
        let func = first_descendant_by_type(tree.root_node(), "function_definition").unwrap();
        let mut return_types = HashMap::new();
        return_types.insert("make_client".to_string(), "Optional[Client]".to_string());

        let scope = analyze_scope(func, source, &return_types);

        assert_eq!(scope.parameters["repo"], TypeInfo::new("Repository", TypeSource::Parameter));
        assert_eq!(scope.parameters["count"].name, "int");
        assert!(!scope.parameters.contains_key("plain"));

        // annotation beats the earlier constructor assignment
        assert_eq!(scope.variables["service"], TypeInfo::new("BillingService", TypeSource::Annotation));
        assert_eq!(scope.variables["other"], TypeInfo::new("Client", TypeSource::ReturnType));
        assert!(!scope.variables.contains_key("items"));
        assert!(!scope.variables.contains_key("data"));

        // parameters are consulted before variables
        assert_eq!(resolve_type("repo", &scope).unwrap().name, "Repository");
        assert!(resolve_type("missing", &scope).is_none());
    }

    #[test]
    fn test_class_attributes_from_init() {
        let source = r#"
class OrderService:
    def __init__(self, repo: Repository, notifier):
        self.repo = repo
        self.cache = Cache()
        self.audit: AuditLog = create_audit()
        self.notifier = notifier
"#;
        let tree = parse(source);
        let init = first_descendant_by_type(tree.root_node(), "function_definition").unwrap();
        let attributes = analyze_class_attributes(init, source, &HashMap::new());

        assert_eq!(attributes["repo"], TypeInfo::new("Repository", TypeSource::Parameter));
        assert_eq!(attributes["cache"], TypeInfo::new("Cache", TypeSource::Constructor));
        assert_eq!(attributes["audit"], TypeInfo::new("AuditLog", TypeSource::Annotation));
        assert!(!attributes.contains_key("notifier"));
    }
}
