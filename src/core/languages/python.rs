use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;
use tree_sitter::Node;

use super::{
    first_existing, within_root, BranchBlock, CallSite, CallerContext, Definition, DefinitionKind, GrammarRules,
    ImportBinding, ImportTable, ImportTarget, LanguageExtractor, LeafKind, LeafStatement, SourceLanguage,
};
use crate::core::call_graph::{CallType, DecisionType, ResolutionStatus};
use crate::core::metrics::ComplexityRules;
use crate::core::parser::{ParsedUnit, Session};
use crate::core::tree_utils::{
    compact, end_line, field_children, find_child_by_type, first_named_child, named_children,
    node_text, start_column, start_line, walk_tree,
};
use crate::core::type_resolver::{
    analyze_class_attributes, analyze_scope, is_class_name, resolve_type, unwrap_type, ScopeInfo,
};

/// Python front-end
pub struct PythonExtractor;

static RULES: GrammarRules = GrammarRules {
    call_kinds: &["call"],
    nested_scope_kinds: &["function_definition", "class_definition", "decorated_definition"],
    decision_kinds: &[
        ("if_statement", DecisionType::IfElse),
        ("match_statement", DecisionType::MatchCase),
        ("try_statement", DecisionType::TryExcept),
    ],
    ternary_kinds: &["conditional_expression"],
    loop_kinds: &["for_statement", "while_statement"],
    block_kinds: &["block"],
    self_receivers: &["self", "cls"],
    scope_separator: ".",
    complexity: ComplexityRules {
        decision_kinds: &[
            "if_statement",
            "elif_clause",
            "for_statement",
            "while_statement",
            "except_clause",
            "case_clause",
            "conditional_expression",
            "for_in_clause",
            "if_clause",
        ],
        boolean_kinds: &["boolean_operator"],
        boolean_operators: &[],
        nested_scope_kinds: &["function_definition", "class_definition"],
    },
};

const BUILTINS: &[&str] = &[
    "abs", "all", "any", "ascii", "bin", "bool", "breakpoint", "bytearray", "bytes", "callable", "chr",
    "classmethod", "compile", "complex", "delattr", "dict", "dir", "divmod", "enumerate", "eval", "exec",
    "filter", "float", "format", "frozenset", "getattr", "globals", "hasattr", "hash", "help", "hex", "id",
    "input", "int", "isinstance", "issubclass", "iter", "len", "list", "locals", "map", "max", "memoryview",
    "min", "next", "object", "oct", "open", "ord", "pow", "print", "property", "range", "repr", "reversed",
    "round", "set", "setattr", "slice", "sorted", "staticmethod", "str", "sum", "super", "tuple", "type",
    "vars", "zip", "Exception", "BaseException", "ValueError", "TypeError", "KeyError", "IndexError",
    "RuntimeError", "AttributeError", "NotImplementedError", "StopIteration", "OSError", "IOError",
    "FileNotFoundError", "PermissionError", "LookupError", "ArithmeticError", "ZeroDivisionError",
    "AssertionError", "ImportError", "TimeoutError", "ConnectionError",
];

const BUILTIN_METHODS: &[&str] = &[
    "append", "extend", "insert", "remove", "pop", "clear", "index", "count", "sort", "reverse", "copy",
    "keys", "values", "items", "get", "update", "setdefault", "popitem", "add", "discard", "union",
    "intersection", "difference", "issubset", "issuperset", "split", "rsplit", "join", "strip", "lstrip",
    "rstrip", "replace", "lower", "upper", "title", "capitalize", "startswith", "endswith", "format",
    "encode", "decode", "find", "rfind", "splitlines", "isdigit", "isalpha", "isspace", "zfill", "read",
    "write", "close", "readline", "readlines", "flush", "seek",
];

const STDLIB_MODULES: &[&str] = &[
    "abc", "argparse", "array", "asyncio", "base64", "bisect", "builtins", "calendar", "collections",
    "concurrent", "contextlib", "copy", "csv", "ctypes", "dataclasses", "datetime", "decimal", "difflib",
    "enum", "errno", "fnmatch", "fractions", "functools", "gc", "getpass", "glob", "gzip", "hashlib", "heapq",
    "hmac", "html", "http", "importlib", "inspect", "io", "ipaddress", "itertools", "json", "logging", "math",
    "mimetypes", "multiprocessing", "operator", "os", "pathlib", "pickle", "platform", "pprint", "queue",
    "random", "re", "secrets", "select", "shlex", "shutil", "signal", "socket", "sqlite3", "ssl", "stat",
    "statistics", "string", "struct", "subprocess", "sys", "tempfile", "textwrap", "threading", "time",
    "timeit", "traceback", "types", "typing", "unittest", "urllib", "uuid", "warnings", "weakref", "xml",
    "zipfile", "zlib",
];

const THIRD_PARTY_NAMESPACES: &[&str] = &[
    "np", "numpy", "pd", "pandas", "requests", "django", "flask", "fastapi", "sqlalchemy", "pydantic",
    "boto3", "yaml", "pytest", "celery", "redis", "httpx", "aiohttp", "torch", "tf", "plt", "matplotlib",
];

fn chained_call_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:(?P<object>[A-Za-z_][\w\.]*)\.)?(?P<callee>[A-Za-z_]\w*)\(.*\)$").ok())
        .as_ref()
}

impl PythonExtractor {
    fn owning_class<'t>(&self, function: Node<'t>, source: &str) -> Option<String> {
        // A method sits in the class body block, possibly behind a decorator
        let mut parent = function.parent()?;
        if parent.kind() == "decorated_definition" {
            parent = parent.parent()?;
        }
        if parent.kind() != "block" {
            return None;
        }
        let class = parent.parent().filter(|p| p.kind() == "class_definition")?;
        class.child_by_field_name("name").map(|n| node_text(n, source).to_string())
    }

    fn docstring(&self, definition: Node, source: &str) -> Option<String> {
        let body = definition.child_by_field_name("body")?;
        let first = first_named_child(body).filter(|n| n.kind() == "expression_statement")?;
        let string = first_named_child(first).filter(|n| n.kind() == "string")?;
        let text = node_text(string, source)
            .trim_start_matches(|c| c == 'r' || c == 'b' || c == 'u' || c == 'f')
            .trim_matches(|c| c == '"' || c == '\'')
            .trim();
        if text.is_empty() {
            None
        } else {
            Some(compact(text))
        }
    }

    fn module_candidates(base: &Path, segments: &[&str]) -> Vec<PathBuf> {
        if segments.is_empty() {
            return vec![base.join("__init__.py")];
        }
        let mut path = base.to_path_buf();
        for segment in segments {
            path.push(segment);
        }
        vec![path.with_extension("py"), path.join("__init__.py")]
    }

    /// Resolve a dotted or relative module path to a file inside the project
    fn resolve_module(&self, module: &str, file: &Path, project_root: &Path) -> Option<PathBuf> {
        let dots = module.chars().take_while(|c| *c == '.').count();
        let rest = &module[dots..];
        let segments: Vec<&str> = rest.split('.').filter(|s| !s.is_empty()).collect();

        if dots > 0 {
            let mut base = file.parent()?.to_path_buf();
            for _ in 1..dots {
                base = base.parent()?.to_path_buf();
            }
            let candidates = Self::module_candidates(&base, &segments);
            // Relative imports always point into the project, even when the
            // file is missing; loading it later reports the failure.
            return first_existing(candidates.clone()).or_else(|| candidates.into_iter().next());
        }

        let bases = [
            project_root.to_path_buf(),
            project_root.join("src"),
            file.parent().map(Path::to_path_buf).unwrap_or_default(),
        ];
        bases
            .iter()
            .flat_map(|base| Self::module_candidates(base, &segments))
            .find(|candidate| candidate.is_file() && within_root(candidate, project_root))
    }

    fn classify_module(module: &str) -> ImportTarget {
        let top = module.split('.').next().unwrap_or(module);
        if STDLIB_MODULES.contains(&top) {
            ImportTarget::Stdlib
        } else {
            ImportTarget::ThirdParty
        }
    }

    fn module_target(&self, module: &str, file: &Path, project_root: &Path) -> ImportTarget {
        match self.resolve_module(module, file, project_root) {
            Some(path) => ImportTarget::Project(path),
            None => Self::classify_module(module),
        }
    }

    fn import_names(node: Node, source: &str) -> Vec<(String, String)> {
        field_children(node, "name")
            .into_iter()
            .filter_map(|name| match name.kind() {
                "aliased_import" => {
                    let original = name.child_by_field_name("name")?;
                    let alias = name.child_by_field_name("alias")?;
                    Some((node_text(original, source).to_string(), node_text(alias, source).to_string()))
                }
                _ => {
                    let text = node_text(name, source).to_string();
                    Some((text.clone(), text))
                }
            })
            .collect()
    }

    /// Declared return types of callables visible in the caller's file
    fn return_types(&self, unit: &ParsedUnit, session: &mut Session) -> HashMap<String, String> {
        let mut types: HashMap<String, String> = unit
            .definitions
            .iter()
            .filter(|d| d.kind == DefinitionKind::Function)
            .filter_map(|d| d.return_type.clone().map(|t| (d.name.clone(), t)))
            .collect();

        for binding in &unit.imports.bindings {
            let (ImportTarget::Project(path), Some(imported)) = (&binding.target, &binding.imported_name) else {
                continue;
            };
            if types.contains_key(&binding.local_name) {
                continue;
            }
            if let Ok(imported_unit) = session.load(path) {
                if let Some(return_type) = imported_unit.find_function(imported).and_then(|d| d.return_type.clone()) {
                    types.insert(binding.local_name.clone(), return_type);
                }
            }
        }
        types
    }

    fn function_scope(&self, caller: &CallerContext, session: &mut Session) -> Option<Rc<ScopeInfo>> {
        if let Some(scope) = session.scope_cache.get(&caller.node_id) {
            return Some(Rc::clone(scope));
        }
        let return_types = self.return_types(&caller.unit, session);
        let node = caller.unit.node_for(&caller.definition)?;
        let scope = Rc::new(analyze_scope(node, &caller.unit.source, &return_types));
        session.scope_cache.insert(caller.node_id.clone(), Rc::clone(&scope));
        Some(scope)
    }

    fn attribute_type(&self, class_name: &str, attribute: &str, caller: &CallerContext, session: &mut Session) -> Option<String> {
        let key = format!("attrs:{}:{}", caller.unit.relative_path, class_name);
        if !session.scope_cache.contains_key(&key) {
            let return_types = self.return_types(&caller.unit, session);
            let mut attributes = ScopeInfo::default();
            if let Some(init) = caller.unit.find_method(class_name, "__init__") {
                if let Some(node) = caller.unit.node_for(init) {
                    attributes.variables = analyze_class_attributes(node, &caller.unit.source, &return_types);
                }
            }
            session.scope_cache.insert(key.clone(), Rc::new(attributes));
        }
        session
            .scope_cache
            .get(&key)
            .and_then(|scope| scope.variables.get(attribute))
            .map(|info| info.name.clone())
    }

    fn chained_return_type(&self, receiver: &str, caller: &CallerContext, session: &mut Session) -> Option<String> {
        let captures = chained_call_regex()?.captures(receiver)?;
        let callee = captures.name("callee")?.as_str();
        let object = captures.name("object").map(|m| m.as_str());

        if is_class_name(callee) {
            return Some(callee.to_string());
        }

        let declared = match object {
            Some(receiver) if RULES.self_receivers.contains(&receiver) => {
                let class_name = caller.definition.class_name.as_deref()?;
                caller.unit.find_method(class_name, callee)?.return_type.clone()
            }
            Some(_) => None,
            None => self.return_types(&caller.unit, session).get(callee).cloned(),
        }?;
        unwrap_type(&declared)
    }
}

impl LanguageExtractor for PythonExtractor {
    fn language(&self) -> SourceLanguage {
        SourceLanguage::Python
    }

    fn rules(&self) -> &'static GrammarRules {
        &RULES
    }

    fn collect_definitions(&self, root: Node, source: &str) -> Vec<Definition> {
        let mut definitions = Vec::new();

        walk_tree(root, |node| {
            match node.kind() {
                "function_definition" => {
                    let Some(name) = node.child_by_field_name("name") else {
                        return true;
                    };
                    let class_name = self.owning_class(node, source);
                    definitions.push(Definition {
                        name: node_text(name, source).to_string(),
                        kind: if class_name.is_some() { DefinitionKind::Method } else { DefinitionKind::Function },
                        class_name,
                        namespace: None,
                        node_kind: "function_definition",
                        start_byte: node.start_byte(),
                        end_byte: node.end_byte(),
                        line: start_line(node),
                        column: start_column(node),
                        docstring: self.docstring(node, source),
                        return_type: node
                            .child_by_field_name("return_type")
                            .map(|t| node_text(t, source).to_string()),
                        bases: Vec::new(),
                    });
                }
                "class_definition" => {
                    let Some(name) = node.child_by_field_name("name") else {
                        return true;
                    };
                    let bases = node
                        .child_by_field_name("superclasses")
                        .map(|list| {
                            named_children(list)
                                .into_iter()
                                .filter(|b| matches!(b.kind(), "identifier" | "attribute"))
                                .map(|b| {
                                    let text = node_text(b, source);
                                    text.rsplit('.').next().unwrap_or(text).to_string()
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    definitions.push(Definition {
                        name: node_text(name, source).to_string(),
                        kind: DefinitionKind::Class,
                        class_name: None,
                        namespace: None,
                        node_kind: "class_definition",
                        start_byte: node.start_byte(),
                        end_byte: node.end_byte(),
                        line: start_line(node),
                        column: start_column(node),
                        docstring: self.docstring(node, source),
                        return_type: None,
                        bases,
                    });
                }
                _ => {}
            }
            true
        });

        definitions
    }

    fn collect_imports(&self, root: Node, source: &str, file: &Path, project_root: &Path) -> ImportTable {
        let mut table = ImportTable::default();

        walk_tree(root, |node| {
            match node.kind() {
                "import_statement" => {
                    for (module, alias) in Self::import_names(node, source) {
                        // `import a.b` binds `a`, `import a.b as c` binds `c`
                        let local_name = if alias == module {
                            module.split('.').next().unwrap_or(&module).to_string()
                        } else {
                            alias
                        };
                        table.bindings.push(ImportBinding {
                            target: self.module_target(&module, file, project_root),
                            local_name,
                            module,
                            imported_name: None,
                        });
                    }
                    false
                }
                "import_from_statement" => {
                    let Some(module_node) = node.child_by_field_name("module_name") else {
                        return false;
                    };
                    let module = node_text(module_node, source).replace(' ', "");

                    if find_child_by_type(node, "wildcard_import").is_some() {
                        table.wildcards.push(ImportBinding {
                            local_name: "*".to_string(),
                            target: self.module_target(&module, file, project_root),
                            module,
                            imported_name: None,
                        });
                        return false;
                    }

                    for (imported, alias) in Self::import_names(node, source) {
                        let separator = if module.ends_with('.') { "" } else { "." };
                        let submodule = format!("{}{}{}", module, separator, imported);
                        let binding = match self.resolve_module(&submodule, file, project_root).filter(|p| p.is_file()) {
                            Some(path) => ImportBinding {
                                local_name: alias,
                                module: submodule,
                                imported_name: None,
                                target: ImportTarget::Project(path),
                            },
                            None => ImportBinding {
                                local_name: alias,
                                target: self.module_target(&module, file, project_root),
                                module: module.clone(),
                                imported_name: Some(imported),
                            },
                        };
                        table.bindings.push(binding);
                    }
                    false
                }
                _ => true,
            }
        });

        debug!(
            "{}: {} import bindings, {} wildcard imports",
            file.display(),
            table.bindings.len(),
            table.wildcards.len()
        );
        table
    }

    fn parse_call(&self, node: Node, source: &str) -> Option<CallSite> {
        let function = node.child_by_field_name("function")?;
        let arguments = node
            .child_by_field_name("arguments")
            .map(|a| compact(node_text(a, source)));

        let (name, receiver, call_type) = match function.kind() {
            "identifier" => {
                let name = node_text(function, source).to_string();
                let call_type = if is_class_name(&name) { CallType::Constructor } else { CallType::Direct };
                (name, None, call_type)
            }
            "attribute" => {
                let object = function.child_by_field_name("object")?;
                let attribute = function.child_by_field_name("attribute")?;
                let name = node_text(attribute, source).to_string();
                let receiver = compact(node_text(object, source));
                let call_type = if is_class_name(&name) {
                    CallType::Constructor
                } else if object.kind() == "identifier" && is_class_name(&receiver) {
                    CallType::Static
                } else {
                    CallType::Method
                };
                (name, Some(receiver), call_type)
            }
            _ => (compact(node_text(function, source)), None, CallType::Direct),
        };

        Some(CallSite {
            name,
            receiver,
            call_type,
            expression: compact(node_text(function, source)),
            arguments,
            line: start_line(node),
            column: start_column(node),
        })
    }

    fn decision_branches<'t>(&self, node: Node<'t>, source: &str) -> Vec<BranchBlock<'t>> {
        let mut branches = Vec::new();
        let block = |label: String, condition: Option<String>, body: Option<Node<'t>>| {
            body.map(|body| BranchBlock {
                label,
                condition,
                statements: named_children(body),
                start_line: start_line(body),
                end_line: end_line(body),
            })
        };

        match node.kind() {
            "if_statement" => {
                let condition = node.child_by_field_name("condition").map(|c| compact(node_text(c, source)));
                branches.extend(block("if".into(), condition, node.child_by_field_name("consequence")));
                for alternative in field_children(node, "alternative") {
                    match alternative.kind() {
                        "elif_clause" => {
                            let condition = alternative
                                .child_by_field_name("condition")
                                .map(|c| compact(node_text(c, source)));
                            branches.extend(block("elif".into(), condition, alternative.child_by_field_name("consequence")));
                        }
                        "else_clause" => {
                            branches.extend(block("else".into(), None, alternative.child_by_field_name("body")));
                        }
                        _ => {}
                    }
                }
            }
            "match_statement" => {
                let Some(body) = node.child_by_field_name("body") else {
                    return branches;
                };
                for case in named_children(body).into_iter().filter(|c| c.kind() == "case_clause") {
                    let pattern = named_children(case)
                        .into_iter()
                        .filter(|c| c.kind() == "case_pattern")
                        .map(|c| node_text(c, source).to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    let guard = case.child_by_field_name("guard").map(|g| node_text(g, source).to_string());
                    let condition = match guard {
                        Some(guard) => format!("{} {}", pattern, guard),
                        None => pattern.clone(),
                    };
                    branches.extend(block(
                        format!("case {}", pattern),
                        Some(compact(&condition)),
                        case.child_by_field_name("consequence"),
                    ));
                }
            }
            "try_statement" => {
                branches.extend(block("try".into(), None, node.child_by_field_name("body")));
                for clause in named_children(node) {
                    match clause.kind() {
                        "except_clause" | "except_group_clause" => {
                            let body = find_child_by_type(clause, "block");
                            let condition = clause
                                .child_by_field_name("value")
                                .or_else(|| named_children(clause).into_iter().find(|c| c.kind() != "block"))
                                .map(|c| compact(node_text(c, source)));
                            let label = match &condition {
                                Some(caught) => format!("except {}", caught),
                                None => "except".to_string(),
                            };
                            branches.extend(block(label, condition, body));
                        }
                        "else_clause" => {
                            branches.extend(block("else".into(), None, clause.child_by_field_name("body")));
                        }
                        "finally_clause" => {
                            branches.extend(block("finally".into(), None, find_child_by_type(clause, "block")));
                        }
                        _ => {}
                    }
                }
            }
            "conditional_expression" => {
                let parts = named_children(node);
                if let [when_true, condition, when_false] = parts.as_slice() {
                    let condition = compact(node_text(*condition, source));
                    let negated = format!("not {}", condition);
                    for (label, guard, value) in [("true", condition, *when_true), ("false", negated, *when_false)] {
                        branches.push(BranchBlock {
                            label: label.to_string(),
                            condition: Some(guard),
                            statements: vec![value],
                            start_line: start_line(value),
                            end_line: end_line(value),
                        });
                    }
                }
            }
            _ => {}
        }

        branches
    }

    fn decision_condition(&self, node: Node, source: &str) -> String {
        match node.kind() {
            "if_statement" => node
                .child_by_field_name("condition")
                .map(|c| compact(node_text(c, source)))
                .unwrap_or_default(),
            "match_statement" => field_children(node, "subject")
                .into_iter()
                .map(|s| compact(node_text(s, source)))
                .collect::<Vec<_>>()
                .join(", "),
            "conditional_expression" => named_children(node)
                .get(1)
                .map(|c| compact(node_text(*c, source)))
                .unwrap_or_default(),
            _ => "try".to_string(),
        }
    }

    fn leaf_statement(&self, node: Node, source: &str) -> Option<LeafStatement> {
        let text = compact(node_text(node, source));
        let value = || first_named_child(node).map(|v| compact(node_text(v, source)));
        let kind = match node.kind() {
            "return_statement" => LeafKind::Return,
            "raise_statement" => LeafKind::Raise,
            "pass_statement" => LeafKind::Pass,
            "break_statement" => LeafKind::Break,
            "continue_statement" => LeafKind::Continue,
            "expression_statement" => {
                let inner = first_named_child(node)?;
                if !matches!(inner.kind(), "assignment" | "augmented_assignment") {
                    return None;
                }
                let value = inner.child_by_field_name("right").map(|r| compact(node_text(r, source)));
                return Some(LeafStatement { kind: LeafKind::Assignment, text, value });
            }
            _ => return None,
        };
        Some(LeafStatement { kind, text, value: value() })
    }

    fn is_builtin(&self, name: &str) -> bool {
        BUILTINS.contains(&name)
    }

    fn is_builtin_method(&self, name: &str) -> bool {
        BUILTIN_METHODS.contains(&name)
    }

    fn classify_namespace(&self, root: &str) -> Option<ResolutionStatus> {
        if STDLIB_MODULES.contains(&root) {
            Some(ResolutionStatus::IgnoredStdlib)
        } else if THIRD_PARTY_NAMESPACES.contains(&root) {
            Some(ResolutionStatus::IgnoredThirdParty)
        } else {
            None
        }
    }

    fn constructor_name(&self, _class_name: &str) -> String {
        "__init__".to_string()
    }

    fn infer_receiver_type(&self, receiver: &str, caller: &CallerContext, session: &mut Session) -> Option<String> {
        if receiver.ends_with(')') {
            return self.chained_return_type(receiver, caller, session);
        }

        let segments: Vec<&str> = receiver.split('.').collect();
        match segments.as_slice() {
            [name] => {
                let scope = self.function_scope(caller, session)?;
                resolve_type(name, &scope).map(|info| info.name)
            }
            [owner, attribute] if RULES.self_receivers.contains(owner) => {
                let class_name = caller.definition.class_name.clone()?;
                if let Some(found) = self.attribute_type(&class_name, attribute, caller, session) {
                    return Some(found);
                }
                // Attributes initialized by a project base class
                let bases = caller.unit.find_class(&class_name)?.bases.clone();
                bases
                    .iter()
                    .find_map(|base| self.attribute_type(base, attribute, caller, session))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::ParserRegistry;
    use crate::core::tree_utils::find_descendants_by_type;
    use assert_fs::prelude::*;

    fn parse(source: &str) -> tree_sitter::Tree {
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&tree_sitter_python::LANGUAGE.into()).unwrap();
        parser.parse(source, None).unwrap()
    }

    fn calls(source: &str) -> Vec<CallSite> {
        let tree = parse(source);
        find_descendants_by_type(tree.root_node(), &["call"], &[])
            .into_iter()
            .filter_map(|n| PythonExtractor.parse_call(n, source))
            .collect()
    }

    #[test]
    fn test_call_parsing() {
        let found = calls("validate(order)\nself.repo.save(x)\nOrderService()\nUser.load(1)\nos.path.join(a, b)\n");
        assert_eq!(found.len(), 5);

        assert_eq!(found[0].name, "validate");
        assert_eq!(found[0].call_type, CallType::Direct);
        assert_eq!(found[0].arguments.as_deref(), Some("(order)"));

        assert_eq!(found[1].name, "save");
        assert_eq!(found[1].receiver.as_deref(), Some("self.repo"));
        assert_eq!(found[1].call_type, CallType::Method);
        assert_eq!(found[1].line, 2);

        assert_eq!(found[2].call_type, CallType::Constructor);
        assert_eq!(found[3].call_type, CallType::Static);
        assert_eq!(found[4].receiver_root(), Some("os"));
    }

    #[test]
    fn test_definitions_and_docstrings() {
        let source = r#"
class Base:
    pass

class Service(Base):
    """Handles orders."""

    @property
    def name(self):
        return "x"

    def run(self) -> "Result":
        pass

def helper():
    '''Helps.'''
    pass
"#;
        let tree = parse(source);
        let definitions = PythonExtractor.collect_definitions(tree.root_node(), source);

        let service = definitions.iter().find(|d| d.name == "Service").unwrap();
        assert_eq!(service.kind, DefinitionKind::Class);
        assert_eq!(service.bases, vec!["Base"]);
        assert_eq!(service.docstring.as_deref(), Some("Handles orders."));

        let name = definitions.iter().find(|d| d.name == "name").unwrap();
        assert_eq!(name.kind, DefinitionKind::Method);
        assert_eq!(name.class_name.as_deref(), Some("Service"));

        let run = definitions.iter().find(|d| d.name == "run").unwrap();
        assert_eq!(run.return_type.as_deref(), Some("\"Result\""));

        let helper = definitions.iter().find(|d| d.name == "helper").unwrap();
        assert_eq!(helper.kind, DefinitionKind::Function);
        assert_eq!(helper.docstring.as_deref(), Some("Helps."));
        assert_eq!(helper.line, 15);
    }

    #[test]
    fn test_if_elif_else_branches() {
        let source = "def f(x):\n    if x > 1:\n        a()\n    elif x:\n        b()\n    else:\n        c()\n        return 2\n";
        let tree = parse(source);
        let node = crate::core::tree_utils::first_descendant_by_type(tree.root_node(), "if_statement").unwrap();

        let branches = PythonExtractor.decision_branches(node, source);
        let labels: Vec<&str> = branches.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["if", "elif", "else"]);
        assert_eq!(branches[0].condition.as_deref(), Some("x > 1"));
        assert_eq!(branches[2].statements.len(), 2);
        assert_eq!(PythonExtractor.decision_condition(node, source), "x > 1");

        let leaf = PythonExtractor.leaf_statement(branches[2].statements[1], source).unwrap();
        assert_eq!(leaf.kind, LeafKind::Return);
        assert_eq!(leaf.value.as_deref(), Some("2"));
    }

    #[test]
    fn test_try_and_match_branches() {
        let source = r#"
def f(cmd):
    try:
        run()
    except ValueError as e:
        log()
    finally:
        close()
    match cmd:
        case "a":
            go()
        case _:
            stop()
"#;
        let tree = parse(source);
        let root = tree.root_node();

        let try_node = crate::core::tree_utils::first_descendant_by_type(root, "try_statement").unwrap();
        let labels: Vec<String> = PythonExtractor
            .decision_branches(try_node, source)
            .into_iter()
            .map(|b| b.label)
            .collect();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels[0], "try");
        assert!(labels[1].starts_with("except ValueError"));
        assert_eq!(labels[2], "finally");

        let match_node = crate::core::tree_utils::first_descendant_by_type(root, "match_statement").unwrap();
        let cases = PythonExtractor.decision_branches(match_node, source);
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].label, "case \"a\"");
        assert_eq!(PythonExtractor.decision_condition(match_node, source), "cmd");
    }

    #[test]
    fn test_ternary_branches() {
        let source = "x = fast() if ready else slow()\n";
        let tree = parse(source);
        let node = crate::core::tree_utils::first_descendant_by_type(tree.root_node(), "conditional_expression").unwrap();
        let branches = PythonExtractor.decision_branches(node, source);
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].label, "true");
        assert_eq!(branches[0].condition.as_deref(), Some("ready"));
        assert_eq!(branches[1].label, "false");
        assert_eq!(branches[1].condition.as_deref(), Some("not ready"));
    }

    #[test]
    fn test_import_resolution() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("app/__init__.py").touch().unwrap();
        temp.child("app/models.py").write_str("class User:\n    pass\n").unwrap();
        temp.child("app/util.py").write_str("def helper():\n    pass\n").unwrap();
        temp.child("app/main.py")
            .write_str(
                "import os\nimport requests\nfrom app.models import User\nfrom . import util\nfrom .util import helper as h\nfrom .missing import gone\nfrom collections import *\n",
            )
            .unwrap();

        let registry = ParserRegistry::with_all_languages();
        let mut session = Session::new(&registry, temp.path(), 1 << 20);
        let unit = session.load(temp.child("app/main.py").path()).unwrap();
        let imports = &unit.imports;

        assert_eq!(imports.lookup("os").unwrap().target, ImportTarget::Stdlib);
        assert_eq!(imports.lookup("requests").unwrap().target, ImportTarget::ThirdParty);

        let user = imports.lookup("User").unwrap();
        assert_eq!(user.imported_name.as_deref(), Some("User"));
        assert!(matches!(&user.target, ImportTarget::Project(p) if p.ends_with("app/models.py")));

        let util = imports.lookup("util").unwrap();
        assert!(util.imported_name.is_none());
        assert!(matches!(&util.target, ImportTarget::Project(p) if p.ends_with("app/util.py")));

        let helper = imports.lookup("h").unwrap();
        assert_eq!(helper.imported_name.as_deref(), Some("helper"));

        // relative imports stay in the project even when the file is gone
        let gone = imports.lookup("gone").unwrap();
        assert!(matches!(&gone.target, ImportTarget::Project(p) if !p.exists()));

        assert_eq!(imports.wildcards.len(), 1);
        assert_eq!(imports.wildcards[0].target, ImportTarget::Stdlib);
    }

    #[test]
    fn test_receiver_type_inference() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("svc.py")
            .write_str(
                r#"
class Repo:
    def save(self):
        pass

def make_repo() -> Repo:
    return Repo()

class Service:
    def __init__(self, repo: Repo):
        self.repo = repo
        self.cache = Cache()

    def run(self, other: "Repo"):
        local = Repo()
        made = make_repo()
        self.repo.save()
"#,
            )
            .unwrap();

        let registry = ParserRegistry::with_all_languages();
        let mut session = Session::new(&registry, temp.path(), 1 << 20);
        let unit = session.load(temp.child("svc.py").path()).unwrap();
        let run = unit.find_method("Service", "run").unwrap().clone();
        let caller = CallerContext {
            node_id: unit.symbol_id(&run, temp.path()),
            unit: Rc::clone(&unit),
            definition: run,
        };

        let infer = |receiver: &str, session: &mut Session| PythonExtractor.infer_receiver_type(receiver, &caller, session);
        assert_eq!(infer("other", &mut session).as_deref(), Some("Repo"));
        assert_eq!(infer("local", &mut session).as_deref(), Some("Repo"));
        assert_eq!(infer("made", &mut session).as_deref(), Some("Repo"));
        assert_eq!(infer("self.repo", &mut session).as_deref(), Some("Repo"));
        assert_eq!(infer("self.cache", &mut session).as_deref(), Some("Cache"));
        assert_eq!(infer("make_repo()", &mut session).as_deref(), Some("Repo"));
        assert_eq!(infer("unknown", &mut session), None);
    }

    #[test]
    fn test_classification_tables() {
        assert!(PythonExtractor.is_builtin("print"));
        assert!(!PythonExtractor.is_builtin("process"));
        assert!(PythonExtractor.is_builtin_method("append"));
        assert_eq!(PythonExtractor.classify_namespace("json"), Some(ResolutionStatus::IgnoredStdlib));
        assert_eq!(PythonExtractor.classify_namespace("np"), Some(ResolutionStatus::IgnoredThirdParty));
        assert_eq!(PythonExtractor.classify_namespace("orders"), None);
    }
}
