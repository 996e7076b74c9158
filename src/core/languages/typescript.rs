use std::path::{Path, PathBuf};

use tracing::debug;
use tree_sitter::Node;

use super::{
    first_existing, within_root, BranchBlock, CallSite, CallerContext, Definition, DefinitionKind, GrammarRules,
    ImportBinding, ImportTable, ImportTarget, LanguageExtractor, LeafKind, LeafStatement, SourceLanguage,
};
use crate::core::call_graph::{CallType, DecisionType, ResolutionStatus};
use crate::core::metrics::ComplexityRules;
use crate::core::parser::Session;
use crate::core::tree_utils::{
    compact, end_line, enclosing_ancestor, field_children, find_child_by_type, first_named_child, leading_comment,
    named_children, node_text, start_column, start_line, walk_tree,
};

/// TypeScript and JavaScript front-end
pub struct TypeScriptExtractor;

static RULES: GrammarRules = GrammarRules {
    call_kinds: &["call_expression", "new_expression"],
    nested_scope_kinds: &[
        "function_declaration",
        "generator_function_declaration",
        "class_declaration",
        "abstract_class_declaration",
        "class",
        "method_definition",
    ],
    decision_kinds: &[
        ("if_statement", DecisionType::IfElse),
        ("switch_statement", DecisionType::MatchCase),
        ("try_statement", DecisionType::TryExcept),
    ],
    ternary_kinds: &["ternary_expression"],
    loop_kinds: &["for_statement", "for_in_statement", "while_statement", "do_statement"],
    block_kinds: &["statement_block"],
    self_receivers: &["this"],
    scope_separator: ".",
    complexity: ComplexityRules {
        decision_kinds: &[
            "if_statement",
            "for_statement",
            "for_in_statement",
            "while_statement",
            "do_statement",
            "switch_case",
            "catch_clause",
            "ternary_expression",
        ],
        boolean_kinds: &["binary_expression"],
        boolean_operators: &["&&", "||", "??"],
        nested_scope_kinds: &["function_declaration", "class_declaration", "method_definition"],
    },
};

const BUILTINS: &[&str] = &[
    "parseInt", "parseFloat", "isNaN", "isFinite", "setTimeout", "setInterval", "clearTimeout",
    "clearInterval", "setImmediate", "queueMicrotask", "structuredClone", "require", "encodeURIComponent",
    "decodeURIComponent", "encodeURI", "decodeURI", "String", "Number", "Boolean", "Array", "Object", "Symbol",
    "BigInt", "Date", "Error", "TypeError", "RangeError", "SyntaxError", "Promise", "Map", "Set", "WeakMap",
    "WeakSet", "RegExp", "fetch", "alert", "atob", "btoa", "super",
];

const BUILTIN_NAMESPACES: &[&str] = &[
    "console", "Math", "JSON", "Object", "Array", "Promise", "Reflect", "Number", "String", "Date", "Symbol",
    "Intl", "window", "document", "globalThis", "navigator", "localStorage", "sessionStorage",
];

const NODE_MODULES: &[&str] = &[
    "assert", "buffer", "child_process", "cluster", "crypto", "dns", "events", "fs", "fs/promises", "http",
    "https", "net", "os", "path", "process", "querystring", "readline", "stream", "string_decoder", "timers",
    "tls", "url", "util", "worker_threads", "zlib",
];

const THIRD_PARTY_NAMESPACES: &[&str] = &[
    "_", "lodash", "axios", "express", "React", "ReactDOM", "$", "jQuery", "moment", "dayjs", "Vue", "rxjs",
    "z", "yup", "knex", "mongoose",
];

const BUILTIN_METHODS: &[&str] = &[
    "map", "filter", "reduce", "forEach", "find", "findIndex", "some", "every", "includes", "indexOf", "push",
    "pop", "shift", "unshift", "slice", "splice", "concat", "join", "sort", "reverse", "keys", "values",
    "entries", "has", "get", "set", "delete", "add", "clear", "then", "catch", "finally", "toString", "trim",
    "split", "replace", "toLowerCase", "toUpperCase", "startsWith", "endsWith", "substring", "padStart",
    "padEnd", "match", "test", "exec", "flat", "flatMap", "fill", "at", "toFixed", "charAt", "localeCompare",
];

const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs"];

const FUNCTION_VALUE_KINDS: &[&str] = &["arrow_function", "function_expression", "function", "generator_function"];

/// Reduce a type annotation to a class name (`: Promise<Repo | null>` → `Repo`)
fn type_name(annotation: &str) -> Option<String> {
    let text = annotation.trim().trim_start_matches(':').trim();
    let first = text
        .split('|')
        .map(str::trim)
        .find(|t| !t.is_empty() && *t != "null" && *t != "undefined")?;

    for wrapper in ["Promise<", "Readonly<", "Partial<", "Required<"] {
        if let Some(inner) = first.strip_prefix(wrapper).and_then(|t| t.strip_suffix('>')) {
            return type_name(inner);
        }
    }
    if first.ends_with("[]") {
        return None;
    }
    let base = first.split('<').next().unwrap_or(first).trim();
    let short = base.rsplit('.').next().unwrap_or(base);
    if short.is_empty() {
        None
    } else {
        Some(short.to_string())
    }
}

impl TypeScriptExtractor {
    fn enclosing_class_name(&self, node: Node, source: &str) -> Option<String> {
        let class = enclosing_ancestor(node, &["class_declaration", "abstract_class_declaration", "class"])?;
        class.child_by_field_name("name").map(|n| node_text(n, source).to_string())
    }

    /// The statement a comment would sit above
    fn documented_node<'t>(&self, node: Node<'t>) -> Node<'t> {
        let mut current = node;
        while let Some(parent) = current.parent() {
            if !matches!(parent.kind(), "export_statement" | "lexical_declaration" | "variable_declaration") {
                break;
            }
            current = parent;
        }
        current
    }

    fn definition(
        &self,
        node: Node,
        name: Node,
        kind: DefinitionKind,
        class_name: Option<String>,
        function: Option<Node>,
        source: &str,
    ) -> Definition {
        Definition {
            name: node_text(name, source).to_string(),
            kind,
            class_name,
            namespace: None,
            node_kind: node.kind(),
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            line: start_line(node),
            column: start_column(node),
            docstring: leading_comment(self.documented_node(node), source),
            return_type: function
                .and_then(|f| f.child_by_field_name("return_type"))
                .map(|t| node_text(t, source).trim_start_matches(':').trim().to_string()),
            bases: Vec::new(),
        }
    }

    fn module_candidates(base: &Path) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(extension) = base.extension().and_then(|e| e.to_str()) {
            candidates.push(base.to_path_buf());
            // ESM sources import `./x.js` for `./x.ts`
            if matches!(extension, "js" | "jsx" | "mjs") {
                candidates.push(base.with_extension("ts"));
                candidates.push(base.with_extension("tsx"));
            }
        }
        for extension in SOURCE_EXTENSIONS {
            let mut with_extension = base.as_os_str().to_os_string();
            with_extension.push(".");
            with_extension.push(extension);
            candidates.push(PathBuf::from(with_extension));
        }
        for extension in SOURCE_EXTENSIONS {
            candidates.push(base.join(format!("index.{}", extension)));
        }
        candidates
    }

    fn module_target(&self, specifier: &str, file: &Path, project_root: &Path) -> ImportTarget {
        if specifier.starts_with('.') || specifier.starts_with('/') {
            let base = match specifier.strip_prefix('/') {
                Some(absolute) => project_root.join(absolute),
                None => file.parent().unwrap_or(project_root).join(specifier),
            };
            let candidates = Self::module_candidates(&base);
            // Relative specifiers always name project files
            let fallback = candidates.first().cloned().unwrap_or_else(|| base.clone());
            return ImportTarget::Project(first_existing(candidates).unwrap_or(fallback));
        }

        let bare = specifier.trim_start_matches("node:");
        if specifier.starts_with("node:") || NODE_MODULES.contains(&bare) {
            return ImportTarget::Stdlib;
        }

        let in_project = [project_root.join(specifier), project_root.join("src").join(specifier)]
            .iter()
            .flat_map(|base| Self::module_candidates(base))
            .find(|candidate| candidate.is_file() && within_root(candidate, project_root));
        match in_project {
            Some(path) => ImportTarget::Project(path),
            None => ImportTarget::ThirdParty,
        }
    }

    fn string_value(node: Node, source: &str) -> String {
        node_text(node, source)
            .trim_matches(|c| c == '"' || c == '\'' || c == '`')
            .to_string()
    }

    fn import_bindings(&self, node: Node, source: &str, target: &ImportTarget, module: &str) -> Vec<ImportBinding> {
        let mut bindings = Vec::new();
        let binding = |local: &str, imported: Option<&str>| ImportBinding {
            local_name: local.to_string(),
            module: module.to_string(),
            imported_name: imported.map(str::to_string),
            target: target.clone(),
        };

        let Some(clause) = find_child_by_type(node, "import_clause") else {
            return bindings;
        };
        for part in named_children(clause) {
            match part.kind() {
                // Default exports are assumed to carry the name they are imported under
                "identifier" => {
                    let local = node_text(part, source);
                    bindings.push(binding(local, Some(local)));
                }
                "namespace_import" => {
                    if let Some(local) = find_child_by_type(part, "identifier") {
                        bindings.push(binding(node_text(local, source), None));
                    }
                }
                "named_imports" => {
                    for specifier in named_children(part).into_iter().filter(|s| s.kind() == "import_specifier") {
                        let Some(name) = specifier.child_by_field_name("name") else {
                            continue;
                        };
                        let imported = node_text(name, source);
                        let local = specifier
                            .child_by_field_name("alias")
                            .map(|a| node_text(a, source))
                            .unwrap_or(imported);
                        bindings.push(binding(local, Some(imported)));
                    }
                }
                _ => {}
            }
        }
        bindings
    }

    /// `const repo = require('./repo')` and `const { a } = require('x')`
    fn require_bindings(&self, declarator: Node, source: &str, file: &Path, project_root: &Path) -> Vec<ImportBinding> {
        let Some(value) = declarator.child_by_field_name("value") else {
            return Vec::new();
        };
        if value.kind() != "call_expression" {
            return Vec::new();
        }
        let is_require = value
            .child_by_field_name("function")
            .map_or(false, |f| node_text(f, source) == "require");
        let specifier = value
            .child_by_field_name("arguments")
            .and_then(first_named_child)
            .filter(|a| a.kind() == "string");
        let (true, Some(specifier), Some(pattern)) = (is_require, specifier, declarator.child_by_field_name("name")) else {
            return Vec::new();
        };

        let module = Self::string_value(specifier, source);
        let target = self.module_target(&module, file, project_root);
        match pattern.kind() {
            "identifier" => vec![ImportBinding {
                local_name: node_text(pattern, source).to_string(),
                module,
                imported_name: None,
                target,
            }],
            "object_pattern" => named_children(pattern)
                .into_iter()
                .filter(|p| p.kind() == "shorthand_property_identifier_pattern")
                .map(|p| ImportBinding {
                    local_name: node_text(p, source).to_string(),
                    module: module.clone(),
                    imported_name: Some(node_text(p, source).to_string()),
                    target: target.clone(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Declared type of a parameter or variable named `name` inside `scope`
    fn declared_type(&self, scope: Node, name: &str, caller: &CallerContext, source: &str) -> Option<String> {
        let mut found = None;
        walk_tree(scope, |node| {
            if found.is_some() {
                return false;
            }
            match node.kind() {
                "required_parameter" | "optional_parameter" => {
                    let matches = node
                        .child_by_field_name("pattern")
                        .map_or(false, |p| node_text(p, source) == name);
                    if matches {
                        found = node
                            .child_by_field_name("type")
                            .and_then(|t| type_name(node_text(t, source)));
                    }
                }
                "variable_declarator" => {
                    let matches = node
                        .child_by_field_name("name")
                        .map_or(false, |n| node_text(n, source) == name);
                    if matches {
                        found = node
                            .child_by_field_name("type")
                            .and_then(|t| type_name(node_text(t, source)))
                            .or_else(|| {
                                node.child_by_field_name("value")
                                    .and_then(|v| self.value_type(v, caller, source))
                            });
                    }
                }
                _ => {}
            }
            true
        });
        found
    }

    /// Type produced by an expression: `new Repo()`, `await makeRepo()`
    fn value_type(&self, value: Node, caller: &CallerContext, source: &str) -> Option<String> {
        match value.kind() {
            "new_expression" => value
                .child_by_field_name("constructor")
                .and_then(|c| type_name(node_text(c, source))),
            "await_expression" => first_named_child(value).and_then(|v| self.value_type(v, caller, source)),
            "call_expression" => {
                let function = value.child_by_field_name("function")?;
                let callee = match function.kind() {
                    "identifier" => node_text(function, source),
                    "member_expression" => node_text(function.child_by_field_name("property")?, source),
                    _ => return None,
                };
                self.return_type_of(callee, caller)
            }
            _ => None,
        }
    }

    fn return_type_of(&self, callee: &str, caller: &CallerContext) -> Option<String> {
        let unit = &caller.unit;
        let definition = caller
            .definition
            .class_name
            .as_deref()
            .and_then(|class| unit.find_method(class, callee))
            .or_else(|| unit.find_function(callee))?;
        type_name(definition.return_type.as_deref()?)
    }

    /// Type of `this.<member>` from fields, constructor parameter properties
    /// and constructor assignments
    fn member_type(&self, member: &str, caller: &CallerContext) -> Option<String> {
        let class_name = caller.definition.class_name.as_deref()?;
        let unit = &caller.unit;
        let class = unit.node_for(unit.find_class(class_name)?)?;
        let body = class.child_by_field_name("body")?;
        let source = unit.source.as_str();

        let mut found = None;
        for item in named_children(body) {
            match item.kind() {
                "public_field_definition" => {
                    let matches = item
                        .child_by_field_name("name")
                        .map_or(false, |n| node_text(n, source) == member);
                    if matches {
                        found = item
                            .child_by_field_name("type")
                            .and_then(|t| type_name(node_text(t, source)))
                            .or_else(|| item.child_by_field_name("value").and_then(|v| self.value_type(v, caller, source)));
                    }
                }
                "method_definition" => {
                    let is_constructor = item
                        .child_by_field_name("name")
                        .map_or(false, |n| node_text(n, source) == "constructor");
                    if !is_constructor {
                        continue;
                    }
                    found = self.constructor_member_type(item, member, caller, source);
                }
                _ => {}
            }
            if found.is_some() {
                break;
            }
        }
        found
    }

    fn constructor_member_type(&self, constructor: Node, member: &str, caller: &CallerContext, source: &str) -> Option<String> {
        if let Some(parameters) = constructor.child_by_field_name("parameters") {
            for parameter in named_children(parameters) {
                let is_property = find_child_by_type(parameter, "accessibility_modifier").is_some()
                    || find_child_by_type(parameter, "readonly").is_some();
                let matches = parameter
                    .child_by_field_name("pattern")
                    .map_or(false, |p| node_text(p, source) == member);
                if is_property && matches {
                    return parameter
                        .child_by_field_name("type")
                        .and_then(|t| type_name(node_text(t, source)));
                }
            }
        }

        let body = constructor.child_by_field_name("body")?;
        let mut found = None;
        walk_tree(body, |node| {
            if found.is_some() {
                return false;
            }
            if node.kind() == "assignment_expression" {
                let target = node.child_by_field_name("left").map(|l| node_text(l, source));
                if target == Some(format!("this.{}", member).as_str()) {
                    found = node.child_by_field_name("right").and_then(|r| {
                        self.value_type(r, caller, source).or_else(|| {
                            // `this.repo = repo` with a typed parameter
                            (r.kind() == "identifier")
                                .then(|| self.declared_type(constructor, node_text(r, source), caller, source))
                                .flatten()
                        })
                    });
                }
            }
            true
        });
        found
    }
}

fn statements_of<'t>(statement: Node<'t>) -> Vec<Node<'t>> {
    if statement.kind() == "statement_block" {
        named_children(statement)
    } else {
        vec![statement]
    }
}

fn strip_parentheses(text: &str) -> String {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(trimmed);
    compact(inner)
}

impl LanguageExtractor for TypeScriptExtractor {
    fn language(&self) -> SourceLanguage {
        SourceLanguage::TypeScript
    }

    fn rules(&self) -> &'static GrammarRules {
        &RULES
    }

    fn collect_definitions(&self, root: Node, source: &str) -> Vec<Definition> {
        let mut definitions = Vec::new();

        walk_tree(root, |node| {
            match node.kind() {
                "function_declaration" | "generator_function_declaration" => {
                    if let Some(name) = node.child_by_field_name("name") {
                        definitions.push(self.definition(node, name, DefinitionKind::Function, None, Some(node), source));
                    }
                }
                "class_declaration" | "abstract_class_declaration" => {
                    if let Some(name) = node.child_by_field_name("name") {
                        let mut class = self.definition(node, name, DefinitionKind::Class, None, None, source);
                        class.bases = find_child_by_type(node, "class_heritage")
                            .and_then(|h| find_child_by_type(h, "extends_clause"))
                            .map(|extends| {
                                field_children(extends, "value")
                                    .into_iter()
                                    .map(|v| {
                                        let text = node_text(v, source);
                                        text.rsplit('.').next().unwrap_or(text).to_string()
                                    })
                                    .collect()
                            })
                            .unwrap_or_default();
                        definitions.push(class);
                    }
                }
                "method_definition" => {
                    if let Some(name) = node.child_by_field_name("name") {
                        let class_name = self.enclosing_class_name(node, source);
                        definitions.push(self.definition(node, name, DefinitionKind::Method, class_name, Some(node), source));
                    }
                }
                "public_field_definition" => {
                    let value = node.child_by_field_name("value").filter(|v| FUNCTION_VALUE_KINDS.contains(&v.kind()));
                    if let (Some(name), Some(value)) = (node.child_by_field_name("name"), value) {
                        let class_name = self.enclosing_class_name(node, source);
                        definitions.push(self.definition(node, name, DefinitionKind::Method, class_name, Some(value), source));
                    }
                }
                "variable_declarator" => {
                    let value = node.child_by_field_name("value").filter(|v| FUNCTION_VALUE_KINDS.contains(&v.kind()));
                    let name = node.child_by_field_name("name").filter(|n| n.kind() == "identifier");
                    if let (Some(name), Some(value)) = (name, value) {
                        definitions.push(self.definition(node, name, DefinitionKind::Function, None, Some(value), source));
                    }
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
                    if let Some(specifier) = node.child_by_field_name("source") {
                        let module = Self::string_value(specifier, source);
                        let target = self.module_target(&module, file, project_root);
                        table.bindings.extend(self.import_bindings(node, source, &target, &module));
                    }
                    false
                }
                "export_statement" => {
                    // `export * from './x'` re-exports every name
                    if let Some(specifier) = node.child_by_field_name("source") {
                        if find_child_by_type(node, "*").is_some() {
                            let module = Self::string_value(specifier, source);
                            table.wildcards.push(ImportBinding {
                                local_name: "*".to_string(),
                                target: self.module_target(&module, file, project_root),
                                module,
                                imported_name: None,
                            });
                        }
                    }
                    true
                }
                "variable_declarator" => {
                    table.bindings.extend(self.require_bindings(node, source, file, project_root));
                    true
                }
                _ => true,
            }
        });

        debug!("{}: {} import bindings", file.display(), table.bindings.len());
        table
    }

    fn function_body<'t>(&self, function: Node<'t>) -> Option<Node<'t>> {
        match function.kind() {
            "variable_declarator" | "public_field_definition" => {
                function.child_by_field_name("value")?.child_by_field_name("body")
            }
            _ => function.child_by_field_name("body"),
        }
    }

    fn parse_call(&self, node: Node, source: &str) -> Option<CallSite> {
        let line = start_line(node);
        let column = start_column(node);
        let arguments = node
            .child_by_field_name("arguments")
            .map(|a| compact(node_text(a, source)));

        if node.kind() == "new_expression" {
            let constructor = node.child_by_field_name("constructor")?;
            let expression = compact(node_text(constructor, source));
            let (receiver, name) = match constructor.kind() {
                "member_expression" => (
                    constructor.child_by_field_name("object").map(|o| compact(node_text(o, source))),
                    node_text(constructor.child_by_field_name("property")?, source).to_string(),
                ),
                _ => (None, expression.clone()),
            };
            return Some(CallSite {
                name,
                receiver,
                call_type: CallType::Constructor,
                expression: format!("new {}", expression),
                arguments,
                line,
                column,
            });
        }

        let function = node.child_by_field_name("function")?;
        let expression = compact(node_text(function, source));

        let (name, receiver, call_type) = match function.kind() {
            "identifier" => (expression.clone(), None, CallType::Direct),
            "member_expression" => {
                let object = function.child_by_field_name("object")?;
                let property = function.child_by_field_name("property")?;
                let receiver = compact(node_text(object, source));
                let is_class = object.kind() == "identifier"
                    && receiver.chars().next().map_or(false, |c| c.is_ascii_uppercase())
                    && !BUILTIN_NAMESPACES.contains(&receiver.as_str());
                (
                    node_text(property, source).trim_start_matches('#').to_string(),
                    Some(receiver),
                    if is_class { CallType::Static } else { CallType::Method },
                )
            }
            // An IIFE is not a call site; its body is scanned in place
            "parenthesized_expression" => {
                let inner = first_named_child(function)?;
                if FUNCTION_VALUE_KINDS.contains(&inner.kind()) {
                    return None;
                }
                (expression.clone(), None, CallType::Direct)
            }
            "arrow_function" | "function_expression" | "function" => return None,
            "super" => ("super".to_string(), None, CallType::Direct),
            _ => (expression.clone(), None, CallType::Direct),
        };

        Some(CallSite {
            name,
            receiver,
            call_type,
            expression,
            arguments,
            line,
            column,
        })
    }

    fn decision_branches<'t>(&self, node: Node<'t>, source: &str) -> Vec<BranchBlock<'t>> {
        let mut branches = Vec::new();

        match node.kind() {
            "if_statement" => {
                let mut current = node;
                let mut label = "if";
                loop {
                    let condition = current
                        .child_by_field_name("condition")
                        .map(|c| strip_parentheses(node_text(c, source)));
                    if let Some(consequence) = current.child_by_field_name("consequence") {
                        branches.push(BranchBlock {
                            label: label.to_string(),
                            condition,
                            statements: statements_of(consequence),
                            start_line: start_line(consequence),
                            end_line: end_line(consequence),
                        });
                    }
                    let Some(alternative) = current.child_by_field_name("alternative") else {
                        break;
                    };
                    let Some(statement) = first_named_child(alternative) else {
                        break;
                    };
                    if statement.kind() == "if_statement" {
                        current = statement;
                        label = "else if";
                        continue;
                    }
                    branches.push(BranchBlock {
                        label: "else".to_string(),
                        condition: None,
                        statements: statements_of(statement),
                        start_line: start_line(statement),
                        end_line: end_line(statement),
                    });
                    break;
                }
            }
            "switch_statement" => {
                let Some(body) = node.child_by_field_name("body") else {
                    return branches;
                };
                for case in named_children(body) {
                    let (label, condition) = match case.kind() {
                        "switch_case" => {
                            let value = case
                                .child_by_field_name("value")
                                .map(|v| compact(node_text(v, source)))
                                .unwrap_or_default();
                            (format!("case {}", value), Some(value))
                        }
                        "switch_default" => ("default".to_string(), None),
                        _ => continue,
                    };
                    branches.push(BranchBlock {
                        label,
                        condition,
                        statements: field_children(case, "body").into_iter().flat_map(statements_of).collect(),
                        start_line: start_line(case),
                        end_line: end_line(case),
                    });
                }
            }
            "try_statement" => {
                if let Some(body) = node.child_by_field_name("body") {
                    branches.push(BranchBlock {
                        label: "try".to_string(),
                        condition: None,
                        statements: statements_of(body),
                        start_line: start_line(body),
                        end_line: end_line(body),
                    });
                }
                if let Some(handler) = node.child_by_field_name("handler") {
                    let caught = handler
                        .child_by_field_name("parameter")
                        .map(|p| compact(node_text(p, source)));
                    if let Some(body) = handler.child_by_field_name("body") {
                        branches.push(BranchBlock {
                            label: match &caught {
                                Some(caught) => format!("catch ({})", caught),
                                None => "catch".to_string(),
                            },
                            condition: caught,
                            statements: statements_of(body),
                            start_line: start_line(handler),
                            end_line: end_line(handler),
                        });
                    }
                }
                if let Some(finalizer) = node.child_by_field_name("finalizer") {
                    if let Some(body) = finalizer.child_by_field_name("body") {
                        branches.push(BranchBlock {
                            label: "finally".to_string(),
                            condition: None,
                            statements: statements_of(body),
                            start_line: start_line(finalizer),
                            end_line: end_line(finalizer),
                        });
                    }
                }
            }
            "ternary_expression" => {
                let condition = node
                    .child_by_field_name("condition")
                    .map(|c| compact(node_text(c, source)));
                let negated = condition.as_ref().map(|c| format!("!({})", c));
                for (label, guard, field) in [("true", condition, "consequence"), ("false", negated, "alternative")] {
                    if let Some(value) = node.child_by_field_name(field) {
                        branches.push(BranchBlock {
                            label: label.to_string(),
                            condition: guard,
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
        let field = match node.kind() {
            "switch_statement" => "value",
            "try_statement" => return "try".to_string(),
            _ => "condition",
        };
        node.child_by_field_name(field)
            .map(|c| strip_parentheses(node_text(c, source)))
            .unwrap_or_default()
    }

    fn leaf_statement(&self, node: Node, source: &str) -> Option<LeafStatement> {
        let text = compact(node_text(node, source));
        let (kind, value) = match node.kind() {
            "return_statement" => (LeafKind::Return, first_named_child(node)),
            "throw_statement" => (LeafKind::Raise, first_named_child(node)),
            "break_statement" => (LeafKind::Break, None),
            "continue_statement" => (LeafKind::Continue, None),
            "empty_statement" => (LeafKind::Pass, None),
            "expression_statement" => {
                let inner = first_named_child(node)?;
                if !matches!(inner.kind(), "assignment_expression" | "augmented_assignment_expression") {
                    return None;
                }
                (LeafKind::Assignment, inner.child_by_field_name("right"))
            }
            "lexical_declaration" | "variable_declaration" => {
                let declarator = named_children(node)
                    .into_iter()
                    .find(|d| d.kind() == "variable_declarator" && d.child_by_field_name("value").is_some())?;
                (LeafKind::Assignment, declarator.child_by_field_name("value"))
            }
            _ => return None,
        };
        Some(LeafStatement {
            kind,
            text,
            value: value.map(|v| compact(node_text(v, source))),
        })
    }

    fn is_builtin(&self, name: &str) -> bool {
        BUILTINS.contains(&name)
    }

    fn is_builtin_method(&self, name: &str) -> bool {
        BUILTIN_METHODS.contains(&name)
    }

    fn classify_namespace(&self, root: &str) -> Option<ResolutionStatus> {
        if BUILTIN_NAMESPACES.contains(&root) {
            Some(ResolutionStatus::IgnoredBuiltin)
        } else if NODE_MODULES.contains(&root) {
            Some(ResolutionStatus::IgnoredStdlib)
        } else if THIRD_PARTY_NAMESPACES.contains(&root) {
            Some(ResolutionStatus::IgnoredThirdParty)
        } else {
            None
        }
    }

    fn constructor_name(&self, _class_name: &str) -> String {
        "constructor".to_string()
    }

    fn infer_receiver_type(&self, receiver: &str, caller: &CallerContext, _session: &mut Session) -> Option<String> {
        let receiver = receiver.trim().trim_end_matches('?');

        if let Some(callee) = receiver.strip_suffix(')').and_then(|r| r.split('(').next()) {
            let callee = callee.trim_start_matches("await ").rsplit('.').next().unwrap_or(callee);
            return self.return_type_of(callee, caller);
        }

        if let Some(member) = receiver.strip_prefix("this.") {
            if member.contains('.') {
                return None;
            }
            return self.member_type(member.trim_start_matches('#'), caller);
        }

        if !receiver.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$') {
            return None;
        }
        let function = caller.unit.node_for(&caller.definition)?;
        self.declared_type(function, receiver, caller, &caller.unit.source)
    }
}
