use std::path::{Path, PathBuf};
use std::rc::Rc;

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
    compact, end_line, enclosing_ancestor, field_children, first_named_child, leading_comment, named_children,
    node_text, start_column, start_line, walk_tree,
};

/// C and C++ front-end
pub struct CppExtractor;

static RULES: GrammarRules = GrammarRules {
    call_kinds: &["call_expression", "new_expression"],
    nested_scope_kinds: &["lambda_expression", "function_definition", "class_specifier", "struct_specifier"],
    decision_kinds: &[
        ("if_statement", DecisionType::IfElse),
        ("switch_statement", DecisionType::MatchCase),
        ("try_statement", DecisionType::TryExcept),
    ],
    ternary_kinds: &["conditional_expression"],
    loop_kinds: &["for_statement", "for_range_loop", "while_statement", "do_statement"],
    block_kinds: &["compound_statement"],
    self_receivers: &["this", "*this"],
    scope_separator: "::",
    complexity: ComplexityRules {
        decision_kinds: &[
            "if_statement",
            "for_statement",
            "for_range_loop",
            "while_statement",
            "do_statement",
            "case_statement",
            "catch_clause",
            "conditional_expression",
        ],
        boolean_kinds: &["binary_expression"],
        boolean_operators: &["&&", "||", "and", "or"],
        nested_scope_kinds: &["lambda_expression"],
    },
};

const BUILTINS: &[&str] = &["assert", "static_assert", "offsetof", "va_start", "va_end", "va_arg"];

const STDLIB_FUNCTIONS: &[&str] = &[
    "printf", "fprintf", "sprintf", "snprintf", "puts", "fputs", "scanf", "malloc", "calloc", "realloc", "free",
    "memcpy", "memmove", "memset", "memcmp", "strlen", "strcpy", "strncpy", "strcmp", "strncmp", "strcat",
    "strchr", "strstr", "atoi", "atol", "atof", "strtol", "strtod", "exit", "abort", "qsort", "fopen", "fclose",
    "fread", "fwrite", "fgets", "getenv", "time", "rand", "srand", "abs", "sqrt", "pow", "floor", "ceil",
    "move", "forward", "swap", "make_unique", "make_shared", "make_pair", "make_tuple", "to_string",
];

const BUILTIN_METHODS: &[&str] = &[
    "push_back", "emplace_back", "pop_back", "push_front", "pop_front", "size", "empty", "begin", "end",
    "cbegin", "cend", "rbegin", "rend", "clear", "insert", "emplace", "erase", "find", "at", "front", "back",
    "reserve", "resize", "c_str", "data", "length", "substr", "append", "count", "get", "reset", "release",
    "lock", "unlock", "first", "second", "str", "swap", "compare", "value", "has_value", "load", "store",
];

const THIRD_PARTY_NAMESPACES: &[&str] = &["boost", "absl", "fmt", "spdlog", "Eigen", "cv", "nlohmann", "grpc", "google", "folly", "Qt"];

const STD_HEADERS: &[&str] = &[
    "algorithm", "any", "array", "atomic", "bitset", "cassert", "cctype", "cerrno", "cfloat", "chrono",
    "climits", "cmath", "complex", "condition_variable", "cstddef", "cstdint", "cstdio", "cstdlib", "cstring",
    "ctime", "deque", "exception", "filesystem", "fstream", "functional", "future", "initializer_list",
    "iomanip", "ios", "iosfwd", "iostream", "istream", "iterator", "limits", "list", "locale", "map", "memory",
    "mutex", "new", "numeric", "optional", "ostream", "queue", "random", "ratio", "regex", "set", "shared_mutex",
    "sstream", "stack", "stdexcept", "streambuf", "string", "string_view", "system_error", "thread", "tuple",
    "type_traits", "typeinfo", "unordered_map", "unordered_set", "utility", "variant", "vector", "assert.h",
    "ctype.h", "errno.h", "float.h", "limits.h", "math.h", "stdarg.h", "stdbool.h", "stddef.h", "stdint.h",
    "stdio.h", "stdlib.h", "string.h", "time.h", "unistd.h", "pthread.h", "signal.h", "fcntl.h",
];

const SMART_POINTERS: &[&str] = &["unique_ptr", "shared_ptr", "weak_ptr", "optional", "reference_wrapper"];

const SOURCE_EXTENSIONS: &[&str] = &["cpp", "cc", "cxx", "c"];

const DECLARATION_KINDS: &[&str] = &[
    "parameter_declaration",
    "optional_parameter_declaration",
    "declaration",
    "field_declaration",
];

impl CppExtractor {
    /// The `function_declarator` of a definition, looking through pointer
    /// and reference return types
    fn function_declarator<'t>(&self, definition: Node<'t>) -> Option<Node<'t>> {
        let mut current = definition.child_by_field_name("declarator")?;
        loop {
            if current.kind() == "function_declarator" {
                return Some(current);
            }
            current = current
                .child_by_field_name("declarator")
                .or_else(|| first_named_child(current))?;
        }
    }

    fn enclosing_namespaces(&self, node: Node, source: &str) -> Vec<String> {
        let mut namespaces = Vec::new();
        let mut current = node.parent();
        while let Some(parent) = current {
            if parent.kind() == "namespace_definition" {
                if let Some(name) = parent.child_by_field_name("name") {
                    namespaces.push(node_text(name, source).to_string());
                }
            }
            current = parent.parent();
        }
        namespaces.reverse();
        namespaces
    }

    fn enclosing_class(&self, node: Node, source: &str) -> Option<String> {
        let owner = enclosing_ancestor(node, &["class_specifier", "struct_specifier", "function_definition"])?;
        if owner.kind() == "function_definition" {
            return None;
        }
        owner.child_by_field_name("name").map(|n| node_text(n, source).to_string())
    }

    fn documented_node<'t>(&self, node: Node<'t>) -> Node<'t> {
        match node.parent() {
            Some(parent) if parent.kind() == "template_declaration" => parent,
            _ => node,
        }
    }

    fn function_definition(&self, node: Node, source: &str, class_names: &[String]) -> Option<Definition> {
        let declarator = self.function_declarator(node)?;
        let name_node = declarator.child_by_field_name("declarator")?;

        let mut namespaces = self.enclosing_namespaces(node, source);
        let mut class_name = self.enclosing_class(node, source);

        let name = match name_node.kind() {
            "qualified_identifier" => {
                // Out-of-line definition: `ns::Foo::bar`
                let full = node_text(name_node, source);
                let mut segments: Vec<&str> = full.split("::").map(str::trim).collect();
                let name = segments.pop().unwrap_or(full).to_string();
                if let Some(owner) = segments.last() {
                    let owner = strip_template_arguments(owner);
                    let looks_like_class = class_names.iter().any(|c| c == owner)
                        || owner.chars().next().map_or(false, |c| c.is_ascii_uppercase());
                    if looks_like_class {
                        class_name = Some(owner.to_string());
                        segments.pop();
                    }
                }
                namespaces.extend(segments.into_iter().filter(|s| !s.is_empty()).map(str::to_string));
                name
            }
            _ => strip_template_arguments(node_text(name_node, source)).to_string(),
        };

        Some(Definition {
            name,
            kind: if class_name.is_some() { DefinitionKind::Method } else { DefinitionKind::Function },
            class_name,
            namespace: if namespaces.is_empty() { None } else { Some(namespaces.join("::")) },
            node_kind: "function_definition",
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            line: start_line(node),
            column: start_column(node),
            docstring: leading_comment(self.documented_node(node), source),
            return_type: node.child_by_field_name("type").map(|t| node_text(t, source).to_string()),
            bases: Vec::new(),
        })
    }

    fn class_definition(&self, node: Node, source: &str) -> Option<Definition> {
        node.child_by_field_name("body")?;
        let name = node.child_by_field_name("name")?;
        let namespaces = self.enclosing_namespaces(node, source);

        let bases = named_children(node)
            .into_iter()
            .filter(|c| c.kind() == "base_class_clause")
            .flat_map(named_children)
            .filter(|b| matches!(b.kind(), "type_identifier" | "qualified_identifier" | "template_type"))
            .map(|b| {
                let text = strip_template_arguments(node_text(b, source));
                text.rsplit("::").next().unwrap_or(text).to_string()
            })
            .collect();

        Some(Definition {
            name: node_text(name, source).to_string(),
            kind: DefinitionKind::Class,
            class_name: None,
            namespace: if namespaces.is_empty() { None } else { Some(namespaces.join("::")) },
            node_kind: if node.kind() == "struct_specifier" { "struct_specifier" } else { "class_specifier" },
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            line: start_line(node),
            column: start_column(node),
            docstring: leading_comment(self.documented_node(node), source),
            return_type: None,
            bases,
        })
    }

    fn header_target(&self, header: &str, file: &Path, project_root: &Path) -> Option<PathBuf> {
        let directory = file.parent().unwrap_or(project_root);
        first_existing([
            directory.join(header),
            project_root.join(header),
            project_root.join("include").join(header),
            project_root.join("src").join(header),
        ])
        .filter(|path| within_root(path, project_root))
    }

    /// Implementation files that pair with a header (`foo.h` → `foo.cpp`)
    fn sibling_sources(&self, header: &Path, file: &Path, project_root: &Path) -> Vec<PathBuf> {
        let Some(stem) = header.file_stem() else {
            return Vec::new();
        };
        let directories = [
            header.parent().map(Path::to_path_buf).unwrap_or_default(),
            project_root.join("src"),
        ];
        let mut sources = Vec::new();
        for directory in &directories {
            for extension in SOURCE_EXTENSIONS {
                let candidate = directory.join(stem).with_extension(extension);
                if candidate.is_file() && candidate != file && !sources.contains(&candidate) {
                    sources.push(candidate);
                }
            }
        }
        sources
    }

    fn classify_header(header: &str) -> ImportTarget {
        if STD_HEADERS.contains(&header) || !header.contains('.') {
            ImportTarget::Stdlib
        } else {
            ImportTarget::ThirdParty
        }
    }

    /// Resolve a declared type node to a class name
    fn type_name(&self, type_node: Node, value: Option<Node>, source: &str) -> Option<String> {
        match type_node.kind() {
            "type_identifier" => Some(node_text(type_node, source).to_string()),
            "qualified_identifier" => {
                let text = strip_template_arguments(node_text(type_node, source));
                match type_node.child_by_field_name("name") {
                    Some(name) if name.kind() == "template_type" => self.type_name(name, value, source),
                    _ => Some(text.rsplit("::").next().unwrap_or(text).to_string()),
                }
            }
            "template_type" => {
                let name = node_text(type_node.child_by_field_name("name")?, source);
                if SMART_POINTERS.contains(&name) {
                    let arguments = type_node.child_by_field_name("arguments")?;
                    let first = first_named_child(arguments)?;
                    let inner = first.child_by_field_name("type").unwrap_or(first);
                    self.type_name(inner, None, source)
                } else {
                    Some(name.to_string())
                }
            }
            "placeholder_type_specifier" | "auto" => self.initializer_type(value?, source),
            _ => Some(compact(node_text(type_node, source))),
        }
    }

    /// Type produced by an initializer (`new Foo()`, `Foo()`, `make_unique<Foo>()`)
    fn initializer_type(&self, value: Node, source: &str) -> Option<String> {
        match value.kind() {
            "new_expression" => self.type_name(value.child_by_field_name("type")?, None, source),
            "call_expression" => {
                let function = value.child_by_field_name("function")?;
                let template = match function.kind() {
                    "template_function" => Some(function),
                    "qualified_identifier" => function.child_by_field_name("name").filter(|n| n.kind() == "template_function"),
                    _ => None,
                };
                if let Some(template) = template {
                    let arguments = template.child_by_field_name("arguments")?;
                    let first = first_named_child(arguments)?;
                    let inner = first.child_by_field_name("type").unwrap_or(first);
                    return self.type_name(inner, None, source);
                }
                let name = node_text(function, source);
                let short = name.rsplit("::").next().unwrap_or(name);
                short
                    .chars()
                    .next()
                    .filter(|c| c.is_ascii_uppercase())
                    .map(|_| short.to_string())
            }
            _ => None,
        }
    }

    /// Type of `name` as declared inside `scope` (parameters, locals or fields)
    fn declared_type(&self, scope: Node, name: &str, source: &str) -> Option<String> {
        let mut found = None;
        walk_tree(scope, |node| {
            if found.is_some() {
                return false;
            }
            if node.id() != scope.id() && node.kind() == "lambda_expression" {
                return false;
            }
            if !DECLARATION_KINDS.contains(&node.kind()) {
                return true;
            }
            let Some(type_node) = node.child_by_field_name("type") else {
                return true;
            };
            for declarator in field_children(node, "declarator") {
                if let Some((declared, value)) = innermost_declarator(declarator, source) {
                    if declared == name {
                        found = self.type_name(type_node, value, source);
                        break;
                    }
                }
            }
            true
        });
        found
    }

    /// Units whose declarations are visible from `unit` through includes
    fn visible_units(&self, unit: &Rc<ParsedUnit>, session: &mut Session) -> Vec<Rc<ParsedUnit>> {
        let mut units = vec![Rc::clone(unit)];
        for include in &unit.imports.wildcards {
            if let ImportTarget::Project(path) = &include.target {
                if let Ok(included) = session.load(path) {
                    units.push(included);
                }
            }
        }
        units
    }

    fn field_type(&self, class_name: &str, field: &str, caller: &CallerContext, session: &mut Session) -> Option<String> {
        for unit in self.visible_units(&caller.unit, session) {
            let Some(class) = unit.find_class(class_name) else {
                continue;
            };
            let Some(body) = unit.node_for(class).and_then(|n| n.child_by_field_name("body")) else {
                continue;
            };
            if let Some(found) = self.declared_type(body, field, &unit.source) {
                return Some(found);
            }
        }
        None
    }

    fn return_type_of(&self, callee: &str, caller: &CallerContext, session: &mut Session) -> Option<String> {
        for unit in self.visible_units(&caller.unit, session) {
            let definition = match &caller.definition.class_name {
                Some(class_name) => unit.find_method(class_name, callee).or_else(|| unit.find_function(callee)),
                None => unit.find_function(callee),
            };
            if let Some(declared) = definition.and_then(|d| d.return_type.clone()) {
                let cleaned = declared
                    .trim_start_matches("const ")
                    .trim_end_matches(|c: char| c == '*' || c == '&' || c.is_whitespace());
                return Some(strip_template_arguments(cleaned).rsplit("::").next().unwrap_or(cleaned).to_string());
            }
        }
        None
    }
}

fn strip_template_arguments(text: &str) -> &str {
    text.split('<').next().unwrap_or(text).trim()
}

/// Declared identifier of a declarator and its initializer, if any
fn innermost_declarator<'t, 's>(declarator: Node<'t>, source: &'s str) -> Option<(&'s str, Option<Node<'t>>)> {
    let mut current = declarator;
    let mut value = None;
    loop {
        match current.kind() {
            "identifier" | "field_identifier" => return Some((node_text(current, source), value)),
            "init_declarator" => {
                value = current.child_by_field_name("value");
                current = current.child_by_field_name("declarator")?;
            }
            "pointer_declarator" | "array_declarator" => {
                current = current.child_by_field_name("declarator")?;
            }
            "reference_declarator" => {
                current = first_named_child(current)?;
            }
            _ => return None,
        }
    }
}

fn statements_of<'t>(statement: Node<'t>) -> Vec<Node<'t>> {
    if statement.kind() == "compound_statement" {
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

impl LanguageExtractor for CppExtractor {
    fn language(&self) -> SourceLanguage {
        SourceLanguage::Cpp
    }

    fn rules(&self) -> &'static GrammarRules {
        &RULES
    }

    fn collect_definitions(&self, root: Node, source: &str) -> Vec<Definition> {
        let mut classes = Vec::new();
        walk_tree(root, |node| {
            if matches!(node.kind(), "class_specifier" | "struct_specifier") {
                if let Some(class) = self.class_definition(node, source) {
                    classes.push(class);
                }
            }
            true
        });
        let class_names: Vec<String> = classes.iter().map(|c| c.name.clone()).collect();

        let mut functions = Vec::new();
        walk_tree(root, |node| {
            if node.kind() == "function_definition" {
                if let Some(function) = self.function_definition(node, source, &class_names) {
                    functions.push(function);
                }
            }
            node.kind() != "lambda_expression"
        });

        let mut definitions = classes;
        definitions.extend(functions);
        definitions.sort_by_key(|d| d.start_byte);
        definitions
    }

    fn collect_imports(&self, root: Node, source: &str, file: &Path, project_root: &Path) -> ImportTable {
        let mut table = ImportTable::default();

        walk_tree(root, |node| {
            if node.kind() != "preproc_include" {
                return true;
            }
            let Some(path_node) = node.child_by_field_name("path") else {
                return false;
            };
            let raw = node_text(path_node, source);
            let header = raw.trim_matches(|c| c == '"' || c == '<' || c == '>').trim().to_string();

            let (target, siblings) = match self.header_target(&header, file, project_root) {
                Some(path) => {
                    let siblings = self.sibling_sources(&path, file, project_root);
                    (ImportTarget::Project(path), siblings)
                }
                None if path_node.kind() == "system_lib_string" => (Self::classify_header(&header), Vec::new()),
                None => (ImportTarget::ThirdParty, Vec::new()),
            };

            table.wildcards.push(ImportBinding {
                local_name: "*".to_string(),
                module: header.clone(),
                imported_name: None,
                target,
            });
            for sibling in siblings {
                table.wildcards.push(ImportBinding {
                    local_name: "*".to_string(),
                    module: header.clone(),
                    imported_name: None,
                    target: ImportTarget::Project(sibling),
                });
            }
            false
        });

        debug!("{}: {} includes", file.display(), table.wildcards.len());
        table
    }

    fn parse_call(&self, node: Node, source: &str) -> Option<CallSite> {
        let line = start_line(node);
        let column = start_column(node);
        let arguments = node
            .child_by_field_name("arguments")
            .map(|a| compact(node_text(a, source)));

        if node.kind() == "new_expression" {
            let type_node = node.child_by_field_name("type")?;
            let full = strip_template_arguments(node_text(type_node, source));
            let (receiver, name) = match full.rsplit_once("::") {
                Some((scope, name)) => (Some(scope.to_string()), name.to_string()),
                None => (None, full.to_string()),
            };
            return Some(CallSite {
                name,
                receiver,
                call_type: CallType::Constructor,
                expression: format!("new {}", full),
                arguments,
                line,
                column,
            });
        }

        let function = node.child_by_field_name("function")?;
        let expression = compact(node_text(function, source));

        let (name, receiver, call_type) = match function.kind() {
            "identifier" => (expression.clone(), None, CallType::Direct),
            "template_function" => {
                let name = function.child_by_field_name("name")?;
                (node_text(name, source).to_string(), None, CallType::Direct)
            }
            "field_expression" => {
                let object = function.child_by_field_name("argument")?;
                let field = function.child_by_field_name("field")?;
                (
                    strip_template_arguments(node_text(field, source)).to_string(),
                    Some(compact(node_text(object, source))),
                    CallType::Method,
                )
            }
            "qualified_identifier" => {
                let full = strip_template_arguments(&expression).to_string();
                match full.rsplit_once("::") {
                    Some((scope, name)) if !scope.is_empty() => {
                        (name.trim().to_string(), Some(scope.trim().to_string()), CallType::Static)
                    }
                    _ => (full.trim_start_matches("::").to_string(), None, CallType::Direct),
                }
            }
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
                    let statement = if alternative.kind() == "else_clause" {
                        match first_named_child(alternative) {
                            Some(statement) => statement,
                            None => break,
                        }
                    } else {
                        alternative
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
                for case in named_children(body).into_iter().filter(|c| c.kind() == "case_statement") {
                    let value = case.child_by_field_name("value");
                    let (label, condition) = match value {
                        Some(value) => {
                            let text = compact(node_text(value, source));
                            (format!("case {}", text), Some(text))
                        }
                        None => ("default".to_string(), None),
                    };
                    let statements = named_children(case)
                        .into_iter()
                        .filter(|c| value.map_or(true, |v| v.id() != c.id()))
                        .flat_map(statements_of)
                        .collect();
                    branches.push(BranchBlock {
                        label,
                        condition,
                        statements,
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
                for clause in named_children(node).into_iter().filter(|c| c.kind() == "catch_clause") {
                    let Some(body) = clause.child_by_field_name("body") else {
                        continue;
                    };
                    let caught = clause
                        .child_by_field_name("parameters")
                        .map(|p| strip_parentheses(node_text(p, source)));
                    branches.push(BranchBlock {
                        label: match &caught {
                            Some(caught) => format!("catch ({})", caught),
                            None => "catch".to_string(),
                        },
                        condition: caught,
                        statements: statements_of(body),
                        start_line: start_line(clause),
                        end_line: end_line(clause),
                    });
                }
            }
            "conditional_expression" => {
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
        match node.kind() {
            "try_statement" => "try".to_string(),
            _ => node
                .child_by_field_name("condition")
                .map(|c| strip_parentheses(node_text(c, source)))
                .unwrap_or_default(),
        }
    }

    fn leaf_statement(&self, node: Node, source: &str) -> Option<LeafStatement> {
        let text = compact(node_text(node, source));
        let (kind, value) = match node.kind() {
            "return_statement" => (LeafKind::Return, first_named_child(node)),
            "throw_statement" => (LeafKind::Raise, first_named_child(node)),
            "break_statement" => (LeafKind::Break, None),
            "continue_statement" => (LeafKind::Continue, None),
            "expression_statement" => {
                let inner = first_named_child(node)?;
                if !matches!(inner.kind(), "assignment_expression" | "update_expression") {
                    return None;
                }
                (LeafKind::Assignment, inner.child_by_field_name("right"))
            }
            "declaration" => {
                let init = field_children(node, "declarator")
                    .into_iter()
                    .find(|d| d.kind() == "init_declarator")?;
                (LeafKind::Assignment, init.child_by_field_name("value"))
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

    fn is_stdlib_function(&self, name: &str) -> bool {
        STDLIB_FUNCTIONS.contains(&name)
    }

    fn classify_namespace(&self, root: &str) -> Option<ResolutionStatus> {
        match root {
            "std" => Some(ResolutionStatus::IgnoredStdlib),
            _ if THIRD_PARTY_NAMESPACES.contains(&root) => Some(ResolutionStatus::IgnoredThirdParty),
            _ => None,
        }
    }

    fn constructor_name(&self, class_name: &str) -> String {
        class_name.to_string()
    }

    fn implicit_self_calls(&self) -> bool {
        true
    }

    fn infer_receiver_type(&self, receiver: &str, caller: &CallerContext, session: &mut Session) -> Option<String> {
        let receiver = receiver.trim();

        if let Some(callee) = receiver.strip_suffix(')').and_then(|r| r.split('(').next()) {
            let callee = callee.rsplit(|c| c == '.' || c == '>' || c == ':').next().unwrap_or(callee);
            return self.return_type_of(callee, caller, session);
        }

        let member = receiver
            .strip_prefix("this->")
            .or_else(|| receiver.strip_prefix("(*this)."));
        let name = member.unwrap_or(receiver).trim_start_matches('*');
        if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return None;
        }

        if member.is_none() {
            let function = caller.unit.node_for(&caller.definition)?;
            if let Some(found) = self.declared_type(function, name, &caller.unit.source) {
                return Some(found);
            }
        }

        let class_name = caller.definition.class_name.clone()?;
        self.field_type(&class_name, name, caller, session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::ParserRegistry;
    use crate::core::tree_utils::{find_descendants_by_type, first_descendant_by_type};
    use assert_fs::prelude::*;

    fn parse(source: &str) -> tree_sitter::Tree {
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&tree_sitter_cpp::LANGUAGE.into()).unwrap();
        parser.parse(source, None).unwrap()
    }

    #[test]
    fn test_call_parsing() {
        let source = r#"
void run() {
    validate(x);
    obj.process();
    ptr->flush();
    std::sort(a, b);
    Repo::instance();
    auto r = new Repo(1);
}
"#;
        let tree = parse(source);
        let calls: Vec<CallSite> = find_descendants_by_type(tree.root_node(), RULES.call_kinds, &[])
            .into_iter()
            .filter_map(|n| CppExtractor.parse_call(n, source))
            .collect();
        assert_eq!(calls.len(), 6);

        assert_eq!(calls[0].name, "validate");
        assert_eq!(calls[0].call_type, CallType::Direct);

        assert_eq!(calls[1].receiver.as_deref(), Some("obj"));
        assert_eq!(calls[1].call_type, CallType::Method);

        assert_eq!(calls[2].name, "flush");
        assert_eq!(calls[2].receiver_root(), Some("ptr"));

        assert_eq!(calls[3].receiver.as_deref(), Some("std"));
        assert_eq!(calls[3].call_type, CallType::Static);

        assert_eq!(calls[4].name, "instance");
        assert_eq!(calls[4].receiver.as_deref(), Some("Repo"));

        assert_eq!(calls[5].name, "Repo");
        assert_eq!(calls[5].call_type, CallType::Constructor);
    }

    #[test]
    fn test_definitions() {
        let source = r#"
namespace shop {

// Stores orders.
class OrderRepo : public Base {
public:
    void save() { write(); }
};

int helper() { return 1; }

}

void OrderRepo::load() {}
"#;
        let tree = parse(source);
        let definitions = CppExtractor.collect_definitions(tree.root_node(), source);

        let class = definitions.iter().find(|d| d.kind == DefinitionKind::Class).unwrap();
        assert_eq!(class.name, "OrderRepo");
        assert_eq!(class.namespace.as_deref(), Some("shop"));
        assert_eq!(class.bases, vec!["Base"]);
        assert_eq!(class.docstring.as_deref(), Some("Stores orders."));

        let save = definitions.iter().find(|d| d.name == "save").unwrap();
        assert_eq!(save.kind, DefinitionKind::Method);
        assert_eq!(save.class_name.as_deref(), Some("OrderRepo"));

        let helper = definitions.iter().find(|d| d.name == "helper").unwrap();
        assert_eq!(helper.kind, DefinitionKind::Function);
        assert_eq!(helper.namespace.as_deref(), Some("shop"));

        let load = definitions.iter().find(|d| d.name == "load").unwrap();
        assert_eq!(load.class_name.as_deref(), Some("OrderRepo"));
    }

    #[test]
    fn test_if_else_chain_and_switch() {
        let source = r#"
void f(int x) {
    if (x > 1) {
        a();
    } else if (x == 0) {
        b();
    } else {
        c();
        return;
    }
    switch (x) {
        case 1:
            one();
            break;
        default:
            other();
    }
}
"#;
        let tree = parse(source);
        let root = tree.root_node();

        let if_node = first_descendant_by_type(root, "if_statement").unwrap();
        let branches = CppExtractor.decision_branches(if_node, source);
        let labels: Vec<&str> = branches.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["if", "else if", "else"]);
        assert_eq!(branches[0].condition.as_deref(), Some("x > 1"));
        assert_eq!(branches[1].condition.as_deref(), Some("x == 0"));
        assert_eq!(CppExtractor.decision_condition(if_node, source), "x > 1");

        let leaf = CppExtractor.leaf_statement(branches[2].statements[1], source).unwrap();
        assert_eq!(leaf.kind, LeafKind::Return);

        let switch = first_descendant_by_type(root, "switch_statement").unwrap();
        let cases = CppExtractor.decision_branches(switch, source);
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].label, "case 1");
        assert_eq!(cases[0].statements.len(), 2);
        assert_eq!(cases[1].label, "default");
    }

    #[test]
    fn test_try_catch_branches() {
        let source = "void f() {\n  try {\n    risky();\n  } catch (const std::exception& e) {\n    recover();\n  }\n}\n";
        let tree = parse(source);
        let node = first_descendant_by_type(tree.root_node(), "try_statement").unwrap();
        let branches = CppExtractor.decision_branches(node, source);
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].label, "try");
        assert_eq!(branches[1].condition.as_deref(), Some("const std::exception& e"));
    }

    #[test]
    fn test_includes_and_receiver_types() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("repo.h")
            .write_str("class Repo {\npublic:\n  void save();\n};\n")
            .unwrap();
        temp.child("repo.cpp")
            .write_str("#include \"repo.h\"\nvoid Repo::save() {}\n")
            .unwrap();
        temp.child("service.cpp")
            .write_str(
                r#"#include "repo.h"
#include <vector>
#include <boost/optional.hpp>
#include "missing.h"

class Service {
  Repo* repo_;
public:
  void run(const Repo& param) {
    Repo local;
    auto made = new Repo();
    auto owned = std::make_unique<Repo>();
    repo_->save();
  }
};
"#,
            )
            .unwrap();

        let registry = ParserRegistry::with_all_languages();
        let mut session = Session::new(&registry, temp.path(), 1 << 20);
        let unit = session.load(temp.child("service.cpp").path()).unwrap();

        let targets: Vec<&ImportTarget> = unit.imports.wildcards.iter().map(|w| &w.target).collect();
        assert!(targets.iter().any(|t| matches!(t, ImportTarget::Project(p) if p.ends_with("repo.h"))));
        assert!(targets.iter().any(|t| matches!(t, ImportTarget::Project(p) if p.ends_with("repo.cpp"))));
        assert!(targets.contains(&&ImportTarget::Stdlib));
        assert_eq!(targets.iter().filter(|t| ***t == ImportTarget::ThirdParty).count(), 2);

        let run = unit.find_method("Service", "run").unwrap().clone();
        let caller = CallerContext {
            node_id: unit.symbol_id(&run, temp.path()),
            unit: Rc::clone(&unit),
            definition: run,
        };
        for receiver in ["param", "local", "made", "owned", "repo_", "this->repo_"] {
            assert_eq!(
                CppExtractor.infer_receiver_type(receiver, &caller, &mut session).as_deref(),
                Some("Repo"),
                "receiver {}",
                receiver
            );
        }
        assert_eq!(CppExtractor.infer_receiver_type("nothing", &caller, &mut session), None);
    }
}
