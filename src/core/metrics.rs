use tree_sitter::Node;

use super::tree_utils::{end_line, node_text, start_line, walk_tree};

/// Per-language node kinds that feed cyclomatic complexity
#[derive(Debug, Clone, Copy)]
pub struct ComplexityRules {
    /// Nodes that each add one decision point
    pub decision_kinds: &'static [&'static str],
    /// Nodes that may be boolean operators
    pub boolean_kinds: &'static [&'static str],
    /// Operator tokens that count; empty means every `boolean_kinds` node counts
    pub boolean_operators: &'static [&'static str],
    /// Nested scopes whose bodies belong to another function
    pub nested_scope_kinds: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionMetrics {
    pub complexity: u32,
    pub loc: u32,
}

/// Cyclomatic complexity (1 + decision points + boolean operators) and line
/// count for a function node
pub fn measure(function: Node, source: &str, rules: &ComplexityRules) -> FunctionMetrics {
    let mut complexity = 1;

    walk_tree(function, |node| {
        if node.id() != function.id() && rules.nested_scope_kinds.contains(&node.kind()) {
            return false;
        }
        if rules.decision_kinds.contains(&node.kind()) {
            complexity += 1;
        }
        if rules.boolean_kinds.contains(&node.kind()) && is_boolean_operator(node, source, rules) {
            complexity += 1;
        }
        true
    });

    FunctionMetrics {
        complexity,
        loc: (end_line(function) - start_line(function) + 1) as u32,
    }
}

fn is_boolean_operator(node: Node, source: &str, rules: &ComplexityRules) -> bool {
    if rules.boolean_operators.is_empty() {
        return true;
    }
    node.child_by_field_name("operator")
        .map(|op| rules.boolean_operators.contains(&node_text(op, source)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tree_utils::first_descendant_by_type;
    use tree_sitter::Parser;

    const PYTHON_RULES: ComplexityRules = ComplexityRules {
        decision_kinds: &["if_statement", "elif_clause", "for_statement", "while_statement"],
        boolean_kinds: &["boolean_operator"],
        boolean_operators: &[],
        nested_scope_kinds: &["function_definition"],
    };

    const CPP_RULES: ComplexityRules = ComplexityRules {
        decision_kinds: &["if_statement", "for_statement"],
        boolean_kinds: &["binary_expression"],
        boolean_operators: &["&&", "||"],
        nested_scope_kinds: &["lambda_expression"],
    };

    #[test]
    fn test_python_complexity() {
        let source = "def f(a, b):\n    if a and b:\n        pass\n    elif a:\n        pass\n    for x in a:\n        pass\n    def g():\n        if b:\n            pass\n";
        let mut parser = Parser::new();
        parser.set_language(&tree_sitter_python::LANGUAGE.into()).unwrap();
        let tree = parser.parse(source, None).unwrap();
        let func = first_descendant_by_type(tree.root_node(), "function_definition").unwrap();

        let metrics = measure(func, source, &PYTHON_RULES);
        // 1 + if + elif + for + `and`; the nested g() is not counted
        assert_eq!(metrics.complexity, 5);
        assert_eq!(metrics.loc, 10);
    }

    #[test]
    fn test_cpp_counts_only_logical_operators() {
        let source = "int f(int a, int b) {\n  if (a > 0 && b + 1 > 0 || a == b) { return 1; }\n  return 0;\n}\n";
        let mut parser = Parser::new();
        parser.set_language(&tree_sitter_cpp::LANGUAGE.into()).unwrap();
        let tree = parser.parse(source, None).unwrap();
        let func = first_descendant_by_type(tree.root_node(), "function_definition").unwrap();

        let metrics = measure(func, source, &CPP_RULES);
        // 1 + if + && + ||
        assert_eq!(metrics.complexity, 4);
        assert_eq!(metrics.loc, 4);
    }
}
