//! Generic syntax-tree helpers shared by every language front-end.
//!
//! Traversals here use an explicit worklist rather than recursion so that
//! deeply nested files cannot exhaust the stack.

use tree_sitter::Node;

/// Extract text content of a node
pub fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    source.get(node.byte_range()).unwrap_or("")
}

/// 1-based line where the node starts
pub fn start_line(node: Node) -> usize {
    node.start_position().row + 1
}

/// 1-based line where the node ends
pub fn end_line(node: Node) -> usize {
    node.end_position().row + 1
}

/// 0-based column where the node starts
pub fn start_column(node: Node) -> usize {
    node.start_position().column
}

pub fn children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

/// Named children, skipping comments
pub fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| !is_comment(*child))
        .collect()
}

pub fn first_named_child<'t>(node: Node<'t>) -> Option<Node<'t>> {
    named_children(node).into_iter().next()
}

pub fn find_child_by_type<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    children(node).into_iter().find(|child| child.kind() == kind)
}

/// All children attached to a (possibly repeated) field
pub fn field_children<'t>(node: Node<'t>, field: &str) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children_by_field_name(field, &mut cursor).collect()
}

pub fn is_comment(node: Node) -> bool {
    matches!(node.kind(), "comment" | "line_comment" | "block_comment")
}

/// Pre-order walk over `root` and its descendants.
///
/// `visit` returns whether the walker should descend into the node's
/// children; the root itself is always visited.
pub fn walk_tree<'t, F>(root: Node<'t>, mut visit: F)
where
    F: FnMut(Node<'t>) -> bool,
{
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if !visit(node) {
            continue;
        }
        let mut kids = children(node);
        kids.reverse();
        stack.extend(kids);
    }
}

/// Descendants whose kind is in `kinds`, in source order.
///
/// Does not descend below nodes whose kind is in `stop_at` (the root is
/// always entered).
pub fn find_descendants_by_type<'t>(
    root: Node<'t>,
    kinds: &[&str],
    stop_at: &[&str],
) -> Vec<Node<'t>> {
    let mut found = Vec::new();
    walk_tree(root, |node| {
        if node.id() != root.id() && kinds.contains(&node.kind()) {
            found.push(node);
        }
        node.id() == root.id() || !stop_at.contains(&node.kind())
    });
    found
}

pub fn first_descendant_by_type<'t>(root: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut found = None;
    walk_tree(root, |node| {
        if found.is_some() {
            return false;
        }
        if node.id() != root.id() && node.kind() == kind {
            found = Some(node);
            return false;
        }
        true
    });
    found
}

/// Nearest enclosing ancestor of one of the given kinds
pub fn enclosing_ancestor<'t>(node: Node<'t>, kinds: &[&str]) -> Option<Node<'t>> {
    let mut current = node.parent();
    while let Some(parent) = current {
        if kinds.contains(&parent.kind()) {
            return Some(parent);
        }
        current = parent.parent();
    }
    None
}

/// Comment block immediately above a definition, with comment markers stripped
pub fn leading_comment(node: Node, source: &str) -> Option<String> {
    let mut lines = Vec::new();
    let mut expected_row = node.start_position().row;
    let mut current = node.prev_sibling();

    while let Some(sibling) = current {
        if !is_comment(sibling) || sibling.end_position().row + 1 < expected_row {
            break;
        }
        lines.push(clean_comment(node_text(sibling, source)));
        expected_row = sibling.start_position().row;
        current = sibling.prev_sibling();
    }

    lines.reverse();
    let joined = lines
        .into_iter()
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

fn clean_comment(text: &str) -> String {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches("/**")
                .trim_start_matches("/*")
                .trim_end_matches("*/")
                .trim_start_matches("///")
                .trim_start_matches("//")
                .trim_start_matches('*')
                .trim()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Collapse whitespace so multi-line expressions read well in labels
pub fn compact(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::{Parser, Tree};

    fn parse_python(source: &str) -> Tree {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .unwrap();
        parser.parse(source, None).unwrap()
    }

    #[test]
    fn test_walk_tree_is_preorder() {
        let source = "def f():\n    a()\n    b()\n";
        let tree = parse_python(source);
        let mut names = Vec::new();
        walk_tree(tree.root_node(), |node| {
            if node.kind() == "identifier" {
                names.push(node_text(node, source).to_string());
            }
            true
        });
        assert_eq!(names, vec!["f", "a", "b"]);
    }

    #[test]
    fn test_find_descendants_respects_stop_kinds() {
        let source = "def f():\n    a()\n    def g():\n        b()\n";
        let tree = parse_python(source);
        let root = tree.root_node();
        let func = find_child_by_type(root, "function_definition").unwrap();

        let calls = find_descendants_by_type(func, &["call"], &["function_definition"]);
        assert_eq!(calls.len(), 1);
        assert_eq!(node_text(calls[0], source), "a()");

        let all = find_descendants_by_type(func, &["call"], &[]);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_positions_and_ancestors() {
        let source = "class A:\n    def m(self):\n        x()\n";
        let tree = parse_python(source);
        let call = first_descendant_by_type(tree.root_node(), "call").unwrap();
        assert_eq!(start_line(call), 3);
        assert_eq!(start_column(call), 8);
        let class = enclosing_ancestor(call, &["class_definition"]).unwrap();
        assert_eq!(start_line(class), 1);
        assert_eq!(end_line(class), 3);
    }

    #[test]
    fn test_clean_comment() {
        assert_eq!(clean_comment("/** Does things.\n * More. */"), "Does things. More.");
        assert_eq!(clean_comment("// single"), "single");
        assert_eq!(compact("a(\n    b,\n    c)"), "a( b, c)");
    }
}
