//! Structural parse of Python snippets using tree-sitter

use tree_sitter::{Node, Parser};

/// Location and description of the first parse error
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxFault {
    /// 1-based line
    pub line: usize,
    pub message: String,
}

/// Parse `source` and report the first syntax error, if any
///
/// A parser that cannot be built or that gives up is reported as a fault on
/// line 1 so analysis can carry on without a tree.
pub fn check_syntax(source: &str) -> Option<SyntaxFault> {
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(&tree_sitter_python::LANGUAGE.into()) {
        tracing::error!("Failed to load Python grammar: {}", e);
        return Some(SyntaxFault {
            line: 1,
            message: "Python grammar unavailable".to_string(),
        });
    }

    let tree = match parser.parse(source, None) {
        Some(tree) => tree,
        None => {
            return Some(SyntaxFault {
                line: 1,
                message: "parser gave up".to_string(),
            })
        }
    };

    let root = tree.root_node();
    if !root.has_error() {
        return None;
    }

    let fault = first_fault(root).unwrap_or(root);
    let line = fault.start_position().row + 1;
    let message = if fault.is_missing() {
        format!("missing '{}' at line {}", fault.kind(), line)
    } else {
        format!("invalid syntax at line {}", line)
    };

    Some(SyntaxFault { line, message })
}

/// Depth-first search for the earliest ERROR or MISSING node
fn first_fault(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }

    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_fault)
}
