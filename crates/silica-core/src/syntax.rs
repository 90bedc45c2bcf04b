//! Thin wrapper over the tree-sitter front-end.
//!
//! The dialect is a C++-shaped subset, parsed with the stock
//! `tree-sitter-cpp` grammar. Everything downstream consumes only node
//! kinds, named fields, ordered named children, and byte ranges; this module
//! is the only place that names the two well-known symbols (the include
//! directive and its `path` field).

use tree_sitter::{Node, Parser, Tree};

use crate::diagnostics::SourceSpan;
use crate::error::LibraryError;
use crate::module::SourceId;

/// Node kind of an `#include` directive.
pub const INCLUDE_NODE: &str = "preproc_include";
/// Field carrying the include target on an [`INCLUDE_NODE`].
pub const PATH_FIELD: &str = "path";

pub fn parse(name: &str, text: &str) -> Result<Tree, LibraryError> {
    let mut parser = Parser::new();
    parser.set_language(&tree_sitter_cpp::LANGUAGE.into())?;
    parser
        .parse(text, None)
        .ok_or_else(|| LibraryError::Parse(name.to_string()))
}

pub fn node_text<'a>(node: Node<'_>, text: &'a str) -> &'a str {
    &text[node.byte_range()]
}

pub fn span_of(node: Node<'_>, source: SourceId) -> SourceSpan {
    SourceSpan::new(source, node.start_byte(), node.end_byte())
}

/// Pre-order walk over the whole tree.
pub fn visit<'t>(node: Node<'t>, f: &mut impl FnMut(Node<'t>)) {
    f(node);
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit(child, f);
    }
}

/// Named children in order, with comments filtered out.
pub fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|n| n.kind() != "comment")
        .collect()
}

/// Include targets in declaration order, quotes or angle brackets stripped.
pub fn collect_includes(root: Node<'_>, text: &str, source: SourceId) -> Vec<(String, SourceSpan)> {
    let mut includes = Vec::new();
    visit(root, &mut |node| {
        if node.kind() != INCLUDE_NODE {
            return;
        }
        let Some(path) = node.child_by_field_name(PATH_FIELD) else {
            return;
        };
        let raw = node_text(path, text);
        if raw.len() >= 2 {
            includes.push((raw[1..raw.len() - 1].to_string(), span_of(node, source)));
        }
    });
    includes
}

/// Class/struct definitions that declare modules: nodes with both a name and
/// a body, in source order.
pub fn collect_classes(root: Node<'_>) -> Vec<Node<'_>> {
    let mut classes = Vec::new();
    visit(root, &mut |node| {
        if matches!(node.kind(), "class_specifier" | "struct_specifier")
            && node.child_by_field_name("name").is_some()
            && node.child_by_field_name("body").is_some()
        {
            classes.push(node);
        }
    });
    classes
}

/// Name of the identifier buried inside a declarator chain
/// (`field_identifier`, `identifier`, or an `array_declarator` around one).
pub fn declarator_name<'a>(node: Node<'_>, text: &'a str) -> Option<&'a str> {
    match node.kind() {
        "identifier" | "field_identifier" => Some(node_text(node, text)),
        _ => {
            let inner = node.child_by_field_name("declarator")?;
            declarator_name(inner, text)
        }
    }
}

/// Bit width of a `logic<N>` type node: the first number literal among the
/// template arguments. `None` when the width is not a literal (for example a
/// module parameter).
pub fn logic_width(type_node: Node<'_>, text: &str) -> Option<u32> {
    let args = type_node.child_by_field_name("arguments")?;
    let mut width = None;
    visit(args, &mut |node| {
        if width.is_none() && node.kind() == "number_literal" {
            width = node_text(node, text).parse::<u32>().ok();
        }
    });
    width
}

/// True when `type_node` is the `logic<N>` scalar type.
pub fn is_logic_type(type_node: Node<'_>, text: &str) -> bool {
    type_node.kind() == "template_type"
        && type_node
            .child_by_field_name("name")
            .is_some_and(|n| node_text(n, text) == "logic")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
#include "metron_tools.h"
#include "adder.h"

class Counter {
public:
  logic<8> tock(logic<8> in) {
    return count + in;
  }

private:
  logic<8> count;
};
"#;

    #[test]
    fn test_parse_produces_tree() {
        let tree = parse("test.h", SOURCE).unwrap();
        assert_eq!(tree.root_node().kind(), "translation_unit");
    }

    #[test]
    fn test_collect_includes_strips_quotes() {
        let tree = parse("test.h", SOURCE).unwrap();
        let includes = collect_includes(tree.root_node(), SOURCE, SourceId(0));
        let names: Vec<_> = includes.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["metron_tools.h", "adder.h"]);
    }

    #[test]
    fn test_collect_classes_finds_module() {
        let tree = parse("test.h", SOURCE).unwrap();
        let classes = collect_classes(tree.root_node());
        assert_eq!(classes.len(), 1);
        let name = classes[0].child_by_field_name("name").unwrap();
        assert_eq!(node_text(name, SOURCE), "Counter");
    }

    #[test]
    fn test_logic_width() {
        let tree = parse("test.h", SOURCE).unwrap();
        let classes = collect_classes(tree.root_node());
        let mut widths = Vec::new();
        visit(classes[0], &mut |node| {
            if node.kind() == "template_type" && is_logic_type(node, SOURCE) {
                widths.push(logic_width(node, SOURCE));
            }
        });
        assert!(!widths.is_empty());
        assert!(widths.iter().all(|w| *w == Some(8)));
    }

    #[test]
    fn test_spans_are_byte_ranges() {
        let tree = parse("test.h", SOURCE).unwrap();
        let classes = collect_classes(tree.root_node());
        let span = span_of(classes[0], SourceId(3));
        assert_eq!(span.source, SourceId(3));
        assert_eq!(&SOURCE[span.start..span.start + 5], "class");
    }
}
