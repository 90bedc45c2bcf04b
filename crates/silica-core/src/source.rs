use std::path::PathBuf;

use tree_sitter::{Node, Tree};

use crate::error::LibraryError;
use crate::module::{ModuleId, SourceId};
use crate::syntax;

/// One parsed input file.
///
/// Owns the BOM-stripped text and its parse tree. The module declarations it
/// contains are flattened into the library during `process_sources`; until
/// then only their count is knowable via [`SourceFile::class_nodes`].
#[derive(Debug)]
pub struct SourceFile {
    pub id: SourceId,
    /// Name the file was requested under (also its identity in the library).
    pub name: String,
    /// Resolved on-disk path, or the name again for in-memory sources.
    pub path: PathBuf,
    pub text: String,
    pub had_bom: bool,
    tree: Tree,
    /// Modules declared in this file, in source order. Filled by
    /// `process_sources`.
    pub modules: Vec<ModuleId>,
    /// Include edges to other sources, in directive order.
    pub includes: Vec<SourceId>,
}

impl SourceFile {
    pub fn parse(
        id: SourceId,
        name: String,
        path: PathBuf,
        text: String,
        had_bom: bool,
    ) -> Result<Self, LibraryError> {
        let tree = syntax::parse(&name, &text)?;
        Ok(Self {
            id,
            name,
            path,
            text,
            had_bom,
            tree,
            modules: Vec::new(),
            includes: Vec::new(),
        })
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// Class definition nodes in source order. Re-walked on demand because
    /// nodes borrow the tree and cannot be stored beside it.
    pub fn class_nodes(&self) -> Vec<Node<'_>> {
        syntax::collect_classes(self.root())
    }

    /// Whether the parser flagged syntax problems anywhere in the tree.
    pub fn has_syntax_errors(&self) -> bool {
        self.root().has_error()
    }

    /// 1-based line and column for a byte offset, for diagnostics rendering.
    pub fn line_col(&self, byte: usize) -> (usize, usize) {
        let byte = byte.min(self.text.len());
        let prefix = &self.text[..byte];
        let line = prefix.bytes().filter(|b| *b == b'\n').count() + 1;
        let col = prefix
            .rfind('\n')
            .map_or(byte, |newline| byte - newline - 1)
            + 1;
        (line, col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_text(text: &str) -> SourceFile {
        SourceFile::parse(
            SourceId(0),
            "test.h".to_string(),
            PathBuf::from("test.h"),
            text.to_string(),
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_line_col() {
        let src = parse_text("class A {};\nclass B {};\n");
        assert_eq!(src.line_col(0), (1, 1));
        assert_eq!(src.line_col(6), (1, 7));
        assert_eq!(src.line_col(12), (2, 1));
    }

    #[test]
    fn test_class_nodes_in_order() {
        let src = parse_text("class A { logic<1> x; };\nclass B { logic<1> y; };\n");
        let names: Vec<_> = src
            .class_nodes()
            .iter()
            .map(|c| {
                let name = c.child_by_field_name("name").unwrap();
                crate::syntax::node_text(name, &src.text).to_string()
            })
            .collect();
        assert_eq!(names, ["A", "B"]);
    }
}
