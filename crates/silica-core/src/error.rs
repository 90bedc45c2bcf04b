use std::path::PathBuf;
use thiserror::Error;

/// Structural errors from misuse of the [`crate::Library`] API.
///
/// These are distinct from analysis diagnostics: a `LibraryError` means the
/// caller broke the load/process contract (or the filesystem did), not that
/// the source being analyzed is wrong. Semantic problems accumulate in
/// [`crate::Diagnostics`] instead.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("library is frozen; sources and search paths can no longer be added")]
    Frozen,

    #[error("a source named `{0}` is already registered")]
    DuplicateSource(String),

    #[error("could not find `{0}` in any search path")]
    FileNotFound(String),

    #[error("failed to read `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("source `{0}` is not valid UTF-8")]
    InvalidUtf8(String),

    #[error("the dialect grammar is incompatible with the tree-sitter runtime")]
    Language(#[from] tree_sitter::LanguageError),

    #[error("the parser produced no tree for `{0}`")]
    Parse(String),
}
