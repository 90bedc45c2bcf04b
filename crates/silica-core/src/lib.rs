//! # Silica Core - Module Library and Action Streams
//!
//! Front half of the Silica HDL translator: loading and parsing of the
//! hardware dialect, the module library, interface collection, and the
//! method-body analyzer that turns every method into an explicit stream of
//! field actions.
//!
//! ## Overview
//!
//! The input dialect is a restricted C++-shaped language describing
//! synchronous hardware: modules are classes, clocked behavior lives in
//! `tick()` methods, combinational behavior in `tock()` methods, and state
//! is held in `logic<N>` fields. This crate builds the frozen module graph
//! that `silica-analyzer` then traces and classifies.
//!
//! ## Example
//!
//! ```rust
//! use silica_core::Library;
//!
//! let mut library = Library::new();
//! library
//!     .add_source(
//!         "adder.h",
//!         r#"
//! class Adder {
//! public:
//!   logic<8> tock(logic<8> in) {
//!     return in + 7;
//!   }
//! };
//! "#,
//!     )
//!     .unwrap();
//! library.process_sources().unwrap();
//! assert!(library.get_module("Adder").is_some());
//! ```
//!
//! ## Architecture
//!
//! 1. **Loading** ([`library`]) - search paths, BOM stripping, include
//!    recursion
//! 2. **Parsing** ([`syntax`]) - tree-sitter front-end wrapper
//! 3. **Source model** ([`source`]) - per-file module declarations and
//!    include edges
//! 4. **Collection** (`collect`) - fields, components, method signatures
//! 5. **Action streams** ([`actions`]) - method bodies as data
//!
//! The library is mutable only during the load phase;
//! [`Library::process_sources`] freezes it, and every later mutation
//! attempt returns [`LibraryError::Frozen`].

pub mod actions;
mod collect;
pub mod diagnostics;
pub mod error;
pub mod library;
pub mod module;
pub mod source;
pub mod syntax;

pub use actions::{Action, CallTarget, SwitchCase, Target};
pub use diagnostics::{Diagnostic, Diagnostics, Severity, SourceSpan};
pub use error::LibraryError;
pub use library::{Library, PRELUDE};
pub use module::{
    ContextKind, Field, FieldKind, FieldRef, FieldState, Method, MethodCategories, MethodKind,
    ModParam, Module, ModuleId, Param, ReturnSlot, SourceId, StateNode, SubField,
};
pub use source::SourceFile;
