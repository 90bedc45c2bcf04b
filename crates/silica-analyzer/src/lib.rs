//! # Silica Analyzer - Field-State Inference and Classification
//!
//! Second half of the Silica pipeline: given a frozen
//! [`silica_core::Library`], check the module and call graphs, trace every
//! root module to assign each field a final state, and classify every
//! method by the field categories it writes.
//!
//! ## Example
//!
//! ```rust
//! use silica_core::{FieldState, Library};
//!
//! let mut library = Library::new();
//! library
//!     .add_source(
//!         "counter.h",
//!         r#"
//! class Counter {
//! public:
//!   logic<8> tock(logic<8> in) {
//!     logic<8> out = count + in;
//!     tick(in);
//!     return out;
//!   }
//! private:
//!   logic<8> count;
//!   void tick(logic<8> in) { count = count + in; }
//! };
//! "#,
//!     )
//!     .unwrap();
//! let report = silica_analyzer::process_sources(&mut library).unwrap();
//! assert!(!report.diagnostics.has_errors());
//! let counter = library.get_module("Counter").unwrap();
//! assert_eq!(counter.fields[0].state, FieldState::Register);
//! ```

mod classify;
mod graph;
mod trace;

pub use trace::{merge_branch, merge_read, merge_write, Access, Domain};

use serde::Serialize;
use thiserror::Error;
use tracing::info_span;

use silica_core::diagnostics::{Diagnostic, Diagnostics};
use silica_core::Library;

/// Outcome of a successful [`process_sources`] run. Warnings may still be
/// present.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub diagnostics: Diagnostics,
    pub modules: usize,
    /// Names of the root modules the tracer started from.
    pub roots: Vec<String>,
}

/// The aggregated failure of a [`process_sources`] run. Every diagnostic
/// collected up to and including the failing step is preserved.
#[derive(Debug, Clone, Error)]
#[error("analysis failed with {} error(s)", error_count(.diagnostics))]
pub struct AnalysisError {
    pub diagnostics: Diagnostics,
}

fn error_count(diagnostics: &Diagnostics) -> usize {
    diagnostics.error_count()
}

/// Freeze and analyze the library: flatten and collect (core), check the
/// component and call graphs, trace every root module, classify every
/// method, and dump the annotated graph to the log.
///
/// Each top-level step runs to completion before the diagnostic aggregate
/// is inspected, so one run reports as many problems as possible; any error
/// then fails the whole operation.
pub fn process_sources(library: &mut Library) -> Result<AnalysisReport, AnalysisError> {
    let _span = info_span!("analyze").entered();

    // Step 1: freeze, flatten, collect, link (silica-core).
    if let Err(error) = library.process_sources() {
        let mut diagnostics = library.take_diagnostics();
        diagnostics.push(Diagnostic::error(error.to_string()));
        return Err(AnalysisError { diagnostics });
    }
    let mut diagnostics = library.take_diagnostics();
    if diagnostics.has_errors() {
        return Err(AnalysisError { diagnostics });
    }

    // Step 2: structural graph checks. Tracing inlines calls and expands
    // components, so both graphs must be acyclic before it runs.
    let components_ok = graph::check_component_cycles(library, &mut diagnostics);
    let calls_ok = graph::check_recursion(library, &mut diagnostics);
    if !components_ok || !calls_ok {
        return Err(AnalysisError { diagnostics });
    }

    // Step 3: trace every root module.
    trace::trace_library(library, &mut diagnostics);
    if diagnostics.has_errors() {
        return Err(AnalysisError { diagnostics });
    }

    // Step 4: classify methods.
    classify::classify_methods(library, &mut diagnostics);
    if diagnostics.has_errors() {
        return Err(AnalysisError { diagnostics });
    }

    // Step 5: diagnostic dumps.
    trace::dump_traces(library);

    let roots = library
        .modules()
        .iter()
        .filter(|module| module.is_root())
        .map(|module| module.name.clone())
        .collect();
    Ok(AnalysisReport {
        diagnostics,
        modules: library.modules().len(),
        roots,
    })
}
