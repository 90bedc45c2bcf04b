//! Method classification.
//!
//! After tracing, each method is scanned for the categories of fields it
//! writes: signals mark a combinational producer, outputs an output driver,
//! registers a sequential updater. A method may belong to several
//! categories; contradictory combinations and malformed `tock` returns are
//! fatal.

use tracing::debug;

use silica_core::actions::{Action, Target};
use silica_core::diagnostics::{Diagnostic, Diagnostics, SourceSpan};
use silica_core::module::{FieldState, MethodCategories, MethodKind};
use silica_core::Library;

pub(crate) fn classify_methods(library: &mut Library, diagnostics: &mut Diagnostics) {
    let mut results: Vec<(usize, usize, MethodCategories)> = Vec::new();
    let modules = library.modules();

    for (module_index, module) in modules.iter().enumerate() {
        for (method_index, method) in module.methods.iter().enumerate() {
            let mut categories = MethodCategories::default();
            for field_ref in &method.fields_written {
                let state = match field_ref.sub {
                    Some(sub) => modules[sub.module.0].fields[sub.field].state,
                    None => module.fields[field_ref.field].state,
                };
                match state {
                    FieldState::Signal => categories.writes_signal = true,
                    FieldState::Output => categories.writes_output = true,
                    FieldState::Register => categories.writes_register = true,
                    _ => {}
                }
            }

            let returns = return_spans(&method.actions);
            if method.ret.is_some() && !returns.is_empty() {
                categories.writes_output = true;
            }

            if categories.writes_signal {
                debug!("method {}.{} wrote a signal", module.name, method.name);
            }
            if categories.writes_output {
                debug!("method {}.{} wrote an output", module.name, method.name);
            }
            if categories.writes_register {
                debug!("method {}.{} wrote a register", module.name, method.name);
            }

            if categories.writes_signal && categories.writes_register {
                diagnostics.push(
                    Diagnostic::error("method drives both signals and registers")
                        .with_span(method.span)
                        .in_module(module.name.clone())
                        .on_item(method.name.clone()),
                );
            }

            if method.kind == MethodKind::Tock {
                check_tock_returns(module, method_index, &returns, diagnostics);
            }

            results.push((module_index, method_index, categories));
        }
    }

    for (module_index, method_index, categories) in results {
        library.modules_mut()[module_index].methods[method_index].categories = categories;
    }
}

/// The dialect allows a `tock` exactly one return, and it must be the
/// trailing statement.
fn check_tock_returns(
    module: &silica_core::module::Module,
    method_index: usize,
    returns: &[SourceSpan],
    diagnostics: &mut Diagnostics,
) {
    let method = &module.methods[method_index];
    if returns.len() > 1 {
        diagnostics.push(
            Diagnostic::error("tock has more than one return statement")
                .with_span(returns[1])
                .in_module(module.name.clone())
                .on_item(method.name.clone()),
        );
        return;
    }
    if returns.len() == 1 && !ends_with_return(&method.actions) {
        diagnostics.push(
            Diagnostic::error("tock return must be the trailing statement")
                .with_span(returns[0])
                .in_module(module.name.clone())
                .on_item(method.name.clone()),
        );
    }
}

fn ends_with_return(actions: &[Action]) -> bool {
    matches!(
        actions.last(),
        Some(Action::Write {
            target: Target::Return,
            ..
        })
    )
}

/// Spans of every return-slot write in the stream, branches included.
fn return_spans(actions: &[Action]) -> Vec<SourceSpan> {
    let mut spans = Vec::new();
    collect_return_spans(actions, &mut spans);
    spans
}

fn collect_return_spans(actions: &[Action], spans: &mut Vec<SourceSpan>) {
    for action in actions {
        match action {
            Action::Write {
                target: Target::Return,
                span,
            } => spans.push(*span),
            Action::Read { .. } | Action::Write { .. } => {}
            Action::Branch {
                then_actions,
                else_actions,
                ..
            } => {
                collect_return_spans(then_actions, spans);
                collect_return_spans(else_actions, spans);
            }
            Action::Switch { cases, .. } => {
                for case in cases {
                    collect_return_spans(&case.label_actions, spans);
                    collect_return_spans(&case.body_actions, spans);
                }
            }
            // Call argument actions cannot contain returns.
            Action::Call { .. } => {}
        }
    }
}
