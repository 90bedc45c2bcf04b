//! Structural checks over the module graph.
//!
//! Modules are handles into the library, so the component edge set and the
//! method call graph are plain directed graphs; cycles in either are
//! detected with an SCC pass before tracing, which keeps the tracer's call
//! inlining finite.

use indexmap::IndexMap;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use silica_core::actions::{Action, CallTarget};
use silica_core::diagnostics::{Diagnostic, Diagnostics};
use silica_core::module::ModuleId;
use silica_core::Library;

/// Reject cyclic component composition (a module containing itself,
/// directly or transitively).
pub(crate) fn check_component_cycles(library: &Library, diagnostics: &mut Diagnostics) -> bool {
    let mut graph = DiGraph::<ModuleId, ()>::new();
    let nodes: Vec<NodeIndex> = (0..library.modules().len())
        .map(|index| graph.add_node(ModuleId(index)))
        .collect();
    for (index, module) in library.modules().iter().enumerate() {
        for (_, child) in module.components() {
            graph.add_edge(nodes[index], nodes[child.0], ());
        }
    }

    let mut ok = true;
    for scc in tarjan_scc(&graph) {
        let cyclic = scc.len() > 1 || scc.iter().any(|node| graph.contains_edge(*node, *node));
        if !cyclic {
            continue;
        }
        ok = false;
        let mut names: Vec<&str> = scc
            .iter()
            .map(|node| library.module(graph[*node]).name.as_str())
            .collect();
        names.sort_unstable();
        let first = library.module(graph[scc[0]]);
        diagnostics.push(
            Diagnostic::error(format!(
                "cyclic component composition: {}",
                names.join(" -> ")
            ))
            .with_span(first.span)
            .in_module(first.name.clone()),
        );
    }
    ok
}

/// Reject recursion in the method call graph; the tracer inlines callees
/// and requires the graph to be a DAG.
pub(crate) fn check_recursion(library: &Library, diagnostics: &mut Diagnostics) -> bool {
    let mut graph = DiGraph::<(ModuleId, usize), ()>::new();
    let mut nodes: IndexMap<(usize, usize), NodeIndex> = IndexMap::new();
    for (module_index, module) in library.modules().iter().enumerate() {
        for method_index in 0..module.methods.len() {
            nodes.insert(
                (module_index, method_index),
                graph.add_node((ModuleId(module_index), method_index)),
            );
        }
    }
    for (module_index, module) in library.modules().iter().enumerate() {
        for (method_index, method) in module.methods.iter().enumerate() {
            let caller = nodes[&(module_index, method_index)];
            visit_calls(&method.actions, &mut |call: &CallTarget| {
                let callee = nodes[&(call.module.0, call.method)];
                graph.add_edge(caller, callee, ());
            });
        }
    }

    let mut ok = true;
    for scc in tarjan_scc(&graph) {
        let cyclic = scc.len() > 1 || scc.iter().any(|node| graph.contains_edge(*node, *node));
        if !cyclic {
            continue;
        }
        ok = false;
        let (module_id, method_index) = graph[scc[0]];
        let module = library.module(module_id);
        let method = &module.methods[method_index];
        diagnostics.push(
            Diagnostic::error(format!(
                "recursion in the call graph through `{}`",
                method.name
            ))
            .with_span(method.span)
            .in_module(module.name.clone())
            .on_item(method.name.clone()),
        );
    }
    ok
}

fn visit_calls(actions: &[Action], f: &mut impl FnMut(&CallTarget)) {
    for action in actions {
        match action {
            Action::Read { .. } | Action::Write { .. } => {}
            Action::Branch {
                then_actions,
                else_actions,
                ..
            } => {
                visit_calls(then_actions, f);
                visit_calls(else_actions, f);
            }
            Action::Switch { cases, .. } => {
                for case in cases {
                    visit_calls(&case.label_actions, f);
                    visit_calls(&case.body_actions, f);
                }
            }
            Action::Call { target, args, .. } => {
                f(target);
                visit_calls(args, f);
            }
        }
    }
}
