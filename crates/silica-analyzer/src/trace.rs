//! Field-state inference.
//!
//! The tracer walks the action streams of every root module's `tick`/`tock`
//! methods, inlining calls, and merges per-slot states through the lattice.
//! Source-language semantics give each field a unique state once read/write
//! order within `tick` vs `tock` is known, so this is structural
//! propagation, not iterative dataflow: every slot is written once per
//! action and never revisited after the trace completes.

use std::collections::HashMap;

use tracing::{debug, info_span};

use silica_core::actions::{Action, Target};
use silica_core::diagnostics::{Diagnostic, Diagnostics, SourceSpan};
use silica_core::module::{
    ContextKind, FieldKind, FieldRef, FieldState, MethodKind, Module, ModuleId, StateNode,
};
use silica_core::Library;

/// Clock domain a statement executes in: inside a `tick` (sequential) or a
/// `tock` (combinational).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Tick,
    Tock,
}

impl Domain {
    fn bit(self) -> u8 {
        match self {
            Domain::Tick => 1,
            Domain::Tock => 2,
        }
    }
}

/// How an action reaches a slot: on the module's own field, or piercing
/// into a component's field from the parent side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Direct,
    Component,
}

/// Combine two per-arm states after a branch. Equal states compose
/// identity; `Pending`/`None` defer to the other arm; `Invalid` absorbs;
/// any remaining disagreement is contradictory.
pub fn merge_branch(a: FieldState, b: FieldState) -> FieldState {
    use FieldState as S;
    if a == b {
        return a;
    }
    match (a, b) {
        (S::Invalid, _) | (_, S::Invalid) => S::Invalid,
        (S::Pending, other) | (other, S::Pending) => other,
        (S::None, other) | (other, S::None) => other,
        _ => S::Invalid,
    }
}

/// Apply one read to a slot's state. `Err` carries the reason for a fresh
/// invalidation.
pub fn merge_read(state: FieldState, access: Access) -> Result<FieldState, &'static str> {
    use FieldState as S;
    match (access, state) {
        (_, S::Invalid) => Ok(S::Invalid),
        // A read of an untouched slot observes the value latched on the
        // previous clock edge.
        (_, S::Pending | S::None) => Ok(S::Register),
        (_, S::Input) => Ok(S::Input),
        (_, S::Signal) => Ok(S::Signal),
        (_, S::Register) => Ok(S::Register),
        (Access::Direct, S::Output) => Err("output is read back inside its own module"),
        (Access::Component, S::Output) => Ok(S::Output),
    }
}

/// Apply one write to a slot's state. `public` marks fields declared in a
/// `public:` section, which become outputs on first write.
pub fn merge_write(
    state: FieldState,
    domain: Domain,
    access: Access,
    public: bool,
) -> Result<FieldState, &'static str> {
    use FieldState as S;
    if state == S::Invalid {
        return Ok(S::Invalid);
    }
    if access == Access::Component {
        // The parent side may only drive a component's inputs.
        return match state {
            S::Pending | S::None | S::Input => Ok(S::Input),
            _ => Err("only component inputs may be driven by the parent"),
        };
    }
    match (domain, state) {
        (_, S::Input) => Err("input is written inside the module it feeds"),
        (_, S::Output) => Ok(S::Output),
        (Domain::Tock, S::Pending | S::None) => {
            Ok(if public { S::Output } else { S::Signal })
        }
        (Domain::Tock, S::Signal) => Ok(S::Signal),
        (Domain::Tock, S::Register) => Err("register is written during a tock"),
        (Domain::Tick, S::Pending | S::None) => {
            Ok(if public { S::Output } else { S::Register })
        }
        (Domain::Tick, S::Register) => Ok(S::Register),
        (Domain::Tick, S::Signal) => Err("signal is written during a tick"),
        (_, S::Invalid) => Ok(S::Invalid),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Field { module: ModuleId, field: usize },
    Param { module: ModuleId, method: usize, index: usize },
    Return { module: ModuleId, method: usize },
}

enum RefDir {
    Read,
    Write,
}

/// Trace every root module of the frozen library and write the final state
/// of every slot back into it. Also appends component-prefixed field
/// references to callers that invoke methods through components, and builds
/// the per-module state trees.
pub(crate) fn trace_library(library: &mut Library, diagnostics: &mut Diagnostics) {
    let roots: Vec<ModuleId> = library
        .modules()
        .iter()
        .enumerate()
        .filter(|(_, m)| m.is_root())
        .map(|(i, _)| ModuleId(i))
        .collect();

    let (states, pending_refs) = {
        let mut tracer = Tracer::new(library.modules(), diagnostics);
        for root in roots {
            tracer.trace_root(root);
        }
        (tracer.states, tracer.pending_refs)
    };

    // Write back: states onto fields/params/returns, prefixed refs onto
    // callers, then the composition state trees.
    for (module_id, method, field_ref, dir) in pending_refs {
        let method = &mut library.modules_mut()[module_id.0].methods[method];
        match dir {
            RefDir::Read => method.fields_read.push(field_ref),
            RefDir::Write => method.fields_written.push(field_ref),
        }
    }
    for (slot, state) in states {
        let state = finalize(state);
        match slot {
            Slot::Field { module, field } => {
                library.modules_mut()[module.0].fields[field].state = state;
            }
            Slot::Param {
                module,
                method,
                index,
            } => {
                library.modules_mut()[module.0].methods[method].params[index].state = state;
            }
            Slot::Return { module, method } => {
                if let Some(ret) = library.modules_mut()[module.0].methods[method].ret.as_mut() {
                    ret.state = state;
                }
            }
        }
    }

    let trees: Vec<StateNode> = (0..library.modules().len())
        .map(|index| build_state_node(library.modules(), ModuleId(index)))
        .collect();
    for (module, tree) in library.modules_mut().iter_mut().zip(trees) {
        module.state_tree = Some(tree);
    }
}

fn finalize(state: FieldState) -> FieldState {
    match state {
        FieldState::Pending => FieldState::None,
        other => other,
    }
}

struct Tracer<'a, 'd> {
    modules: &'a [Module],
    states: HashMap<Slot, FieldState>,
    /// Which clock domains wrote each field slot; both bits set is the
    /// cross-clock contradiction regardless of the lattice state.
    masks: HashMap<Slot, u8>,
    diagnostics: &'d mut Diagnostics,
    stack: Vec<(ModuleId, usize)>,
    pending_refs: Vec<(ModuleId, usize, FieldRef, RefDir)>,
}

impl<'a, 'd> Tracer<'a, 'd> {
    fn new(modules: &'a [Module], diagnostics: &'d mut Diagnostics) -> Self {
        let mut states = HashMap::new();
        for (index, module) in modules.iter().enumerate() {
            let module_id = ModuleId(index);
            for (field_index, field) in module.fields.iter().enumerate() {
                states.insert(
                    Slot::Field {
                        module: module_id,
                        field: field_index,
                    },
                    field.state,
                );
            }
            for (method_index, method) in module.methods.iter().enumerate() {
                for (param_index, param) in method.params.iter().enumerate() {
                    states.insert(
                        Slot::Param {
                            module: module_id,
                            method: method_index,
                            index: param_index,
                        },
                        param.state,
                    );
                }
                if let Some(ret) = &method.ret {
                    states.insert(
                        Slot::Return {
                            module: module_id,
                            method: method_index,
                        },
                        ret.state,
                    );
                }
            }
        }
        Tracer {
            modules,
            states,
            masks: HashMap::new(),
            diagnostics,
            stack: Vec::new(),
            pending_refs: Vec::new(),
        }
    }

    fn trace_root(&mut self, root: ModuleId) {
        let module = &self.modules[root.0];
        let _span = info_span!("trace", module = %module.name).entered();
        for (index, method) in module.methods.iter().enumerate() {
            let domain = match method.kind {
                MethodKind::Tick => Domain::Tick,
                MethodKind::Tock => Domain::Tock,
                _ => continue,
            };
            self.trace_method(root, index, domain);
        }
    }

    fn trace_method(&mut self, module: ModuleId, method: usize, domain: Domain) {
        if self.stack.contains(&(module, method)) {
            let target = &self.modules[module.0].methods[method];
            let (name, span) = (target.name.clone(), target.span);
            self.error(
                format!("recursive call to `{name}`"),
                module,
                name.clone(),
                span,
            );
            return;
        }
        self.stack.push((module, method));
        let actions: &'a [Action] = &self.modules[module.0].methods[method].actions;
        self.trace_actions(module, method, actions, domain);
        self.stack.pop();
    }

    fn trace_actions(
        &mut self,
        module: ModuleId,
        method: usize,
        actions: &[Action],
        domain: Domain,
    ) {
        for action in actions {
            match action {
                Action::Read { target, span } => self.read(module, method, *target, *span),
                Action::Write { target, span } => {
                    self.write(module, method, *target, *span, domain)
                }
                Action::Branch {
                    then_actions,
                    else_actions,
                    span,
                } => {
                    let base = self.states.clone();
                    self.trace_actions(module, method, then_actions, domain);
                    let after_then = std::mem::replace(&mut self.states, base);
                    self.trace_actions(module, method, else_actions, domain);
                    let after_else = std::mem::take(&mut self.states);
                    self.states = self.merge_maps(after_then, after_else, *span);
                }
                Action::Switch { cases, span } => {
                    let base = self.states.clone();
                    // The no-match arm participates, so a field assigned in
                    // every case but lacking a default still merges against
                    // its pre-switch state.
                    let mut merged = base.clone();
                    for case in cases {
                        self.states = base.clone();
                        self.trace_actions(module, method, &case.label_actions, domain);
                        self.trace_actions(module, method, &case.body_actions, domain);
                        let arm = std::mem::take(&mut self.states);
                        merged = self.merge_maps(merged, arm, *span);
                    }
                    self.states = merged;
                }
                Action::Call { target, args, span: _ } => {
                    self.trace_actions(module, method, args, domain);
                    let callee = &self.modules[target.module.0].methods[target.method];
                    let callee_domain = match callee.kind {
                        MethodKind::Tick => Domain::Tick,
                        MethodKind::Tock => Domain::Tock,
                        _ => domain,
                    };
                    self.trace_method(target.module, target.method, callee_domain);
                    if let Some(component) = target.component {
                        self.prefix_refs(module, method, component, target.module, target.method);
                    }
                }
            }
        }
    }

    /// After a call through component `component`, the callee's direct field
    /// references become pierced references of the caller.
    fn prefix_refs(
        &mut self,
        caller_module: ModuleId,
        caller_method: usize,
        component: usize,
        callee_module: ModuleId,
        callee_method: usize,
    ) {
        let callee = &self.modules[callee_module.0].methods[callee_method];
        for field_ref in &callee.fields_read {
            if field_ref.sub.is_none() {
                self.pending_refs.push((
                    caller_module,
                    caller_method,
                    FieldRef::pierced(component, callee_module, field_ref.field),
                    RefDir::Read,
                ));
            }
        }
        for field_ref in &callee.fields_written {
            if field_ref.sub.is_none() {
                self.pending_refs.push((
                    caller_module,
                    caller_method,
                    FieldRef::pierced(component, callee_module, field_ref.field),
                    RefDir::Write,
                ));
            }
        }
    }

    fn read(&mut self, module: ModuleId, method: usize, target: Target, span: SourceSpan) {
        let Target::Field(field_ref) = target else {
            // Parameter reads are always legal; return slots are never read.
            return;
        };
        let Some((slot, access)) = self.field_slot(module, field_ref) else {
            return;
        };
        let state = self.states[&slot];
        match merge_read(state, access) {
            Ok(next) => {
                self.states.insert(slot, next);
            }
            Err(reason) => self.invalidate(slot, module, method, reason, span),
        }
    }

    fn write(
        &mut self,
        module: ModuleId,
        method: usize,
        target: Target,
        span: SourceSpan,
        domain: Domain,
    ) {
        match target {
            Target::Return => {
                // Return slots stay outputs; nothing to merge.
            }
            Target::Param(index) => {
                let slot = Slot::Param {
                    module,
                    method,
                    index,
                };
                if self.states[&slot] != FieldState::Invalid {
                    self.invalidate(slot, module, method, "method parameter is written", span);
                }
            }
            Target::Field(field_ref) => {
                let Some((slot, access)) = self.field_slot(module, field_ref) else {
                    return;
                };
                let mask = self.masks.entry(slot).or_insert(0);
                *mask |= domain.bit();
                let cross_clock = *mask == (Domain::Tick.bit() | Domain::Tock.bit());
                let state = self.states[&slot];
                if cross_clock {
                    if state != FieldState::Invalid {
                        self.invalidate(
                            slot,
                            module,
                            method,
                            "field is written in both tick and tock",
                            span,
                        );
                    }
                    return;
                }
                let public = match slot {
                    Slot::Field { module, field } => self.modules[module.0].fields[field].public,
                    _ => false,
                };
                match merge_write(state, domain, access, public) {
                    Ok(next) => {
                        self.states.insert(slot, next);
                    }
                    Err(reason) => self.invalidate(slot, module, method, reason, span),
                }
            }
        }
    }

    /// Resolve a field reference to its state slot. Direct references to
    /// component or unresolved fields carry no lattice state and are
    /// skipped.
    fn field_slot(&self, module: ModuleId, field_ref: FieldRef) -> Option<(Slot, Access)> {
        match field_ref.sub {
            Some(sub) => Some((
                Slot::Field {
                    module: sub.module,
                    field: sub.field,
                },
                Access::Component,
            )),
            None => {
                let field = &self.modules[module.0].fields[field_ref.field];
                match field.kind {
                    FieldKind::Component { .. } | FieldKind::Unresolved { .. } => None,
                    _ => Some((
                        Slot::Field {
                            module,
                            field: field_ref.field,
                        },
                        Access::Direct,
                    )),
                }
            }
        }
    }

    fn merge_maps(
        &mut self,
        a: HashMap<Slot, FieldState>,
        b: HashMap<Slot, FieldState>,
        span: SourceSpan,
    ) -> HashMap<Slot, FieldState> {
        let mut merged = a;
        for (slot, right) in b {
            let left = merged.get(&slot).copied().unwrap_or(right);
            let combined = merge_branch(left, right);
            if combined == FieldState::Invalid
                && left != FieldState::Invalid
                && right != FieldState::Invalid
            {
                let (module_name, item) = self.slot_names(slot);
                self.diagnostics.push(
                    Diagnostic::error(format!(
                        "contradictory states across branches: {left} vs {right}"
                    ))
                    .with_span(span)
                    .in_module(module_name)
                    .on_item(item),
                );
            }
            merged.insert(slot, combined);
        }
        merged
    }

    fn invalidate(
        &mut self,
        slot: Slot,
        module: ModuleId,
        method: usize,
        reason: &str,
        span: SourceSpan,
    ) {
        self.states.insert(slot, FieldState::Invalid);
        let (slot_module, item) = self.slot_names(slot);
        let via = &self.modules[module.0].methods[method].name;
        self.diagnostics.push(
            Diagnostic::error(format!("{reason} (in `{via}`)"))
                .with_span(span)
                .in_module(slot_module)
                .on_item(item),
        );
    }

    fn error(&mut self, message: String, module: ModuleId, item: String, span: SourceSpan) {
        let module_name = self.modules[module.0].name.clone();
        self.diagnostics.push(
            Diagnostic::error(message)
                .with_span(span)
                .in_module(module_name)
                .on_item(item),
        );
    }

    fn slot_names(&self, slot: Slot) -> (String, String) {
        match slot {
            Slot::Field { module, field } => {
                let module = &self.modules[module.0];
                (module.name.clone(), module.fields[field].name.clone())
            }
            Slot::Param {
                module,
                method,
                index,
            } => {
                let module = &self.modules[module.0];
                let method = &module.methods[method];
                (module.name.clone(), method.params[index].name.clone())
            }
            Slot::Return { module, method } => {
                let module = &self.modules[module.0];
                let method = &module.methods[method];
                (module.name.clone(), format!("{}()", method.name))
            }
        }
    }
}

//------------------------------------------------------------------------

/// Build the state tree mirroring a module's composition. Components expand
/// into their module's own tree one level down; composition is acyclic by
/// the time this runs.
fn build_state_node(modules: &[Module], id: ModuleId) -> StateNode {
    let module = &modules[id.0];
    let mut children = Vec::new();
    for field in &module.fields {
        match field.kind {
            FieldKind::Component { module: child } => children.push(StateNode {
                ctx: ContextKind::Component,
                name: field.name.clone(),
                state: FieldState::None,
                children: vec![build_state_node(modules, child)],
            }),
            _ => children.push(StateNode {
                ctx: ContextKind::Field,
                name: field.name.clone(),
                state: field.state,
                children: Vec::new(),
            }),
        }
    }
    for method in &module.methods {
        let mut method_children = Vec::new();
        for param in method.params.iter() {
            method_children.push(StateNode {
                ctx: ContextKind::Param,
                name: param.name.clone(),
                state: param.state,
                children: Vec::new(),
            });
        }
        if let Some(ret) = &method.ret {
            method_children.push(StateNode {
                ctx: ContextKind::Return,
                name: format!("{}()", method.name),
                state: ret.state,
                children: Vec::new(),
            });
        }
        children.push(StateNode {
            ctx: ContextKind::Method,
            name: method.name.clone(),
            state: FieldState::None,
            children: method_children,
        });
    }
    StateNode {
        ctx: ContextKind::Module,
        name: module.name.clone(),
        state: FieldState::None,
        children,
    }
}

/// Log every module's state tree and field references, indentation
/// mirroring composition depth.
pub(crate) fn dump_traces(library: &Library) {
    for module in library.modules() {
        let _span = info_span!("dump", module = %module.name).entered();
        if let Some(tree) = &module.state_tree {
            dump_node(tree, 0);
        }
        for method in &module.methods {
            for field_ref in &method.fields_read {
                debug!("{} reads {}", method.name, ref_name(library, module, *field_ref));
            }
            for field_ref in &method.fields_written {
                debug!("{} writes {}", method.name, ref_name(library, module, *field_ref));
            }
        }
    }
}

fn ref_name(library: &Library, module: &Module, field_ref: FieldRef) -> String {
    let outer = &module.fields[field_ref.field];
    match field_ref.sub {
        Some(sub) => {
            let inner = &library.module(sub.module).fields[sub.field];
            format!("{}.{} {}", outer.name, inner.name, inner.state)
        }
        None => format!("{} {}", outer.name, outer.state),
    }
}

fn dump_node(node: &StateNode, depth: usize) {
    let pad = "  ".repeat(depth);
    debug!("{}{:?} {} {}", pad, node.ctx, node.name, node.state);
    for child in &node.children {
        dump_node(child, depth + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL_STATES: [FieldState; 7] = [
        FieldState::None,
        FieldState::Input,
        FieldState::Output,
        FieldState::Signal,
        FieldState::Register,
        FieldState::Invalid,
        FieldState::Pending,
    ];

    #[test]
    fn test_merge_branch_identity() {
        for state in ALL_STATES {
            assert_eq!(merge_branch(state, state), state);
        }
    }

    #[test]
    fn test_merge_branch_pending_defers() {
        assert_eq!(
            merge_branch(FieldState::Pending, FieldState::Signal),
            FieldState::Signal
        );
        assert_eq!(
            merge_branch(FieldState::Register, FieldState::Pending),
            FieldState::Register
        );
    }

    #[test]
    fn test_merge_branch_signal_register_conflict() {
        assert_eq!(
            merge_branch(FieldState::Signal, FieldState::Register),
            FieldState::Invalid
        );
    }

    #[test]
    fn test_merge_branch_invalid_absorbs() {
        for state in ALL_STATES {
            assert_eq!(merge_branch(FieldState::Invalid, state), FieldState::Invalid);
            assert_eq!(merge_branch(state, FieldState::Invalid), FieldState::Invalid);
        }
    }

    #[test]
    fn test_merge_read_promotes_pending_to_register() {
        assert_eq!(
            merge_read(FieldState::Pending, Access::Direct),
            Ok(FieldState::Register)
        );
    }

    #[test]
    fn test_merge_read_own_output_is_invalid() {
        assert!(merge_read(FieldState::Output, Access::Direct).is_err());
        assert_eq!(
            merge_read(FieldState::Output, Access::Component),
            Ok(FieldState::Output)
        );
    }

    #[test]
    fn test_merge_write_domains() {
        assert_eq!(
            merge_write(FieldState::Pending, Domain::Tock, Access::Direct, false),
            Ok(FieldState::Signal)
        );
        assert_eq!(
            merge_write(FieldState::Pending, Domain::Tick, Access::Direct, false),
            Ok(FieldState::Register)
        );
        assert_eq!(
            merge_write(FieldState::Pending, Domain::Tock, Access::Direct, true),
            Ok(FieldState::Output)
        );
        assert_eq!(
            merge_write(FieldState::Pending, Domain::Tick, Access::Direct, true),
            Ok(FieldState::Output)
        );
    }

    #[test]
    fn test_merge_write_cross_domain_conflicts() {
        assert!(merge_write(FieldState::Register, Domain::Tock, Access::Direct, false).is_err());
        assert!(merge_write(FieldState::Signal, Domain::Tick, Access::Direct, false).is_err());
    }

    #[test]
    fn test_merge_write_component_only_drives_inputs() {
        assert_eq!(
            merge_write(FieldState::Pending, Domain::Tock, Access::Component, false),
            Ok(FieldState::Input)
        );
        assert_eq!(
            merge_write(FieldState::Input, Domain::Tick, Access::Component, false),
            Ok(FieldState::Input)
        );
        assert!(merge_write(FieldState::Signal, Domain::Tock, Access::Component, false).is_err());
        assert!(merge_write(FieldState::Output, Domain::Tock, Access::Component, false).is_err());
    }

    fn any_state() -> impl Strategy<Value = FieldState> {
        prop::sample::select(ALL_STATES.to_vec())
    }

    proptest! {
        #[test]
        fn prop_merge_branch_commutative(a in any_state(), b in any_state()) {
            prop_assert_eq!(merge_branch(a, b), merge_branch(b, a));
        }

        #[test]
        fn prop_merge_branch_idempotent(a in any_state()) {
            prop_assert_eq!(merge_branch(a, a), a);
        }

        #[test]
        fn prop_merge_branch_invalid_absorbs(a in any_state()) {
            prop_assert_eq!(merge_branch(a, FieldState::Invalid), FieldState::Invalid);
        }
    }
}
