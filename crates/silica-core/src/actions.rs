//! Method bodies as data.
//!
//! The body analyzer walks each method once and emits an in-order stream of
//! [`Action`]s. The tracer consumes only this stream, never the parse tree,
//! so control-flow merging and the cross-method fixed point stay independent
//! of grammar details.

use serde::{Deserialize, Serialize};
use tree_sitter::Node;

use crate::diagnostics::{Diagnostic, Diagnostics, SourceSpan};
use crate::module::{FieldKind, FieldRef, Module, ModuleId, SourceId};
use crate::syntax::{self, node_text};

/// What a read or write lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Field(FieldRef),
    /// Parameter of the enclosing method, by index.
    Param(usize),
    /// The enclosing method's return slot.
    Return,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    Read {
        target: Target,
        span: SourceSpan,
    },
    Write {
        target: Target,
        span: SourceSpan,
    },
    Branch {
        then_actions: Vec<Action>,
        else_actions: Vec<Action>,
        span: SourceSpan,
    },
    Switch {
        cases: Vec<SwitchCase>,
        span: SourceSpan,
    },
    Call {
        target: CallTarget,
        args: Vec<Action>,
        span: SourceSpan,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub label_actions: Vec<Action>,
    pub body_actions: Vec<Action>,
}

/// A resolved method invocation: same-module, or through a component field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallTarget {
    /// Index of the component field the call goes through, if any.
    pub component: Option<usize>,
    pub module: ModuleId,
    pub method: usize,
}

/// Result of analyzing one method body.
pub(crate) struct BodyStream {
    pub(crate) actions: Vec<Action>,
    pub(crate) fields_read: Vec<FieldRef>,
    pub(crate) fields_written: Vec<FieldRef>,
}

/// Walk `body` (a compound statement) of `modules[module].methods[method]`.
///
/// Requires every module's interface (fields, params, method names) to be
/// collected already, since member and call references resolve against the
/// whole library.
pub(crate) fn analyze_body(
    modules: &[Module],
    module: ModuleId,
    method: usize,
    body: Node<'_>,
    text: &str,
    source: SourceId,
    diags: &mut Diagnostics,
) -> BodyStream {
    let mut analyzer = BodyAnalyzer {
        modules,
        module,
        method,
        text,
        source,
        scopes: vec![Vec::new()],
        diags,
        fields_read: Vec::new(),
        fields_written: Vec::new(),
    };
    let mut actions = Vec::new();
    analyzer.stmt(body, &mut actions);
    BodyStream {
        actions,
        fields_read: analyzer.fields_read,
        fields_written: analyzer.fields_written,
    }
}

enum Resolved {
    Local,
    Param(usize),
    Field(FieldRef),
    Unknown,
}

struct BodyAnalyzer<'a, 'd> {
    modules: &'a [Module],
    module: ModuleId,
    method: usize,
    text: &'a str,
    source: SourceId,
    scopes: Vec<Vec<String>>,
    diags: &'d mut Diagnostics,
    fields_read: Vec<FieldRef>,
    fields_written: Vec<FieldRef>,
}

impl BodyAnalyzer<'_, '_> {
    fn cur_module(&self) -> &Module {
        &self.modules[self.module.0]
    }

    fn span(&self, node: Node<'_>) -> SourceSpan {
        syntax::span_of(node, self.source)
    }

    fn error(&mut self, message: String, node: Node<'_>) {
        let module = self.cur_module().name.clone();
        let item = self.cur_module().methods[self.method].name.clone();
        self.diags.push(
            Diagnostic::error(message)
                .with_span(self.span(node))
                .in_module(module)
                .on_item(item),
        );
    }

    fn add_local(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(name.to_string());
        }
    }

    fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.iter().any(|l| l == name))
    }

    fn resolve(&self, name: &str) -> Resolved {
        if self.is_local(name) {
            return Resolved::Local;
        }
        if let Some(index) = self.cur_module().methods[self.method].find_param(name) {
            return Resolved::Param(index);
        }
        if let Some(index) = self.cur_module().find_field(name) {
            return Resolved::Field(FieldRef::direct(index));
        }
        Resolved::Unknown
    }

    fn emit_read(&mut self, target: Target, node: Node<'_>, out: &mut Vec<Action>) {
        if let Target::Field(field_ref) = target {
            self.fields_read.push(field_ref);
        }
        out.push(Action::Read {
            target,
            span: self.span(node),
        });
    }

    fn emit_write(&mut self, target: Target, node: Node<'_>, out: &mut Vec<Action>) {
        if let Target::Field(field_ref) = target {
            self.fields_written.push(field_ref);
        }
        out.push(Action::Write {
            target,
            span: self.span(node),
        });
    }

    //--------------------------------------------------------------------
    // Statements

    fn stmt(&mut self, node: Node<'_>, out: &mut Vec<Action>) {
        match node.kind() {
            "compound_statement" => {
                self.scopes.push(Vec::new());
                for child in syntax::named_children(node) {
                    self.stmt(child, out);
                }
                self.scopes.pop();
            }
            "declaration" => self.declaration(node, out),
            "expression_statement" => {
                for child in syntax::named_children(node) {
                    self.expr(child, out);
                }
            }
            "return_statement" => {
                for child in syntax::named_children(node) {
                    self.expr(child, out);
                }
                out.push(Action::Write {
                    target: Target::Return,
                    span: self.span(node),
                });
            }
            "if_statement" => self.if_stmt(node, out),
            "switch_statement" => self.switch_stmt(node, out),
            "for_statement" => {
                self.scopes.push(Vec::new());
                if let Some(init) = node.child_by_field_name("initializer") {
                    self.stmt_or_expr(init, out);
                }
                if let Some(cond) = node.child_by_field_name("condition") {
                    self.expr(cond, out);
                }
                // the loop body is the trailing statement child
                let body = node
                    .child_by_field_name("body")
                    .or_else(|| syntax::named_children(node).into_iter().last());
                if let Some(body) = body {
                    self.stmt(body, out);
                }
                if let Some(update) = node.child_by_field_name("update") {
                    self.expr(update, out);
                }
                self.scopes.pop();
            }
            "while_statement" => {
                if let Some(cond) = node.child_by_field_name("condition") {
                    if let Some(value) = condition_value(cond) {
                        self.expr(value, out);
                    }
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.stmt(body, out);
                }
            }
            "do_statement" => {
                if let Some(body) = node.child_by_field_name("body") {
                    self.stmt(body, out);
                }
                if let Some(cond) = node.child_by_field_name("condition") {
                    self.expr(cond, out);
                }
            }
            "break_statement" | "continue_statement" | "comment" | "labeled_statement" => {}
            _ => self.expr(node, out),
        }
    }

    fn stmt_or_expr(&mut self, node: Node<'_>, out: &mut Vec<Action>) {
        if node.kind() == "declaration" {
            self.declaration(node, out);
        } else {
            self.expr(node, out);
        }
    }

    fn declaration(&mut self, node: Node<'_>, out: &mut Vec<Action>) {
        let mut cursor = node.walk();
        let declarators: Vec<Node<'_>> = node
            .children_by_field_name("declarator", &mut cursor)
            .collect();
        for declarator in declarators {
            if declarator.kind() == "init_declarator" {
                if let Some(value) = declarator.child_by_field_name("value") {
                    self.expr(value, out);
                }
                if let Some(inner) = declarator.child_by_field_name("declarator") {
                    if let Some(name) = syntax::declarator_name(inner, self.text) {
                        let name = name.to_string();
                        self.add_local(&name);
                    }
                }
            } else if let Some(name) = syntax::declarator_name(declarator, self.text) {
                let name = name.to_string();
                self.add_local(&name);
            }
        }
    }

    fn if_stmt(&mut self, node: Node<'_>, out: &mut Vec<Action>) {
        if let Some(cond) = node.child_by_field_name("condition") {
            if let Some(value) = condition_value(cond) {
                self.expr(value, out);
            }
        }
        let mut then_actions = Vec::new();
        if let Some(consequence) = node.child_by_field_name("consequence") {
            self.stmt(consequence, &mut then_actions);
        }
        let mut else_actions = Vec::new();
        if let Some(alternative) = node.child_by_field_name("alternative") {
            if alternative.kind() == "else_clause" {
                for child in syntax::named_children(alternative) {
                    self.stmt(child, &mut else_actions);
                }
            } else {
                self.stmt(alternative, &mut else_actions);
            }
        }
        out.push(Action::Branch {
            then_actions,
            else_actions,
            span: self.span(node),
        });
    }

    fn switch_stmt(&mut self, node: Node<'_>, out: &mut Vec<Action>) {
        if let Some(cond) = node.child_by_field_name("condition") {
            if let Some(value) = condition_value(cond) {
                self.expr(value, out);
            }
        }
        let mut cases = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            for case in syntax::named_children(body) {
                if case.kind() != "case_statement" {
                    continue;
                }
                let label = case.child_by_field_name("value");
                let mut label_actions = Vec::new();
                if let Some(value) = label {
                    self.expr(value, &mut label_actions);
                }
                let mut body_actions = Vec::new();
                for child in syntax::named_children(case) {
                    if label.is_some_and(|l| l.id() == child.id()) {
                        continue;
                    }
                    self.stmt(child, &mut body_actions);
                }
                cases.push(SwitchCase {
                    label_actions,
                    body_actions,
                });
            }
        }
        out.push(Action::Switch {
            cases,
            span: self.span(node),
        });
    }

    //--------------------------------------------------------------------
    // Expressions (rvalue context)

    fn expr(&mut self, node: Node<'_>, out: &mut Vec<Action>) {
        match node.kind() {
            "identifier" | "field_identifier" => {
                let name = node_text(node, self.text);
                match self.resolve(name) {
                    Resolved::Param(index) => self.emit_read(Target::Param(index), node, out),
                    Resolved::Field(field_ref) => {
                        self.emit_read(Target::Field(field_ref), node, out)
                    }
                    Resolved::Local | Resolved::Unknown => {}
                }
            }
            "this" | "number_literal" | "string_literal" | "char_literal" | "true" | "false"
            | "comment" => {}
            "field_expression" => {
                if let Some(target) = self.member_target(node) {
                    self.emit_read(target, node, out);
                } else if let Some(argument) = node.child_by_field_name("argument") {
                    if argument.kind() != "this" {
                        self.expr(argument, out);
                    }
                }
            }
            "assignment_expression" => self.assignment(node, out),
            "update_expression" => {
                if let Some(argument) = node.child_by_field_name("argument") {
                    if let Some(target) = self.lvalue_target(argument, out) {
                        self.emit_read(target, argument, out);
                        self.emit_write(target, argument, out);
                    }
                }
            }
            "call_expression" => self.call(node, out),
            "conditional_expression" => {
                if let Some(condition) = node.child_by_field_name("condition") {
                    self.expr(condition, out);
                }
                let mut then_actions = Vec::new();
                if let Some(consequence) = node.child_by_field_name("consequence") {
                    self.expr(consequence, &mut then_actions);
                }
                let mut else_actions = Vec::new();
                if let Some(alternative) = node.child_by_field_name("alternative") {
                    self.expr(alternative, &mut else_actions);
                }
                out.push(Action::Branch {
                    then_actions,
                    else_actions,
                    span: self.span(node),
                });
            }
            "subscript_expression" => {
                if let Some(argument) = node.child_by_field_name("argument") {
                    self.expr(argument, out);
                    for child in syntax::named_children(node) {
                        if child.id() != argument.id() {
                            self.expr(child, out);
                        }
                    }
                }
            }
            _ => {
                for child in syntax::named_children(node) {
                    self.expr(child, out);
                }
            }
        }
    }

    fn assignment(&mut self, node: Node<'_>, out: &mut Vec<Action>) {
        if let Some(right) = node.child_by_field_name("right") {
            self.expr(right, out);
        }
        let compound = node
            .child_by_field_name("operator")
            .is_some_and(|op| op.kind() != "=");
        if let Some(left) = node.child_by_field_name("left") {
            if let Some(target) = self.lvalue_target(left, out) {
                if compound {
                    self.emit_read(target, left, out);
                }
                self.emit_write(target, left, out);
            }
        }
    }

    fn call(&mut self, node: Node<'_>, out: &mut Vec<Action>) {
        let mut args = Vec::new();
        if let Some(arguments) = node.child_by_field_name("arguments") {
            for arg in syntax::named_children(arguments) {
                self.expr(arg, &mut args);
            }
        }
        let target = node
            .child_by_field_name("function")
            .and_then(|function| self.call_target(function));
        match target {
            Some(target) => out.push(Action::Call {
                target,
                args,
                span: self.span(node),
            }),
            // Prelude builtins (`b1`, `b4`, ...) and unresolved callees
            // contribute only their argument evaluation.
            None => out.append(&mut args),
        }
    }

    fn call_target(&mut self, function: Node<'_>) -> Option<CallTarget> {
        match function.kind() {
            "identifier" => {
                let name = node_text(function, self.text);
                self.cur_module().find_method(name).map(|method| CallTarget {
                    component: None,
                    module: self.module,
                    method,
                })
            }
            "field_expression" => {
                let argument = function.child_by_field_name("argument")?;
                let member = function.child_by_field_name("field")?;
                let name = node_text(member, self.text).to_string();
                if argument.kind() == "this" {
                    let found = self.cur_module().find_method(&name).map(|method| CallTarget {
                        component: None,
                        module: self.module,
                        method,
                    });
                    if found.is_none() {
                        let module = self.cur_module().name.clone();
                        self.error(format!("module `{module}` has no method `{name}`"), function);
                    }
                    return found;
                }
                if argument.kind() != "identifier" {
                    return None;
                }
                let base = node_text(argument, self.text);
                let Resolved::Field(field_ref) = self.resolve(base) else {
                    return None;
                };
                let component = match self.cur_module().fields[field_ref.field].kind {
                    FieldKind::Component { module } => Some(module),
                    _ => None,
                };
                let child = component?;
                let found = self.modules[child.0].find_method(&name).map(|method| CallTarget {
                    component: Some(field_ref.field),
                    module: child,
                    method,
                });
                if found.is_none() {
                    let child_name = self.modules[child.0].name.clone();
                    self.error(
                        format!("module `{child_name}` has no method `{name}`"),
                        function,
                    );
                }
                found
            }
            _ => None,
        }
    }

    //--------------------------------------------------------------------
    // Lvalues and member accesses

    /// Resolve an lvalue, emitting reads for any index expressions it
    /// contains. `None` means the assignment lands on a local or something
    /// unresolvable and produces no action.
    fn lvalue_target(&mut self, node: Node<'_>, out: &mut Vec<Action>) -> Option<Target> {
        match node.kind() {
            "identifier" | "field_identifier" => {
                let name = node_text(node, self.text);
                match self.resolve(name) {
                    Resolved::Param(index) => Some(Target::Param(index)),
                    Resolved::Field(field_ref) => Some(Target::Field(field_ref)),
                    Resolved::Local | Resolved::Unknown => None,
                }
            }
            "field_expression" => self.member_target(node),
            "subscript_expression" => {
                let argument = node.child_by_field_name("argument")?;
                for child in syntax::named_children(node) {
                    if child.id() != argument.id() {
                        self.expr(child, out);
                    }
                }
                self.lvalue_target(argument, out)
            }
            "parenthesized_expression" => {
                let inner = syntax::named_children(node).into_iter().next()?;
                self.lvalue_target(inner, out)
            }
            _ => {
                self.expr(node, out);
                None
            }
        }
    }

    /// Resolve `base.member` / `this->member` to a target. Accesses through
    /// a component pierce exactly one level into the component's fields.
    fn member_target(&mut self, node: Node<'_>) -> Option<Target> {
        let argument = node.child_by_field_name("argument")?;
        let member_node = node.child_by_field_name("field")?;
        let member = node_text(member_node, self.text).to_string();
        match argument.kind() {
            "this" => self
                .cur_module()
                .find_field(&member)
                .map(|index| Target::Field(FieldRef::direct(index))),
            "identifier" => {
                let base = node_text(argument, self.text);
                match self.resolve(base) {
                    Resolved::Local | Resolved::Unknown => None,
                    Resolved::Param(index) => Some(Target::Param(index)),
                    Resolved::Field(field_ref) => {
                        let component = match self.cur_module().fields[field_ref.field].kind {
                            FieldKind::Component { module } => Some(module),
                            // Sub-part of a scalar; the access reads or
                            // writes the scalar itself.
                            _ => None,
                        };
                        let Some(child) = component else {
                            return Some(Target::Field(field_ref));
                        };
                        match self.modules[child.0].find_field(&member) {
                            Some(sub) => {
                                Some(Target::Field(FieldRef::pierced(field_ref.field, child, sub)))
                            }
                            None => {
                                let child_name = self.modules[child.0].name.clone();
                                self.error(
                                    format!("module `{child_name}` has no field `{member}`"),
                                    node,
                                );
                                None
                            }
                        }
                    }
                }
            }
            "field_expression" => {
                self.error(
                    "component access pierces more than one level".to_string(),
                    node,
                );
                None
            }
            _ => None,
        }
    }
}

fn condition_value<'t>(condition: Node<'t>) -> Option<Node<'t>> {
    condition
        .child_by_field_name("value")
        .or_else(|| syntax::named_children(condition).into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::Library;

    fn stream(src: &str, method: &str) -> (Library, Vec<Action>) {
        let mut library = Library::new();
        library.add_source("test.h", src).unwrap();
        library.process_sources().unwrap();
        assert!(
            !library.diagnostics().has_errors(),
            "unexpected diagnostics: {}",
            library.diagnostics()
        );
        let module = &library.modules()[0];
        let actions = module.methods[module.find_method(method).unwrap()]
            .actions
            .clone();
        (library, actions)
    }

    fn flat(actions: &[Action]) -> Vec<String> {
        actions.iter().map(describe).collect()
    }

    fn describe(action: &Action) -> String {
        match action {
            Action::Read { target, .. } => format!("read {target:?}"),
            Action::Write { target, .. } => format!("write {target:?}"),
            Action::Branch { .. } => "branch".to_string(),
            Action::Switch { .. } => "switch".to_string(),
            Action::Call { .. } => "call".to_string(),
        }
    }

    #[test]
    fn test_plain_assignment_reads_rhs_then_writes() {
        let (_library, actions) = stream(
            r#"
class M {
  logic<8> a;
  logic<8> b;
  void tock() { a = b; }
};
"#,
            "tock",
        );
        assert_eq!(
            flat(&actions),
            [
                "read Field(FieldRef { field: 1, sub: None })",
                "write Field(FieldRef { field: 0, sub: None })",
            ]
        );
    }

    #[test]
    fn test_compound_assignment_reads_then_writes_target() {
        let (_library, actions) = stream(
            r#"
class M {
  logic<8> a;
  void tock(logic<8> in) { a += in; }
};
"#,
            "tock",
        );
        assert_eq!(
            flat(&actions),
            [
                "read Param(0)",
                "read Field(FieldRef { field: 0, sub: None })",
                "write Field(FieldRef { field: 0, sub: None })",
            ]
        );
    }

    #[test]
    fn test_return_emits_reads_then_return_write() {
        let (_library, actions) = stream(
            r#"
class M {
  logic<8> a;
public:
  logic<8> tock() { return a + 1; }
};
"#,
            "tock",
        );
        assert_eq!(
            flat(&actions),
            [
                "read Field(FieldRef { field: 0, sub: None })",
                "write Return",
            ]
        );
    }

    #[test]
    fn test_ternary_becomes_branch() {
        let (_library, actions) = stream(
            r#"
class M {
  logic<1> sel;
  logic<8> a;
  logic<8> b;
  logic<8> o;
  void tock() { o = sel ? a : b; }
};
"#,
            "tock",
        );
        // condition read, branch over the arms, then the write
        assert_eq!(flat(&actions), ["read Field(FieldRef { field: 0, sub: None })", "branch", "write Field(FieldRef { field: 3, sub: None })"]);
        let Action::Branch {
            then_actions,
            else_actions,
            ..
        } = &actions[1]
        else {
            panic!("expected branch");
        };
        assert_eq!(then_actions.len(), 1);
        assert_eq!(else_actions.len(), 1);
    }

    #[test]
    fn test_builtin_call_contributes_argument_reads() {
        let (_library, actions) = stream(
            r#"
class M {
  logic<8> a;
  logic<4> o;
  void tock() { o = b4(a, 0); }
};
"#,
            "tock",
        );
        assert_eq!(
            flat(&actions),
            [
                "read Field(FieldRef { field: 0, sub: None })",
                "write Field(FieldRef { field: 1, sub: None })",
            ]
        );
    }

    #[test]
    fn test_component_call_is_resolved() {
        let src = r#"
class Inner {
public:
  void tock_run(logic<8> in) { held = in; }
  logic<8> held;
};

class Outer {
  Inner inner;
public:
  void tock(logic<8> in) { inner.tock_run(in); }
};
"#;
        let mut library = Library::new();
        library.add_source("test.h", src).unwrap();
        library.process_sources().unwrap();
        let outer = library.get_module("Outer").unwrap();
        let tock = &outer.methods[0];
        let Action::Call { target, args, .. } = &tock.actions[0] else {
            panic!("expected call, got {:?}", tock.actions);
        };
        assert_eq!(target.component, Some(0));
        assert_eq!(target.module, library.module_id("Inner").unwrap());
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn test_update_expression_reads_then_writes() {
        let (_library, actions) = stream(
            r#"
class M {
  logic<8> n;
  void tick() { n++; }
};
"#,
            "tick",
        );
        assert_eq!(
            flat(&actions),
            [
                "read Field(FieldRef { field: 0, sub: None })",
                "write Field(FieldRef { field: 0, sub: None })",
            ]
        );
    }

    #[test]
    fn test_for_loop_body_visited_once() {
        let (_library, actions) = stream(
            r#"
class M {
  logic<8> wave[16];
  void tick() {
    for (int i = 0; i < 16; i++) {
      wave[i] = 0;
    }
  }
};
"#,
            "tick",
        );
        // condition and update touch only the local; one write for the body
        assert_eq!(flat(&actions), ["write Field(FieldRef { field: 0, sub: None })"]);
    }

    #[test]
    fn test_this_access_is_direct() {
        let (_library, actions) = stream(
            r#"
class M {
  logic<8> a;
  void tick(logic<8> in) { this->a = in; }
};
"#,
            "tick",
        );
        assert_eq!(
            flat(&actions),
            [
                "read Param(0)",
                "write Field(FieldRef { field: 0, sub: None })",
            ]
        );
    }
}
