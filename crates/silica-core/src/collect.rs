//! Extraction of module interfaces from class definitions.
//!
//! Collection runs in two passes driven by the library: interfaces first
//! (fields, components, method signatures), so that method bodies in any
//! file can resolve members of modules declared in any other, then bodies
//! (see [`crate::actions`]).

use indexmap::IndexMap;
use smallvec::SmallVec;
use tree_sitter::Node;

use crate::diagnostics::{Diagnostic, Diagnostics, SourceSpan};
use crate::module::{
    Field, FieldKind, FieldState, Method, MethodCategories, MethodKind, ModParam, Module, ModuleId,
    Param, ReturnSlot, SourceId,
};
use crate::syntax::{self, node_text};

pub(crate) struct CollectCtx<'a> {
    pub(crate) text: &'a str,
    pub(crate) source: SourceId,
    pub(crate) by_name: &'a IndexMap<String, ModuleId>,
}

/// Collect module parameters, fields/components, and method signatures for
/// one class definition.
pub(crate) fn collect_interface(
    ctx: &CollectCtx<'_>,
    class: Node<'_>,
    module: &mut Module,
    diags: &mut Diagnostics,
) {
    collect_mod_params(ctx, class, module);

    let Some(body) = class.child_by_field_name("body") else {
        return;
    };
    // class bodies start private, struct bodies start public
    let mut public = class.kind() == "struct_specifier";
    for member in syntax::named_children(body) {
        match member.kind() {
            "access_specifier" => {
                public = node_text(member, ctx.text).trim_end_matches(':').trim() == "public";
            }
            "field_declaration" => collect_field(ctx, member, public, module, diags),
            "function_definition" => {
                if let Some(method) = collect_method(ctx, member, public) {
                    module.methods.push(method);
                }
            }
            _ => {}
        }
    }

    check_name_clashes(module, diags);
}

/// Body nodes for the methods of `class`, in the same order
/// [`collect_interface`] declared them. Prototypes and members that were not
/// collected as methods never appear here.
pub(crate) fn method_bodies<'t>(class: Node<'t>, text: &str) -> Vec<Option<Node<'t>>> {
    let Some(body) = class.child_by_field_name("body") else {
        return Vec::new();
    };
    syntax::named_children(body)
        .into_iter()
        .filter(|member| member.kind() == "function_definition" && is_method(*member, text))
        .map(|member| member.child_by_field_name("body"))
        .collect()
}

fn collect_mod_params(ctx: &CollectCtx<'_>, class: Node<'_>, module: &mut Module) {
    // `template<int N> class ...` puts the class under a template_declaration
    let mut ancestor = class.parent();
    while let Some(node) = ancestor {
        if node.kind() == "template_declaration" {
            let Some(params) = node.child_by_field_name("parameters") else {
                return;
            };
            for param in syntax::named_children(params) {
                if let Some(name) = first_identifier(param, ctx.text) {
                    let default = param
                        .child_by_field_name("default_value")
                        .or_else(|| param.child_by_field_name("default_type"))
                        .map(|d| node_text(d, ctx.text).to_string());
                    module.params.push(ModParam {
                        name: name.to_string(),
                        default,
                        span: syntax::span_of(param, ctx.source),
                    });
                }
            }
            return;
        }
        ancestor = node.parent();
    }
}

fn collect_field(
    ctx: &CollectCtx<'_>,
    member: Node<'_>,
    public: bool,
    module: &mut Module,
    diags: &mut Diagnostics,
) {
    let Some(type_node) = member.child_by_field_name("type") else {
        return;
    };
    let mut cursor = member.walk();
    let declarators: Vec<Node<'_>> = member
        .children_by_field_name("declarator", &mut cursor)
        .collect();
    for declarator in declarators {
        // A declarator shaped like a function is a method prototype; the
        // dialect defines methods inline, so there is nothing to collect.
        if declarator.kind() == "function_declarator" {
            continue;
        }
        let Some(name) = syntax::declarator_name(declarator, ctx.text) else {
            continue;
        };
        let span = syntax::span_of(declarator, ctx.source);
        let array_count = array_count(declarator, ctx.text);
        let (kind, state) = field_kind(ctx, type_node, array_count, span, &module.name, name, diags);
        module.fields.push(Field {
            name: name.to_string(),
            span,
            kind,
            public,
            state,
        });
    }
}

fn field_kind(
    ctx: &CollectCtx<'_>,
    type_node: Node<'_>,
    array_count: Option<u32>,
    span: SourceSpan,
    module_name: &str,
    field_name: &str,
    diags: &mut Diagnostics,
) -> (FieldKind, FieldState) {
    if syntax::is_logic_type(type_node, ctx.text) {
        let width = syntax::logic_width(type_node, ctx.text).unwrap_or_else(|| {
            diags.push(
                Diagnostic::warning("field width is not a literal; assuming parameterized width")
                    .with_span(span)
                    .in_module(module_name)
                    .on_item(field_name),
            );
            0
        });
        let kind = match array_count {
            Some(count) => FieldKind::Array { width, count },
            None => FieldKind::Scalar { width },
        };
        return (kind, FieldState::Pending);
    }
    match type_node.kind() {
        "primitive_type" | "sized_type_specifier" => {
            let width = match node_text(type_node, ctx.text) {
                "bool" => 1,
                _ => 32,
            };
            let kind = match array_count {
                Some(count) => FieldKind::Array { width, count },
                None => FieldKind::Scalar { width },
            };
            (kind, FieldState::Pending)
        }
        "type_identifier" => {
            let type_name = node_text(type_node, ctx.text);
            match ctx.by_name.get(type_name) {
                Some(target) => (
                    FieldKind::Component { module: *target },
                    FieldState::Pending,
                ),
                None => {
                    diags.push(
                        Diagnostic::error(format!(
                            "component type `{type_name}` does not name a module in the library"
                        ))
                        .with_span(span)
                        .in_module(module_name)
                        .on_item(field_name),
                    );
                    (
                        FieldKind::Unresolved {
                            type_name: type_name.to_string(),
                        },
                        FieldState::Invalid,
                    )
                }
            }
        }
        _ => (
            FieldKind::Unresolved {
                type_name: node_text(type_node, ctx.text).to_string(),
            },
            FieldState::Invalid,
        ),
    }
}

fn collect_method(ctx: &CollectCtx<'_>, member: Node<'_>, public: bool) -> Option<Method> {
    if !is_method(member, ctx.text) {
        return None;
    }
    let type_node = member.child_by_field_name("type")?;
    let declarator = member.child_by_field_name("declarator")?;
    let name = syntax::declarator_name(declarator, ctx.text)?.to_string();
    let span = syntax::span_of(member, ctx.source);

    let mut params = SmallVec::new();
    if let Some(function) = function_declarator(declarator) {
        if let Some(list) = function.child_by_field_name("parameters") {
            for param in syntax::named_children(list) {
                if param.kind() != "parameter_declaration" {
                    continue;
                }
                let Some(param_declarator) = param.child_by_field_name("declarator") else {
                    continue;
                };
                let Some(param_name) = syntax::declarator_name(param_declarator, ctx.text) else {
                    continue;
                };
                let width = param
                    .child_by_field_name("type")
                    .and_then(|t| syntax::logic_width(t, ctx.text))
                    .unwrap_or(0);
                params.push(Param {
                    name: param_name.to_string(),
                    width,
                    span: syntax::span_of(param, ctx.source),
                    state: FieldState::Input,
                });
            }
        }
    }

    let ret = if node_text(type_node, ctx.text) == "void" {
        None
    } else {
        Some(ReturnSlot {
            width: syntax::logic_width(type_node, ctx.text).unwrap_or(0),
            span: syntax::span_of(type_node, ctx.source),
            state: FieldState::Output,
        })
    };

    let kind = if name.starts_with("tick") {
        MethodKind::Tick
    } else if name.starts_with("tock") {
        MethodKind::Tock
    } else if public && ret.is_some() {
        MethodKind::Func
    } else {
        MethodKind::Helper
    };

    Some(Method {
        name,
        span,
        kind,
        public,
        params,
        ret,
        actions: Vec::new(),
        fields_read: Vec::new(),
        fields_written: Vec::new(),
        categories: MethodCategories::default(),
    })
}

/// A collectible method has a return type and a nameable declarator;
/// constructors and destructors have neither and are skipped.
fn is_method(member: Node<'_>, text: &str) -> bool {
    member.child_by_field_name("type").is_some()
        && member
            .child_by_field_name("declarator")
            .and_then(|d| syntax::declarator_name(d, text))
            .is_some()
}

fn function_declarator<'t>(node: Node<'t>) -> Option<Node<'t>> {
    if node.kind() == "function_declarator" {
        return Some(node);
    }
    node.child_by_field_name("declarator")
        .and_then(function_declarator)
}

fn array_count(declarator: Node<'_>, text: &str) -> Option<u32> {
    if declarator.kind() != "array_declarator" {
        return declarator
            .child_by_field_name("declarator")
            .and_then(|inner| array_count(inner, text));
    }
    let size = declarator.child_by_field_name("size")?;
    let mut count = None;
    syntax::visit(size, &mut |node| {
        if count.is_none() && node.kind() == "number_literal" {
            count = node_text(node, text).parse::<u32>().ok();
        }
    });
    count
}

fn first_identifier<'a>(node: Node<'_>, text: &'a str) -> Option<&'a str> {
    let mut found = None;
    syntax::visit(node, &mut |n| {
        if found.is_none() && matches!(n.kind(), "identifier" | "type_identifier") {
            found = Some(node_text(n, text));
        }
    });
    found
}

fn check_name_clashes(module: &mut Module, diags: &mut Diagnostics) {
    let clashes: Vec<usize> = module
        .fields
        .iter()
        .enumerate()
        .filter(|(_, field)| module.methods.iter().any(|m| m.name == field.name))
        .map(|(i, _)| i)
        .collect();
    for index in clashes {
        let (name, span) = {
            let field = &module.fields[index];
            (field.name.clone(), field.span)
        };
        diags.push(
            Diagnostic::error(format!("`{name}` names both a field and a method"))
                .with_span(span)
                .in_module(module.name.clone())
                .on_item(name.clone()),
        );
        module.fields[index].state = FieldState::Invalid;
    }
}
