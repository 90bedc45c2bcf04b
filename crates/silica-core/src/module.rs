use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

use crate::actions::Action;
use crate::diagnostics::SourceSpan;

/// Index of a source file within its library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub usize);

/// Index of a module within its library.
///
/// Modules reference each other by handle rather than by pointer; the
/// component graph is walked on handles so cycles can be detected instead of
/// chased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub usize);

/// Final categorization of a field in the clocking model.
///
/// `Pending` is the pre-trace placeholder; the tracer replaces it with one
/// of the other states, falling back to `None` for fields nothing ever
/// touches. `Invalid` is terminal and absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldState {
    None,
    Input,
    Output,
    Signal,
    Register,
    Invalid,
    Pending,
}

impl fmt::Display for FieldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldState::None => "none",
            FieldState::Input => "input",
            FieldState::Output => "output",
            FieldState::Signal => "signal",
            FieldState::Register => "register",
            FieldState::Invalid => "invalid",
            FieldState::Pending => "pending",
        };
        write!(f, "{name}")
    }
}

/// What a declared member is, with exhaustive dispatch at use sites.
///
/// `Unresolved` records a member whose type names neither `logic<N>` nor a
/// module in the library; the field carries state `Invalid` from collection
/// onward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Scalar { width: u32 },
    Array { width: u32, count: u32 },
    Component { module: ModuleId },
    Unresolved { type_name: String },
}

impl FieldKind {
    pub fn is_component(&self) -> bool {
        matches!(self, FieldKind::Component { .. })
    }
}

/// A declared data member of a module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub span: SourceSpan,
    pub kind: FieldKind,
    /// Declared in a `public:` section. Public scalars are the module's
    /// ports: the tracer resolves a first write to one as `Output`.
    pub public: bool,
    pub state: FieldState,
}

/// Reference to a field of the enclosing module, optionally piercing one
/// level into a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    /// Index into the enclosing module's `fields`.
    pub field: usize,
    pub sub: Option<SubField>,
}

impl FieldRef {
    pub fn direct(field: usize) -> Self {
        Self { field, sub: None }
    }

    pub fn pierced(field: usize, module: ModuleId, sub_field: usize) -> Self {
        Self {
            field,
            sub: Some(SubField {
                module,
                field: sub_field,
            }),
        }
    }
}

/// The inner half of a pierced [`FieldRef`]: a field of the component's
/// module type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubField {
    pub module: ModuleId,
    pub field: usize,
}

/// Role of a method in the clocking model, inferred from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodKind {
    /// `tick*`: advances clocked state.
    Tick,
    /// `tock*`: computes combinational signals and outputs.
    Tock,
    /// Public value-returning method, callable from either domain.
    Func,
    /// Anything else; inherits the caller's clock domain.
    Helper,
}

/// A method parameter. Parameters are input contexts: reading one is always
/// legal, writing one never is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub width: u32,
    pub span: SourceSpan,
    pub state: FieldState,
}

/// A method's return slot, present when the return type is not `void`.
/// Return slots are output contexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnSlot {
    pub width: u32,
    pub span: SourceSpan,
    pub state: FieldState,
}

/// Categories recorded by the classifier: which kinds of fields the method
/// writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodCategories {
    pub writes_signal: bool,
    pub writes_output: bool,
    pub writes_register: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    pub span: SourceSpan,
    pub kind: MethodKind,
    pub public: bool,
    pub params: SmallVec<[Param; 4]>,
    pub ret: Option<ReturnSlot>,
    /// In-order action stream produced by the body analyzer.
    pub actions: Vec<Action>,
    /// Ordered multiset of fields this method reads. Populated from the
    /// body syntax, then extended by the tracer with component-prefixed
    /// references from calls that go through a component.
    pub fields_read: Vec<FieldRef>,
    pub fields_written: Vec<FieldRef>,
    pub categories: MethodCategories,
}

impl Method {
    pub fn find_param(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }
}

/// A module template parameter binding (`template<int N> class ...`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModParam {
    pub name: String,
    pub default: Option<String>,
    pub span: SourceSpan,
}

/// Context kind of a node in a module's state tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextKind {
    Module,
    Component,
    Field,
    Method,
    Param,
    Return,
}

/// One node of the state tree that mirrors a module's composition. Built by
/// the analyzer after tracing, for diagnostics dumps and the graph hand-off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateNode {
    pub ctx: ContextKind,
    pub name: String,
    pub state: FieldState,
    pub children: Vec<StateNode>,
}

/// One class-like module definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub span: SourceSpan,
    pub source: SourceId,
    pub params: Vec<ModParam>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    /// Modules that embed this one as a component.
    pub parents: Vec<ModuleId>,
    pub state_tree: Option<StateNode>,
}

impl Module {
    pub fn new(name: String, span: SourceSpan, source: SourceId) -> Self {
        Self {
            name,
            span,
            source,
            params: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            parents: Vec::new(),
            state_tree: None,
        }
    }

    pub fn find_field(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn find_method(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|m| m.name == name)
    }

    /// Component fields, with their target modules.
    pub fn components(&self) -> impl Iterator<Item = (usize, ModuleId)> + '_ {
        self.fields.iter().enumerate().filter_map(|(i, f)| match f.kind {
            FieldKind::Component { module } => Some((i, module)),
            _ => None,
        })
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> SourceSpan {
        SourceSpan::new(SourceId(0), 0, 0)
    }

    fn scalar(name: &str, public: bool) -> Field {
        Field {
            name: name.to_string(),
            span: span(),
            kind: FieldKind::Scalar { width: 8 },
            public,
            state: FieldState::Pending,
        }
    }

    #[test]
    fn test_find_field_and_method() {
        let mut module = Module::new("M".to_string(), span(), SourceId(0));
        module.fields.push(scalar("a", false));
        module.fields.push(Field {
            name: "c".to_string(),
            span: span(),
            kind: FieldKind::Component { module: ModuleId(1) },
            public: false,
            state: FieldState::Pending,
        });
        assert_eq!(module.find_field("a"), Some(0));
        assert_eq!(module.find_field("c"), Some(1));
        assert_eq!(module.find_field("missing"), None);
        assert_eq!(module.find_method("tock"), None);
    }

    #[test]
    fn test_components_iterator() {
        let mut module = Module::new("M".to_string(), span(), SourceId(0));
        module.fields.push(scalar("a", false));
        module.fields.push(Field {
            name: "c".to_string(),
            span: span(),
            kind: FieldKind::Component { module: ModuleId(7) },
            public: false,
            state: FieldState::Pending,
        });
        let comps: Vec<_> = module.components().collect();
        assert_eq!(comps, vec![(1, ModuleId(7))]);
    }

    #[test]
    fn test_field_ref_pierce() {
        let direct = FieldRef::direct(3);
        assert!(direct.sub.is_none());
        let pierced = FieldRef::pierced(1, ModuleId(2), 4);
        assert_eq!(pierced.field, 1);
        assert_eq!(
            pierced.sub,
            Some(SubField {
                module: ModuleId(2),
                field: 4
            })
        );
    }

    #[test]
    fn test_state_display() {
        assert_eq!(FieldState::Register.to_string(), "register");
        assert_eq!(FieldState::Invalid.to_string(), "invalid");
    }

    #[test]
    fn test_module_serializes_for_graph_handoff() {
        let mut module = Module::new("M".to_string(), span(), SourceId(0));
        module.fields.push(scalar("a", true));
        let json = serde_json::to_string(&module).unwrap();
        assert!(json.contains("\"name\":\"M\""));
        assert!(json.contains("\"Pending\""));

        let back: Module = serde_json::from_str(&json).unwrap();
        assert_eq!(back.fields.len(), 1);
        assert_eq!(back.fields[0].kind, FieldKind::Scalar { width: 8 });
    }
}
