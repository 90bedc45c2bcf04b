use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, info_span};

use crate::actions;
use crate::collect::{self, CollectCtx};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::LibraryError;
use crate::module::{Module, ModuleId, SourceId};
use crate::source::SourceFile;
use crate::syntax;

/// The compiler-supplied prelude; its include is skipped during dependency
/// discovery.
pub const PRELUDE: &str = "metron_tools.h";

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Process-scoped container of every source file and every module.
///
/// Lifecycle is two-phased: during the *load* phase, search paths and
/// sources may be added; [`Library::process_sources`] freezes the library
/// and flattens, collects, and links the module graph. Any mutation
/// attempted after freezing returns [`LibraryError::Frozen`] and leaves the
/// library unchanged. Storage is released on drop.
#[derive(Debug, Default)]
pub struct Library {
    search_paths: Vec<PathBuf>,
    sources: Vec<SourceFile>,
    modules: Vec<Module>,
    by_name: IndexMap<String, ModuleId>,
    frozen: bool,
    diagnostics: Diagnostics,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Append a directory to the ordered search path list.
    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) -> Result<(), LibraryError> {
        if self.frozen {
            return Err(LibraryError::Frozen);
        }
        self.search_paths.push(path.into());
        Ok(())
    }

    /// Attach an externally produced source. Unlike [`Library::load`], a
    /// duplicate name is an error here.
    pub fn add_source(&mut self, name: &str, text: &str) -> Result<SourceId, LibraryError> {
        if self.frozen {
            return Err(LibraryError::Frozen);
        }
        if self.source_id(name).is_some() {
            return Err(LibraryError::DuplicateSource(name.to_string()));
        }
        self.load_blob(name, PathBuf::from(name), text.as_bytes().to_vec())
    }

    /// Locate `filename` under the first search path where it exists, read
    /// it, and hand it to [`Library::load_blob`]. Loading an
    /// already-registered filename is a warning, not an error, and returns
    /// the existing source.
    pub fn load(&mut self, filename: &str) -> Result<SourceId, LibraryError> {
        if self.frozen {
            return Err(LibraryError::Frozen);
        }
        if let Some(existing) = self.source_id(filename) {
            self.diagnostics
                .push(Diagnostic::warning(format!("duplicate filename `{filename}`")));
            return Ok(existing);
        }

        let mut candidates: Vec<PathBuf> = self
            .search_paths
            .iter()
            .map(|path| {
                if path.as_os_str().is_empty() {
                    PathBuf::from(filename)
                } else {
                    path.join(filename)
                }
            })
            .collect();
        if candidates.is_empty() {
            candidates.push(PathBuf::from(filename));
        }

        for full_path in candidates {
            if !full_path.exists() {
                continue;
            }
            let bytes = fs::read(&full_path).map_err(|source| LibraryError::Io {
                path: full_path.clone(),
                source,
            })?;
            return self.load_blob(filename, full_path, bytes);
        }

        self.diagnostics.push(Diagnostic::error(format!(
            "couldn't find `{filename}` in any search path"
        )));
        Err(LibraryError::FileNotFound(filename.to_string()))
    }

    /// Register a raw source blob, stripping a UTF-8 BOM if present, then
    /// recurse through its includes (excluding the prelude). An include that
    /// cannot be resolved is reported and skipped; loading continues.
    pub fn load_blob(
        &mut self,
        name: &str,
        path: impl AsRef<Path>,
        mut bytes: Vec<u8>,
    ) -> Result<SourceId, LibraryError> {
        if self.frozen {
            return Err(LibraryError::Frozen);
        }
        if let Some(existing) = self.source_id(name) {
            self.diagnostics
                .push(Diagnostic::warning(format!("duplicate filename `{name}`")));
            return Ok(existing);
        }
        let _span = info_span!("load", file = name).entered();

        let had_bom = bytes.starts_with(&UTF8_BOM);
        if had_bom {
            bytes.drain(..UTF8_BOM.len());
        }
        let text = String::from_utf8(bytes)
            .map_err(|_| LibraryError::InvalidUtf8(name.to_string()))?;

        let id = SourceId(self.sources.len());
        let source =
            SourceFile::parse(id, name.to_string(), path.as_ref().to_path_buf(), text, had_bom)?;
        if source.has_syntax_errors() {
            self.diagnostics
                .push(Diagnostic::warning(format!("syntax errors in `{name}`")));
        }
        let includes = syntax::collect_includes(source.root(), &source.text, id);
        self.sources.push(source);

        for (include, span) in includes {
            if include == PRELUDE {
                continue;
            }
            let target = match self.source_id(&include) {
                Some(existing) => Some(existing),
                None => match self.load(&include) {
                    Ok(loaded) => Some(loaded),
                    Err(_) => {
                        self.diagnostics.push(
                            Diagnostic::error(format!("unresolved include `{include}`"))
                                .with_span(span),
                        );
                        None
                    }
                },
            };
            if let Some(target) = target {
                self.sources[id.0].includes.push(target);
            }
        }
        Ok(id)
    }

    //--------------------------------------------------------------------
    // Lookup

    pub fn source_id(&self, name: &str) -> Option<SourceId> {
        self.sources
            .iter()
            .position(|s| s.name == name)
            .map(SourceId)
    }

    pub fn get_source(&self, name: &str) -> Option<&SourceFile> {
        self.source_id(name).map(|id| &self.sources[id.0])
    }

    pub fn source(&self, id: SourceId) -> &SourceFile {
        &self.sources[id.0]
    }

    pub fn sources(&self) -> &[SourceFile] {
        &self.sources
    }

    pub fn module_id(&self, name: &str) -> Option<ModuleId> {
        self.by_name.get(name).copied()
    }

    pub fn get_module(&self, name: &str) -> Option<&Module> {
        self.module_id(name).map(|id| &self.modules[id.0])
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0]
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Mutable access for the analysis passes that annotate the frozen
    /// graph (states, reference lists, categories).
    pub fn modules_mut(&mut self) -> &mut [Module] {
        &mut self.modules
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.diagnostics)
    }

    //--------------------------------------------------------------------
    // Freeze + collect

    /// Freeze the library, flatten module declarations out of every source,
    /// collect interfaces and method action streams, and link the component
    /// graph. Tracing and classification run on top of this in the analyzer
    /// crate.
    pub fn process_sources(&mut self) -> Result<(), LibraryError> {
        if self.frozen {
            return Err(LibraryError::Frozen);
        }
        self.frozen = true;
        let _span = info_span!("process_sources").entered();

        // Flatten: one module shell per class declaration, so later passes
        // can resolve references between modules in any order. Per-source
        // slots keep declaration indices aligned even when a duplicate name
        // is skipped.
        let mut decl_slots: Vec<Vec<Option<ModuleId>>> = Vec::with_capacity(self.sources.len());
        for index in 0..self.sources.len() {
            let decls: Vec<(String, crate::diagnostics::SourceSpan)> = {
                let source = &self.sources[index];
                source
                    .class_nodes()
                    .iter()
                    .map(|class| {
                        let name = class
                            .child_by_field_name("name")
                            .map(|n| syntax::node_text(n, &source.text).to_string())
                            .unwrap_or_default();
                        (name, syntax::span_of(*class, source.id))
                    })
                    .collect()
            };
            let mut slots = Vec::with_capacity(decls.len());
            for (name, span) in decls {
                if self.by_name.contains_key(&name) {
                    self.diagnostics.push(
                        Diagnostic::error(format!("duplicate module name `{name}`"))
                            .with_span(span)
                            .in_module(name.clone()),
                    );
                    slots.push(None);
                    continue;
                }
                let id = ModuleId(self.modules.len());
                self.modules
                    .push(Module::new(name.clone(), span, SourceId(index)));
                self.by_name.insert(name, id);
                self.sources[index].modules.push(id);
                slots.push(Some(id));
            }
            decl_slots.push(slots);
        }

        // Interfaces: fields, components, method signatures.
        let Library {
            sources,
            modules,
            by_name,
            diagnostics,
            ..
        } = self;
        for (index, source) in sources.iter().enumerate() {
            let classes = source.class_nodes();
            let ctx = CollectCtx {
                text: &source.text,
                source: source.id,
                by_name,
            };
            for (decl, slot) in decl_slots[index].iter().enumerate() {
                let Some(id) = slot else { continue };
                collect::collect_interface(&ctx, classes[decl], &mut modules[id.0], diagnostics);
            }
        }

        // Bodies: action streams, now that every interface is known.
        for (index, source) in sources.iter().enumerate() {
            let classes = source.class_nodes();
            for (decl, slot) in decl_slots[index].iter().enumerate() {
                let Some(id) = slot else { continue };
                let bodies = collect::method_bodies(classes[decl], &source.text);
                let streams: Vec<Option<actions::BodyStream>> = bodies
                    .iter()
                    .enumerate()
                    .map(|(method, body)| {
                        body.map(|body| {
                            actions::analyze_body(
                                modules,
                                *id,
                                method,
                                body,
                                &source.text,
                                source.id,
                                diagnostics,
                            )
                        })
                    })
                    .collect();
                let module = &mut modules[id.0];
                debug!(module = %module.name, methods = streams.len(), "collected");
                for (method, stream) in streams.into_iter().enumerate() {
                    let Some(stream) = stream else { continue };
                    let slot = &mut module.methods[method];
                    slot.actions = stream.actions;
                    slot.fields_read = stream.fields_read;
                    slot.fields_written = stream.fields_written;
                }
            }
        }

        // Link component back-edges.
        let mut edges: Vec<(ModuleId, ModuleId)> = Vec::new();
        for (index, module) in self.modules.iter().enumerate() {
            for (_, child) in module.components() {
                edges.push((child, ModuleId(index)));
            }
        }
        for (child, parent) in edges {
            let parents = &mut self.modules[child.0].parents;
            if !parents.contains(&parent) {
                parents.push(parent);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{FieldKind, FieldState, MethodKind};

    const COUNTER: &str = r#"
#include "metron_tools.h"

class Counter {
public:
  logic<8> tock(logic<8> in) {
    logic<8> out = count + in;
    tick(in);
    return out;
  }

private:
  logic<8> count;

  void tick(logic<8> in) {
    count = count + in;
  }
};
"#;

    fn loaded(src: &str) -> Library {
        let mut lib = Library::new();
        lib.add_source("test.h", src).unwrap();
        lib.process_sources().unwrap();
        lib
    }

    #[test]
    fn test_flatten_and_lookup() {
        let lib = loaded(COUNTER);
        let module = lib.get_module("Counter").unwrap();
        assert_eq!(module.name, "Counter");
        assert!(lib.get_module("Missing").is_none());
        assert_eq!(lib.get_source("test.h").unwrap().modules.len(), 1);
    }

    #[test]
    fn test_interface_collection() {
        let lib = loaded(COUNTER);
        let module = lib.get_module("Counter").unwrap();
        assert_eq!(module.fields.len(), 1);
        assert_eq!(module.fields[0].name, "count");
        assert_eq!(module.fields[0].kind, FieldKind::Scalar { width: 8 });
        assert!(!module.fields[0].public);

        assert_eq!(module.methods.len(), 2);
        let tock = &module.methods[0];
        assert_eq!(tock.kind, MethodKind::Tock);
        assert!(tock.public);
        assert_eq!(tock.params.len(), 1);
        assert_eq!(tock.params[0].name, "in");
        assert_eq!(tock.params[0].state, FieldState::Input);
        assert_eq!(tock.ret.as_ref().unwrap().width, 8);

        let tick = &module.methods[1];
        assert_eq!(tick.kind, MethodKind::Tick);
        assert!(tick.ret.is_none());
    }

    #[test]
    fn test_body_streams_collected() {
        let lib = loaded(COUNTER);
        let module = lib.get_module("Counter").unwrap();
        let tock = &module.methods[0];
        assert!(!tock.actions.is_empty());
        // `count + in` reads the field once in the local initializer
        assert_eq!(tock.fields_read.len(), 1);
        let tick = &module.methods[1];
        assert_eq!(tick.fields_read.len(), 1);
        assert_eq!(tick.fields_written.len(), 1);
    }

    #[test]
    fn test_components_and_parents() {
        let src = r#"
class Inner {
public:
  logic<8> out;
};

class Outer {
  Inner inner;
};
"#;
        let lib = loaded(src);
        let inner = lib.get_module("Inner").unwrap();
        let outer_id = lib.module_id("Outer").unwrap();
        assert_eq!(inner.parents, vec![outer_id]);
        let outer = lib.get_module("Outer").unwrap();
        assert!(outer.fields[0].kind.is_component());
        assert!(!inner.is_root());
        assert!(outer.is_root());
    }

    #[test]
    fn test_unresolved_component_is_invalid() {
        let src = "class M { Missing c; };";
        let mut lib = Library::new();
        lib.add_source("test.h", src).unwrap();
        lib.process_sources().unwrap();
        let module = lib.get_module("M").unwrap();
        assert!(matches!(
            module.fields[0].kind,
            FieldKind::Unresolved { .. }
        ));
        assert_eq!(module.fields[0].state, FieldState::Invalid);
        assert!(lib.diagnostics().has_errors());
    }

    #[test]
    fn test_duplicate_module_name_is_error() {
        let src = "class M { logic<1> a; };\nclass M { logic<1> b; };";
        let mut lib = Library::new();
        lib.add_source("test.h", src).unwrap();
        lib.process_sources().unwrap();
        assert!(lib.diagnostics().has_errors());
        assert_eq!(lib.modules().len(), 1);
    }

    #[test]
    fn test_field_method_name_clash_is_invalid() {
        let src = r#"
class M {
  logic<1> step;
  void tick() { step = 1; }
  void step() { }
};
"#;
        let mut lib = Library::new();
        lib.add_source("test.h", src).unwrap();
        lib.process_sources().unwrap();
        let module = lib.get_module("M").unwrap();
        assert_eq!(module.fields[0].state, FieldState::Invalid);
        assert!(lib.diagnostics().has_errors());
    }

    #[test]
    fn test_freeze_rejects_mutation() {
        let mut lib = loaded(COUNTER);
        assert!(lib.is_frozen());
        assert!(matches!(
            lib.add_search_path("/tmp"),
            Err(LibraryError::Frozen)
        ));
        assert!(matches!(
            lib.add_source("other.h", "class X {};"),
            Err(LibraryError::Frozen)
        ));
        assert!(matches!(
            lib.load_blob("other.h", "other.h", b"class X {};".to_vec()),
            Err(LibraryError::Frozen)
        ));
        assert!(matches!(lib.load("other.h"), Err(LibraryError::Frozen)));
        assert!(matches!(lib.process_sources(), Err(LibraryError::Frozen)));
        assert!(lib.get_source("other.h").is_none());
    }

    #[test]
    fn test_bom_is_stripped() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"class M { logic<1> a; };");
        let mut lib = Library::new();
        lib.load_blob("bom.h", "bom.h", bytes).unwrap();
        lib.process_sources().unwrap();
        let source = lib.get_source("bom.h").unwrap();
        assert!(source.had_bom);
        assert!(source.text.starts_with("class"));
        let module = lib.get_module("M").unwrap();
        assert_eq!(&source.text[module.span.start..module.span.start + 5], "class");
    }

    #[test]
    fn test_duplicate_add_source_is_error() {
        let mut lib = Library::new();
        lib.add_source("a.h", "class A {};").unwrap();
        assert!(matches!(
            lib.add_source("a.h", "class B {};"),
            Err(LibraryError::DuplicateSource(_))
        ));
    }

    #[test]
    fn test_template_module_params() {
        let src = r#"
template<int WIDTH>
class Gen {
  logic<8> value;
};
"#;
        let lib = loaded(src);
        let module = lib.get_module("Gen").unwrap();
        assert_eq!(module.params.len(), 1);
        assert_eq!(module.params[0].name, "WIDTH");
    }
}
