//! Module graph: one root module plus the dependency tree hanging off it.

use crate::js::module::ModuleStatus;
use crate::js::module::es_module::{EsModule, EsModuleRc};

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

#[derive(Clone)]
/// How the graph was requested.
pub enum ImportKind {
  /// Loading static imports.
  Static,
  /// Loading a dynamic import; carries the promise to settle.
  Dynamic(v8::Global<v8::PromiseResolver>),
}

/// Module graph.
pub struct ModuleGraph {
  pub kind: ImportKind,
  pub root_rc: EsModuleRc,
  /// Concurrent dynamic imports of the same path share this in-flight graph;
  /// their promises are settled together with the root's.
  pub same_origin: Vec<v8::Global<v8::PromiseResolver>>,
}

pub type ModuleGraphRc = Rc<RefCell<ModuleGraph>>;

impl Debug for ModuleGraph {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModuleGraph")
      .field(
        "kind",
        match self.kind {
          ImportKind::Static => &"Static",
          ImportKind::Dynamic(_) => &"Dynamic",
        },
      )
      .field("root_rc", &self.root_rc)
      .field(
        "same_origin",
        &format!("Vec<v8::PromiseResolver>({})", self.same_origin.len()),
      )
      .finish()
  }
}

impl ModuleGraph {
  /// Initializes a new graph resolving a static import.
  pub fn static_import(path: &str) -> ModuleGraph {
    let module = EsModule::to_rc(EsModule::new(
      path.into(),
      ModuleStatus::Fetching,
      false,
    ));

    Self {
      kind: ImportKind::Static,
      root_rc: module,
      same_origin: vec![],
    }
  }

  /// Initializes a new graph resolving a dynamic import.
  pub fn dynamic_import(
    path: &str,
    promise: v8::Global<v8::PromiseResolver>,
  ) -> ModuleGraph {
    let module = EsModule::to_rc(EsModule::new(
      path.into(),
      ModuleStatus::Fetching,
      true,
    ));

    Self {
      kind: ImportKind::Dynamic(promise),
      root_rc: module,
      same_origin: vec![],
    }
  }
}
