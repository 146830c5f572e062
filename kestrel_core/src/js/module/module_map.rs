//! Module map: every module loaded into the runtime, keyed by resolved path.

use crate::js::module::{ModuleGraphRc, ModulePath, ModuleStatus};
use crate::prelude::*;

use std::fmt::Debug;

/// Module map.
///
/// `index` holds compiled v8 modules by resolved path — the dedup point: for
/// any resolved path, fetch/compile/instantiate happen at most once per
/// process. `seen` tracks the status of modules currently being resolved,
/// `pending` the in-flight dynamic import graphs.
pub struct ModuleMap {
  /// The entry point module of the program.
  main: Option<ModulePath>,

  /// Maps resolved path to compiled v8 module.
  index: HashMap<ModulePath, v8::Global<v8::Module>>,

  /// Module resolution status.
  pub seen: HashMap<ModulePath, ModuleStatus>,

  /// Pending (dynamic import) module graphs.
  pub pending: Vec<ModuleGraphRc>,
}

impl Debug for ModuleMap {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModuleMap")
      .field("main", &self.main)
      .field("index", &self.index.keys().collect::<Vec<_>>())
      .field("seen", &self.seen)
      .field("pending", &format!("Vec<ModuleGraph>({})", self.pending.len()))
      .finish()
  }
}

impl ModuleMap {
  pub fn new() -> ModuleMap {
    Self {
      main: None,
      index: HashMap::new(),
      seen: HashMap::new(),
      pending: vec![],
    }
  }

  pub fn main(&self) -> &Option<ModulePath> {
    &self.main
  }

  /// Adds a compiled v8 module to the cache. The first non-builtin module
  /// becomes the main module.
  pub fn insert(&mut self, path: &str, module: v8::Global<v8::Module>) {
    if self.main.is_none()
      && (path.starts_with("http://")
        || path.starts_with("https://")
        || std::fs::metadata(path).is_ok())
    {
      self.main = Some(path.into());
    }
    self.index.insert(path.into(), module);
  }

  /// Returns a compiled v8 module.
  pub fn get(&self, key: &str) -> Option<v8::Global<v8::Module>> {
    self.index.get(key).cloned()
  }

  /// Whether a module is already compiled.
  pub fn contains(&self, key: &str) -> bool {
    self.index.contains_key(key)
  }

  /// Reverse lookup: the resolved path of a v8 module.
  pub fn get_path(&self, module: v8::Global<v8::Module>) -> Option<ModulePath> {
    self
      .index
      .iter()
      .find(|(_, m)| **m == module)
      .map(|(p, _)| p.clone())
  }

  /// Returns if there are still pending dynamic imports to be loaded.
  pub fn has_pending_imports(&self) -> bool {
    !self.pending.is_empty()
  }
}

impl Default for ModuleMap {
  fn default() -> Self {
    ModuleMap::new()
  }
}
