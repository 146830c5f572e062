//! Built-in module loader.

use crate::js::loader::ModuleLoader;
use crate::js::module::{CORE_MODULES, ModulePath, ModuleSource};
use crate::prelude::*;

#[derive(Default)]
pub struct CoreModuleLoader;

impl ModuleLoader for CoreModuleLoader {
  fn resolve(
    &self,
    _base: Option<&str>,
    specifier: &str,
  ) -> AnyResult<ModulePath> {
    assert!(CORE_MODULES().contains_key(specifier));
    Ok(specifier.to_string())
  }

  fn load(&self, specifier: &str) -> AnyResult<ModuleSource> {
    // Errors are caught at the resolve stage; the entry must exist here.
    Ok(CORE_MODULES().get(specifier).unwrap().to_string())
  }
}
