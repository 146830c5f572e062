//! Module loaders.

use crate::js::module::{ModulePath, ModuleSource};
use crate::prelude::*;

// Re-export
pub use core_loader::CoreModuleLoader;
pub use fs_loader::FsModuleLoader;
pub use url_loader::UrlModuleLoader;

pub mod core_loader;
pub mod fs_loader;
pub mod url_loader;

#[cfg(test)]
mod fs_loader_tests;

/// Defines the interface of a module loader.
pub trait ModuleLoader {
  /// Resolve a specifier to the canonical module path.
  fn resolve(&self, base: Option<&str>, specifier: &str)
  -> AnyResult<ModulePath>;

  /// Load the module source by its resolved path.
  fn load(&self, specifier: &str) -> AnyResult<ModuleSource>;
}

/// Wraps JSON data into an ES module whose default export is the parsed
/// value.
pub fn wrap_json(source: &str) -> ModuleSource {
  let literal = serde_json::to_string(source)
    .unwrap_or_else(|_| "\"\"".to_string());
  format!("export default JSON.parse({literal});\n")
}

/// Wraps WASM bytes into an ES module that compiles and instantiates them,
/// re-exporting the instance's exports.
pub fn wrap_wasm(bytes: &[u8]) -> ModuleSource {
  use base64::Engine;
  let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
  format!(
    concat!(
      "const $$bytes = Uint8Array.from(atob(\"{}\"), (c) => c.charCodeAt(0));\n",
      "const $$module = new WebAssembly.Module($$bytes);\n",
      "const $$instance = new WebAssembly.Instance($$module, {{}});\n",
      "export default $$instance.exports;\n",
    ),
    encoded
  )
}
