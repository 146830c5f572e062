//! Filesystem module loader.

use crate::js::loader::{ModuleLoader, wrap_json, wrap_wasm};
use crate::js::module::{ModulePath, ModuleSource};
use crate::prelude::*;

use path_absolutize::Absolutize;
use std::fs;
use std::path::{Path, PathBuf};

/// Extensions probed when the specifier has none.
static FILE_EXTENSIONS: &[&str] = &["js", "mjs", "json", "wasm"];

#[derive(Default)]
/// Filesystem module loader.
pub struct FsModuleLoader;

impl FsModuleLoader {
  /// Transforms `PathBuf` into `String`.
  fn transform(&self, path: PathBuf) -> String {
    path.to_string_lossy().into_owned()
  }

  fn is_json_import(&self, path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
  }

  fn is_wasm_import(&self, path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "wasm")
  }

  /// Loads contents from a file, classified by extension.
  fn load_source(&self, path: &Path) -> AnyResult<ModuleSource> {
    if self.is_wasm_import(path) {
      let bytes = fs::read(path)?;
      return Ok(wrap_wasm(&bytes));
    }

    let source = fs::read_to_string(path)?;
    let source = if self.is_json_import(path) {
      wrap_json(&source)
    } else {
      source
    };

    Ok(source)
  }

  /// Loads import as a file, probing known extensions when none is given.
  fn load_as_file(&self, path: &Path) -> AnyResult<ModuleSource> {
    if path.is_file() {
      return self.load_source(path);
    }

    if path.extension().is_none() {
      for ext in FILE_EXTENSIONS {
        let ext_path = path.with_extension(ext);
        if ext_path.is_file() {
          return self.load_source(&ext_path);
        }
      }
    }

    let path_display = path.display();
    anyhow::bail!(format!("Module path not found: {path_display:?}"));
  }

  /// Loads import as a directory using the `index.[ext]` convention.
  fn load_as_directory(&self, path: &Path) -> AnyResult<ModuleSource> {
    for ext in FILE_EXTENSIONS {
      let path = &path.join(format!("index.{ext}"));
      if path.is_file() {
        return self.load_source(path);
      }
    }
    let path_display = path.display();
    anyhow::bail!(format!("Module path not found: {path_display:?}"));
  }
}

impl ModuleLoader for FsModuleLoader {
  /// Resolve absolute and relative specifiers to absolutized paths.
  fn resolve(
    &self,
    base: Option<&str>,
    specifier: &str,
  ) -> AnyResult<ModulePath> {
    // Absolute file path.
    if Path::new(specifier).is_absolute() {
      return Ok(
        self.transform(Path::new(specifier).absolutize()?.to_path_buf()),
      );
    }

    // Relative file path, resolved against the importing module.
    if specifier.starts_with("./") || specifier.starts_with("../") {
      let base = match base {
        Some(value) => Path::new(value).parent().unwrap().to_path_buf(),
        None => {
          anyhow::bail!(format!("Module specifier not found: {specifier:?}"))
        }
      };

      return Ok(
        self.transform(base.join(specifier).absolutize()?.to_path_buf()),
      );
    }

    anyhow::bail!(format!("Module specifier not found: {specifier:?}"));
  }

  /// Load module source by path: a file, or a directory holding an index
  /// module.
  fn load(&self, specifier: &str) -> AnyResult<ModuleSource> {
    let path = Path::new(specifier);

    self
      .load_as_file(path)
      .or_else(|_| self.load_as_directory(path))
      .map_err(|_| {
        CoreErr::ModuleNotFound {
          specifier: specifier.to_string(),
          base: "<none>".to_string(),
        }
        .into()
      })
  }
}
