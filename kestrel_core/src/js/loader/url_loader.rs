//! URL module loader.
//!
//! Remote modules are fetched with a blocking HTTP client on the worker pool
//! and cached on disk keyed by the SHA-1 of their URL, so repeated runs skip
//! the network. `--reload` bypasses the cache.

use crate::js::loader::{ModuleLoader, wrap_json, wrap_wasm};
use crate::js::module::{ModulePath, ModuleSource};
use crate::prelude::*;

use sha1::{Digest, Sha1};
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::info;
use url::Url;

/// Upper bound for a fetched module body (64 MiB).
const MAX_MODULE_SIZE: u64 = 64 * 1024 * 1024;

/// Local cache directory for downloaded modules.
pub fn cache_dir() -> &'static PathBuf {
  static VALUE: OnceLock<PathBuf> = OnceLock::new();
  VALUE.get_or_init(|| {
    dirs::cache_dir()
      .map(|dir| dir.join("kestrel"))
      .unwrap_or_else(|| PathBuf::from(".cache"))
  })
}

#[derive(Default)]
/// Loader supporting URL imports.
pub struct UrlModuleLoader {
  /// Ignores the cache and re-downloads the dependency.
  pub skip_cache: bool,
}

impl ModuleLoader for UrlModuleLoader {
  fn resolve(
    &self,
    base: Option<&str>,
    specifier: &str,
  ) -> AnyResult<ModulePath> {
    // 1. Check if the specifier is a valid URL.
    if let Ok(url) = Url::parse(specifier) {
      return Ok(url.into());
    }

    // 2. Join relative specifiers against the importing URL.
    if let Some(base) = base {
      if let Ok(base) = Url::parse(base) {
        let url = base.join(specifier)?;
        return Ok(url.as_str().to_string());
      }
    }

    anyhow::bail!(format!("Base is not a valid URL: {base:?}"));
  }

  fn load(&self, specifier: &str) -> AnyResult<ModuleSource> {
    // Create the cache directory.
    if fs::create_dir_all(cache_dir()).is_err() {
      anyhow::bail!("Failed to create module caching directory");
    }

    // Hash the URL to get a stable cache filename.
    let hash = format!("{:x}", Sha1::digest(specifier.as_bytes()));
    let module_path = cache_dir().join(hash);

    if !self.skip_cache && module_path.is_file() {
      let source = fs::read_to_string(&module_path)?;
      return Ok(source);
    }

    info!("Downloading {specifier}");

    // Redirects are followed up to the client's built-in limit.
    let response = ureq::get(specifier).call().map_err(|e| {
      CoreErr::ModuleFetchFailed {
        specifier: specifier.to_string(),
        reason: e.to_string(),
      }
    })?;

    let content_type = response.content_type().to_string();
    let mut bytes = Vec::new();
    response
      .into_reader()
      .take(MAX_MODULE_SIZE)
      .read_to_end(&mut bytes)?;

    // Classify by URL extension first, response MIME second.
    let source = if specifier.ends_with(".wasm")
      || content_type == "application/wasm"
    {
      wrap_wasm(&bytes)
    } else {
      let text = String::from_utf8_lossy(&bytes).into_owned();
      if specifier.ends_with(".json") || content_type == "application/json" {
        wrap_json(&text)
      } else {
        text
      }
    };

    fs::write(&module_path, &source)?;

    Ok(source)
  }
}
