//! ES modules: resolution, fetching and the module graph.

use crate::js::JsRuntime;
use crate::js::loader::{
  CoreModuleLoader, FsModuleLoader, ModuleLoader, UrlModuleLoader,
};
use crate::prelude::*;

use std::sync::OnceLock;
use tracing::trace;
use url::Url;

// Re-export
pub use es_module::*;
pub use module_graph::*;
pub use module_map::*;

pub mod es_module;
pub mod module_graph;
pub mod module_map;

#[cfg(test)]
mod module_tests;

/// Resolved module identity: an absolutized filesystem path, an `http(s)`
/// URL, or a builtin name. This is the module cache key.
pub type ModulePath = String;

/// Module source code.
pub type ModuleSource = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Module import status.
pub enum ModuleStatus {
  /// The module itself is being fetched.
  Fetching,
  /// The module is compiled; its dependencies are being fetched.
  Resolving,
  /// The module has been seen before in this graph.
  Duplicate,
  /// The module and all its dependencies are ready.
  Ready,
}

#[allow(non_snake_case)]
/// Built-in module table: bare specifier → embedded source.
pub fn CORE_MODULES() -> &'static HashMap<&'static str, &'static str> {
  static VALUE: OnceLock<HashMap<&'static str, &'static str>> =
    OnceLock::new();
  VALUE.get_or_init(|| {
    let modules: Vec<(&'static str, &'static str)> = vec![
      ("console", include_str!("./builtin/console.js")),
      ("events", include_str!("./builtin/events.js")),
      ("process", include_str!("./builtin/process.js")),
      ("timers", include_str!("./builtin/timers.js")),
      ("assert", include_str!("./builtin/assert.js")),
      ("util", include_str!("./builtin/util.js")),
      ("fs", include_str!("./builtin/fs.js")),
      ("perf_hooks", include_str!("./builtin/perf_hooks.js")),
      ("colors", include_str!("./builtin/colors.js")),
      ("dns", include_str!("./builtin/dns.js")),
      ("net", include_str!("./builtin/net.js")),
      ("test", include_str!("./builtin/test.js")),
      ("stream", include_str!("./builtin/stream.js")),
      ("http", include_str!("./builtin/http.js")),
      ("@web/abort", include_str!("./builtin/web/abort.js")),
      ("@web/text_encoding", include_str!("./builtin/web/text_encoding.js")),
      ("@web/clone", include_str!("./builtin/web/clone.js")),
    ];
    HashMap::from_iter(modules)
  })
}

/// Create a v8 script origin.
pub fn create_origin<'s>(
  scope: &mut v8::HandleScope<'s, ()>,
  name: &str,
  is_module: bool,
) -> v8::ScriptOrigin<'s> {
  let name = v8::String::new(scope, name).unwrap();
  let source_map = v8::undefined(scope);

  v8::ScriptOrigin::new(
    scope,
    name.into(),
    0,
    0,
    false,
    0,
    Some(source_map.into()),
    false,
    false,
    is_module,
    None,
  )
}

fn is_remote_url(specifier: &str) -> bool {
  specifier.starts_with("http://") || specifier.starts_with("https://")
}

#[cfg(windows)]
fn starts_with_drive(specifier: &str) -> bool {
  let bytes = specifier.as_bytes();
  bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(not(windows))]
fn starts_with_drive(_specifier: &str) -> bool {
  false
}

/// Resolves a specifier against its importer into the canonical module path
/// used as the cache key.
///
/// Order: builtin table, absolute URL, remote-relative join, absolute path,
/// relative path. Bare names outside the builtin table fail with
/// `ERR_MODULE_NOT_FOUND`.
pub fn resolve_import(
  base: Option<&str>,
  specifier: &str,
  ignore_core_modules: bool,
) -> AnyResult<ModulePath> {
  if !ignore_core_modules && CORE_MODULES().contains_key(specifier) {
    return CoreModuleLoader {}.resolve(base, specifier);
  }

  if is_remote_url(specifier) {
    return UrlModuleLoader::default().resolve(base, specifier);
  }

  if let Ok(url) = Url::parse(specifier) {
    if url.scheme() == "file" {
      let path = url.to_file_path().map_err(|_| CoreErr::ModuleNotFound {
        specifier: specifier.to_string(),
        base: base.unwrap_or("<none>").to_string(),
      })?;
      return FsModuleLoader {}.resolve(None, &path.to_string_lossy());
    }
    // Windows drive letters parse as single-letter schemes; fall through.
    if !starts_with_drive(specifier) {
      return Err(
        CoreErr::ModuleNotFound {
          specifier: specifier.to_string(),
          base: base.unwrap_or("<none>").to_string(),
        }
        .into(),
      );
    }
  }

  // A relative specifier against a remote importer stays remote.
  if let Some(base) = base {
    if is_remote_url(base)
      && (specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/'))
    {
      return UrlModuleLoader::default().resolve(Some(base), specifier);
    }
  }

  if specifier.starts_with('/')
    || starts_with_drive(specifier)
    || specifier.starts_with("./")
    || specifier.starts_with("../")
  {
    return FsModuleLoader {}.resolve(base, specifier);
  }

  Err(
    CoreErr::ModuleNotFound {
      specifier: specifier.to_string(),
      base: base.unwrap_or("<none>").to_string(),
    }
    .into(),
  )
}

/// Loads a resolved module path using the appropriate loader.
pub fn load_import(
  specifier: &str,
  skip_cache: bool,
) -> AnyResult<ModuleSource> {
  if CORE_MODULES().contains_key(specifier) {
    return CoreModuleLoader {}.load(specifier);
  }
  if is_remote_url(specifier) {
    return UrlModuleLoader { skip_cache }.load(specifier);
  }
  FsModuleLoader {}.load(specifier)
}

/// Resolves a static import graph, synchronously and recursively.
///
/// Used for the entry module and the embedded runtime scripts: every module
/// already cached in the module map is reused, so fetch/compile happen at
/// most once per resolved path.
pub fn fetch_module_tree<'a>(
  scope: &mut v8::HandleScope<'a>,
  filename: &str,
  source: Option<&str>,
) -> Option<v8::Local<'a, v8::Module>> {
  let origin = create_origin(scope, filename, true);
  let state = JsRuntime::state(scope);

  let skip_cache = state.borrow().options.reload;

  let source = match source {
    Some(source) => source.to_string(),
    None => match load_import(filename, skip_cache) {
      Ok(source) => source,
      Err(e) => {
        let message = v8::String::new(scope, &e.to_string()).unwrap();
        let exception = v8::Exception::error(scope, message);
        scope.throw_exception(exception);
        return None;
      }
    },
  };

  let source = v8::String::new(scope, &source).unwrap();
  let mut source = v8::script_compiler::Source::new(source, Some(&origin));

  let module = v8::script_compiler::compile_module(scope, &mut source)?;

  // Subscribe module to the module-map.
  let module_ref = v8::Global::new(scope, module);
  state.borrow_mut().module_map.insert(filename, module_ref);

  let requests = module.get_module_requests();
  trace!("{} module request(s) in {:?}", requests.length(), filename);

  for i in 0..requests.length() {
    // Get import request from the `module_requests` array.
    let request = requests.get(scope, i).unwrap();
    let request = v8::Local::<v8::ModuleRequest>::try_from(request).unwrap();

    // Transform v8's ModuleRequest into a resolved module path.
    let specifier = request.get_specifier().to_rust_string_lossy(scope);
    let specifier = match resolve_import(Some(filename), &specifier, false) {
      Ok(specifier) => specifier,
      Err(e) => {
        let message = v8::String::new(scope, &e.to_string()).unwrap();
        let exception = v8::Exception::error(scope, message);
        scope.throw_exception(exception);
        return None;
      }
    };

    // Resolve the subtree, unless it's already cached (cycles permitted).
    if !state.borrow().module_map.contains(&specifier) {
      fetch_module_tree(scope, &specifier, None)?;
    }
  }

  Some(module)
}
