//! Engine hooks: module resolution, dynamic import, `import.meta` and
//! promise rejection tracking.

use crate::js::JsRuntime;
use crate::js::binding::throw_type_error;
use crate::js::module::{
  EsModuleFuture, ModuleGraph, ModuleStatus, load_import, resolve_import,
};
use crate::prelude::*;

use std::cell::RefCell;
use std::rc::Rc;
use tracing::trace;
use url::Url;

/// Called during `Module::instantiate_module` to link a specifier to its
/// already-compiled dependency.
pub fn module_resolve_cb<'a>(
  context: v8::Local<'a, v8::Context>,
  specifier: v8::Local<'a, v8::String>,
  _import_attributes: v8::Local<'a, v8::FixedArray>,
  referrer: v8::Local<'a, v8::Module>,
) -> Option<v8::Local<'a, v8::Module>> {
  let scope = &mut unsafe { v8::CallbackScope::new(context) };
  let state_rc = JsRuntime::state(scope);
  let state = state_rc.borrow();

  let referrer = v8::Global::new(scope, referrer);
  let base = state.module_map.get_path(referrer);

  let specifier = specifier.to_rust_string_lossy(scope);
  let specifier =
    resolve_import(base.as_deref(), &specifier, false).unwrap();
  trace!("|module_resolve_cb| base:{base:?}, specifier:{specifier:?}");

  // This call should always give us back the module.
  let module = state.module_map.get(&specifier).unwrap();

  Some(v8::Local::new(scope, module))
}

/// Turns a resolved module path into the `import.meta.url` value.
fn meta_url(path: &str) -> String {
  if path.starts_with("http://") || path.starts_with("https://") {
    return path.to_string();
  }
  Url::from_file_path(path)
    .map(|url| url.to_string())
    .unwrap_or_else(|_| path.to_string())
}

/// Called the first time `import.meta` is accessed for a module.
pub extern "C" fn host_initialize_import_meta_object_cb(
  context: v8::Local<v8::Context>,
  module: v8::Local<v8::Module>,
  meta: v8::Local<v8::Object>,
) {
  let scope = &mut unsafe { v8::CallbackScope::new(context) };
  let scope = &mut v8::HandleScope::new(scope);

  let state_rc = JsRuntime::state(scope);
  let state = state_rc.borrow();

  let module = v8::Global::new(scope, module);
  let path = state.module_map.get_path(module).unwrap();
  let is_main = state.module_map.main().clone() == Some(path.clone());

  // Set up import.meta.url.
  let key = v8::String::new(scope, "url").unwrap();
  let url = meta_url(&path);
  let value = v8::String::new(scope, &url).unwrap();
  meta.create_data_property(scope, key.into(), value.into());

  // Set up import.meta.main.
  let key = v8::String::new(scope, "main").unwrap();
  let value = v8::Boolean::new(scope, is_main);
  meta.create_data_property(scope, key.into(), value.into());

  // Set up import.meta.resolve(specifier).
  let path = v8::String::new(scope, &path).unwrap();
  let builder = v8::FunctionBuilder::new(import_meta_resolve).data(path.into());
  let key = v8::String::new(scope, "resolve").unwrap();
  let value =
    v8::FunctionBuilder::<v8::Function>::build(builder, scope).unwrap();
  meta.set(scope, key.into(), value.into());
}

fn import_meta_resolve(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  if args.length() == 0 {
    throw_type_error(scope, "Not enough arguments specified.");
    return;
  }

  let base = args.data().to_rust_string_lossy(scope);
  let specifier = args.get(0).to_rust_string_lossy(scope);

  match resolve_import(Some(&base), &specifier, false) {
    Ok(path) => rv.set(v8::String::new(scope, &path).unwrap().into()),
    Err(e) => throw_type_error(scope, &e.to_string()),
  };
}

/// Called when a promise rejects with no rejection handler, or gains one
/// after the fact.
pub extern "C" fn promise_reject_cb(message: v8::PromiseRejectMessage) {
  let scope = &mut unsafe { v8::CallbackScope::new(&message) };
  let undefined = v8::undefined(scope).into();
  let event = message.get_event();

  use v8::PromiseRejectEvent::PromiseHandlerAddedAfterReject;
  use v8::PromiseRejectEvent::PromiseRejectAfterResolved;
  use v8::PromiseRejectEvent::PromiseRejectWithNoHandler;
  use v8::PromiseRejectEvent::PromiseResolveAfterResolved;

  let reason = match event {
    PromiseHandlerAddedAfterReject
    | PromiseRejectAfterResolved
    | PromiseResolveAfterResolved => undefined,
    PromiseRejectWithNoHandler => message.get_value().unwrap(),
  };

  let promise = message.get_promise();
  let promise = v8::Global::new(scope, promise);

  let state_rc = JsRuntime::state(scope);
  let mut state = state_rc.borrow_mut();

  match event {
    PromiseRejectWithNoHandler => {
      let reason = v8::Global::new(scope, reason);
      state.exceptions.capture_promise_rejection(promise, reason);
    }
    PromiseHandlerAddedAfterReject => {
      state.exceptions.remove_promise_rejection(&promise);
    }
    PromiseRejectAfterResolved | PromiseResolveAfterResolved => {}
  }
}

/// Called when the engine needs the embedder to load a module dynamically.
pub fn host_import_module_dynamically_cb<'s>(
  scope: &mut v8::HandleScope<'s>,
  _host_defined_options: v8::Local<'s, v8::Data>,
  base: v8::Local<'s, v8::Value>,
  specifier: v8::Local<'s, v8::String>,
  _import_attributes: v8::Local<v8::FixedArray>,
) -> Option<v8::Local<'s, v8::Promise>> {
  let base = base.to_rust_string_lossy(scope);
  let specifier = specifier.to_rust_string_lossy(scope);
  trace!("|host_import_module_dynamically_cb| base:{base:?}, specifier:{specifier:?}");

  // Create the import promise.
  let promise_resolver = v8::PromiseResolver::new(scope).unwrap();
  let promise = promise_resolver.get_promise(scope);

  let state_rc = JsRuntime::state(scope);
  let mut state = state_rc.borrow_mut();

  let specifier = match resolve_import(Some(&base), &specifier, false) {
    Ok(specifier) => specifier,
    Err(e) => {
      drop(state);
      let exception = v8::String::new(scope, &e.to_string()).unwrap();
      let exception = v8::Exception::error(scope, exception);
      promise_resolver.reject(scope, exception);
      return Some(promise);
    }
  };

  let import_being_fetched = state
    .module_map
    .pending
    .iter()
    .any(|graph_rc| graph_rc.borrow().root_rc.borrow().path == specifier);

  // Check if the requested module is already resolved.
  if state.module_map.contains(&specifier) && !import_being_fetched {
    let module = state.module_map.get(&specifier).unwrap();
    let module = module.open(scope);

    // Dynamic imports resolve with the module's namespace object.
    promise_resolver.resolve(scope, module.get_module_namespace());
    return Some(promise);
  }

  let global_promise = v8::Global::new(scope, promise_resolver);

  if import_being_fetched {
    // Same module, same in-flight graph: share the fetch, settle together.
    state
      .module_map
      .pending
      .iter()
      .find(|graph_rc| graph_rc.borrow().root_rc.borrow().path == specifier)
      .unwrap()
      .borrow_mut()
      .same_origin
      .push(global_promise);

    return Some(promise);
  }

  let graph = ModuleGraph::dynamic_import(&specifier, global_promise);
  let graph_rc = Rc::new(RefCell::new(graph));

  state.module_map.pending.push(Rc::clone(&graph_rc));
  state
    .module_map
    .seen
    .insert(specifier.clone(), ModuleStatus::Fetching);

  // Ship the load to the worker pool.
  let skip_cache = state.options.reload;
  let task = {
    let specifier = specifier.clone();
    move || Some(load_import(&specifier, skip_cache).map(String::into_bytes))
  };

  let task_cb = {
    let state_rc = state_rc.clone();
    let graph_rc = Rc::clone(&graph_rc);
    move |maybe_result: crate::evloop::msg::TaskResult| {
      let future = EsModuleFuture {
        path: specifier,
        module: graph_rc.borrow().root_rc.clone(),
        maybe_source: maybe_result,
      };
      // Jump ahead of other pending futures so imports settle promptly.
      let mut state = state_rc.borrow_mut();
      state.pending_futures.insert(0, Box::new(future));
    }
  };

  state.handle.spawn(Box::new(task), Some(Box::new(task_cb)));

  Some(promise)
}
