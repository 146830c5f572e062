//! JS↔native bridge: context creation, conversion helpers and the binding
//! registry exposed through `process.binding(name)`.

use crate::js::JsRuntime;
use crate::prelude::*;

use std::sync::OnceLock;

pub mod dns;
pub mod exceptions;
pub mod fs;
pub mod http_parser;
pub mod net;
pub mod perf_hooks;
pub mod process;
pub mod signals;
pub mod stdio;
pub mod timers;

/// Initializer building a binding's function table.
pub type BindingInitFn =
  for<'s> fn(&mut v8::HandleScope<'s>) -> v8::Local<'s, v8::Object>;

#[allow(non_snake_case)]
/// The binding registry: module name → table initializer. Tables are built
/// lazily and memoized per runtime on first `process.binding(name)`.
pub fn BINDINGS() -> &'static HashMap<&'static str, BindingInitFn> {
  static VALUE: OnceLock<HashMap<&'static str, BindingInitFn>> =
    OnceLock::new();
  VALUE.get_or_init(|| {
    let bindings: Vec<(&'static str, BindingInitFn)> = vec![
      ("stdio", stdio::initialize),
      ("timers", timers::initialize),
      ("fs", fs::initialize),
      ("perf_hooks", perf_hooks::initialize),
      ("dns", dns::initialize),
      ("net", net::initialize),
      ("http_parser", http_parser::initialize),
      ("signals", signals::initialize),
      ("exceptions", exceptions::initialize),
    ];
    HashMap::from_iter(bindings)
  })
}

/// Populates a new JavaScript context with the low-level Rust bindings.
pub fn create_new_context<'s>(
  scope: &mut v8::HandleScope<'s, ()>,
) -> v8::Local<'s, v8::Context> {
  // Create and enter a new JavaScript context.
  let context = v8::Context::new(scope, Default::default());
  let global = context.global(scope);
  let scope = &mut v8::ContextScope::new(scope, context);

  set_function_to(scope, global, "reportError", report_error);
  set_function_to(scope, global, "$$promiseDetails", promise_details);

  // The base `process` object; the runtime scripts flesh it out.
  process::initialize(scope, global);

  context
}

/// `$$promiseDetails(promise)`: synchronous peek at a promise's state, used
/// by the console pretty-printer.
fn promise_details(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let Ok(promise) = v8::Local::<v8::Promise>::try_from(args.get(0)) else {
    return;
  };

  let details = v8::Object::new(scope);
  let (state, value) = match promise.state() {
    v8::PromiseState::Pending => ("pending", None),
    v8::PromiseState::Fulfilled => ("fulfilled", Some(promise.result(scope))),
    v8::PromiseState::Rejected => ("rejected", Some(promise.result(scope))),
  };

  let state = v8::String::new(scope, state).unwrap();
  set_property_to(scope, details, "state", state.into());
  if let Some(value) = value {
    set_property_to(scope, details, "value", value);
  }
  rv.set(details.into());
}

/// `reportError(err)`: routes an error through the uncaught-exception
/// machinery.
fn report_error(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _: v8::ReturnValue,
) {
  let exception = v8::Global::new(scope, args.get(0));
  let state_rc = JsRuntime::state(scope);
  state_rc.borrow_mut().exceptions.capture_exception(exception);
}

/// Adds a property with the given name and value to the given object.
pub fn set_property_to(
  scope: &mut v8::HandleScope,
  target: v8::Local<v8::Object>,
  name: &str,
  value: v8::Local<v8::Value>,
) {
  let key = v8::String::new(scope, name).unwrap();
  target.set(scope, key.into(), value);
}

/// Adds a read-only property with the given name and value to the given
/// object.
pub fn set_constant_to(
  scope: &mut v8::HandleScope,
  target: v8::Local<v8::Object>,
  name: &str,
  value: v8::Local<v8::Value>,
) {
  let key = v8::String::new(scope, name).unwrap();
  target.define_own_property(
    scope,
    key.into(),
    value,
    v8::PropertyAttribute::READ_ONLY,
  );
}

/// Adds a `Function` object which calls the given Rust function.
pub fn set_function_to(
  scope: &mut v8::HandleScope,
  target: v8::Local<v8::Object>,
  name: &str,
  callback: impl v8::MapFnTo<v8::FunctionCallback>,
) {
  let key = v8::String::new(scope, name).unwrap();
  let template = v8::FunctionTemplate::new(scope, callback);
  let val = template.get_function(scope).unwrap();

  target.set(scope, key.into(), val.into());
}

/// Creates an object with a given name under a `target` object.
pub fn create_object_under<'s>(
  scope: &mut v8::HandleScope<'s>,
  target: v8::Local<v8::Object>,
  name: &str,
) -> v8::Local<'s, v8::Object> {
  let value = v8::Object::new(scope);
  let key = v8::String::new(scope, name).unwrap();
  target.set(scope, key.into(), value.into());
  value
}

/// Builds an `Error` value carrying a structured `code` property.
pub fn error_value<'s>(
  scope: &mut v8::HandleScope<'s>,
  message: &str,
  code: Option<&str>,
) -> v8::Local<'s, v8::Value> {
  let message = v8::String::new(scope, message).unwrap();
  let exception = v8::Exception::error(scope, message);
  if let Some(code) = code {
    let object = exception.to_object(scope).unwrap();
    let key = v8::String::new(scope, "code").unwrap();
    let value = v8::String::new(scope, code).unwrap();
    object.set(scope, key.into(), value.into());
  }
  exception
}

/// Builds an `Error` value from an I/O error, `code` included.
pub fn io_error_value<'s>(
  scope: &mut v8::HandleScope<'s>,
  e: &std::io::Error,
) -> v8::Local<'s, v8::Value> {
  error_value(scope, &e.to_string(), Some(error_code(e)))
}

/// Builds an `Error` value from an `anyhow` error, mapping known core errors
/// to their codes.
pub fn any_error_value<'s>(
  scope: &mut v8::HandleScope<'s>,
  e: &AnyErr,
) -> v8::Local<'s, v8::Value> {
  let code = match e.downcast_ref::<CoreErr>() {
    Some(core) => Some(core.code()),
    None => e.downcast_ref::<std::io::Error>().map(error_code),
  };
  error_value(scope, &e.to_string(), code)
}

/// Throws a v8 exception with an optional structured code.
pub fn throw_error(
  scope: &mut v8::HandleScope,
  message: &str,
  code: Option<&str>,
) {
  let exception = error_value(scope, message, code);
  scope.throw_exception(exception);
}

/// Throws a v8 type error.
pub fn throw_type_error(scope: &mut v8::HandleScope, message: &str) {
  let message = v8::String::new(scope, message).unwrap();
  let exception = v8::Exception::type_error(scope, message);
  scope.throw_exception(exception);
}

/// Invokes a JS callback from a loop completion; a throwing callback is
/// surfaced as an uncaught exception.
pub fn call_js(
  scope: &mut v8::HandleScope,
  cb: &v8::Global<v8::Function>,
  args: &[v8::Local<v8::Value>],
) {
  let undefined = v8::undefined(scope).into();
  let callback = v8::Local::new(scope, cb);

  let tc_scope = &mut v8::TryCatch::new(scope);
  callback.call(tc_scope, undefined, args);

  if tc_scope.has_caught() {
    let exception = tc_scope.exception().unwrap();
    let exception = v8::Global::new(tc_scope, exception);
    let state_rc = JsRuntime::state(tc_scope);
    state_rc.borrow_mut().exceptions.capture_exception(exception);
  }
}

/// Copies bytes out of a `Uint8Array`/`ArrayBuffer`/typed-array argument.
/// Strings transit as UTF-8.
pub fn bytes_from_value(
  scope: &mut v8::HandleScope,
  value: v8::Local<v8::Value>,
) -> Option<Vec<u8>> {
  if let Ok(view) = v8::Local::<v8::ArrayBufferView>::try_from(value) {
    let mut buf = vec![0u8; view.byte_length()];
    let copied = view.copy_contents(&mut buf);
    buf.truncate(copied);
    return Some(buf);
  }
  if let Ok(buffer) = v8::Local::<v8::ArrayBuffer>::try_from(value) {
    let store = buffer.get_backing_store();
    let bytes = store
      .data()
      .map(|data| unsafe {
        std::slice::from_raw_parts(
          data.as_ptr() as *const u8,
          buffer.byte_length(),
        )
        .to_vec()
      })
      .unwrap_or_default();
    return Some(bytes);
  }
  if value.is_string() {
    return Some(value.to_rust_string_lossy(scope).into_bytes());
  }
  None
}

/// Moves bytes into a fresh `Uint8Array` (single copy across the boundary).
pub fn bytes_to_uint8array<'s>(
  scope: &mut v8::HandleScope<'s>,
  bytes: Vec<u8>,
) -> v8::Local<'s, v8::Value> {
  let len = bytes.len();
  let store = v8::ArrayBuffer::new_backing_store_from_vec(bytes).make_shared();
  let buffer = v8::ArrayBuffer::with_backing_store(scope, &store);
  v8::Uint8Array::new(scope, buffer, 0, len).unwrap().into()
}

/// Reads a `u16` port argument, range checked.
pub fn port_from_value(
  scope: &mut v8::HandleScope,
  value: v8::Local<v8::Value>,
) -> Option<u16> {
  let port = value.int32_value(scope)?;
  u16::try_from(port).ok()
}
