//! Performance hooks binding: the monotonic clock.

use crate::js::JsRuntime;
use crate::js::binding::*;

pub fn initialize<'s>(
  scope: &mut v8::HandleScope<'s>,
) -> v8::Local<'s, v8::Object> {
  let target = v8::Object::new(scope);
  set_function_to(scope, target, "now", now);
  set_function_to(scope, target, "timeOrigin", time_origin);
  target
}

/// Milliseconds since process startup, microsecond precision, monotonic.
fn now(
  scope: &mut v8::HandleScope,
  _: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let state_rc = JsRuntime::state(scope);
  let startup = state_rc.borrow().startup_moment;
  let elapsed = startup.elapsed();
  let millis =
    elapsed.as_secs() as f64 * 1000.0 + elapsed.subsec_micros() as f64 / 1000.0;
  rv.set_double(millis);
}

/// Unix timestamp (ms) at which the process began.
fn time_origin(
  scope: &mut v8::HandleScope,
  _: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let state_rc = JsRuntime::state(scope);
  let origin = state_rc.borrow().time_origin;
  rv.set_double(origin as f64);
}
