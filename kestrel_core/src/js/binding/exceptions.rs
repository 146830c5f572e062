//! Exception-capture hooks binding.
//!
//! Installing a JS callback here redirects uncaught exceptions and unhandled
//! rejections to `process` event listeners instead of taking the process
//! down; removing it restores the default.

use crate::js::JsRuntime;
use crate::js::binding::*;

pub fn initialize<'s>(
  scope: &mut v8::HandleScope<'s>,
) -> v8::Local<'s, v8::Object> {
  let target = v8::Object::new(scope);
  set_function_to(
    scope,
    target,
    "setUncaughtExceptionCallback",
    set_uncaught_exception_callback,
  );
  set_function_to(
    scope,
    target,
    "setUnhandledRejectionCallback",
    set_unhandled_rejection_callback,
  );
  target
}

fn callback_or_none(
  scope: &mut v8::HandleScope,
  value: v8::Local<v8::Value>,
) -> Option<v8::Global<v8::Function>> {
  v8::Local::<v8::Function>::try_from(value)
    .ok()
    .map(|callback| v8::Global::new(scope, callback))
}

fn set_uncaught_exception_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _: v8::ReturnValue,
) {
  let callback = callback_or_none(scope, args.get(0));
  let state_rc = JsRuntime::state(scope);
  state_rc.borrow_mut().exceptions.uncaught_exception_cb = callback;
}

fn set_unhandled_rejection_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _: v8::ReturnValue,
) {
  let callback = callback_or_none(scope, args.get(0));
  let state_rc = JsRuntime::state(scope);
  state_rc.borrow_mut().exceptions.unhandled_rejection_cb = callback;
}
