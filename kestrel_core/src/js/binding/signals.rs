//! Signals binding.
//!
//! `watch` registers a native watcher for a signal name and returns its
//! handle ID; `unwatch` cancels it. Delivery is coalesced onto the loop
//! thread; the JS callback never runs from an OS handler.

use crate::evloop::signal::signum_from_name;
use crate::js::binding::*;
use crate::js::{JsRuntime, enqueue_native};

use std::rc::Rc;

pub fn initialize<'s>(
  scope: &mut v8::HandleScope<'s>,
) -> v8::Local<'s, v8::Object> {
  let target = v8::Object::new(scope);
  set_function_to(scope, target, "watch", watch);
  set_function_to(scope, target, "unwatch", unwatch);
  target
}

/// `watch(name, cb) → id`.
fn watch(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let name = args.get(0).to_rust_string_lossy(scope);
  let Some(signum) = signum_from_name(&name) else {
    throw_type_error(scope, &format!("Unknown signal: {name}"));
    return;
  };

  let callback = match v8::Local::<v8::Function>::try_from(args.get(1)) {
    Ok(callback) => Rc::new(v8::Global::new(scope, callback)),
    Err(_) => {
      throw_type_error(scope, "The \"callback\" argument must be a function.");
      return;
    }
  };

  let state_rc = JsRuntime::state(scope);
  let signal_cb = {
    let state_rc = state_rc.clone();
    move |_signum: i32| {
      let callback = Rc::clone(&callback);
      let name = name.clone();
      let mut state = state_rc.borrow_mut();
      enqueue_native(&mut state, move |scope| {
        let name = v8::String::new(scope, &name).unwrap();
        call_js(scope, &callback, &[name.into()]);
      });
    }
  };

  let state = state_rc.borrow();
  let id = state.handle.signal_start(signum, Box::new(signal_cb));
  rv.set_int32(id);
}

/// `unwatch(id)`: idempotent.
fn unwatch(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _: v8::ReturnValue,
) {
  let id = args.get(0).int32_value(scope).unwrap_or(0);
  let state_rc = JsRuntime::state(scope);
  state_rc.borrow().handle.signal_stop(id);
}
