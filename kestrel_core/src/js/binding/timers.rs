//! Timers binding: timeouts, intervals and immediates.

use crate::js::binding::*;
use crate::js::{JsFuture, JsRuntime};

use std::rc::Rc;
use std::time::Duration;

/// Invokes a scheduled JS callback with its bound parameters.
struct TimeoutFuture {
  cb: Rc<v8::Global<v8::Function>>,
  params: Rc<Vec<v8::Global<v8::Value>>>,
}

impl JsFuture for TimeoutFuture {
  fn run(&mut self, scope: &mut v8::HandleScope) {
    let args: Vec<v8::Local<v8::Value>> = self
      .params
      .iter()
      .map(|arg| v8::Local::new(scope, arg))
      .collect();
    call_js(scope, &self.cb, &args);
  }
}

pub fn initialize<'s>(
  scope: &mut v8::HandleScope<'s>,
) -> v8::Local<'s, v8::Object> {
  let target = v8::Object::new(scope);
  set_function_to(scope, target, "createTimeout", create_timeout);
  set_function_to(scope, target, "removeTimeout", remove_timeout);
  set_function_to(scope, target, "createImmediate", create_immediate);
  set_function_to(scope, target, "removeImmediate", remove_immediate);
  target
}

fn callback_and_params(
  scope: &mut v8::HandleScope,
  args: &v8::FunctionCallbackArguments,
  params_index: i32,
) -> Option<(Rc<v8::Global<v8::Function>>, Rc<Vec<v8::Global<v8::Value>>>)> {
  let callback = match v8::Local::<v8::Function>::try_from(args.get(0)) {
    Ok(callback) => Rc::new(v8::Global::new(scope, callback)),
    Err(_) => {
      throw_type_error(scope, "The \"callback\" argument must be a function.");
      return None;
    }
  };

  let params = match v8::Local::<v8::Array>::try_from(args.get(params_index)) {
    Ok(params) => (0..params.length()).fold(Vec::new(), |mut acc, i| {
      let param = params.get_index(scope, i).unwrap();
      acc.push(v8::Global::new(scope, param));
      acc
    }),
    Err(_) => vec![],
  };

  Some((callback, Rc::new(params)))
}

/// `createTimeout(cb, delay, repeat, params) → id`.
fn create_timeout(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let Some((callback, params)) = callback_and_params(scope, &args, 3) else {
    return;
  };

  // The JS layer coerces the delay; clamp once more to the 1ms floor.
  let delay = args.get(1).number_value(scope).unwrap_or(1.0);
  let delay = if delay.is_finite() && delay >= 1.0 {
    delay as u64
  } else {
    1
  };
  let repeat = args.get(2).boolean_value(scope);

  let state_rc = JsRuntime::state(scope);
  let timer_cb = {
    let state_rc = state_rc.clone();
    move || {
      let future = TimeoutFuture {
        cb: Rc::clone(&callback),
        params: Rc::clone(&params),
      };
      state_rc.borrow_mut().pending_futures.push(Box::new(future));
    }
  };

  let state = state_rc.borrow();
  let id = state.handle.timer(
    Duration::from_millis(delay),
    repeat,
    Box::new(timer_cb),
  );
  rv.set_int32(id);
}

/// `removeTimeout(id)`: idempotent.
fn remove_timeout(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _: v8::ReturnValue,
) {
  let id = args.get(0).int32_value(scope).unwrap_or(0);
  let state_rc = JsRuntime::state(scope);
  state_rc.borrow().handle.remove_timer(id);
}

/// `createImmediate(cb, params) → id`.
fn create_immediate(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let Some((callback, params)) = callback_and_params(scope, &args, 1) else {
    return;
  };

  let state_rc = JsRuntime::state(scope);
  let immediate_cb = {
    let state_rc = state_rc.clone();
    move || {
      let future = TimeoutFuture {
        cb: callback,
        params,
      };
      state_rc.borrow_mut().pending_futures.push(Box::new(future));
    }
  };

  let state = state_rc.borrow();
  let id = state.handle.immediate(Box::new(immediate_cb));
  rv.set_int32(id);
}

/// `removeImmediate(id)`: idempotent.
fn remove_immediate(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _: v8::ReturnValue,
) {
  let id = args.get(0).int32_value(scope).unwrap_or(0);
  let state_rc = JsRuntime::state(scope);
  state_rc.borrow().handle.remove_immediate(id);
}
