//! TCP binding.
//!
//! `connect`/`write`/`shutdown`/`close` follow the promise contract;
//! `readStart` and `listen` follow the callback contract (every completion
//! invokes the supplied callable with `(error, result)`).

use crate::evloop::msg::SocketInfo;
use crate::js::binding::*;
use crate::js::{JsRuntime, enqueue_native};
use crate::prelude::*;

use std::rc::Rc;

fn socket_info_object<'s>(
  scope: &mut v8::HandleScope<'s>,
  id: Option<i32>,
  info: &SocketInfo,
) -> v8::Local<'s, v8::Value> {
  let object = v8::Object::new(scope);
  if let Some(id) = id {
    let id = v8::Integer::new(scope, id);
    set_property_to(scope, object, "id", id.into());
  }
  let value = v8::String::new(scope, &info.local.ip().to_string()).unwrap();
  set_property_to(scope, object, "localAddress", value.into());
  let value = v8::Integer::new(scope, info.local.port() as i32);
  set_property_to(scope, object, "localPort", value.into());
  let value = v8::String::new(scope, &info.remote.ip().to_string()).unwrap();
  set_property_to(scope, object, "remoteAddress", value.into());
  let value = v8::Integer::new(scope, info.remote.port() as i32);
  set_property_to(scope, object, "remotePort", value.into());
  object.into()
}

pub fn initialize<'s>(
  scope: &mut v8::HandleScope<'s>,
) -> v8::Local<'s, v8::Object> {
  let target = v8::Object::new(scope);
  set_function_to(scope, target, "connect", connect);
  set_function_to(scope, target, "listen", listen);
  set_function_to(scope, target, "readStart", read_start);
  set_function_to(scope, target, "write", write);
  set_function_to(scope, target, "shutdown", shutdown);
  set_function_to(scope, target, "close", close);
  target
}

/// `connect(host, port) → { id, promise }`: the promise resolves with the
/// socket addresses once the connection is established.
fn connect(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let host = args.get(0).to_rust_string_lossy(scope);
  let Some(port) = port_from_value(scope, args.get(1)) else {
    throw_type_error(scope, "The \"port\" argument must be 0..=65535.");
    return;
  };

  let resolver = v8::PromiseResolver::new(scope).unwrap();
  let promise = resolver.get_promise(scope);
  let resolver = v8::Global::new(scope, resolver);

  let state_rc = JsRuntime::state(scope);
  let connect_cb = {
    let state_rc = state_rc.clone();
    move |result: IoResult<SocketInfo>| {
      let mut state = state_rc.borrow_mut();
      enqueue_native(&mut state, move |scope| {
        let resolver = v8::Local::new(scope, resolver);
        match result {
          Ok(info) => {
            let info = socket_info_object(scope, None, &info);
            resolver.resolve(scope, info);
          }
          Err(e) => {
            let exception = io_error_value(scope, &e);
            resolver.reject(scope, exception);
          }
        }
      });
    }
  };

  let state = state_rc.borrow();
  let id = state.handle.tcp_connect(host, port, Box::new(connect_cb));

  let result = v8::Object::new(scope);
  let id = v8::Integer::new(scope, id);
  set_property_to(scope, result, "id", id.into());
  set_property_to(scope, result, "promise", promise.into());
  rv.set(result.into());
}

/// `listen(host, port, onConnection) → { id, address, port }`.
///
/// Binds synchronously (so the ephemeral port is known immediately) and
/// invokes `onConnection(error, socket)` per accepted connection.
fn listen(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let host = args.get(0).to_rust_string_lossy(scope);
  let Some(port) = port_from_value(scope, args.get(1)) else {
    throw_type_error(scope, "The \"port\" argument must be 0..=65535.");
    return;
  };
  let on_connection = match v8::Local::<v8::Function>::try_from(args.get(2)) {
    Ok(callback) => Rc::new(v8::Global::new(scope, callback)),
    Err(_) => {
      throw_type_error(scope, "The \"callback\" argument must be a function.");
      return;
    }
  };

  let listener = std::net::TcpListener::bind((host.as_str(), port))
    .and_then(|listener| {
      listener.set_nonblocking(true)?;
      Ok(listener)
    });

  let listener = match listener {
    Ok(listener) => listener,
    Err(e) => {
      throw_error(scope, &e.to_string(), Some(error_code(&e)));
      return;
    }
  };

  let local = match listener.local_addr() {
    Ok(local) => local,
    Err(e) => {
      throw_error(scope, &e.to_string(), Some(error_code(&e)));
      return;
    }
  };

  let state_rc = JsRuntime::state(scope);
  let accept_cb = {
    let state_rc = state_rc.clone();
    move |conn_id: i32, info: SocketInfo| {
      let on_connection = Rc::clone(&on_connection);
      let mut state = state_rc.borrow_mut();
      enqueue_native(&mut state, move |scope| {
        let null = v8::null(scope).into();
        let socket = socket_info_object(scope, Some(conn_id), &info);
        call_js(scope, &on_connection, &[null, socket]);
      });
    }
  };

  let state = state_rc.borrow();
  let id = state.handle.tcp_listen(listener, Box::new(accept_cb));

  let result = v8::Object::new(scope);
  let id = v8::Integer::new(scope, id);
  set_property_to(scope, result, "id", id.into());
  let address = v8::String::new(scope, &local.ip().to_string()).unwrap();
  set_property_to(scope, result, "address", address.into());
  let port = v8::Integer::new(scope, local.port() as i32);
  set_property_to(scope, result, "port", port.into());
  rv.set(result.into());
}

/// `readStart(id, cb)`: `cb(error, chunk)`, empty chunk signals EOF.
fn read_start(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _: v8::ReturnValue,
) {
  let id = args.get(0).int32_value(scope).unwrap_or(0);
  let on_read = match v8::Local::<v8::Function>::try_from(args.get(1)) {
    Ok(callback) => Rc::new(v8::Global::new(scope, callback)),
    Err(_) => {
      throw_type_error(scope, "The \"callback\" argument must be a function.");
      return;
    }
  };

  let state_rc = JsRuntime::state(scope);
  let read_cb = {
    let state_rc = state_rc.clone();
    move |result: IoResult<Vec<u8>>| {
      let on_read = Rc::clone(&on_read);
      let mut state = state_rc.borrow_mut();
      enqueue_native(&mut state, move |scope| match result {
        Ok(chunk) => {
          let null = v8::null(scope).into();
          let chunk = bytes_to_uint8array(scope, chunk);
          call_js(scope, &on_read, &[null, chunk]);
        }
        Err(e) => {
          let exception = io_error_value(scope, &e);
          let null = v8::null(scope).into();
          call_js(scope, &on_read, &[exception, null]);
        }
      });
    }
  };

  let state = state_rc.borrow();
  state.handle.tcp_read_start(id, Box::new(read_cb));
}

/// `write(id, data) → promise<int>`: resolves with the full byte count once
/// the OS accepted the bytes.
fn write(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let id = args.get(0).int32_value(scope).unwrap_or(0);
  let Some(bytes) = bytes_from_value(scope, args.get(1)) else {
    throw_type_error(scope, "The \"data\" argument must be string or buffer.");
    return;
  };

  let resolver = v8::PromiseResolver::new(scope).unwrap();
  let promise = resolver.get_promise(scope);
  let resolver = v8::Global::new(scope, resolver);

  let state_rc = JsRuntime::state(scope);
  let write_cb = {
    let state_rc = state_rc.clone();
    move |result: IoResult<usize>| {
      let mut state = state_rc.borrow_mut();
      enqueue_native(&mut state, move |scope| {
        let resolver = v8::Local::new(scope, resolver);
        match result {
          Ok(written) => {
            let written = v8::Number::new(scope, written as f64);
            resolver.resolve(scope, written.into());
          }
          Err(e) => {
            let exception = io_error_value(scope, &e);
            resolver.reject(scope, exception);
          }
        }
      });
    }
  };

  let state = state_rc.borrow();
  state.handle.tcp_write(id, bytes, Box::new(write_cb));
  rv.set(promise.into());
}

/// `shutdown(id) → promise`: half-closes the write side.
fn shutdown(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let id = args.get(0).int32_value(scope).unwrap_or(0);

  let resolver = v8::PromiseResolver::new(scope).unwrap();
  let promise = resolver.get_promise(scope);
  let resolver = v8::Global::new(scope, resolver);

  let state_rc = JsRuntime::state(scope);
  let shutdown_cb = {
    let state_rc = state_rc.clone();
    move |result: IoResult<()>| {
      let mut state = state_rc.borrow_mut();
      enqueue_native(&mut state, move |scope| {
        let resolver = v8::Local::new(scope, resolver);
        match result {
          Ok(_) => {
            let undefined = v8::undefined(scope);
            resolver.resolve(scope, undefined.into());
          }
          Err(e) => {
            let exception = io_error_value(scope, &e);
            resolver.reject(scope, exception);
          }
        }
      });
    }
  };

  let state = state_rc.borrow();
  state.handle.tcp_shutdown(id, Box::new(shutdown_cb));
  rv.set(promise.into());
}

/// `close(id, reason?) → promise`: closes both sides; resolution happens in
/// the close phase of the current tick. A reason string is carried into the
/// rejections of completions still in flight (connect included).
fn close(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let id = args.get(0).int32_value(scope).unwrap_or(0);
  let reason = args.get(1);
  let reason = reason
    .is_string()
    .then(|| reason.to_rust_string_lossy(scope));

  let resolver = v8::PromiseResolver::new(scope).unwrap();
  let promise = resolver.get_promise(scope);
  let resolver = v8::Global::new(scope, resolver);

  let state_rc = JsRuntime::state(scope);
  let close_cb = {
    let state_rc = state_rc.clone();
    move || {
      let mut state = state_rc.borrow_mut();
      enqueue_native(&mut state, move |scope| {
        let resolver = v8::Local::new(scope, resolver);
        let undefined = v8::undefined(scope);
        resolver.resolve(scope, undefined.into());
      });
    }
  };

  let state = state_rc.borrow();
  state.handle.tcp_close(id, reason, Some(Box::new(close_cb)));
  rv.set(promise.into());
}
