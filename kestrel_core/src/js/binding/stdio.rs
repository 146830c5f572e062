//! Standard I/O binding.

use crate::js::binding::*;
use crate::prelude::*;

use std::io::Write;

pub fn initialize<'s>(
  scope: &mut v8::HandleScope<'s>,
) -> v8::Local<'s, v8::Object> {
  let target = v8::Object::new(scope);
  set_function_to(scope, target, "write", write);
  set_function_to(scope, target, "isTerminal", is_terminal);
  target
}

/// `write(fd, data)`: synchronous write to stdout (1) or stderr (2).
fn write(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let fd = args.get(0).int32_value(scope).unwrap_or(1);
  let Some(bytes) = bytes_from_value(scope, args.get(1)) else {
    throw_type_error(scope, "The \"data\" argument must be string or buffer.");
    return;
  };

  let result = match fd {
    2 => {
      let mut stderr = std::io::stderr();
      stderr.write_all(&bytes).and_then(|_| stderr.flush())
    }
    _ => {
      let mut stdout = std::io::stdout();
      stdout.write_all(&bytes).and_then(|_| stdout.flush())
    }
  };

  match result {
    Ok(_) => rv.set_int32(bytes.len() as i32),
    Err(e) => throw_error(scope, &e.to_string(), Some(error_code(&e))),
  }
}

/// `isTerminal(fd)`: whether the stream is attached to a terminal.
fn is_terminal(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  use std::io::IsTerminal;

  let fd = args.get(0).int32_value(scope).unwrap_or(1);
  let is_tty = match fd {
    0 => std::io::stdin().is_terminal(),
    2 => std::io::stderr().is_terminal(),
    _ => std::io::stdout().is_terminal(),
  };
  rv.set_bool(is_tty);
}
