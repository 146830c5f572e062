//! The native half of the `process` object.
//!
//! `initialize` installs the base object with its native functions at context
//! creation; `refresh` fills in the static values (argv, env, pid, …) once
//! the runtime state is in place. The runtime scripts wrap the base object
//! with the event-emitter surface.

use crate::js::JsRuntime;
use crate::js::binding::*;
use crate::prelude::*;

/// Creates the base `process` object on the global.
pub fn initialize(scope: &mut v8::HandleScope, global: v8::Local<v8::Object>) {
  let process = create_object_under(scope, global, "process");

  set_function_to(scope, process, "cwd", cwd);
  set_function_to(scope, process, "exit", exit);
  set_function_to(scope, process, "memoryUsage", memory_usage);
  set_function_to(scope, process, "kill", kill);
  set_function_to(scope, process, "nextTick", next_tick);
  set_function_to(scope, process, "binding", bind);
}

/// Fills in the static values once runtime options are available.
pub fn refresh(scope: &mut v8::HandleScope) {
  let context = scope.get_current_context();
  let global = context.global(scope);

  let key = v8::String::new(scope, "process").unwrap();
  let process = global.get(scope, key.into()).unwrap();
  let process = process.to_object(scope).unwrap();

  let state_rc = JsRuntime::state(scope);
  let options = state_rc.borrow().options.clone();

  // process.argv: [execPath, script, ...args].
  let argv = v8::Array::new(scope, 0);
  let mut values = vec![options.exec_path.clone()];
  if let Some(script) = options.script.as_ref() {
    values.push(script.clone());
  }
  values.extend(options.args.iter().cloned());
  for (i, value) in values.iter().enumerate() {
    let value = v8::String::new(scope, value).unwrap();
    argv.set_index(scope, i as u32, value.into());
  }
  set_constant_to(scope, process, "argv", argv.into());

  // process.env: snapshot of the environment.
  let env = v8::Object::new(scope);
  for (name, value) in std::env::vars() {
    let name = v8::String::new(scope, &name).unwrap();
    let value = v8::String::new(scope, &value).unwrap();
    env.set(scope, name.into(), value.into());
  }
  set_property_to(scope, process, "env", env.into());

  let pid = v8::Number::new(scope, std::process::id() as f64);
  set_constant_to(scope, process, "pid", pid.into());

  let platform = match std::env::consts::OS {
    "macos" => "darwin",
    "windows" => "win32",
    os => os,
  };
  let platform = v8::String::new(scope, platform).unwrap();
  set_constant_to(scope, process, "platform", platform.into());

  let version = concat!("v", env!("CARGO_PKG_VERSION"));
  let version = v8::String::new(scope, version).unwrap();
  set_constant_to(scope, process, "version", version.into());

  let versions = v8::Object::new(scope);
  let kestrel = v8::String::new(scope, env!("CARGO_PKG_VERSION")).unwrap();
  set_constant_to(scope, versions, "kestrel", kestrel.into());
  let v8_version = v8::String::new(scope, v8::V8::get_version()).unwrap();
  set_constant_to(scope, versions, "v8", v8_version.into());
  set_constant_to(scope, process, "versions", versions.into());
}

/// `process.cwd()`.
fn cwd(
  scope: &mut v8::HandleScope,
  _: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  match std::env::current_dir() {
    Ok(path) => {
      let path = v8::String::new(scope, &path.to_string_lossy()).unwrap();
      rv.set(path.into());
    }
    Err(e) => throw_error(scope, &e.to_string(), Some(error_code(&e))),
  }
}

/// `process.exit(code)`: short-circuits the loop.
fn exit(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _: v8::ReturnValue,
) {
  let code = args.get(0).int32_value(scope).unwrap_or(0);
  std::process::exit(code);
}

/// `process.memoryUsage()`.
fn memory_usage(
  scope: &mut v8::HandleScope,
  _: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let stats = scope.get_heap_statistics();

  let usage = v8::Object::new(scope);
  let heap_total = v8::Number::new(scope, stats.total_heap_size() as f64);
  set_property_to(scope, usage, "heapTotal", heap_total.into());
  let heap_used = v8::Number::new(scope, stats.used_heap_size() as f64);
  set_property_to(scope, usage, "heapUsed", heap_used.into());
  let external = v8::Number::new(scope, stats.external_memory() as f64);
  set_property_to(scope, usage, "external", external.into());

  rv.set(usage.into());
}

/// `process.kill(pid, signal?)`.
fn kill(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _: v8::ReturnValue,
) {
  let pid = match args.get(0).int32_value(scope) {
    Some(pid) => pid,
    None => {
      throw_type_error(scope, "The \"pid\" argument must be a number.");
      return;
    }
  };

  let signum = signal_arg(scope, args.get(1)).unwrap_or(15);

  #[cfg(unix)]
  {
    use nix::sys::signal::{Signal, kill as nix_kill};
    use nix::unistd::Pid;

    let signal = match Signal::try_from(signum) {
      Ok(signal) => signal,
      Err(_) => {
        throw_type_error(scope, "Unknown signal.");
        return;
      }
    };
    if let Err(e) = nix_kill(Pid::from_raw(pid), signal) {
      throw_error(scope, &format!("kill failed: {e}"), Some("EPERM"));
    }
  }

  #[cfg(not(unix))]
  {
    let _ = (pid, signum);
    throw_error(scope, "process.kill is not supported here", Some("ENOSYS"));
  }
}

/// Accepts a signal number or a `"SIGTERM"`-style name.
fn signal_arg(
  scope: &mut v8::HandleScope,
  value: v8::Local<v8::Value>,
) -> Option<i32> {
  if value.is_number() {
    return value.int32_value(scope);
  }
  if value.is_string() {
    let name = value.to_rust_string_lossy(scope);
    return crate::evloop::signal::signum_from_name(&name);
  }
  None
}

/// `process.nextTick(cb, ...args)`.
fn next_tick(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _: v8::ReturnValue,
) {
  let callback = match v8::Local::<v8::Function>::try_from(args.get(0)) {
    Ok(callback) => v8::Global::new(scope, callback),
    Err(_) => {
      throw_type_error(scope, "The \"callback\" argument must be a function.");
      return;
    }
  };

  let params: Vec<v8::Global<v8::Value>> = (1..args.length())
    .map(|i| v8::Global::new(scope, args.get(i)))
    .collect();

  let state_rc = JsRuntime::state(scope);
  state_rc.borrow_mut().next_tick_queue.push((callback, params));
}

/// `process.binding(name)`: memoized native binding tables.
fn bind(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let name = args.get(0).to_rust_string_lossy(scope);
  let state_rc = JsRuntime::state(scope);

  // Serve the memoized table when possible.
  let cached = state_rc.borrow().binding_cache.get(name.as_str()).cloned();
  if let Some(table) = cached {
    rv.set(v8::Local::new(scope, table).into());
    return;
  }

  let Some((key, init)) = BINDINGS().get_key_value(name.as_str()) else {
    throw_type_error(scope, &format!("No such binding: {name}"));
    return;
  };

  let table = init(scope);
  let global_table = v8::Global::new(scope, table);
  state_rc.borrow_mut().binding_cache.insert(*key, global_table);

  rv.set(table.into());
}
