//! Filesystem binding: sync variants run on the loop thread, async variants
//! on the worker pool, settling promises.

use crate::js::binding::*;
use crate::js::{JsRuntime, JsRuntimeState, enqueue_native};
use crate::prelude::*;

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StatPayload {
  is_file: bool,
  is_directory: bool,
  is_symlink: bool,
  size: u64,
  mode: u32,
  mtime_ms: u64,
  atime_ms: u64,
  birthtime_ms: u64,
}

impl StatPayload {
  fn from_metadata(metadata: &std::fs::Metadata) -> Self {
    let time_ms = |time: std::io::Result<std::time::SystemTime>| {
      time
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
    };

    #[cfg(unix)]
    let mode = {
      use std::os::unix::fs::PermissionsExt;
      metadata.permissions().mode()
    };
    #[cfg(not(unix))]
    let mode = 0;

    StatPayload {
      is_file: metadata.is_file(),
      is_directory: metadata.is_dir(),
      is_symlink: metadata.file_type().is_symlink(),
      size: metadata.len(),
      mode,
      mtime_ms: time_ms(metadata.modified()),
      atime_ms: time_ms(metadata.accessed()),
      birthtime_ms: time_ms(metadata.created()),
    }
  }

  fn to_object<'s>(
    &self,
    scope: &mut v8::HandleScope<'s>,
  ) -> v8::Local<'s, v8::Value> {
    let stat = v8::Object::new(scope);
    let value = v8::Boolean::new(scope, self.is_file);
    set_property_to(scope, stat, "isFile", value.into());
    let value = v8::Boolean::new(scope, self.is_directory);
    set_property_to(scope, stat, "isDirectory", value.into());
    let value = v8::Boolean::new(scope, self.is_symlink);
    set_property_to(scope, stat, "isSymlink", value.into());
    let value = v8::Number::new(scope, self.size as f64);
    set_property_to(scope, stat, "size", value.into());
    let value = v8::Number::new(scope, self.mode as f64);
    set_property_to(scope, stat, "mode", value.into());
    let value = v8::Number::new(scope, self.mtime_ms as f64);
    set_property_to(scope, stat, "mtimeMs", value.into());
    let value = v8::Number::new(scope, self.atime_ms as f64);
    set_property_to(scope, stat, "atimeMs", value.into());
    let value = v8::Number::new(scope, self.birthtime_ms as f64);
    set_property_to(scope, stat, "birthtimeMs", value.into());
    stat.into()
  }
}

pub fn initialize<'s>(
  scope: &mut v8::HandleScope<'s>,
) -> v8::Local<'s, v8::Object> {
  let target = v8::Object::new(scope);
  set_function_to(scope, target, "open", open);
  set_function_to(scope, target, "openSync", open_sync);
  set_function_to(scope, target, "read", read);
  set_function_to(scope, target, "readSync", read_sync);
  set_function_to(scope, target, "write", write);
  set_function_to(scope, target, "writeSync", write_sync);
  set_function_to(scope, target, "close", close);
  set_function_to(scope, target, "stat", stat);
  set_function_to(scope, target, "statSync", stat_sync);
  set_function_to(scope, target, "mkdir", mkdir);
  set_function_to(scope, target, "mkdirSync", mkdir_sync);
  set_function_to(scope, target, "rmdir", rmdir);
  set_function_to(scope, target, "rmdirSync", rmdir_sync);
  set_function_to(scope, target, "copyFile", copy_file);
  set_function_to(scope, target, "copyFileSync", copy_file_sync);
  target
}

fn open_options(mode: &str) -> OpenOptions {
  let mut options = OpenOptions::new();
  match mode {
    "r+" => options.read(true).write(true),
    "w" => options.write(true).create(true).truncate(true),
    "w+" => options.read(true).write(true).create(true).truncate(true),
    "a" => options.append(true).create(true),
    "a+" => options.read(true).append(true).create(true),
    _ => options.read(true),
  };
  options
}

/// Registers an open file and returns its fd handle.
fn register_file(state: &mut JsRuntimeState, file: File) -> i32 {
  let fd = state.handle.next_handle_id();
  state.files.insert(fd, file);
  fd
}

/// Grabs a cloned descriptor for worker-pool I/O; clones share the cursor.
fn clone_file(
  state: &JsRuntimeState,
  fd: i32,
) -> std::io::Result<File> {
  match state.files.get(&fd) {
    Some(file) => file.try_clone(),
    None => Err(std::io::Error::new(
      std::io::ErrorKind::InvalidInput,
      "bad file descriptor",
    )),
  }
}

/// `open(path, mode) → promise<fd>`.
fn open(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let path = PathBuf::from(args.get(0).to_rust_string_lossy(scope));
  let mode = args.get(1).to_rust_string_lossy(scope);

  let resolver = v8::PromiseResolver::new(scope).unwrap();
  let promise = resolver.get_promise(scope);
  let resolver = v8::Global::new(scope, resolver);

  // The file itself can't cross the completion queue; park it in a shared
  // slot the callback drains on the loop thread.
  let slot: Arc<Mutex<Option<File>>> = Arc::new(Mutex::new(None));

  let task = {
    let slot = Arc::clone(&slot);
    move || match open_options(&mode).open(&path) {
      Ok(file) => {
        *slot.lock().unwrap() = Some(file);
        Some(Ok(vec![]))
      }
      Err(e) => Some(Err(e.into())),
    }
  };

  let state_rc = JsRuntime::state(scope);
  let task_cb = {
    let state_rc = state_rc.clone();
    move |result: crate::evloop::msg::TaskResult| {
      let mut state = state_rc.borrow_mut();
      let fd = slot
        .lock()
        .unwrap()
        .take()
        .map(|file| register_file(&mut state, file));
      enqueue_native(&mut state, move |scope| {
        let resolver = v8::Local::new(scope, resolver);
        match result.unwrap() {
          Ok(_) => {
            let fd = v8::Integer::new(scope, fd.unwrap_or(-1));
            resolver.resolve(scope, fd.into());
          }
          Err(e) => {
            let exception = any_error_value(scope, &e);
            resolver.reject(scope, exception);
          }
        }
      });
    }
  };

  let state = state_rc.borrow();
  state.handle.spawn(Box::new(task), Some(Box::new(task_cb)));
  rv.set(promise.into());
}

/// `openSync(path, mode) → fd`.
fn open_sync(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let path = PathBuf::from(args.get(0).to_rust_string_lossy(scope));
  let mode = args.get(1).to_rust_string_lossy(scope);

  match open_options(&mode).open(&path) {
    Ok(file) => {
      let state_rc = JsRuntime::state(scope);
      let fd = register_file(&mut state_rc.borrow_mut(), file);
      rv.set_int32(fd);
    }
    Err(e) => throw_error(scope, &e.to_string(), Some(error_code(&e))),
  }
}

/// `read(fd, size) → promise<Uint8Array>` (empty at EOF).
fn read(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let fd = args.get(0).int32_value(scope).unwrap_or(-1);
  let size = args.get(1).int32_value(scope).unwrap_or(16 * 1024).max(0);

  let resolver = v8::PromiseResolver::new(scope).unwrap();
  let promise = resolver.get_promise(scope);
  let resolver = v8::Global::new(scope, resolver);

  let state_rc = JsRuntime::state(scope);
  let file = clone_file(&state_rc.borrow(), fd);

  let task = move || match file {
    Ok(file) => {
      let mut buf = vec![0u8; size as usize];
      match (&file).read(&mut buf) {
        Ok(n) => {
          buf.truncate(n);
          Some(Ok(buf))
        }
        Err(e) => Some(Err(e.into())),
      }
    }
    Err(e) => Some(Err(e.into())),
  };

  let task_cb = {
    let state_rc = state_rc.clone();
    move |result: crate::evloop::msg::TaskResult| {
      let mut state = state_rc.borrow_mut();
      enqueue_native(&mut state, move |scope| {
        let resolver = v8::Local::new(scope, resolver);
        match result.unwrap() {
          Ok(bytes) => {
            let bytes = bytes_to_uint8array(scope, bytes);
            resolver.resolve(scope, bytes);
          }
          Err(e) => {
            let exception = any_error_value(scope, &e);
            resolver.reject(scope, exception);
          }
        }
      });
    }
  };

  let state = state_rc.borrow();
  state.handle.spawn(Box::new(task), Some(Box::new(task_cb)));
  rv.set(promise.into());
}

/// `readSync(fd, size) → Uint8Array`.
fn read_sync(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let fd = args.get(0).int32_value(scope).unwrap_or(-1);
  let size = args.get(1).int32_value(scope).unwrap_or(16 * 1024).max(0);

  let state_rc = JsRuntime::state(scope);
  let mut state = state_rc.borrow_mut();
  let Some(file) = state.files.get_mut(&fd) else {
    drop(state);
    throw_error(scope, "bad file descriptor", Some("EINVAL"));
    return;
  };

  let mut buf = vec![0u8; size as usize];
  match file.read(&mut buf) {
    Ok(n) => {
      drop(state);
      buf.truncate(n);
      rv.set(bytes_to_uint8array(scope, buf));
    }
    Err(e) => {
      drop(state);
      throw_error(scope, &e.to_string(), Some(error_code(&e)));
    }
  }
}

/// `write(fd, data) → promise<int>`.
fn write(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let fd = args.get(0).int32_value(scope).unwrap_or(-1);
  let Some(bytes) = bytes_from_value(scope, args.get(1)) else {
    throw_type_error(scope, "The \"data\" argument must be string or buffer.");
    return;
  };

  let resolver = v8::PromiseResolver::new(scope).unwrap();
  let promise = resolver.get_promise(scope);
  let resolver = v8::Global::new(scope, resolver);

  let state_rc = JsRuntime::state(scope);
  let file = clone_file(&state_rc.borrow(), fd);

  let task = move || match file {
    Ok(file) => {
      let len = bytes.len() as u64;
      match (&file).write_all(&bytes) {
        Ok(_) => Some(bincode::serialize(&len).map_err(AnyErr::from)),
        Err(e) => Some(Err(e.into())),
      }
    }
    Err(e) => Some(Err(e.into())),
  };

  let task_cb = {
    let state_rc = state_rc.clone();
    move |result: crate::evloop::msg::TaskResult| {
      let mut state = state_rc.borrow_mut();
      enqueue_native(&mut state, move |scope| {
        let resolver = v8::Local::new(scope, resolver);
        match result.unwrap() {
          Ok(bytes) => {
            let written: u64 = bincode::deserialize(&bytes).unwrap_or(0);
            let written = v8::Number::new(scope, written as f64);
            resolver.resolve(scope, written.into());
          }
          Err(e) => {
            let exception = any_error_value(scope, &e);
            resolver.reject(scope, exception);
          }
        }
      });
    }
  };

  let state = state_rc.borrow();
  state.handle.spawn(Box::new(task), Some(Box::new(task_cb)));
  rv.set(promise.into());
}

/// `writeSync(fd, data) → int`.
fn write_sync(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let fd = args.get(0).int32_value(scope).unwrap_or(-1);
  let Some(bytes) = bytes_from_value(scope, args.get(1)) else {
    throw_type_error(scope, "The \"data\" argument must be string or buffer.");
    return;
  };

  let state_rc = JsRuntime::state(scope);
  let mut state = state_rc.borrow_mut();
  let Some(file) = state.files.get_mut(&fd) else {
    drop(state);
    throw_error(scope, "bad file descriptor", Some("EINVAL"));
    return;
  };

  match file.write_all(&bytes) {
    Ok(_) => rv.set_int32(bytes.len() as i32),
    Err(e) => {
      drop(state);
      throw_error(scope, &e.to_string(), Some(error_code(&e)));
    }
  }
}

/// `close(fd)`: drops the descriptor. Idempotent.
fn close(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _: v8::ReturnValue,
) {
  let fd = args.get(0).int32_value(scope).unwrap_or(-1);
  let state_rc = JsRuntime::state(scope);
  state_rc.borrow_mut().files.remove(&fd);
}

/// `stat(path) → promise<statObject>`.
fn stat(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let path = PathBuf::from(args.get(0).to_rust_string_lossy(scope));

  let resolver = v8::PromiseResolver::new(scope).unwrap();
  let promise = resolver.get_promise(scope);
  let resolver = v8::Global::new(scope, resolver);

  let task = move || match std::fs::metadata(&path) {
    Ok(metadata) => {
      let payload = StatPayload::from_metadata(&metadata);
      Some(bincode::serialize(&payload).map_err(AnyErr::from))
    }
    Err(e) => Some(Err(e.into())),
  };

  let state_rc = JsRuntime::state(scope);
  let task_cb = {
    let state_rc = state_rc.clone();
    move |result: crate::evloop::msg::TaskResult| {
      let mut state = state_rc.borrow_mut();
      enqueue_native(&mut state, move |scope| {
        let resolver = v8::Local::new(scope, resolver);
        match result.unwrap() {
          Ok(bytes) => {
            let payload: StatPayload =
              bincode::deserialize(&bytes).unwrap_or_default();
            let stat = payload.to_object(scope);
            resolver.resolve(scope, stat);
          }
          Err(e) => {
            let exception = any_error_value(scope, &e);
            resolver.reject(scope, exception);
          }
        }
      });
    }
  };

  let state = state_rc.borrow();
  state.handle.spawn(Box::new(task), Some(Box::new(task_cb)));
  rv.set(promise.into());
}

/// `statSync(path) → statObject`.
fn stat_sync(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let path = PathBuf::from(args.get(0).to_rust_string_lossy(scope));
  match std::fs::metadata(&path) {
    Ok(metadata) => {
      let payload = StatPayload::from_metadata(&metadata);
      rv.set(payload.to_object(scope));
    }
    Err(e) => throw_error(scope, &e.to_string(), Some(error_code(&e))),
  }
}

/// Runs a path-only operation on the worker pool, resolving with
/// `undefined`.
fn spawn_unit_task(
  scope: &mut v8::HandleScope,
  rv: &mut v8::ReturnValue,
  task: impl FnOnce() -> std::io::Result<()> + Send + 'static,
) {
  let resolver = v8::PromiseResolver::new(scope).unwrap();
  let promise = resolver.get_promise(scope);
  let resolver = v8::Global::new(scope, resolver);

  let task = move || match task() {
    Ok(_) => Some(Ok(vec![])),
    Err(e) => Some(Err(e.into())),
  };

  let state_rc = JsRuntime::state(scope);
  let task_cb = {
    let state_rc = state_rc.clone();
    move |result: crate::evloop::msg::TaskResult| {
      let mut state = state_rc.borrow_mut();
      enqueue_native(&mut state, move |scope| {
        let resolver = v8::Local::new(scope, resolver);
        match result.unwrap() {
          Ok(_) => {
            let undefined = v8::undefined(scope);
            resolver.resolve(scope, undefined.into());
          }
          Err(e) => {
            let exception = any_error_value(scope, &e);
            resolver.reject(scope, exception);
          }
        }
      });
    }
  };

  let state = state_rc.borrow();
  state.handle.spawn(Box::new(task), Some(Box::new(task_cb)));
  rv.set(promise.into());
}

/// `mkdir(path, recursive) → promise`.
fn mkdir(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let path = PathBuf::from(args.get(0).to_rust_string_lossy(scope));
  let recursive = args.get(1).boolean_value(scope);
  spawn_unit_task(scope, &mut rv, move || {
    if recursive {
      std::fs::create_dir_all(&path)
    } else {
      std::fs::create_dir(&path)
    }
  });
}

/// `mkdirSync(path, recursive)`.
fn mkdir_sync(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _: v8::ReturnValue,
) {
  let path = PathBuf::from(args.get(0).to_rust_string_lossy(scope));
  let recursive = args.get(1).boolean_value(scope);
  let result = if recursive {
    std::fs::create_dir_all(&path)
  } else {
    std::fs::create_dir(&path)
  };
  if let Err(e) = result {
    throw_error(scope, &e.to_string(), Some(error_code(&e)));
  }
}

/// `rmdir(path, recursive) → promise`.
fn rmdir(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let path = PathBuf::from(args.get(0).to_rust_string_lossy(scope));
  let recursive = args.get(1).boolean_value(scope);
  spawn_unit_task(scope, &mut rv, move || {
    if recursive {
      std::fs::remove_dir_all(&path)
    } else {
      std::fs::remove_dir(&path)
    }
  });
}

/// `rmdirSync(path, recursive)`.
fn rmdir_sync(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _: v8::ReturnValue,
) {
  let path = PathBuf::from(args.get(0).to_rust_string_lossy(scope));
  let recursive = args.get(1).boolean_value(scope);
  let result = if recursive {
    std::fs::remove_dir_all(&path)
  } else {
    std::fs::remove_dir(&path)
  };
  if let Err(e) = result {
    throw_error(scope, &e.to_string(), Some(error_code(&e)));
  }
}

/// `copyFile(src, dst) → promise`.
fn copy_file(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let src = PathBuf::from(args.get(0).to_rust_string_lossy(scope));
  let dst = PathBuf::from(args.get(1).to_rust_string_lossy(scope));
  spawn_unit_task(scope, &mut rv, move || {
    std::fs::copy(&src, &dst).map(|_| ())
  });
}

/// `copyFileSync(src, dst)`.
fn copy_file_sync(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _: v8::ReturnValue,
) {
  let src = PathBuf::from(args.get(0).to_rust_string_lossy(scope));
  let dst = PathBuf::from(args.get(1).to_rust_string_lossy(scope));
  if let Err(e) = std::fs::copy(&src, &dst) {
    throw_error(scope, &e.to_string(), Some(error_code(&e)));
  }
}
