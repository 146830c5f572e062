//! JavaScript runtime.

use crate::evloop::registry::HandleId;
use crate::evloop::{EventLoop, LoopHandle};
use crate::js::binding::http_parser::HttpParser;
use crate::js::err::JsError;
use crate::js::exception::ExceptionState;
use crate::js::hook::module_resolve_cb;
use crate::js::module::{
  ImportKind, ModuleMap, ModuleStatus, fetch_module_tree, resolve_import,
};
use crate::prelude::*;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;
use std::time::Instant;
use tracing::{debug, error};

pub mod binding;
pub mod err;
pub mod exception;
pub mod hook;
pub mod loader;
pub mod module;

#[derive(Debug, Default, Clone)]
/// Runtime options.
pub struct JsRuntimeOptions {
  /// Path of the running executable, `process.argv[0]`.
  pub exec_path: String,
  /// The main entry point for the program.
  pub script: Option<String>,
  /// Arguments passed through to `process.argv`.
  pub args: Vec<String>,
  /// Reloads every URL import.
  pub reload: bool,
  /// V8 flags.
  pub v8_flags: Vec<String>,
}

/// An abstract interface for native completions that re-enter JavaScript.
/// V8 calls need a `&mut v8::HandleScope`, so completions are queued as
/// futures and run on the loop thread once a scope is available.
pub trait JsFuture {
  fn run(&mut self, scope: &mut v8::HandleScope);
}

/// A one-shot [`JsFuture`] from a closure.
pub struct NativeFuture(Option<Box<dyn FnOnce(&mut v8::HandleScope)>>);

impl JsFuture for NativeFuture {
  fn run(&mut self, scope: &mut v8::HandleScope) {
    if let Some(f) = self.0.take() {
      f(scope);
    }
  }
}

/// Queues a native completion for the next future drain.
pub fn enqueue_native(
  state: &mut JsRuntimeState,
  f: impl FnOnce(&mut v8::HandleScope) + 'static,
) {
  state
    .pending_futures
    .push(Box::new(NativeFuture(Some(Box::new(f)))));
}

/// A `nextTick` entry: callback plus bound arguments.
pub type NextTickEntry = (v8::Global<v8::Function>, Vec<v8::Global<v8::Value>>);

pub struct JsRuntimeState {
  /// A sand-boxed execution context with its own set of built-in objects
  /// and functions.
  pub context: v8::Global<v8::Context>,
  /// Holds information about resolved ES modules.
  pub module_map: ModuleMap,
  /// Handle to the event loop, used by the bindings to schedule work.
  pub handle: LoopHandle,
  /// Native completions waiting to re-enter JS.
  pub pending_futures: Vec<Box<dyn JsFuture>>,
  /// Callbacks scheduled by `process.nextTick`.
  pub next_tick_queue: Vec<NextTickEntry>,
  /// Indicates the start time of the process.
  pub startup_moment: Instant,
  /// Timestamp at which the current process began, in Unix time millis.
  pub time_origin: u128,
  /// Stores and manages uncaught exceptions.
  pub exceptions: ExceptionState,
  /// Runtime options.
  pub options: JsRuntimeOptions,
  /// Memoized binding tables, keyed by binding name.
  pub binding_cache: HashMap<&'static str, v8::Global<v8::Object>>,
  /// HTTP parser records; bridge-owned, same ID space as loop handles.
  pub parsers: HashMap<HandleId, HttpParser>,
  /// Open files, keyed by their fd handle.
  pub files: HashMap<HandleId, std::fs::File>,
}

/// Initialize the V8 platform, once per process.
pub fn init_v8_platform() {
  static V8_INIT: Once = Once::new();
  V8_INIT.call_once(move || {
    let platform = v8::new_default_platform(0, false).make_shared();
    v8::V8::initialize_platform(platform);
    v8::V8::initialize();
  });
}

pub struct JsRuntime {
  /// V8 isolate.
  isolate: v8::OwnedIsolate,

  /// The native event loop driving timers, I/O and the worker pool.
  pub event_loop: EventLoop,

  /// The state of the runtime.
  pub state: Rc<RefCell<JsRuntimeState>>,
}

impl JsRuntime {
  /// Creates a new JsRuntime based on provided options.
  pub fn new(options: JsRuntimeOptions) -> AnyResult<Self> {
    let flags = options.v8_flags.join(" ");
    v8::V8::set_flags_from_string(&flags);

    // Fire up the v8 engine.
    init_v8_platform();

    let event_loop = EventLoop::new()?;

    let mut isolate = v8::Isolate::new(v8::CreateParams::default());
    isolate.set_capture_stack_trace_for_uncaught_exceptions(true, 10);
    isolate.set_promise_reject_callback(hook::promise_reject_cb);
    isolate.set_host_initialize_import_meta_object_callback(
      hook::host_initialize_import_meta_object_cb,
    );
    isolate.set_host_import_module_dynamically_callback(
      hook::host_import_module_dynamically_cb,
    );

    let context = {
      let scope = &mut v8::HandleScope::new(&mut *isolate);
      let context = binding::create_new_context(scope);
      v8::Global::new(scope, context)
    };

    let time_origin = std::time::SystemTime::now()
      .duration_since(std::time::UNIX_EPOCH)
      .map(|d| d.as_millis())
      .unwrap_or(0);

    // Store state inside the v8 isolate slot.
    let state = Rc::new(RefCell::new(JsRuntimeState {
      context,
      module_map: ModuleMap::new(),
      handle: event_loop.handle(),
      pending_futures: Vec::new(),
      next_tick_queue: Vec::new(),
      startup_moment: Instant::now(),
      time_origin,
      exceptions: ExceptionState::new(),
      options,
      binding_cache: HashMap::new(),
      parsers: HashMap::new(),
      files: HashMap::new(),
    }));

    isolate.set_slot(state.clone());

    let mut runtime = JsRuntime {
      isolate,
      event_loop,
      state,
    };

    runtime.init_environment();

    Ok(runtime)
  }

  /// Initializes the core environment (globals, console, timers, process).
  fn init_environment(&mut self) {
    // Initialize process static values before the runtime scripts read them.
    {
      let scope = &mut self.handle_scope();
      binding::process::refresh(scope);
    }

    let name = "kestrel:runtime/main.js";
    let source = include_str!("./js/builtin/main.js");
    self.init_builtin_module(name, source);
  }

  /// Synchronously loads an embedded runtime module.
  fn init_builtin_module(&mut self, name: &str, source: &str) {
    let scope = &mut self.handle_scope();
    let tc_scope = &mut v8::TryCatch::new(scope);

    let module = match fetch_module_tree(tc_scope, name, Some(source)) {
      Some(module) => module,
      None => {
        assert!(tc_scope.has_caught());
        let exception = tc_scope.exception().unwrap();
        let exception = JsError::from_v8_exception(tc_scope, exception, None);
        error!("Failed to import builtin module {name}: {exception}");
        eprintln!("Failed to import builtin module {name}: {exception}");
        std::process::exit(1);
      }
    };

    if module
      .instantiate_module(tc_scope, module_resolve_cb)
      .is_none()
    {
      assert!(tc_scope.has_caught());
      let exception = tc_scope.exception().unwrap();
      let exception = JsError::from_v8_exception(tc_scope, exception, None);
      error!("Failed to instantiate builtin module {name}: {exception}");
      eprintln!("Failed to instantiate builtin module {name}: {exception}");
      std::process::exit(1);
    }

    let _ = module.evaluate(tc_scope);

    if module.get_status() == v8::ModuleStatus::Errored {
      let exception = module.get_exception();
      let exception = JsError::from_v8_exception(tc_scope, exception, None);
      error!("Failed to evaluate builtin module {name}: {exception}");
      eprintln!("Failed to evaluate builtin module {name}: {exception}");
      std::process::exit(1);
    }
  }

  /// Executes JavaScript code as an ES module.
  pub fn execute_module(
    &mut self,
    filename: &str,
    source: Option<&str>,
  ) -> AnyResult<()> {
    let scope = &mut self.handle_scope();

    // Allow executing code with no on-disk location (embedded sources).
    // Bare entry paths (`kestrel main.js`) resolve against the cwd.
    let path = if source.is_some() {
      filename.to_string()
    } else if filename.starts_with("http://") || filename.starts_with("https://")
    {
      resolve_import(None, filename, false)?
    } else {
      use path_absolutize::Absolutize;
      std::path::Path::new(filename)
        .absolutize()?
        .to_string_lossy()
        .into_owned()
    };
    debug!("Resolved main module: {path:?}");

    let tc_scope = &mut v8::TryCatch::new(scope);

    let module = match fetch_module_tree(tc_scope, &path, source) {
      Some(module) => module,
      None => {
        assert!(tc_scope.has_caught());
        let exception = tc_scope.exception().unwrap();
        let exception = JsError::from_v8_exception(tc_scope, exception, None);
        anyhow::bail!("{exception}");
      }
    };

    if module
      .instantiate_module(tc_scope, module_resolve_cb)
      .is_none()
    {
      assert!(tc_scope.has_caught());
      let exception = tc_scope.exception().unwrap();
      let exception = JsError::from_v8_exception(tc_scope, exception, None);
      anyhow::bail!("{exception}");
    }

    let _ = module.evaluate(tc_scope);

    if module.get_status() == v8::ModuleStatus::Errored {
      let exception = module.get_exception();
      let exception = v8::Local::new(tc_scope, exception);
      let exception_ref = v8::Global::new(tc_scope, exception);

      // A top-level error also registers as an unhandled rejection of the
      // module's evaluation promise; drop the duplicate.
      let state_rc = JsRuntime::state(tc_scope);
      state_rc
        .borrow_mut()
        .exceptions
        .remove_promise_rejection_entry(&exception_ref);

      let exception = JsError::from_v8_exception(tc_scope, exception, None);
      anyhow::bail!("{exception}");
    }

    Ok(())
  }

  /// Runs the event loop until no more pending work exists.
  pub fn run_event_loop(&mut self) {
    // Run callbacks/promises from the next-tick and micro-task queues.
    run_next_tick_callbacks(&mut self.handle_scope());

    while self.event_loop.has_pending_events()
      || self.has_promise_rejections()
      || self.isolate.has_pending_background_tasks()
      || self.has_pending_imports()
      || self.has_next_tick_callbacks()
      || self.has_pending_futures()
    {
      // Tick the event loop one cycle.
      self.tick_event_loop();

      // Report any unhandled errors.
      if let Some(error) = check_exceptions(&mut self.handle_scope()) {
        report_and_exit(error);
      }
    }
  }

  /// Runs a single tick of the event loop.
  pub fn tick_event_loop(&mut self) {
    run_next_tick_callbacks(&mut self.handle_scope());
    self.fast_forward_imports();
    self.event_loop.tick();
    self.run_pending_futures();
  }

  /// Runs the native completions queued by the loop tick.
  fn run_pending_futures(&mut self) {
    let scope = &mut self.handle_scope();

    let futures: Vec<Box<dyn JsFuture>> = {
      let state_rc = Self::state(scope);
      let mut state = state_rc.borrow_mut();
      state.pending_futures.drain(..).collect()
    };

    for mut future in futures {
      future.run(scope);
      // Drain microtasks (late rejection handlers included) before looking
      // for unhandled errors.
      run_next_tick_callbacks(scope);
      if let Some(error) = check_exceptions(scope) {
        report_and_exit(error);
      }
    }
  }

  /// Checks for dynamic imports ready for instantiation and evaluation.
  fn fast_forward_imports(&mut self) {
    let scope = &mut self.handle_scope();
    let state_rc = JsRuntime::state(scope);
    let mut state = state_rc.borrow_mut();

    let mut ready_imports = vec![];

    let state_ref = &mut *state;
    let pending_graphs = &mut state_ref.module_map.pending;
    let seen_modules = &mut state_ref.module_map.seen;

    pending_graphs.retain(|graph_rc| {
      let graph = graph_rc.borrow();
      let mut graph_root = graph.root_rc.borrow_mut();

      // Propagate load/compile failures to the import promise(s).
      if let Some(message) = graph_root.exception.borrow_mut().take() {
        let exception = v8::String::new(scope, &message).unwrap();
        let exception = v8::Exception::error(scope, exception);

        match graph.kind.clone() {
          ImportKind::Static => unreachable!(),
          ImportKind::Dynamic(main_promise) => {
            for promise in [main_promise].iter().chain(graph.same_origin.iter())
            {
              promise.open(scope).reject(scope, exception);
            }
          }
        }

        return false;
      }

      // If the graph is still loading, fast-forward the dependencies.
      if graph_root.status != ModuleStatus::Ready {
        graph_root.fast_forward(seen_modules);
        return true;
      }

      ready_imports.push(Rc::clone(graph_rc));
      false
    });

    // Drop the state borrow before instantiation/evaluation re-enters JS.
    drop(state);

    for graph_rc in ready_imports {
      let tc_scope = &mut v8::TryCatch::new(scope);

      let graph = graph_rc.borrow();
      let path = graph.root_rc.borrow().path.clone();

      let module = state_rc.borrow().module_map.get(&path).unwrap();
      let module = v8::Local::new(tc_scope, module);

      if module
        .instantiate_module(tc_scope, module_resolve_cb)
        .is_none()
      {
        assert!(tc_scope.has_caught());
        let exception = tc_scope.exception().unwrap();
        if let ImportKind::Dynamic(main_promise) = graph.kind.clone() {
          for promise in [main_promise].iter().chain(graph.same_origin.iter())
          {
            promise.open(tc_scope).reject(tc_scope, exception);
          }
        }
        continue;
      }

      let _ = module.evaluate(tc_scope);

      if module.get_status() == v8::ModuleStatus::Errored {
        let exception = module.get_exception();
        let exception_ref = v8::Global::new(tc_scope, exception);

        // The evaluation error also lands in the rejection ledger through
        // the promise hook; keep only the import rejection.
        state_rc
          .borrow_mut()
          .exceptions
          .remove_promise_rejection_entry(&exception_ref);

        if let ImportKind::Dynamic(main_promise) = graph.kind.clone() {
          for promise in [main_promise].iter().chain(graph.same_origin.iter())
          {
            promise.open(tc_scope).reject(tc_scope, exception);
          }
        }
        continue;
      }

      if let ImportKind::Dynamic(main_promise) = graph.kind.clone() {
        // Dynamic imports resolve with the module's namespace object.
        let namespace = module.get_module_namespace();
        for promise in [main_promise].iter().chain(graph.same_origin.iter()) {
          promise.open(tc_scope).resolve(tc_scope, namespace);
        }
      }
    }

    // Let promise reactions scheduled by settled imports run.
    run_next_tick_callbacks(scope);
  }

  /// Returns if unhandled promise rejections were caught.
  pub fn has_promise_rejections(&mut self) -> bool {
    self.get_state().borrow().exceptions.has_promise_rejection()
  }

  /// Returns if we have imports in pending state.
  pub fn has_pending_imports(&mut self) -> bool {
    self.get_state().borrow().module_map.has_pending_imports()
  }

  /// Returns if we have scheduled any next-tick callbacks.
  pub fn has_next_tick_callbacks(&mut self) -> bool {
    !self.get_state().borrow().next_tick_queue.is_empty()
  }

  /// Returns if native completions are still queued.
  pub fn has_pending_futures(&mut self) -> bool {
    !self.get_state().borrow().pending_futures.is_empty()
  }
}

// State management specific methods.
impl JsRuntime {
  /// Returns the runtime state stored in the given isolate.
  pub fn state(isolate: &v8::Isolate) -> Rc<RefCell<JsRuntimeState>> {
    isolate
      .get_slot::<Rc<RefCell<JsRuntimeState>>>()
      .unwrap()
      .clone()
  }

  /// Returns the runtime's state.
  pub fn get_state(&self) -> Rc<RefCell<JsRuntimeState>> {
    Self::state(&self.isolate)
  }

  /// Returns a v8 handle scope for the runtime.
  pub fn handle_scope(&mut self) -> v8::HandleScope {
    let context = self.context();
    v8::HandleScope::with_context(&mut self.isolate, context)
  }

  /// Returns the context created for the runtime.
  pub fn context(&mut self) -> v8::Global<v8::Context> {
    let state = self.get_state();
    let state = state.borrow();
    state.context.clone()
  }
}

/// Drains the next-tick queue, then performs a microtask checkpoint.
/// Microtasks enqueued by a next-tick callback run before the next one.
pub fn run_next_tick_callbacks(scope: &mut v8::HandleScope) {
  let state_rc = JsRuntime::state(scope);

  let tc_scope = &mut v8::TryCatch::new(scope);
  tc_scope.perform_microtask_checkpoint();

  loop {
    let callbacks: Vec<NextTickEntry> = {
      let mut state = state_rc.borrow_mut();
      state.next_tick_queue.drain(..).collect()
    };
    if callbacks.is_empty() {
      break;
    }

    let undefined = v8::undefined(tc_scope);
    for (cb, params) in callbacks {
      let cb = v8::Local::new(tc_scope, cb);
      let args: Vec<v8::Local<v8::Value>> = params
        .iter()
        .map(|arg| v8::Local::new(tc_scope, arg))
        .collect();

      cb.call(tc_scope, undefined.into(), &args);

      if tc_scope.has_caught() {
        let exception = tc_scope.exception().unwrap();
        let exception = v8::Global::new(tc_scope, exception);
        state_rc.borrow_mut().exceptions.capture_exception(exception);
        tc_scope.reset();
      }

      tc_scope.perform_microtask_checkpoint();
    }
  }
}

/// Returns an error if an uncaught exception or unhandled rejection must
/// take the process down; invokes the JS capture hooks when installed.
pub fn check_exceptions(scope: &mut v8::HandleScope) -> Option<JsError> {
  let state_rc = JsRuntime::state(scope);
  let maybe_exception = state_rc.borrow_mut().exceptions.exception.take();

  // Check for uncaught exceptions first.
  if let Some(exception) = maybe_exception {
    let state = state_rc.borrow();
    let exception = v8::Local::new(scope, exception);
    if let Some(callback) = state.exceptions.uncaught_exception_cb.as_ref() {
      let callback = v8::Local::new(scope, callback);
      let undefined = v8::undefined(scope).into();
      let origin = v8::String::new(scope, "uncaughtException").unwrap();
      let tc_scope = &mut v8::TryCatch::new(scope);
      drop(state);

      callback.call(tc_scope, undefined, &[exception, origin.into()]);

      // If the capture hook itself throws, that error is final.
      if tc_scope.has_caught() {
        let exception = tc_scope.exception().unwrap();
        let exception = v8::Local::new(tc_scope, exception);
        return Some(JsError::from_v8_exception(tc_scope, exception, None));
      }

      return None;
    }

    let error = JsError::from_v8_exception(scope, exception, None);
    return Some(error);
  }

  let promise_rejections: Vec<_> = state_rc
    .borrow_mut()
    .exceptions
    .promise_rejections
    .drain(..)
    .collect();

  // Then, check for unhandled rejections.
  for (promise, exception) in promise_rejections.iter() {
    let state = state_rc.borrow_mut();
    let promise = v8::Local::new(scope, promise);
    let exception = v8::Local::new(scope, exception);

    if let Some(callback) = state.exceptions.unhandled_rejection_cb.as_ref() {
      let callback = v8::Local::new(scope, callback);
      let undefined = v8::undefined(scope).into();
      let tc_scope = &mut v8::TryCatch::new(scope);
      drop(state);

      callback.call(tc_scope, undefined, &[exception, promise.into()]);

      if tc_scope.has_caught() {
        let exception = tc_scope.exception().unwrap();
        let exception = v8::Local::new(tc_scope, exception);
        return Some(JsError::from_v8_exception(tc_scope, exception, None));
      }

      continue;
    }

    if let Some(callback) = state.exceptions.uncaught_exception_cb.as_ref() {
      let callback = v8::Local::new(scope, callback);
      let undefined = v8::undefined(scope).into();
      let origin = v8::String::new(scope, "unhandledRejection").unwrap();
      let tc_scope = &mut v8::TryCatch::new(scope);
      drop(state);

      callback.call(tc_scope, undefined, &[exception, origin.into()]);

      if tc_scope.has_caught() {
        let exception = tc_scope.exception().unwrap();
        let exception = v8::Local::new(tc_scope, exception);
        return Some(JsError::from_v8_exception(tc_scope, exception, None));
      }

      continue;
    }

    drop(state);
    let prefix = Some("(in promise) ");
    let error = JsError::from_v8_exception(scope, exception, prefix);

    return Some(error);
  }

  None
}

/// Reports an unhandled error to stderr and exits with a non-zero code.
pub fn report_and_exit(e: JsError) -> ! {
  error!("{e}");
  eprintln!("{e}");
  std::process::exit(1);
}
