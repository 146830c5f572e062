//! A single ES module inside a module graph, plus the future that drives its
//! asynchronous loading.

use crate::js::err::JsError;
use crate::js::module::{
  ModulePath, ModuleStatus, create_origin, load_import, resolve_import,
};
use crate::js::{JsFuture, JsRuntime};
use crate::prelude::*;

use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug)]
/// ES module.
pub struct EsModule {
  /// Resolved module path (the cache key).
  pub path: ModulePath,
  /// Module import status.
  pub status: ModuleStatus,
  /// The module's direct dependencies.
  pub dependencies: Vec<EsModuleRc>,
  /// First load/compile error of the graph, shared across its modules.
  pub exception: Rc<RefCell<Option<String>>>,
  /// Whether this module belongs to a dynamic import.
  pub is_dynamic_import: bool,
}

pub type EsModuleRc = Rc<RefCell<EsModule>>;

impl EsModule {
  pub fn new(
    path: ModulePath,
    status: ModuleStatus,
    is_dynamic_import: bool,
  ) -> Self {
    Self {
      path,
      status,
      dependencies: vec![],
      exception: Rc::new(RefCell::new(None)),
      is_dynamic_import,
    }
  }

  pub fn to_rc(module: EsModule) -> EsModuleRc {
    Rc::new(RefCell::new(module))
  }

  /// Traverses the dependency tree and promotes this module to `Ready` once
  /// every dependency is.
  pub fn fast_forward(
    &mut self,
    seen_modules: &mut HashMap<ModulePath, ModuleStatus>,
  ) {
    // If the module is ready, no need to check the sub-tree.
    if self.status == ModuleStatus::Ready {
      return;
    }

    // A duplicate module tracks the status of its first occurrence.
    if self.status == ModuleStatus::Duplicate {
      if seen_modules.get(&self.path) == Some(&ModuleStatus::Ready) {
        self.status = ModuleStatus::Ready;
      }
      return;
    }

    // Fast-forward all dependencies.
    self
      .dependencies
      .iter_mut()
      .for_each(|dep| dep.borrow_mut().fast_forward(seen_modules));

    // The module is compiled and has 0 dependencies.
    if self.dependencies.is_empty() && self.status == ModuleStatus::Resolving {
      self.status = ModuleStatus::Ready;
      seen_modules.insert(self.path.clone(), self.status);
      return;
    }

    // At this point, the module itself is still being fetched.
    if self.dependencies.is_empty() {
      return;
    }

    if self
      .dependencies
      .iter()
      .all(|dep| dep.borrow().status == ModuleStatus::Ready)
    {
      self.status = ModuleStatus::Ready;
      seen_modules.insert(self.path.clone(), self.status);
    }
  }
}

/// Completion of a worker-pool module fetch: compiles the source and
/// schedules loads for newly discovered dependencies.
pub struct EsModuleFuture {
  pub path: ModulePath,
  pub module: EsModuleRc,
  pub maybe_source: crate::evloop::msg::TaskResult,
}

impl EsModuleFuture {
  /// Handles a failed import. Dynamic graphs record the exception so their
  /// promises reject; a broken static graph is fatal.
  fn handle_failure(&mut self, e: AnyErr) {
    let module = self.module.borrow();
    if module.is_dynamic_import {
      module.exception.borrow_mut().replace(e.to_string());
      return;
    }

    eprintln!("{e}");
    std::process::exit(1);
  }
}

impl JsFuture for EsModuleFuture {
  fn run(&mut self, scope: &mut v8::HandleScope) {
    let state_rc = JsRuntime::state(scope);
    let mut state = state_rc.borrow_mut();

    // If the graph already failed, stop resolving the current sub-tree.
    if self.module.borrow().exception.borrow().is_some() {
      state.module_map.seen.remove(&self.path);
      return;
    }

    let source = self.maybe_source.take().unwrap();
    let source = match source {
      Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
      Err(e) => {
        drop(state);
        self.handle_failure(e);
        return;
      }
    };

    let tc_scope = &mut v8::TryCatch::new(scope);
    let origin = create_origin(tc_scope, &self.path, true);

    // Compile the source and extract its dependencies.
    let source = v8::String::new(tc_scope, &source).unwrap();
    let mut source = v8::script_compiler::Source::new(source, Some(&origin));

    let module = match v8::script_compiler::compile_module(tc_scope, &mut source)
    {
      Some(module) => module,
      None => {
        assert!(tc_scope.has_caught());
        let exception = tc_scope.exception().unwrap();
        let exception = JsError::from_v8_exception(tc_scope, exception, None);
        let exception =
          format!("{} ({})", exception.message, exception.resource_name);
        drop(state);
        self.handle_failure(AnyErr::msg(exception));
        return;
      }
    };

    let module_ref = v8::Global::new(tc_scope, module);
    state.module_map.insert(self.path.as_str(), module_ref);
    state
      .module_map
      .seen
      .insert(self.path.clone(), ModuleStatus::Resolving);

    let skip_cache = state.options.reload;
    let mut dependencies = vec![];

    let requests = module.get_module_requests();
    let base = self.path.clone();

    for i in 0..requests.length() {
      // Get import request from the `module_requests` array.
      let request = requests.get(tc_scope, i).unwrap();
      let request = v8::Local::<v8::ModuleRequest>::try_from(request).unwrap();

      let specifier = request.get_specifier().to_rust_string_lossy(tc_scope);
      let specifier =
        match resolve_import(Some(base.as_str()), &specifier, false) {
          Ok(specifier) => specifier,
          Err(e) => {
            drop(state);
            self.handle_failure(e);
            return;
          }
        };

      // Modules compiled outside this graph (bootstrap, static entry) are
      // already done; only in-flight ones go through the seen table.
      if state.module_map.contains(&specifier)
        && !state.module_map.seen.contains_key(&specifier)
      {
        continue;
      }

      // Check if the requested module has been seen already.
      let seen_module = state.module_map.seen.get(&specifier);
      let status = match seen_module {
        Some(ModuleStatus::Ready) => continue,
        Some(_) => ModuleStatus::Duplicate,
        None => ModuleStatus::Fetching,
      };

      let dependency = Rc::new(RefCell::new(EsModule {
        path: specifier.clone(),
        status,
        dependencies: vec![],
        exception: Rc::clone(&self.module.borrow().exception),
        is_dynamic_import: self.module.borrow().is_dynamic_import,
      }));

      dependencies.push(Rc::clone(&dependency));

      // A newly seen module gets its own worker-pool load.
      if seen_module.is_none() {
        state.module_map.seen.insert(specifier.clone(), status);

        let task = {
          let specifier = specifier.clone();
          move || Some(load_import(&specifier, skip_cache).map(String::into_bytes))
        };

        let task_cb = {
          let state_rc = state_rc.clone();
          move |maybe_result: crate::evloop::msg::TaskResult| {
            let future = EsModuleFuture {
              path: specifier,
              module: dependency,
              maybe_source: maybe_result,
            };
            state_rc.borrow_mut().pending_futures.push(Box::new(future));
          }
        };

        state
          .handle
          .spawn(Box::new(task), Some(Box::new(task_cb)));
      }
    }

    self.module.borrow_mut().status = ModuleStatus::Resolving;
    self.module.borrow_mut().dependencies = dependencies;
  }
}
