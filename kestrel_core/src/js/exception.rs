//! Uncaught exception and unhandled rejection bookkeeping.

/// A rejected promise with no handler, paired with its rejection value.
pub type PromiseRejectionEntry =
  (v8::Global<v8::Promise>, v8::Global<v8::Value>);

/// Captures exceptions between the point where v8 reports them and the
/// drain boundary where the runtime decides what to do: invoke the JS
/// capture hooks (`process.on('uncaughtException')` and friends) or report
/// and exit.
#[derive(Default)]
pub struct ExceptionState {
  /// The first uncaught exception of the current drain, if any.
  pub exception: Option<v8::Global<v8::Value>>,
  /// Rejections still unhandled; handlers attached later remove entries.
  pub promise_rejections: Vec<PromiseRejectionEntry>,
  pub uncaught_exception_cb: Option<v8::Global<v8::Function>>,
  pub unhandled_rejection_cb: Option<v8::Global<v8::Function>>,
}

impl ExceptionState {
  pub fn new() -> Self {
    ExceptionState::default()
  }

  /// Records an uncaught exception. The first one wins: the process is
  /// going down anyway unless a capture callback is installed.
  pub fn capture_exception(&mut self, exception: v8::Global<v8::Value>) {
    if self.exception.is_none() {
      self.exception = Some(exception);
    }
  }

  pub fn capture_promise_rejection(
    &mut self,
    promise: v8::Global<v8::Promise>,
    reason: v8::Global<v8::Value>,
  ) {
    // A promise can only sit in the ledger once.
    if !self.promise_rejections.iter().any(|(p, _)| *p == promise) {
      self.promise_rejections.push((promise, reason));
    }
  }

  /// A rejection handler was attached after the fact.
  pub fn remove_promise_rejection(&mut self, promise: &v8::Global<v8::Promise>) {
    self.promise_rejections.retain(|(p, _)| p != promise);
  }

  /// Removes ledger entries whose rejection value is `exception`; used when
  /// a module evaluation error was already captured through another path.
  pub fn remove_promise_rejection_entry(
    &mut self,
    exception: &v8::Global<v8::Value>,
  ) {
    self.promise_rejections.retain(|(_, value)| value != exception);
  }

  pub fn has_promise_rejection(&self) -> bool {
    !self.promise_rejections.is_empty()
  }
}
