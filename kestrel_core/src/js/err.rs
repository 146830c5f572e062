//! JavaScript error representation.

use std::fmt;

/// A v8 exception lifted into Rust: message, origin and stack, used for
/// diagnostics and for the final stderr report on uncaught errors.
#[derive(Debug, Clone)]
pub struct JsError {
  pub message: String,
  pub resource_name: String,
  pub source_line: Option<String>,
  pub line_number: Option<i64>,
  pub column_number: Option<i64>,
  pub stack: Option<String>,
}

impl JsError {
  /// Builds a [`JsError`] from a caught v8 exception. `prefix` tags the
  /// message origin (e.g. `"(in promise) "` for unhandled rejections).
  pub fn from_v8_exception<'a>(
    scope: &mut v8::HandleScope<'a>,
    exception: v8::Local<'a, v8::Value>,
    prefix: Option<&str>,
  ) -> Self {
    let message = v8::Exception::create_message(scope, exception);
    let mut message_text = message.get(scope).to_rust_string_lossy(scope);

    // "Uncaught Error: foo" reads better than v8's bare "Error: foo".
    if let Some(prefix) = prefix {
      message_text = format!("{prefix}{message_text}");
    }

    let resource_name = message
      .get_script_resource_name(scope)
      .map(|name| name.to_rust_string_lossy(scope))
      .unwrap_or_else(|| "<anonymous>".to_string());

    let source_line = message
      .get_source_line(scope)
      .map(|line| line.to_rust_string_lossy(scope));

    let line_number = message
      .get_line_number(scope)
      .map(|line| line as i64);

    let column_number = Some(message.get_start_column() as i64);

    // The `stack` property of Error objects, when present.
    let stack = exception
      .to_object(scope)
      .and_then(|obj| {
        let key = v8::String::new(scope, "stack").unwrap();
        obj.get(scope, key.into())
      })
      .filter(|stack| stack.is_string())
      .map(|stack| stack.to_rust_string_lossy(scope));

    JsError {
      message: message_text,
      resource_name,
      source_line,
      line_number,
      column_number,
      stack,
    }
  }
}

impl fmt::Display for JsError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.stack.as_ref() {
      Some(stack) => write!(f, "Uncaught {stack}"),
      None => {
        write!(f, "Uncaught {}", self.message)?;
        if let Some(line) = self.line_number {
          write!(f, "\n    at {}:{}", self.resource_name, line)?;
        }
        Ok(())
      }
    }
  }
}

impl std::error::Error for JsError {}
