//! Errors and results.

/// [`anyhow::Error`].
pub type AnyErr = anyhow::Error;

/// [`anyhow::Result`] with `T` if ok, [`AnyErr`] if error.
pub type AnyResult<T> = anyhow::Result<T>;

/// [`std::io::Result`] with `T` if ok.
pub type IoResult<T> = std::io::Result<T>;

/// Typed core errors.
///
/// Every variant maps to a structured JS error with a `code` property, see
/// [`error_code`] and the exception helpers in `js::binding`.
#[derive(Debug, thiserror::Error)]
pub enum CoreErr {
  #[error("Cannot find module {specifier:?} imported from {base:?}")]
  ModuleNotFound { specifier: String, base: String },

  #[error("Failed to fetch module {specifier:?}: {reason}")]
  ModuleFetchFailed { specifier: String, reason: String },

  #[error("{0}")]
  Message(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

impl CoreErr {
  /// The structured error code attached to JS exceptions.
  pub fn code(&self) -> &'static str {
    match self {
      CoreErr::ModuleNotFound { .. } => "ERR_MODULE_NOT_FOUND",
      CoreErr::ModuleFetchFailed { .. } => "ERR_MODULE_FETCH",
      CoreErr::Message(_) => "ERR_INTERNAL",
      CoreErr::Io(e) => error_code(e),
    }
  }
}

/// Maps an [`std::io::Error`] to its POSIX-style code string.
pub fn error_code(e: &std::io::Error) -> &'static str {
  use std::io::ErrorKind;
  match e.kind() {
    ErrorKind::NotFound => "ENOENT",
    ErrorKind::PermissionDenied => "EACCES",
    ErrorKind::ConnectionRefused => "ECONNREFUSED",
    ErrorKind::ConnectionReset => "ECONNRESET",
    ErrorKind::ConnectionAborted => "ECONNABORTED",
    ErrorKind::NotConnected => "ENOTCONN",
    ErrorKind::AddrInUse => "EADDRINUSE",
    ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL",
    ErrorKind::BrokenPipe => "EPIPE",
    ErrorKind::AlreadyExists => "EEXIST",
    ErrorKind::WouldBlock => "EAGAIN",
    ErrorKind::InvalidInput => "EINVAL",
    ErrorKind::TimedOut => "ETIMEDOUT",
    ErrorKind::Interrupted => "EINTR",
    ErrorKind::UnexpectedEof => "EOF",
    ErrorKind::DirectoryNotEmpty => "ENOTEMPTY",
    ErrorKind::NotADirectory => "ENOTDIR",
    ErrorKind::IsADirectory => "EISDIR",
    _ => "EIO",
  }
}
