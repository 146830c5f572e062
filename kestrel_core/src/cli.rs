//! Command line options.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(
  name = "kestrel",
  about = "Kestrel is a small server-side JavaScript runtime",
  disable_version_flag = true
)]
/// Command line options.
pub struct CliOptions {
  /// Entry module, a file path or an `http(s)://` URL.
  pub script: Option<String>,

  /// Arguments passed through to `process.argv`.
  #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
  pub args: Vec<String>,

  /// Reload every URL import, ignoring the local cache.
  #[arg(short = 'r', long = "reload")]
  pub reload: bool,

  /// Flags passed straight to the V8 engine.
  #[arg(long = "v8-flags", value_delimiter = ',')]
  pub v8_flags: Vec<String>,

  /// Print version.
  #[arg(short = 'V', long = "version")]
  pub version: bool,
}

impl CliOptions {
  /// Creates empty cli options, mostly for testing.
  pub fn empty() -> Self {
    CliOptions {
      script: None,
      args: vec![],
      reload: false,
      v8_flags: vec![],
      version: false,
    }
  }

  /// The current executable path, first entry of `process.argv`.
  pub fn exec_path() -> String {
    std::env::current_exe()
      .map(PathBuf::into_os_string)
      .map(|s| s.into_string().unwrap_or_default())
      .unwrap_or_else(|_| "kestrel".to_string())
  }
}

#[cfg(test)]
mod cli_tests {
  use super::*;

  #[test]
  fn parse1() {
    let opts =
      CliOptions::parse_from(["kestrel", "main.js", "--port", "8080"]);
    assert_eq!(opts.script, Some("main.js".to_string()));
    assert_eq!(opts.args, vec!["--port".to_string(), "8080".to_string()]);
    assert!(!opts.reload);
  }

  #[test]
  fn parse2() {
    let opts = CliOptions::parse_from(["kestrel", "-r", "main.js"]);
    assert!(opts.reload);
    assert_eq!(opts.script, Some("main.js".to_string()));
  }
}
