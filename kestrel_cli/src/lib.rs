//! Common utils for the kestrel executable.

/// Builds the `--version` line from the workspace manifest.
pub fn version_line() -> String {
  let manifest = include_str!("../../Cargo.toml");
  let manifest = manifest.parse::<toml::Table>().ok();

  let v8_version = manifest
    .as_ref()
    .and_then(|table| table.get("workspace"))
    .and_then(|workspace| workspace.get("dependencies"))
    .and_then(|dependencies| dependencies.get("v8"))
    .and_then(|v8| v8.get("version"))
    .and_then(|version| version.as_str())
    .unwrap_or("unknown")
    .trim_start_matches('=')
    .to_string();

  format!("kestrel {} (v8 {})", env!("CARGO_PKG_VERSION"), v8_version)
}
