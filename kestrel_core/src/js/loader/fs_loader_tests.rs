use super::fs_loader::FsModuleLoader;
use crate::js::loader::ModuleLoader;

use assert_fs::prelude::*;
use std::fs;
use std::path::Path;

#[test]
fn resolve1() {
  let tests = vec![
    (None, "/dev/core/tests/005_more_imports.js", "/dev/core/tests/005_more_imports.js"),
    (
      Some("/dev/core/tests/005_more_imports.js"),
      "./006_more_imports.js",
      "/dev/core/tests/006_more_imports.js",
    ),
    (
      Some("/dev/core/tests/005_more_imports.js"),
      "../006_more_imports.js",
      "/dev/core/006_more_imports.js",
    ),
    (
      Some("/dev/core/tests/005_more_imports.js"),
      "/dev/core/tests/006_more_imports.js",
      "/dev/core/tests/006_more_imports.js",
    ),
    (
      Some("/dev/core/tests/005_more_imports.js"),
      "./006_more_imports",
      "/dev/core/tests/006_more_imports",
    ),
  ];

  let loader = FsModuleLoader {};
  for (base, specifier, expect) in tests {
    let actual = loader.resolve(base, specifier).unwrap();
    if cfg!(target_os = "windows") {
      assert!(actual == expect || actual.ends_with(&expect.replace("/", "\\")));
    } else {
      assert!(actual == expect || actual.ends_with(expect));
    }
  }
}

#[test]
fn resolve_bare_fails1() {
  let loader = FsModuleLoader {};
  assert!(loader.resolve(None, "left-pad").is_err());
  assert!(loader.resolve(Some("/dev/a.js"), "left-pad").is_err());
}

#[test]
fn load1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();

  let src: &str = r#"
      export function sayHello() {
          console.log('Hello, World!');
      }
  "#;

  let source_files = [
    "./core/tests/005_more_imports.js",
    "./core/tests/006_more_imports/index.js",
  ];

  // Create source files.
  source_files.iter().for_each(|file| {
    let path = Path::new(file);
    let path = temp_dir.child(path);

    path.touch().unwrap();
    fs::write(path, src).unwrap();
  });

  // Extension probing and index resolution.
  let tests = vec![
    "./core/tests/005_more_imports",
    "./core/tests/005_more_imports.js",
    "./core/tests/006_more_imports/",
    "./core/tests/006_more_imports",
  ];

  let loader = FsModuleLoader {};
  for test in tests {
    let path = temp_dir.path().join(test);
    let source = loader.load(&path.to_string_lossy()).unwrap();
    assert_eq!(source, src);
  }
}

#[test]
fn load_json1() {
  let temp_dir = assert_fs::TempDir::new().unwrap();
  let path = temp_dir.child("config.json");
  path.touch().unwrap();
  fs::write(&path, r#"{"ok": true}"#).unwrap();

  let loader = FsModuleLoader {};
  let source = loader.load(&path.to_string_lossy()).unwrap();
  assert!(source.starts_with("export default JSON.parse("));
  assert!(source.contains("ok"));
}

#[test]
fn load_missing1() {
  let loader = FsModuleLoader {};
  assert!(loader.load("/definitely/not/here.js").is_err());
}
