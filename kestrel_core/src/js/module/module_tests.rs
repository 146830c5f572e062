use super::*;

#[test]
fn resolve_core_modules1() {
  for name in ["fs", "net", "http", "assert", "stream", "events", "util"] {
    assert_eq!(resolve_import(None, name, false).unwrap(), name);
  }
}

#[test]
fn resolve_unknown_bare1() {
  // `sqlite` has no storage engine here; unknown bare names fail alike.
  for name in ["sqlite", "left-pad", "some/package"] {
    let e = resolve_import(Some("/dev/app/main.js"), name, false).unwrap_err();
    assert!(e.to_string().contains("Cannot find module"));
  }
}

#[test]
fn resolve_remote_urls1() {
  let resolved =
    resolve_import(None, "http://example.com/x/mod.js", false).unwrap();
  assert_eq!(resolved, "http://example.com/x/mod.js");

  // Relative against a remote importer stays remote.
  let resolved = resolve_import(
    Some("http://example.com/x/mod.js"),
    "./dep.js",
    false,
  )
  .unwrap();
  assert_eq!(resolved, "http://example.com/x/dep.js");

  let resolved = resolve_import(
    Some("https://example.com/x/mod.js"),
    "../other/dep.js",
    false,
  )
  .unwrap();
  assert_eq!(resolved, "https://example.com/other/dep.js");
}

#[test]
fn resolve_file_urls1() {
  if cfg!(unix) {
    let resolved =
      resolve_import(None, "file:///dev/app/main.js", false).unwrap();
    assert_eq!(resolved, "/dev/app/main.js");
  }
}

#[test]
fn resolve_relative_paths1() {
  if cfg!(unix) {
    let resolved =
      resolve_import(Some("/dev/app/main.js"), "./lib/dep.js", false).unwrap();
    assert_eq!(resolved, "/dev/app/lib/dep.js");
  }
}

#[test]
fn core_module_table1() {
  // The builtin table carries the documented bare names and no `sqlite`.
  let table = CORE_MODULES();
  for name in
    ["fs", "net", "http", "assert", "stream", "events", "perf_hooks", "dns", "colors", "test", "util"]
  {
    assert!(table.contains_key(name), "missing builtin {name}");
  }
  assert!(!table.contains_key("sqlite"));
}
