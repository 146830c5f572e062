//! End-to-end scenarios: each test runs a script on a full runtime (engine,
//! event loop, bindings) and asserts on its filesystem side effects.

use kestrel_core::js::{JsRuntime, JsRuntimeOptions};

use assert_fs::TempDir;
use assert_fs::prelude::*;

/// Writes `source` as the entry module, runs it to completion and returns
/// the contents of the output file the script wrote (passed as argv[2]).
fn run_script(source: &str) -> String {
  let temp_dir = TempDir::new().unwrap();
  let main = temp_dir.child("main.js");
  main.write_str(source).unwrap();
  let out = temp_dir.child("out.json");

  let options = JsRuntimeOptions {
    exec_path: "kestrel".to_string(),
    script: Some(main.path().to_string_lossy().into_owned()),
    args: vec![out.path().to_string_lossy().into_owned()],
    reload: false,
    v8_flags: vec![],
  };

  let mut runtime = JsRuntime::new(options).unwrap();
  let entry = main.path().to_string_lossy().into_owned();
  runtime.execute_module(&entry, None).unwrap();
  runtime.run_event_loop();

  std::fs::read_to_string(out.path()).expect("script wrote no output")
}

#[test]
fn timer_ordering1() {
  // Microtask, then nextTick, then same-tick immediate, then the timer.
  let out = run_script(
    r#"
import { writeFileSync } from 'fs';

const order = [];
setTimeout(() => {
  order.push('A');
  writeFileSync(process.argv[2], JSON.stringify(order));
}, 50);
setImmediate(() => order.push('B'));
queueMicrotask(() => order.push('C'));
process.nextTick(() => order.push('D'));
"#,
  );
  assert_eq!(out, r#"["C","D","B","A"]"#);
}

#[test]
fn interval_cancellation1() {
  let out = run_script(
    r#"
import { writeFileSync } from 'fs';

let count = 0;
const id = setInterval(() => {
  count += 1;
}, 10);
setTimeout(() => {
  clearInterval(id);
  // Idempotent: clearing again is a no-op.
  clearInterval(id);
  writeFileSync(process.argv[2], String(count));
}, 35);
"#,
  );
  assert_eq!(out, "3");
}

#[test]
fn zero_delay_keeps_floor1() {
  // setTimeout(f, 0) never runs in the current tick.
  let out = run_script(
    r#"
import { writeFileSync } from 'fs';

const order = [];
setTimeout(() => {
  order.push('timer');
  writeFileSync(process.argv[2], JSON.stringify(order));
}, 0);
order.push('sync');
"#,
  );
  assert_eq!(out, r#"["sync","timer"]"#);
}

#[test]
fn module_dedup_under_concurrent_import1() {
  let temp_dir = TempDir::new().unwrap();
  let counter = temp_dir.child("counter.js");
  counter
    .write_str("globalThis.__count = (globalThis.__count || 0) + 1;\nexport default 1;\n")
    .unwrap();
  let main = temp_dir.child("main.js");
  main
    .write_str(
      r#"
import { writeFileSync } from 'fs';

const [a, b] = await Promise.all([import('./counter.js'), import('./counter.js')]);
writeFileSync(
  process.argv[2],
  JSON.stringify({ count: globalThis.__count, same: a === b }),
);
"#,
    )
    .unwrap();
  let out = temp_dir.child("out.json");

  let options = JsRuntimeOptions {
    exec_path: "kestrel".to_string(),
    script: Some(main.path().to_string_lossy().into_owned()),
    args: vec![out.path().to_string_lossy().into_owned()],
    reload: false,
    v8_flags: vec![],
  };

  let mut runtime = JsRuntime::new(options).unwrap();
  let entry = main.path().to_string_lossy().into_owned();
  runtime.execute_module(&entry, None).unwrap();
  runtime.run_event_loop();

  let written = std::fs::read_to_string(out.path()).unwrap();
  assert_eq!(written, r#"{"count":1,"same":true}"#);
}

#[test]
fn tcp_echo1() {
  // One connection; the peer echoes; the client gets its bytes back intact.
  let out = run_script(
    r#"
import { createServer, createConnection } from 'net';
import { writeFileSync } from 'fs';

const server = createServer(async (socket) => {
  for await (const chunk of socket) {
    await socket.write(chunk);
  }
  await socket.end();
  await socket.destroy();
});
server.listen(0, '127.0.0.1');
const { port } = server.address();

const client = await createConnection({ port, host: '127.0.0.1' });
const payload = new Uint8Array(256).map((_, i) => i);
const written = await client.write(payload);
await client.end();

const received = [];
for await (const chunk of client) {
  received.push(...chunk);
}
await client.destroy();
await server.close();

const intact =
  received.length === 256 && received.every((byte, i) => byte === i);
writeFileSync(process.argv[2], JSON.stringify({ written, intact }));
"#,
  );
  assert_eq!(out, r#"{"written":256,"intact":true}"#);
}

#[test]
fn http_get_roundtrip1() {
  let out = run_script(
    r#"
import { createServer, request } from 'http';
import { writeFileSync } from 'fs';

const server = createServer(async (req, res) => {
  res.writeHead(200, { 'content-type': 'application/json' });
  await res.end('{"ok":true}');
});
server.listen(0, '127.0.0.1');
const { port } = server.address();

const response = await request(`http://127.0.0.1:${port}/`, {
  throwOnError: true,
});
const body = await response.json();
await server.close();

writeFileSync(
  process.argv[2],
  JSON.stringify({ status: response.status, ok: body.ok }),
);
"#,
  );
  assert_eq!(out, r#"{"status":200,"ok":true}"#);
}

#[test]
fn http_abort1() {
  // Aborting the signal tears the socket down and rejects promptly.
  let out = run_script(
    r#"
import { request } from 'http';
import { createServer } from 'net';
import { writeFileSync } from 'fs';

const server = createServer(() => {});
server.listen(0, '127.0.0.1');
const { port } = server.address();

const controller = new AbortController();
setTimeout(() => controller.abort('x'), 10);

const started = performance.now();
let outcome;
try {
  await request(`http://127.0.0.1:${port}/`, { signal: controller.signal });
  outcome = { aborted: false };
} catch (error) {
  outcome = {
    aborted: true,
    name: error.name,
    reason: error.reason,
    fast: performance.now() - started < 500,
  };
}
await server.close();
writeFileSync(process.argv[2], JSON.stringify(outcome));
"#,
  );
  assert_eq!(
    out,
    r#"{"aborted":true,"name":"AbortError","reason":"x","fast":true}"#
  );
}

#[test]
fn destroy_during_connect_carries_reason1() {
  // Destroying a socket while its dial is in flight rejects the pending
  // connect with the destroy reason, not a generic close error.
  let out = run_script(
    r#"
import { Socket, createServer } from 'net';
import { writeFileSync } from 'fs';

const server = createServer(() => {});
server.listen(0, '127.0.0.1');
const { port } = server.address();

const socket = new Socket();
const pending = socket.connect(port, '127.0.0.1');

const boom = new Error('x');
boom.name = 'AbortError';
await socket.destroy(boom);

const outcome = await pending.then(
  () => ({ rejected: false }),
  (error) => ({
    rejected: true,
    name: error.name,
    message: error.message,
  }),
);
await server.close();
writeFileSync(process.argv[2], JSON.stringify(outcome));
"#,
  );
  assert_eq!(out, r#"{"rejected":true,"name":"AbortError","message":"x"}"#);
}

#[test]
fn socket_reusable_after_refused_dial1() {
  // A refused dial resets the socket so a later connect can succeed.
  let out = run_script(
    r#"
import { Socket, createServer } from 'net';
import { writeFileSync } from 'fs';

const socket = new Socket();
const error = await socket
  .connect(1, '127.0.0.1')
  .then(() => null, (e) => e);

const server = createServer(() => {});
server.listen(0, '127.0.0.1');
await socket.connect(server.address().port, '127.0.0.1');
const reconnected = socket.connected;

await socket.destroy();
await server.close();
writeFileSync(
  process.argv[2],
  JSON.stringify({ refused: error !== null && error.code === 'ECONNREFUSED', reconnected }),
);
"#,
  );
  assert_eq!(out, r#"{"refused":true,"reconnected":true}"#);
}

#[test]
fn structured_clone_roundtrip1() {
  // JSON-expressible values round-trip structurally.
  let out = run_script(
    r#"
import { deepEqual } from 'assert';
import { writeFileSync } from 'fs';

const value = {
  n: 1.5,
  s: 'text',
  b: true,
  z: null,
  list: [1, 'two', { three: 3 }],
  nested: { deep: { deeper: [null, false] } },
};
const cloned = structuredClone(value);
deepEqual(cloned, value);

// Cycles survive a non-json clone.
const cyclic = { name: 'root' };
cyclic.self = cyclic;
const clonedCyclic = structuredClone(cyclic);

writeFileSync(
  process.argv[2],
  JSON.stringify({
    distinct: cloned !== value,
    cyclic: clonedCyclic.self === clonedCyclic,
  }),
);
"#,
  );
  assert_eq!(out, r#"{"distinct":true,"cyclic":true}"#);
}

#[test]
fn fs_roundtrip1() {
  let out = run_script(
    r#"
import fs from 'fs';
import { writeFileSync } from 'fs';

const dir = process.argv[2] + '.d';
fs.mkdirSync(dir, { recursive: true });
await fs.writeFile(`${dir}/data.txt`, 'hello kestrel');
const text = await fs.readFile(`${dir}/data.txt`, 'utf-8');
const stat = await fs.stat(`${dir}/data.txt`);
await fs.copyFile(`${dir}/data.txt`, `${dir}/copy.txt`);
const copy = fs.readFileSync(`${dir}/copy.txt`, 'utf-8');

writeFileSync(
  process.argv[2],
  JSON.stringify({
    text,
    copy,
    size: stat.size,
    isFile: stat.isFile,
  }),
);
"#,
  );
  assert_eq!(
    out,
    r#"{"text":"hello kestrel","copy":"hello kestrel","size":13,"isFile":true}"#
  );
}

#[test]
fn dns_lookup_localhost1() {
  let out = run_script(
    r#"
import { lookup } from 'dns';
import { writeFileSync } from 'fs';

const records = await lookup('localhost');
const ok =
  records.length > 0 &&
  records.every(
    (record) =>
      (record.family === 4 || record.family === 6) &&
      typeof record.address === 'string',
  );
writeFileSync(process.argv[2], JSON.stringify({ ok }));
"#,
  );
  assert_eq!(out, r#"{"ok":true}"#);
}

#[test]
fn unknown_module_fails1() {
  let temp_dir = TempDir::new().unwrap();
  let main = temp_dir.child("main.js");
  main.write_str("import 'left-pad';\n").unwrap();

  let options = JsRuntimeOptions {
    exec_path: "kestrel".to_string(),
    script: Some(main.path().to_string_lossy().into_owned()),
    args: vec![],
    reload: false,
    v8_flags: vec![],
  };

  let mut runtime = JsRuntime::new(options).unwrap();
  let entry = main.path().to_string_lossy().into_owned();
  let error = runtime.execute_module(&entry, None).unwrap_err();
  assert!(error.to_string().contains("Cannot find module"));
}
