//! DNS binding: hostname lookup through the OS resolver.

use crate::js::binding::*;
use crate::js::{JsRuntime, enqueue_native};
use crate::prelude::*;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct LookupRecord {
  family: u8,
  address: String,
}

pub fn initialize<'s>(
  scope: &mut v8::HandleScope<'s>,
) -> v8::Local<'s, v8::Object> {
  let target = v8::Object::new(scope);
  set_function_to(scope, target, "lookup", lookup);
  target
}

/// `lookup(hostname) → promise<[{family, address}, …]>`.
fn lookup(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let hostname = args.get(0).to_rust_string_lossy(scope);

  let resolver = v8::PromiseResolver::new(scope).unwrap();
  let promise = resolver.get_promise(scope);
  let resolver = v8::Global::new(scope, resolver);

  let task = move || {
    let records = match dns_lookup::lookup_host(&hostname) {
      Ok(addresses) => addresses
        .into_iter()
        .map(|address| LookupRecord {
          family: if address.is_ipv4() { 4 } else { 6 },
          address: address.to_string(),
        })
        .collect::<Vec<_>>(),
      Err(e) => return Some(Err(e.into())),
    };
    Some(bincode::serialize(&records).map_err(AnyErr::from))
  };

  let state_rc = JsRuntime::state(scope);
  let task_cb = {
    let state_rc = state_rc.clone();
    move |result: crate::evloop::msg::TaskResult| {
      let mut state = state_rc.borrow_mut();
      enqueue_native(&mut state, move |scope| {
        let resolver = v8::Local::new(scope, resolver);
        match result.unwrap() {
          Ok(bytes) => {
            let records: Vec<LookupRecord> =
              bincode::deserialize(&bytes).unwrap_or_default();
            let array = v8::Array::new(scope, records.len() as i32);
            for (i, record) in records.iter().enumerate() {
              let entry = v8::Object::new(scope);
              let family = v8::Integer::new(scope, record.family as i32);
              set_property_to(scope, entry, "family", family.into());
              let address = v8::String::new(scope, &record.address).unwrap();
              set_property_to(scope, entry, "address", address.into());
              array.set_index(scope, i as u32, entry.into());
            }
            resolver.resolve(scope, array.into());
          }
          Err(e) => {
            let exception = any_error_value(scope, &e);
            resolver.reject(scope, exception);
          }
        }
      });
    }
  };

  let state = state_rc.borrow();
  state.handle.spawn(Box::new(task), Some(Box::new(task_cb)));
  rv.set(promise.into());
}
