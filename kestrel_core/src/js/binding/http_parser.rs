//! HTTP/1.1 parser binding.
//!
//! Incremental parsing of request/response streams into events the JS http
//! module consumes. The header and chunk-size grammars come from `httparse`;
//! the framing state machine around them lives here. Parser records share
//! the handle ID space but are bridge-owned: `parserWrite` is synchronous,
//! the loop never services them.

use crate::js::binding::*;
use crate::js::JsRuntime;

const MAX_HEADERS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
  Request,
  Response,
}

#[derive(Debug)]
enum Stage {
  Headers,
  BodyLength { remaining: u64 },
  ChunkSize,
  ChunkData { remaining: u64 },
  ChunkCrlf,
  Trailers,
  BodyUntilClose,
}

/// A parsed message head.
#[derive(Debug, Default)]
pub struct MessageHead {
  pub method: Option<String>,
  pub url: Option<String>,
  pub status: Option<u16>,
  pub reason: Option<String>,
  pub version_minor: u8,
  pub headers: Vec<(String, String)>,
}

impl MessageHead {
  fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(key, _)| key.eq_ignore_ascii_case(name))
      .map(|(_, value)| value.as_str())
  }
}

#[derive(Debug)]
pub enum ParserEvent {
  Headers(MessageHead),
  Body(Vec<u8>),
  End,
}

/// Incremental HTTP/1.1 message parser.
pub struct HttpParser {
  kind: ParserKind,
  stage: Stage,
  buf: Vec<u8>,
}

impl HttpParser {
  pub fn new(kind: ParserKind) -> Self {
    HttpParser {
      kind,
      stage: Stage::Headers,
      buf: Vec::new(),
    }
  }

  /// Feeds a chunk and returns the parse events it completes. After an `End`
  /// the parser resets to expect the next message on the same connection.
  pub fn write(&mut self, data: &[u8]) -> Result<Vec<ParserEvent>, String> {
    self.buf.extend_from_slice(data);
    let mut events = Vec::new();

    loop {
      match self.stage {
        Stage::Headers => {
          let Some(head) = self.parse_head()? else {
            break;
          };
          self.stage = self.body_stage(&head)?;
          events.push(ParserEvent::Headers(head));
          if matches!(self.stage, Stage::Headers) {
            // Bodyless message.
            events.push(ParserEvent::End);
          }
        }
        Stage::BodyLength { remaining } => {
          if self.buf.is_empty() {
            break;
          }
          let take = remaining.min(self.buf.len() as u64) as usize;
          let chunk: Vec<u8> = self.buf.drain(..take).collect();
          events.push(ParserEvent::Body(chunk));
          let remaining = remaining - take as u64;
          if remaining == 0 {
            events.push(ParserEvent::End);
            self.stage = Stage::Headers;
          } else {
            self.stage = Stage::BodyLength { remaining };
          }
        }
        Stage::ChunkSize => match httparse::parse_chunk_size(&self.buf) {
          Ok(httparse::Status::Complete((consumed, size))) => {
            self.buf.drain(..consumed);
            self.stage = if size == 0 {
              Stage::Trailers
            } else {
              Stage::ChunkData { remaining: size }
            };
          }
          Ok(httparse::Status::Partial) => break,
          Err(_) => return Err("invalid chunk size".to_string()),
        },
        Stage::ChunkData { remaining } => {
          if self.buf.is_empty() {
            break;
          }
          let take = remaining.min(self.buf.len() as u64) as usize;
          let chunk: Vec<u8> = self.buf.drain(..take).collect();
          events.push(ParserEvent::Body(chunk));
          let remaining = remaining - take as u64;
          self.stage = if remaining == 0 {
            Stage::ChunkCrlf
          } else {
            Stage::ChunkData { remaining }
          };
        }
        Stage::ChunkCrlf => {
          if self.buf.len() < 2 {
            break;
          }
          if &self.buf[..2] != b"\r\n" {
            return Err("missing chunk terminator".to_string());
          }
          self.buf.drain(..2);
          self.stage = Stage::ChunkSize;
        }
        Stage::Trailers => {
          if self.buf.starts_with(b"\r\n") {
            self.buf.drain(..2);
          } else if let Some(end) = find_subslice(&self.buf, b"\r\n\r\n") {
            self.buf.drain(..end + 4);
          } else {
            break;
          }
          events.push(ParserEvent::End);
          self.stage = Stage::Headers;
        }
        Stage::BodyUntilClose => {
          if self.buf.is_empty() {
            break;
          }
          let chunk: Vec<u8> = self.buf.drain(..).collect();
          events.push(ParserEvent::Body(chunk));
          break;
        }
      }
    }

    Ok(events)
  }

  /// Signals EOF; read-until-close bodies complete here.
  pub fn finish(&mut self) -> Result<Vec<ParserEvent>, String> {
    match self.stage {
      Stage::BodyUntilClose => {
        self.stage = Stage::Headers;
        Ok(vec![ParserEvent::End])
      }
      Stage::Headers if self.buf.is_empty() => Ok(vec![]),
      _ => Err("unexpected end of stream".to_string()),
    }
  }

  fn parse_head(&mut self) -> Result<Option<MessageHead>, String> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut head = MessageHead::default();
    let consumed = match self.kind {
      ParserKind::Request => {
        let mut request = httparse::Request::new(&mut headers);
        match request.parse(&self.buf) {
          Ok(httparse::Status::Complete(consumed)) => {
            head.method = request.method.map(str::to_string);
            head.url = request.path.map(str::to_string);
            head.version_minor = request.version.unwrap_or(1);
            head.headers = collect_headers(request.headers);
            consumed
          }
          Ok(httparse::Status::Partial) => return Ok(None),
          Err(e) => return Err(e.to_string()),
        }
      }
      ParserKind::Response => {
        let mut response = httparse::Response::new(&mut headers);
        match response.parse(&self.buf) {
          Ok(httparse::Status::Complete(consumed)) => {
            head.status = response.code;
            head.reason = response.reason.map(str::to_string);
            head.version_minor = response.version.unwrap_or(1);
            head.headers = collect_headers(response.headers);
            consumed
          }
          Ok(httparse::Status::Partial) => return Ok(None),
          Err(e) => return Err(e.to_string()),
        }
      }
    };

    self.buf.drain(..consumed);
    Ok(Some(head))
  }

  /// Decides how the message body is framed.
  fn body_stage(&self, head: &MessageHead) -> Result<Stage, String> {
    if let Some(status) = head.status {
      if (100..200).contains(&status) || status == 204 || status == 304 {
        return Ok(Stage::Headers);
      }
    }

    if let Some(encoding) = head.header("transfer-encoding") {
      if encoding.to_ascii_lowercase().contains("chunked") {
        return Ok(Stage::ChunkSize);
      }
    }

    if let Some(length) = head.header("content-length") {
      let length: u64 = length
        .trim()
        .parse()
        .map_err(|_| "invalid content-length".to_string())?;
      return Ok(match length {
        0 => Stage::Headers,
        remaining => Stage::BodyLength { remaining },
      });
    }

    match self.kind {
      // Requests default to no body.
      ParserKind::Request => Ok(Stage::Headers),
      // Responses default to read-until-close.
      ParserKind::Response => Ok(Stage::BodyUntilClose),
    }
  }
}

fn collect_headers(headers: &[httparse::Header]) -> Vec<(String, String)> {
  headers
    .iter()
    .map(|header| {
      (
        header.name.to_string(),
        String::from_utf8_lossy(header.value).into_owned(),
      )
    })
    .collect()
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
  haystack
    .windows(needle.len())
    .position(|window| window == needle)
}

// Binding surface.

pub fn initialize<'s>(
  scope: &mut v8::HandleScope<'s>,
) -> v8::Local<'s, v8::Object> {
  let target = v8::Object::new(scope);
  set_function_to(scope, target, "parserNew", parser_new);
  set_function_to(scope, target, "parserWrite", parser_write);
  set_function_to(scope, target, "parserFinish", parser_finish);
  set_function_to(scope, target, "parserFree", parser_free);
  target
}

/// `parserNew(kind) → id` where kind is 0 (request) or 1 (response).
fn parser_new(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let kind = match args.get(0).int32_value(scope).unwrap_or(0) {
    1 => ParserKind::Response,
    _ => ParserKind::Request,
  };

  let state_rc = JsRuntime::state(scope);
  let mut state = state_rc.borrow_mut();
  let id = state.handle.next_handle_id();
  state.parsers.insert(id, HttpParser::new(kind));
  rv.set_int32(id);
}

fn events_to_array<'s>(
  scope: &mut v8::HandleScope<'s>,
  events: Vec<ParserEvent>,
) -> v8::Local<'s, v8::Value> {
  let array = v8::Array::new(scope, events.len() as i32);
  for (i, event) in events.into_iter().enumerate() {
    let object = v8::Object::new(scope);
    match event {
      ParserEvent::Headers(head) => {
        let value = v8::String::new(scope, "headers").unwrap();
        set_property_to(scope, object, "type", value.into());
        if let Some(method) = head.method.as_ref() {
          let value = v8::String::new(scope, method).unwrap();
          set_property_to(scope, object, "method", value.into());
        }
        if let Some(url) = head.url.as_ref() {
          let value = v8::String::new(scope, url).unwrap();
          set_property_to(scope, object, "url", value.into());
        }
        if let Some(status) = head.status {
          let value = v8::Integer::new(scope, status as i32);
          set_property_to(scope, object, "status", value.into());
        }
        if let Some(reason) = head.reason.as_ref() {
          let value = v8::String::new(scope, reason).unwrap();
          set_property_to(scope, object, "statusMessage", value.into());
        }
        let value = v8::Integer::new(scope, head.version_minor as i32);
        set_property_to(scope, object, "versionMinor", value.into());

        let headers = v8::Array::new(scope, head.headers.len() as i32);
        for (j, (name, value)) in head.headers.iter().enumerate() {
          let pair = v8::Array::new(scope, 2);
          let name = v8::String::new(scope, name).unwrap();
          pair.set_index(scope, 0, name.into());
          let value = v8::String::new(scope, value).unwrap();
          pair.set_index(scope, 1, value.into());
          headers.set_index(scope, j as u32, pair.into());
        }
        set_property_to(scope, object, "headers", headers.into());
      }
      ParserEvent::Body(chunk) => {
        let value = v8::String::new(scope, "body").unwrap();
        set_property_to(scope, object, "type", value.into());
        let chunk = bytes_to_uint8array(scope, chunk);
        set_property_to(scope, object, "chunk", chunk);
      }
      ParserEvent::End => {
        let value = v8::String::new(scope, "end").unwrap();
        set_property_to(scope, object, "type", value.into());
      }
    }
    array.set_index(scope, i as u32, object.into());
  }
  array.into()
}

/// `parserWrite(id, chunk) → events[]`; throws a protocol error on malformed
/// input.
fn parser_write(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let id = args.get(0).int32_value(scope).unwrap_or(0);
  let Some(bytes) = bytes_from_value(scope, args.get(1)) else {
    throw_type_error(scope, "The \"chunk\" argument must be a buffer.");
    return;
  };

  let state_rc = JsRuntime::state(scope);
  let mut state = state_rc.borrow_mut();
  let Some(parser) = state.parsers.get_mut(&id) else {
    drop(state);
    throw_error(scope, "bad parser handle", Some("EINVAL"));
    return;
  };

  match parser.write(&bytes) {
    Ok(events) => {
      drop(state);
      rv.set(events_to_array(scope, events));
    }
    Err(message) => {
      drop(state);
      throw_error(scope, &message, Some("EPROTO"));
    }
  }
}

/// `parserFinish(id) → events[]`: signals EOF to the parser.
fn parser_finish(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let id = args.get(0).int32_value(scope).unwrap_or(0);

  let state_rc = JsRuntime::state(scope);
  let mut state = state_rc.borrow_mut();
  let Some(parser) = state.parsers.get_mut(&id) else {
    drop(state);
    throw_error(scope, "bad parser handle", Some("EINVAL"));
    return;
  };

  match parser.finish() {
    Ok(events) => {
      drop(state);
      rv.set(events_to_array(scope, events));
    }
    Err(message) => {
      drop(state);
      throw_error(scope, &message, Some("EPROTO"));
    }
  }
}

/// `parserFree(id)`: idempotent.
fn parser_free(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _: v8::ReturnValue,
) {
  let id = args.get(0).int32_value(scope).unwrap_or(0);
  let state_rc = JsRuntime::state(scope);
  state_rc.borrow_mut().parsers.remove(&id);
}

#[cfg(test)]
mod http_parser_tests {
  use super::*;

  fn head_of(events: &[ParserEvent]) -> &MessageHead {
    match events.first() {
      Some(ParserEvent::Headers(head)) => head,
      other => panic!("expected headers event, got {other:?}"),
    }
  }

  fn body_of(events: &[ParserEvent]) -> Vec<u8> {
    events
      .iter()
      .filter_map(|event| match event {
        ParserEvent::Body(chunk) => Some(chunk.clone()),
        _ => None,
      })
      .flatten()
      .collect()
  }

  fn has_end(events: &[ParserEvent]) -> bool {
    events.iter().any(|event| matches!(event, ParserEvent::End))
  }

  #[test]
  fn parse_request1() {
    let mut parser = HttpParser::new(ParserKind::Request);
    let events = parser
      .write(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n")
      .unwrap();

    let head = head_of(&events);
    assert_eq!(head.method.as_deref(), Some("GET"));
    assert_eq!(head.url.as_deref(), Some("/index.html"));
    assert_eq!(head.header("host"), Some("localhost"));
    assert!(has_end(&events));
  }

  #[test]
  fn parse_request_with_body1() {
    let mut parser = HttpParser::new(ParserKind::Request);
    let events = parser
      .write(b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello")
      .unwrap();

    assert_eq!(head_of(&events).method.as_deref(), Some("POST"));
    assert_eq!(body_of(&events), b"hello");
    assert!(has_end(&events));
  }

  #[test]
  fn parse_response_content_length1() {
    let mut parser = HttpParser::new(ParserKind::Response);
    let events = parser
      .write(b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\n{\"ok\":true}")
      .unwrap();

    let head = head_of(&events);
    assert_eq!(head.status, Some(200));
    assert_eq!(head.reason.as_deref(), Some("OK"));
    assert_eq!(body_of(&events), b"{\"ok\":true}");
    assert!(has_end(&events));
  }

  #[test]
  fn parse_response_incremental1() {
    let mut parser = HttpParser::new(ParserKind::Response);
    let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";

    // One byte at a time: headers surface once, body accumulates.
    let mut all = Vec::new();
    for byte in wire.iter() {
      all.extend(parser.write(std::slice::from_ref(byte)).unwrap());
    }
    assert_eq!(head_of(&all).status, Some(200));
    assert_eq!(body_of(&all), b"hello");
    assert!(has_end(&all));
  }

  #[test]
  fn parse_response_chunked1() {
    let mut parser = HttpParser::new(ParserKind::Response);
    let events = parser
      .write(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
          5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
      )
      .unwrap();

    assert_eq!(body_of(&events), b"hello world");
    assert!(has_end(&events));
  }

  #[test]
  fn parse_response_until_close1() {
    let mut parser = HttpParser::new(ParserKind::Response);
    let events = parser
      .write(b"HTTP/1.0 200 OK\r\n\r\npartial body")
      .unwrap();
    assert_eq!(body_of(&events), b"partial body");
    assert!(!has_end(&events));

    let events = parser.finish().unwrap();
    assert!(has_end(&events));
  }

  #[test]
  fn parse_response_no_body_status1() {
    let mut parser = HttpParser::new(ParserKind::Response);
    let events = parser.write(b"HTTP/1.1 204 No Content\r\n\r\n").unwrap();
    assert_eq!(head_of(&events).status, Some(204));
    assert!(has_end(&events));
  }

  #[test]
  fn parse_pipelined_requests1() {
    let mut parser = HttpParser::new(ParserKind::Request);
    let events = parser
      .write(
        b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n",
      )
      .unwrap();

    let heads: Vec<&MessageHead> = events
      .iter()
      .filter_map(|event| match event {
        ParserEvent::Headers(head) => Some(head),
        _ => None,
      })
      .collect();
    assert_eq!(heads.len(), 2);
    assert_eq!(heads[0].url.as_deref(), Some("/a"));
    assert_eq!(heads[1].url.as_deref(), Some("/b"));
  }

  #[test]
  fn parse_malformed1() {
    let mut parser = HttpParser::new(ParserKind::Request);
    assert!(parser.write(b"NOT AN HTTP MESSAGE\r\n\r\n").is_err());
  }
}
