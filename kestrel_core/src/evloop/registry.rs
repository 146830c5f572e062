//! Handle registry.
//!
//! Every native resource visible to JS is identified by an opaque non-zero
//! integer ID. The registry exclusively owns the resource records; JS only
//! ever holds the integer. IDs are allocated from a shared atomic counter and
//! never reused during a run.

use crate::evloop::msg::*;
use crate::prelude::*;

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Process-wide opaque handle ID.
pub type HandleId = i32;

/// What kind of native resource a handle names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
  Timer,
  Immediate,
  Signal,
  Task,
  TcpStream,
  TcpListener,
}

/// State of a stream handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpStreamState {
  Connecting,
  Open,
  HalfClosedWrite,
  Closed,
}

pub struct TimerResource {
  pub cb: TimerCallback,
  /// Repeat interval for `setInterval`-style timers.
  pub period: Option<Duration>,
}

pub struct TcpStreamResource {
  pub state: TcpStreamState,
  /// Control channel of the owning tokio task, present once connected.
  pub ctl: Option<tokio::sync::mpsc::UnboundedSender<TcpCtl>>,
  pub info: Option<SocketInfo>,
  pub connect_cb: Option<ConnectCallback>,
  pub read_cb: Option<ReadCallback>,
  /// In-flight writes keyed by sequence number.
  pub write_cbs: HashMap<u32, WriteCallback>,
  pub shutdown_cbs: HashMap<u32, ShutdownCallback>,
  pub cancel: CancellationToken,
}

impl TcpStreamResource {
  pub fn connecting(cb: ConnectCallback, cancel: CancellationToken) -> Self {
    TcpStreamResource {
      state: TcpStreamState::Connecting,
      ctl: None,
      info: None,
      connect_cb: Some(cb),
      read_cb: None,
      write_cbs: HashMap::new(),
      shutdown_cbs: HashMap::new(),
      cancel,
    }
  }

  pub fn open(conn: TcpConn) -> Self {
    TcpStreamResource {
      state: TcpStreamState::Open,
      ctl: Some(conn.ctl),
      info: Some(conn.info),
      connect_cb: None,
      read_cb: None,
      write_cbs: HashMap::new(),
      shutdown_cbs: HashMap::new(),
      cancel: conn.cancel,
    }
  }

  pub fn send_ctl(&self, ctl: TcpCtl) {
    if let Some(tx) = self.ctl.as_ref() {
      // The task may already be gone on close/error paths.
      let _ = tx.send(ctl);
    }
  }
}

pub struct TcpListenerResource {
  pub accept_cb: AcceptCallback,
  pub cancel: CancellationToken,
}

pub struct SignalResource {
  pub signum: i32,
  pub cb: SignalCallback,
  pub cancel: CancellationToken,
}

/// Kind-specific resource record.
pub enum Resource {
  Timer(TimerResource),
  Immediate(Option<ImmediateCallback>),
  Signal(SignalResource),
  Task(Option<TaskCallback>),
  TcpStream(TcpStreamResource),
  TcpListener(TcpListenerResource),
}

impl Resource {
  pub fn kind(&self) -> HandleKind {
    match self {
      Resource::Timer(_) => HandleKind::Timer,
      Resource::Immediate(_) => HandleKind::Immediate,
      Resource::Signal(_) => HandleKind::Signal,
      Resource::Task(_) => HandleKind::Task,
      Resource::TcpStream(_) => HandleKind::TcpStream,
      Resource::TcpListener(_) => HandleKind::TcpListener,
    }
  }

  /// Whether this kind keeps the loop alive by default. Signal watchers are
  /// born unref'd: a process whose only handles are signal listeners exits.
  fn default_keep_alive(&self) -> bool {
    !matches!(self, Resource::Signal(_))
  }

  /// Whether completions for this kind arrive through the completion queue.
  fn pollable(&self) -> bool {
    matches!(
      self,
      Resource::Signal(_)
        | Resource::Task(_)
        | Resource::TcpStream(_)
        | Resource::TcpListener(_)
    )
  }
}

pub struct HandleRecord {
  pub resource: Resource,
  pub keep_alive: bool,
}

/// The registry: ID → record, plus keep-alive accounting the loop uses for
/// its termination check.
pub struct HandleRegistry {
  map: HashMap<HandleId, HandleRecord>,
  alive: usize,
  pollable: usize,
}

impl HandleRegistry {
  pub fn new() -> Self {
    HandleRegistry {
      map: HashMap::new(),
      alive: 0,
      pollable: 0,
    }
  }

  /// Registers a record under a pre-allocated ID.
  pub fn register(&mut self, id: HandleId, resource: Resource) {
    let keep_alive = resource.default_keep_alive();
    if keep_alive {
      self.alive += 1;
    }
    if resource.pollable() {
      self.pollable += 1;
    }
    let prev = self.map.insert(id, HandleRecord {
      resource,
      keep_alive,
    });
    debug_assert!(prev.is_none(), "handle id {id} reused");
  }

  pub fn lookup(&self, id: HandleId) -> Option<&HandleRecord> {
    self.map.get(&id)
  }

  pub fn lookup_mut(&mut self, id: HandleId) -> Option<&mut HandleRecord> {
    self.map.get_mut(&id)
  }

  pub fn contains(&self, id: HandleId) -> bool {
    self.map.contains_key(&id)
  }

  pub fn unregister(&mut self, id: HandleId) -> Option<HandleRecord> {
    let record = self.map.remove(&id)?;
    if record.keep_alive {
      self.alive -= 1;
    }
    if record.resource.pollable() {
      self.pollable -= 1;
    }
    Some(record)
  }

  /// Re-marks a handle as keeping the loop alive.
  pub fn ref_handle(&mut self, id: HandleId) {
    if let Some(record) = self.map.get_mut(&id) {
      if !record.keep_alive {
        record.keep_alive = true;
        self.alive += 1;
      }
    }
  }

  /// Marks a handle as not keeping the loop alive. Idempotent.
  pub fn unref_handle(&mut self, id: HandleId) {
    if let Some(record) = self.map.get_mut(&id) {
      if record.keep_alive {
        record.keep_alive = false;
        self.alive -= 1;
      }
    }
  }

  /// Number of keep-alive handles. The loop stays alive while it is > 0.
  pub fn alive_count(&self) -> usize {
    self.alive
  }

  /// Number of handles whose completions arrive via the completion queue;
  /// used by the poll phase to decide whether blocking makes sense.
  pub fn pollable_count(&self) -> usize {
    self.pollable
  }

  pub fn len(&self) -> usize {
    self.map.len()
  }

  pub fn is_empty(&self) -> bool {
    self.map.is_empty()
  }
}

impl Default for HandleRegistry {
  fn default() -> Self {
    HandleRegistry::new()
  }
}

#[cfg(test)]
mod registry_tests {
  use super::*;

  fn timer_resource() -> Resource {
    Resource::Timer(TimerResource {
      cb: Box::new(|| {}),
      period: None,
    })
  }

  fn signal_resource() -> Resource {
    Resource::Signal(SignalResource {
      signum: 2,
      cb: Box::new(|_| {}),
      cancel: CancellationToken::new(),
    })
  }

  #[test]
  fn keep_alive_accounting1() {
    let mut registry = HandleRegistry::new();
    registry.register(1, timer_resource());
    registry.register(2, timer_resource());
    assert_eq!(registry.alive_count(), 2);

    registry.unref_handle(1);
    assert_eq!(registry.alive_count(), 1);
    // Unref is idempotent.
    registry.unref_handle(1);
    assert_eq!(registry.alive_count(), 1);

    registry.ref_handle(1);
    assert_eq!(registry.alive_count(), 2);

    registry.unregister(1);
    registry.unregister(2);
    assert_eq!(registry.alive_count(), 0);
    assert!(registry.is_empty());
  }

  #[test]
  fn signals_born_unrefd1() {
    let mut registry = HandleRegistry::new();
    registry.register(1, signal_resource());
    assert_eq!(registry.alive_count(), 0);
    assert_eq!(registry.pollable_count(), 1);
    registry.ref_handle(1);
    assert_eq!(registry.alive_count(), 1);
  }

  #[test]
  fn lookup_after_unregister1() {
    let mut registry = HandleRegistry::new();
    registry.register(7, timer_resource());
    assert!(registry.lookup(7).is_some());
    assert!(registry.unregister(7).is_some());
    assert!(registry.lookup(7).is_none());
    assert!(registry.unregister(7).is_none());
  }
}
