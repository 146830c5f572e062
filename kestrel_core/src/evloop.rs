//! Event loop.
//!
//! Single-threaded and cooperative: one tick walks the phases in a fixed
//! order (control actions, timers, poll, immediates, close callbacks) and
//! every phase completes before the next begins. All I/O happens on a small
//! tokio runtime owned by the loop; worker tasks report back through one MPSC
//! completion queue that the poll phase drains, so JS callbacks only ever run
//! on the loop thread.
//!
//! Loop-side callbacks are plain Rust closures. The JS runtime registers
//! closures that enqueue `JsFuture`s and executes them after the tick, which
//! preserves phase ordering from the JS point of view.

use crate::evloop::msg::*;
use crate::evloop::registry::*;
use crate::evloop::timer::TimerHeap;
use crate::prelude::*;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub mod msg;
pub mod registry;
pub mod signal;
pub mod tcp;
pub mod timer;

/// A cloneable handle used by the bindings to talk to the loop. Handles stay
/// on the loop thread; only the ID counter is shared with I/O tasks.
#[derive(Clone)]
pub struct LoopHandle {
  actions: Sender<Action>,
  /// Actions sent but not yet drained by the prepare step.
  queued: Arc<AtomicUsize>,
  next_id: Arc<AtomicI32>,
  next_seq: Arc<AtomicU32>,
}

impl LoopHandle {
  /// Allocates a fresh handle ID. IDs start at 1 and never repeat.
  pub fn next_handle_id(&self) -> HandleId {
    self.next_id.fetch_add(1, Ordering::Relaxed)
  }

  fn next_seq(&self) -> u32 {
    self.next_seq.fetch_add(1, Ordering::Relaxed)
  }

  fn send(&self, action: Action) {
    self.queued.fetch_add(1, Ordering::Relaxed);
    // The receiver lives as long as the loop; a send can only fail during
    // teardown, where dropping the action is fine.
    let _ = self.actions.send(action);
  }

  /// Plants a timer. `repeat` replants it every `delay` until removed.
  pub fn timer(
    &self,
    delay: Duration,
    repeat: bool,
    cb: TimerCallback,
  ) -> HandleId {
    let id = self.next_handle_id();
    self.send(Action::NewTimer {
      id,
      delay,
      repeat,
      cb,
    });
    id
  }

  /// Removing a non-existent timer is a no-op.
  pub fn remove_timer(&self, id: HandleId) {
    self.send(Action::RemoveTimer { id });
  }

  /// Schedules a callback for the immediate phase.
  pub fn immediate(&self, cb: ImmediateCallback) -> HandleId {
    let id = self.next_handle_id();
    self.send(Action::NewImmediate { id, cb });
    id
  }

  pub fn remove_immediate(&self, id: HandleId) {
    self.send(Action::RemoveImmediate { id });
  }

  /// Ships a blocking job to the worker pool; `cb` runs on the loop thread
  /// with the job's result.
  pub fn spawn(&self, task: TaskFn, cb: Option<TaskCallback>) -> HandleId {
    let id = self.next_handle_id();
    self.send(Action::SpawnTask { id, task, cb });
    id
  }

  pub fn signal_start(&self, signum: i32, cb: SignalCallback) -> HandleId {
    let id = self.next_handle_id();
    self.send(Action::NewSignal { id, signum, cb });
    id
  }

  pub fn signal_stop(&self, id: HandleId) {
    self.send(Action::RemoveSignal { id });
  }

  pub fn tcp_connect(
    &self,
    host: String,
    port: u16,
    cb: ConnectCallback,
  ) -> HandleId {
    let id = self.next_handle_id();
    self.send(Action::TcpConnect { id, host, port, cb });
    id
  }

  /// Takes an already-bound std listener (binding happens synchronously so
  /// the caller learns the ephemeral port up front).
  pub fn tcp_listen(
    &self,
    listener: std::net::TcpListener,
    cb: AcceptCallback,
  ) -> HandleId {
    let id = self.next_handle_id();
    self.send(Action::TcpListen { id, listener, cb });
    id
  }

  pub fn tcp_read_start(&self, id: HandleId, cb: ReadCallback) {
    self.send(Action::TcpStartRead { id, cb });
  }

  pub fn tcp_write(&self, id: HandleId, buf: Vec<u8>, cb: WriteCallback) {
    let seq = self.next_seq();
    self.send(Action::TcpWrite { id, seq, buf, cb });
  }

  pub fn tcp_shutdown(&self, id: HandleId, cb: ShutdownCallback) {
    let seq = self.next_seq();
    self.send(Action::TcpShutdown { id, seq, cb });
  }

  pub fn tcp_close(
    &self,
    id: HandleId,
    reason: Option<String>,
    cb: Option<CloseCallback>,
  ) {
    self.send(Action::TcpClose { id, reason, cb });
  }

  pub fn ref_handle(&self, id: HandleId) {
    self.send(Action::RefHandle { id });
  }

  pub fn unref_handle(&self, id: HandleId) {
    self.send(Action::UnrefHandle { id });
  }
}

pub struct EventLoop {
  /// I/O runtime: reactor + small worker pool. Only channels cross back.
  io: tokio::runtime::Runtime,
  handle: LoopHandle,
  actions_rx: Receiver<Action>,
  completions_tx: Sender<Completion>,
  completions_rx: Receiver<Completion>,
  registry: HandleRegistry,
  timers: TimerHeap,
  /// FIFO of pending immediates (IDs; records live in the registry).
  immediates: VecDeque<HandleId>,
  /// Handles closed during this tick, finalized in the close phase.
  close_q: VecDeque<(HandleId, Option<String>, Option<CloseCallback>)>,
  cancel: CancellationToken,
}

impl EventLoop {
  pub fn new() -> AnyResult<Self> {
    let io = tokio::runtime::Builder::new_multi_thread()
      .worker_threads(2)
      .enable_all()
      .build()?;

    let (actions_tx, actions_rx) = channel();
    let (completions_tx, completions_rx) = channel();

    let handle = LoopHandle {
      actions: actions_tx,
      queued: Arc::new(AtomicUsize::new(0)),
      next_id: Arc::new(AtomicI32::new(1)),
      next_seq: Arc::new(AtomicU32::new(1)),
    };

    Ok(EventLoop {
      io,
      handle,
      actions_rx,
      completions_tx,
      completions_rx,
      registry: HandleRegistry::new(),
      timers: TimerHeap::new(),
      immediates: VecDeque::new(),
      close_q: VecDeque::new(),
      cancel: CancellationToken::new(),
    })
  }

  pub fn handle(&self) -> LoopHandle {
    self.handle.clone()
  }

  /// Whether another tick can make progress. The runtime's outer loop also
  /// consults its own JS-side queues (next-tick, pending imports, …).
  pub fn has_pending_events(&self) -> bool {
    self.registry.alive_count() > 0
      || self.handle.queued.load(Ordering::Relaxed) > 0
      || !self.immediates.is_empty()
      || !self.close_q.is_empty()
  }

  /// Runs one tick through all phases.
  pub fn tick(&mut self) {
    self.prepare();
    self.run_timers();
    self.poll();
    self.run_immediates();
    self.run_close();
  }

  /// Drains queued actions into the subsystems.
  fn prepare(&mut self) {
    while let Ok(action) = self.actions_rx.try_recv() {
      self.handle.queued.fetch_sub(1, Ordering::Relaxed);
      self.process_action(action);
    }
  }

  fn process_action(&mut self, action: Action) {
    match action {
      Action::NewTimer {
        id,
        delay,
        repeat,
        cb,
      } => {
        let period = repeat.then_some(delay);
        self.registry.register(
          id,
          Resource::Timer(TimerResource { cb, period }),
        );
        self.timers.insert(Instant::now() + delay, id);
      }
      Action::RemoveTimer { id } | Action::RemoveImmediate { id } => {
        // Lazy: dead heap/queue entries are skipped when they surface.
        self.registry.unregister(id);
      }
      Action::NewImmediate { id, cb } => {
        self.registry.register(id, Resource::Immediate(Some(cb)));
        self.immediates.push_back(id);
      }
      Action::SpawnTask { id, task, cb } => {
        self.registry.register(id, Resource::Task(cb));
        let completions = self.completions_tx.clone();
        self.io.spawn_blocking(move || {
          let result = task();
          let _ = completions.send(Completion::TaskDone { id, result });
        });
      }
      Action::NewSignal { id, signum, cb } => {
        let cancel = self.cancel.child_token();
        self.registry.register(
          id,
          Resource::Signal(SignalResource {
            signum,
            cb,
            cancel: cancel.clone(),
          }),
        );
        let completions = self.completions_tx.clone();
        self
          .io
          .spawn(signal::signal_task(id, signum, completions, cancel));
      }
      Action::RemoveSignal { id } => {
        if let Some(record) = self.registry.unregister(id) {
          if let Resource::Signal(signal) = record.resource {
            signal.cancel.cancel();
          }
        }
      }
      Action::TcpConnect { id, host, port, cb } => {
        let cancel = self.cancel.child_token();
        self.registry.register(
          id,
          Resource::TcpStream(TcpStreamResource::connecting(
            cb,
            cancel.clone(),
          )),
        );
        let completions = self.completions_tx.clone();
        self
          .io
          .spawn(tcp::connect_task(id, host, port, completions, cancel));
      }
      Action::TcpListen { id, listener, cb } => {
        let cancel = self.cancel.child_token();
        self.registry.register(
          id,
          Resource::TcpListener(TcpListenerResource {
            accept_cb: cb,
            cancel: cancel.clone(),
          }),
        );
        let completions = self.completions_tx.clone();
        let next_id = self.handle.next_id.clone();
        let _guard = self.io.enter();
        match tokio::net::TcpListener::from_std(listener) {
          Ok(listener) => {
            self.io.spawn(tcp::listener_task(
              id, listener, next_id, completions, cancel,
            ));
          }
          Err(e) => {
            trace!("failed to adopt listener {id}: {e:?}");
            self.registry.unregister(id);
          }
        }
      }
      Action::TcpStartRead { id, cb } => {
        if let Some(record) = self.registry.lookup_mut(id) {
          if let Resource::TcpStream(stream) = &mut record.resource {
            stream.read_cb = Some(cb);
            stream.send_ctl(TcpCtl::StartRead);
          }
        }
      }
      Action::TcpWrite { id, seq, buf, cb } => {
        match self.registry.lookup_mut(id) {
          Some(record) => {
            if let Resource::TcpStream(stream) = &mut record.resource {
              stream.write_cbs.insert(seq, cb);
              stream.send_ctl(TcpCtl::Write { seq, buf });
            }
          }
          None => cb(Err(closed_err())),
        }
      }
      Action::TcpShutdown { id, seq, cb } => match self.registry.lookup_mut(id)
      {
        Some(record) => {
          if let Resource::TcpStream(stream) = &mut record.resource {
            stream.shutdown_cbs.insert(seq, cb);
            stream.send_ctl(TcpCtl::Shutdown { seq });
          }
        }
        None => cb(Err(closed_err())),
      },
      Action::TcpClose { id, reason, cb } => {
        if let Some(record) = self.registry.lookup_mut(id) {
          match &mut record.resource {
            Resource::TcpStream(stream) => {
              stream.state = TcpStreamState::Closed;
              stream.send_ctl(TcpCtl::Close);
              stream.cancel.cancel();
            }
            Resource::TcpListener(listener) => {
              listener.cancel.cancel();
            }
            _ => {}
          }
          self.close_q.push_back((id, reason, cb));
        } else if let Some(cb) = cb {
          // Closing a non-existent handle still finalizes.
          self.close_q.push_back((id, reason, Some(cb)));
        }
      }
      Action::RefHandle { id } => self.registry.ref_handle(id),
      Action::UnrefHandle { id } => self.registry.unref_handle(id),
    }
  }

  /// Pops every due timer, invokes its callback and replants intervals.
  fn run_timers(&mut self) {
    let now = Instant::now();
    loop {
      let due = {
        let registry = &self.registry;
        self.timers.pop_due(now, |id| registry.contains(id))
      };
      let Some(id) = due else {
        break;
      };

      let mut period = None;
      if let Some(record) = self.registry.lookup_mut(id) {
        if let Resource::Timer(timer) = &mut record.resource {
          (timer.cb)();
          period = timer.period;
        }
      }

      match period {
        // Replant relative to the pop, not the original deadline.
        Some(period) => self.timers.insert(now + period, id),
        None => {
          self.registry.unregister(id);
        }
      }
    }
  }

  /// Blocks on the completion queue until the next timer is due, a handle
  /// completes, or there is nothing to wait for.
  fn poll(&mut self) {
    let now = Instant::now();
    let next_deadline = {
      let registry = &self.registry;
      self.timers.peek_deadline(|id| registry.contains(id))
    };

    let immediate_work =
      !self.immediates.is_empty() || !self.close_q.is_empty();

    let timeout = if immediate_work {
      Some(Duration::ZERO)
    } else {
      match next_deadline {
        Some(deadline) => Some(deadline.saturating_duration_since(now)),
        None if self.registry.pollable_count() > 0 => None,
        None => Some(Duration::ZERO),
      }
    };

    let first = match timeout {
      Some(timeout) => match self.completions_rx.recv_timeout(timeout) {
        Ok(completion) => Some(completion),
        Err(RecvTimeoutError::Timeout)
        | Err(RecvTimeoutError::Disconnected) => None,
      },
      None => self.completions_rx.recv().ok(),
    };

    if let Some(completion) = first {
      self.dispatch(completion);
    }
    while let Ok(completion) = self.completions_rx.try_recv() {
      self.dispatch(completion);
    }
  }

  fn dispatch(&mut self, completion: Completion) {
    match completion {
      Completion::TaskDone { id, result } => {
        if let Some(record) = self.registry.unregister(id) {
          if let Resource::Task(Some(cb)) = record.resource {
            cb(result);
          }
        }
      }
      Completion::TcpConnected { id, result } => match result {
        Ok(conn) => {
          let Some(record) = self.registry.lookup_mut(id) else {
            // Cancelled while connecting: tear the fresh task down.
            let _ = conn.ctl.send(TcpCtl::Close);
            conn.cancel.cancel();
            return;
          };
          if let Resource::TcpStream(stream) = &mut record.resource {
            if stream.state == TcpStreamState::Closed {
              // Closed this tick, awaiting finalization; the connect
              // callback is rejected in the close phase.
              let _ = conn.ctl.send(TcpCtl::Close);
              conn.cancel.cancel();
              return;
            }
            stream.state = TcpStreamState::Open;
            stream.info = Some(conn.info);
            stream.ctl = Some(conn.ctl);
            if let Some(cb) = stream.connect_cb.take() {
              cb(Ok(conn.info));
            }
          }
        }
        Err(e) => {
          if let Some(record) = self.registry.unregister(id) {
            if let Resource::TcpStream(stream) = record.resource {
              if let Some(cb) = stream.connect_cb {
                cb(Err(e));
              }
            }
          }
        }
      },
      Completion::TcpAccepted {
        listener_id,
        id,
        conn,
      } => {
        if !self.registry.contains(listener_id) {
          let _ = conn.ctl.send(TcpCtl::Close);
          conn.cancel.cancel();
          return;
        }
        let info = conn.info;
        self
          .registry
          .register(id, Resource::TcpStream(TcpStreamResource::open(conn)));
        if let Some(record) = self.registry.lookup_mut(listener_id) {
          if let Resource::TcpListener(listener) = &mut record.resource {
            (listener.accept_cb)(id, info);
          }
        }
      }
      Completion::TcpRead { id, result } => {
        if let Some(record) = self.registry.lookup_mut(id) {
          if let Resource::TcpStream(stream) = &mut record.resource {
            let ack = matches!(&result, Ok(chunk) if !chunk.is_empty());
            if let Some(cb) = stream.read_cb.as_mut() {
              cb(result);
            }
            if ack {
              stream.send_ctl(TcpCtl::ReadAck);
            }
          }
        }
      }
      Completion::TcpWritten { id, seq, result } => {
        let cb = match self.registry.lookup_mut(id) {
          Some(record) => match &mut record.resource {
            Resource::TcpStream(stream) => stream.write_cbs.remove(&seq),
            _ => None,
          },
          None => None,
        };
        if let Some(cb) = cb {
          cb(result);
        }
      }
      Completion::TcpShutdownDone { id, seq, result } => {
        let cb = match self.registry.lookup_mut(id) {
          Some(record) => match &mut record.resource {
            Resource::TcpStream(stream) => {
              stream.state = TcpStreamState::HalfClosedWrite;
              stream.shutdown_cbs.remove(&seq)
            }
            _ => None,
          },
          None => None,
        };
        if let Some(cb) = cb {
          cb(result);
        }
      }
      Completion::Signal { id, signum } => {
        if let Some(record) = self.registry.lookup_mut(id) {
          if let Resource::Signal(signal) = &mut record.resource {
            (signal.cb)(signum);
          }
        }
      }
    }
  }

  /// Drains the immediate queue. Immediates scheduled from JS during this
  /// phase arrive as actions and run in the next tick.
  fn run_immediates(&mut self) {
    while let Some(id) = self.immediates.pop_front() {
      if let Some(record) = self.registry.unregister(id) {
        if let Resource::Immediate(Some(cb)) = record.resource {
          cb();
        }
      }
    }
  }

  /// Finalization callbacks for handles closed during the tick. Pending
  /// completions on a closed stream fail rather than hang, carrying the
  /// caller's close reason when one was given.
  fn run_close(&mut self) {
    while let Some((id, reason, cb)) = self.close_q.pop_front() {
      if let Some(record) = self.registry.unregister(id) {
        match record.resource {
          Resource::TcpStream(stream) => {
            let reason = reason.as_deref();
            if let Some(connect_cb) = stream.connect_cb {
              connect_cb(Err(close_reason_err(reason)));
            }
            for (_, write_cb) in stream.write_cbs {
              write_cb(Err(close_reason_err(reason)));
            }
            for (_, shutdown_cb) in stream.shutdown_cbs {
              shutdown_cb(Err(close_reason_err(reason)));
            }
          }
          Resource::TcpListener(_) => {}
          _ => {}
        }
      }
      if let Some(cb) = cb {
        cb();
      }
    }
  }
}

impl Drop for EventLoop {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

fn closed_err() -> std::io::Error {
  std::io::Error::new(std::io::ErrorKind::ConnectionAborted, "handle closed")
}

/// Rejection for completions cut off by a caller-initiated close.
fn close_reason_err(reason: Option<&str>) -> std::io::Error {
  match reason {
    Some(reason) => std::io::Error::new(
      std::io::ErrorKind::ConnectionAborted,
      reason.to_string(),
    ),
    None => closed_err(),
  }
}
