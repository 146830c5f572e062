//! Control and completion messages between the loop, its handle and the I/O
//! tasks.
//!
//! Bindings run JS-side and talk to the loop through [`Action`]s; tokio tasks
//! running on the worker threads answer through [`Completion`]s posted to the
//! single completion queue the poll phase drains. Per-socket tasks are driven
//! with [`TcpCtl`] commands.

use crate::evloop::registry::HandleId;
use crate::prelude::*;

use std::net::SocketAddr;
use tokio::sync::mpsc::UnboundedSender;

/// Result of a worker-pool task: `None` when the task produces no value,
/// otherwise raw bytes (structured payloads cross as `bincode`).
pub type TaskResult = Option<AnyResult<Vec<u8>>>;

/// A blocking job shipped to the worker pool.
pub type TaskFn = Box<dyn FnOnce() -> TaskResult + Send + 'static>;

// Loop-thread callbacks. None of these cross threads.
pub type TimerCallback = Box<dyn FnMut() + 'static>;
pub type ImmediateCallback = Box<dyn FnOnce() + 'static>;
pub type TaskCallback = Box<dyn FnOnce(TaskResult) + 'static>;
pub type SignalCallback = Box<dyn FnMut(i32) + 'static>;
pub type ConnectCallback = Box<dyn FnOnce(IoResult<SocketInfo>) + 'static>;
pub type AcceptCallback = Box<dyn FnMut(HandleId, SocketInfo) + 'static>;
pub type ReadCallback = Box<dyn FnMut(IoResult<Vec<u8>>) + 'static>;
pub type WriteCallback = Box<dyn FnOnce(IoResult<usize>) + 'static>;
pub type ShutdownCallback = Box<dyn FnOnce(IoResult<()>) + 'static>;
pub type CloseCallback = Box<dyn FnOnce() + 'static>;

/// Local/remote addresses of an established stream.
#[derive(Debug, Clone, Copy)]
pub struct SocketInfo {
  pub local: SocketAddr,
  pub remote: SocketAddr,
}

/// An established socket handed from a tokio task to the loop: the control
/// channel, its addresses and the task's cancellation token. The stream
/// itself stays inside the task.
pub struct TcpConn {
  pub ctl: UnboundedSender<TcpCtl>,
  pub info: SocketInfo,
  pub cancel: tokio_util::sync::CancellationToken,
}

/// Commands for a per-socket task.
#[derive(Debug)]
pub enum TcpCtl {
  /// Begin posting read chunks.
  StartRead,
  /// The loop consumed the previous chunk; the task may read again.
  ReadAck,
  /// Write bytes, acknowledged with `TcpWritten { seq }`.
  Write { seq: u32, buf: Vec<u8> },
  /// Half-close the write side.
  Shutdown { seq: u32 },
  /// Drop the stream and exit the task.
  Close,
}

/// Requests sent from [`LoopHandle`](crate::evloop::LoopHandle) to the loop,
/// drained in the prepare step of each tick.
pub enum Action {
  NewTimer {
    id: HandleId,
    delay: std::time::Duration,
    repeat: bool,
    cb: TimerCallback,
  },
  RemoveTimer {
    id: HandleId,
  },
  NewImmediate {
    id: HandleId,
    cb: ImmediateCallback,
  },
  RemoveImmediate {
    id: HandleId,
  },
  SpawnTask {
    id: HandleId,
    task: TaskFn,
    cb: Option<TaskCallback>,
  },
  NewSignal {
    id: HandleId,
    signum: i32,
    cb: SignalCallback,
  },
  RemoveSignal {
    id: HandleId,
  },
  TcpConnect {
    id: HandleId,
    host: String,
    port: u16,
    cb: ConnectCallback,
  },
  TcpListen {
    id: HandleId,
    listener: std::net::TcpListener,
    cb: AcceptCallback,
  },
  TcpStartRead {
    id: HandleId,
    cb: ReadCallback,
  },
  TcpWrite {
    id: HandleId,
    seq: u32,
    buf: Vec<u8>,
    cb: WriteCallback,
  },
  TcpShutdown {
    id: HandleId,
    seq: u32,
    cb: ShutdownCallback,
  },
  TcpClose {
    id: HandleId,
    /// Why the caller is closing; surfaced to in-flight completions so a
    /// destroy/abort rejects them with its own reason.
    reason: Option<String>,
    cb: Option<CloseCallback>,
  },
  RefHandle {
    id: HandleId,
  },
  UnrefHandle {
    id: HandleId,
  },
}

/// Completions posted by tokio tasks and drained in the poll phase.
pub enum Completion {
  TaskDone {
    id: HandleId,
    result: TaskResult,
  },
  TcpConnected {
    id: HandleId,
    result: IoResult<TcpConn>,
  },
  TcpAccepted {
    listener_id: HandleId,
    id: HandleId,
    conn: TcpConn,
  },
  TcpRead {
    id: HandleId,
    result: IoResult<Vec<u8>>,
  },
  TcpWritten {
    id: HandleId,
    seq: u32,
    result: IoResult<usize>,
  },
  TcpShutdownDone {
    id: HandleId,
    seq: u32,
    result: IoResult<()>,
  },
  Signal {
    id: HandleId,
    signum: i32,
  },
}
