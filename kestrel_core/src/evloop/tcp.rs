//! TCP stream and listener tasks.
//!
//! Each socket is owned by exactly one tokio task; the loop only ever holds
//! the task's control channel. Inbound data is flow-controlled with a
//! one-chunk acknowledgement: the task posts a read completion and waits for
//! `ReadAck` before reading again, so at most one unconsumed chunk per socket
//! sits in the completion queue.

use crate::evloop::msg::*;
use crate::evloop::registry::HandleId;

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::mpsc::Sender;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Read ceiling per chunk.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

fn socket_info(stream: &TcpStream) -> std::io::Result<SocketInfo> {
  Ok(SocketInfo {
    local: stream.local_addr()?,
    remote: stream.peer_addr()?,
  })
}

/// Resolves + connects, then hands the established stream over to a socket
/// task and posts the outcome.
pub async fn connect_task(
  id: HandleId,
  host: String,
  port: u16,
  completions: Sender<Completion>,
  cancel: CancellationToken,
) {
  let connect = TcpStream::connect((host.as_str(), port));
  let result = tokio::select! {
    _ = cancel.cancelled() => return,
    result = connect => result,
  };

  let result = result.and_then(|stream| {
    stream.set_nodelay(true).ok();
    let info = socket_info(&stream)?;
    let (ctl_tx, ctl_rx) = unbounded_channel();
    tokio::spawn(socket_task(
      id,
      stream,
      ctl_rx,
      completions.clone(),
      cancel.clone(),
    ));
    Ok(TcpConn {
      ctl: ctl_tx,
      info,
      cancel,
    })
  });

  let _ = completions.send(Completion::TcpConnected { id, result });
}

/// Accept loop. Every accepted stream gets its own socket task and a freshly
/// allocated handle ID.
pub async fn listener_task(
  id: HandleId,
  listener: TcpListener,
  next_id: Arc<AtomicI32>,
  completions: Sender<Completion>,
  cancel: CancellationToken,
) {
  loop {
    let accepted = tokio::select! {
      _ = cancel.cancelled() => break,
      accepted = listener.accept() => accepted,
    };

    match accepted {
      Ok((stream, _)) => {
        stream.set_nodelay(true).ok();
        let info = match socket_info(&stream) {
          Ok(info) => info,
          Err(_) => continue,
        };
        let conn_id = next_id.fetch_add(1, Ordering::Relaxed);
        let (ctl_tx, ctl_rx) = unbounded_channel();
        let conn_cancel = cancel.child_token();
        tokio::spawn(socket_task(
          conn_id,
          stream,
          ctl_rx,
          completions.clone(),
          conn_cancel.clone(),
        ));
        let sent = completions.send(Completion::TcpAccepted {
          listener_id: id,
          id: conn_id,
          conn: TcpConn {
            ctl: ctl_tx,
            info,
            cancel: conn_cancel,
          },
        });
        if sent.is_err() {
          break;
        }
      }
      Err(e) => {
        trace!("accept failed on listener {id}: {e:?}");
      }
    }
  }
}

/// Owns one established stream: serves writes/shutdown/close commands and,
/// once reading starts, posts inbound chunks (empty chunk = EOF).
async fn socket_task(
  id: HandleId,
  stream: TcpStream,
  mut ctl_rx: UnboundedReceiver<TcpCtl>,
  completions: Sender<Completion>,
  cancel: CancellationToken,
) {
  let (mut reader, mut writer) = stream.into_split();
  let mut buf = vec![0u8; READ_CHUNK_SIZE];
  let mut reading = false;
  let mut acked = true;

  loop {
    tokio::select! {
      _ = cancel.cancelled() => break,

      ctl = ctl_rx.recv() => match ctl {
        None | Some(TcpCtl::Close) => break,
        Some(TcpCtl::StartRead) => {
          reading = true;
        }
        Some(TcpCtl::ReadAck) => {
          acked = true;
        }
        Some(TcpCtl::Write { seq, buf }) => {
          let result = writer.write_all(&buf).await.map(|_| buf.len());
          let sent = completions.send(Completion::TcpWritten { id, seq, result });
          if sent.is_err() {
            break;
          }
        }
        Some(TcpCtl::Shutdown { seq }) => {
          let result = writer.shutdown().await;
          let sent =
            completions.send(Completion::TcpShutdownDone { id, seq, result });
          if sent.is_err() {
            break;
          }
        }
      },

      read = reader.read(&mut buf), if reading && acked => {
        let result = match read {
          Ok(0) => {
            reading = false;
            Ok(vec![])
          }
          Ok(n) => {
            acked = false;
            Ok(buf[..n].to_vec())
          }
          Err(e) => {
            reading = false;
            Err(e)
          }
        };
        if completions.send(Completion::TcpRead { id, result }).is_err() {
          break;
        }
      },
    }
  }
}
