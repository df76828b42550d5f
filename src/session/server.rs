// src/session/server.rs

use crate::codec::ServerCodec;
use crate::options::SessionOptions;
use crate::runtime::{push_outlet, CloseSignal, PushReceiver};
use crate::session::{next_session_id, Admission, CommandHandler, SessionFactory, SessionHandle, SessionState};
use crate::transport::{split_stream, SessionReader, SessionStream, SessionWriter};

use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Why the arbitration loop left the `Active` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
  PeerClosed,       // decode asked to close (EOF, malformed input)
  ReadTaskFailed,   // the read task panicked or was cancelled
  WriteFailed,      // encode or flush failure
  HandlerRequested, // on_command returned close
  CloseSignal,      // SessionHandle::close()
}

type ReadTask<T> = JoinHandle<(SessionReader, Option<T>)>;

/// Server side of one connection.
///
/// Serializes reading commands, dispatching them to the handler, writing
/// responses and injecting application pushes. Exactly one read is in flight
/// at any time, on its own task, so a slow peer never delays pushes or close.
pub struct ServerSession<C: ServerCodec, H> {
  id: usize,
  peer: String,
  codec: Arc<C>,
  handler: H,
  writer: SessionWriter,
  handle: SessionHandle<C::Item>,
  push_rx: PushReceiver<C::Item>,
  close_signal: CloseSignal,
  state_tx: watch::Sender<SessionState>,
  linger: Duration,
}

impl<C, H> ServerSession<C, H>
where
  C: ServerCodec,
  H: CommandHandler<Item = C::Item>,
{
  /// Runs a server session over `stream`.
  ///
  /// Builds the session handle, asks `factory` for a codec and handler, and
  /// spawns the arbitration loop. Returns `None` if the factory rejected the
  /// connection, in which case the stream has already been closed.
  pub async fn serve<F, S>(factory: &F, stream: S, peer: String, options: &SessionOptions) -> Option<JoinHandle<()>>
  where
    F: SessionFactory<Item = C::Item, Codec = C, Handler = H>,
    S: SessionStream,
  {
    let id = next_session_id();
    let (push_tx, push_rx) = push_outlet();
    let (state_tx, state_rx) = watch::channel(SessionState::Active);
    let close_signal = CloseSignal::new();
    let handle = SessionHandle::new(id, peer.clone(), push_tx, close_signal.clone(), state_rx);

    let (codec, handler) = match factory.on_connected(handle.clone()).await {
      Admission::Serve { codec, handler } => (codec, handler),
      Admission::Reject => {
        tracing::info!(session_id = id, peer = %peer, "Factory rejected connection, closing");
        state_tx.send_replace(SessionState::Closing);
        let mut stream = stream;
        if let Ok(Err(e)) = tokio::time::timeout(options.linger, stream.shutdown()).await {
          tracing::debug!(session_id = id, error = %e, "Error shutting down rejected stream");
        }
        drop(stream);
        push_rx.close();
        close_signal.fire();
        state_tx.send_replace(SessionState::Closed);
        return None;
      }
    };

    let (reader, writer) = split_stream(stream, options);
    let session = ServerSession {
      id,
      peer,
      codec: Arc::new(codec),
      handler,
      writer,
      handle,
      push_rx,
      close_signal,
      state_tx,
      linger: options.linger,
    };
    Some(tokio::spawn(session.run_loop(reader)))
  }

  /// Starts the single outstanding read. The reader travels with the task
  /// and comes back with the decoded command.
  fn spawn_read(&self, mut reader: SessionReader) -> ReadTask<C::Item> {
    let codec = self.codec.clone();
    tokio::spawn(async move {
      let command = codec.decode(&mut reader).await;
      (reader, command)
    })
  }

  /// Encodes and flushes one item. Returns `true` if the session must close.
  async fn write_item(&mut self, item: C::Item) -> bool {
    // Close requests interrupt a write stuck on a peer that stopped reading.
    let outcome = tokio::select! {
      biased;
      _ = self.close_signal.fired() => return true,
      outcome = self.codec.encode(&mut self.writer, item) => outcome,
    };
    if outcome.should_close {
      match outcome.result {
        Err(e) => tracing::warn!(session_id = self.id, error = %e, "Write failed, closing session"),
        Ok(()) => tracing::debug!(session_id = self.id, "Codec requested close after write"),
      }
      return true;
    }
    if let Err(e) = outcome.result {
      // Nothing was written; the stream is still in a consistent state.
      tracing::warn!(session_id = self.id, error = %e, "Failed to encode item, dropping it");
      return false;
    }
    let flushed = tokio::select! {
      biased;
      _ = self.close_signal.fired() => return true,
      flushed = self.writer.flush() => flushed,
    };
    if let Err(e) = flushed {
      tracing::warn!(session_id = self.id, error = %e, "Flush failed, closing session");
      return true;
    }
    false
  }

  async fn run_loop(mut self, reader: SessionReader) {
    tracing::info!(session_id = self.id, peer = %self.peer, "Server session started");

    let mut read_task = self.spawn_read(reader);
    let mut read_outstanding = true;

    let reason = loop {
      tokio::select! {
        biased; // Close requests win over pending traffic

        _ = self.close_signal.fired() => {
          break CloseReason::CloseSignal;
        }

        joined = &mut read_task => {
          read_outstanding = false;
          let (reader, command) = match joined {
            Ok((reader, Some(command))) => (reader, command),
            Ok((_reader, None)) => break CloseReason::PeerClosed,
            Err(e) => {
              tracing::error!(session_id = self.id, error = %e, "Read task failed");
              break CloseReason::ReadTaskFailed;
            }
          };

          tracing::trace!(session_id = self.id, "Dispatching command to handler");
          let reply = self.handler.on_command(command).await;
          if let Some(response) = reply.response {
            // A failed write closes even if the handler wanted to continue.
            if self.write_item(response).await {
              break CloseReason::WriteFailed;
            }
          }
          if reply.close {
            break CloseReason::HandlerRequested;
          }
          read_task = self.spawn_read(reader);
          read_outstanding = true;
        }

        pushed = self.push_rx.recv() => {
          match pushed {
            Ok(item) => {
              tracing::trace!(session_id = self.id, "Writing push item");
              if self.write_item(item).await {
                break CloseReason::WriteFailed;
              }
            }
            Err(_) => {
              // The session holds a sender through its handle, so this only
              // happens if the outlet was closed out from under us.
              tracing::error!(session_id = self.id, "Push outlet closed while session active");
              break CloseReason::CloseSignal;
            }
          }
        }
      }
    };

    self.teardown(reason, read_outstanding.then_some(read_task)).await;
  }

  async fn teardown(mut self, reason: CloseReason, read_task: Option<ReadTask<C::Item>>) {
    tracing::debug!(session_id = self.id, ?reason, "Server session closing");
    self.state_tx.send_replace(SessionState::Closing);

    // Keep producers moving while the handler finalizes.
    let drain_task = tokio::spawn(drain_push_outlet(self.id, self.push_rx.clone()));

    self.handler.on_closing().await;

    // Abandon the in-flight read; awaiting the aborted task drops the read half.
    if let Some(read_task) = read_task {
      read_task.abort();
      let _ = read_task.await;
    }
    match tokio::time::timeout(self.linger, self.writer.shutdown()).await {
      Ok(Ok(())) => {}
      Ok(Err(e)) => tracing::debug!(session_id = self.id, error = %e, "Error shutting down stream"),
      Err(_) => tracing::warn!(session_id = self.id, "Linger expired, dropping unflushed output"),
    }

    drain_task.abort();
    let _ = drain_task.await;
    self.push_rx.close();
    self.close_signal.fire();
    self.state_tx.send_replace(SessionState::Closed);
    drop(self.handle);
    tracing::info!(session_id = self.id, peer = %self.peer, ?reason, "Server session closed");
  }
}

async fn drain_push_outlet<T>(session_id: usize, push_rx: PushReceiver<T>) {
  let mut discarded = 0usize;
  while push_rx.recv().await.is_ok() {
    discarded += 1;
    tracing::trace!(session_id, discarded, "Discarded push item during teardown");
  }
}
