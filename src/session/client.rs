// src/session/client.rs

use crate::codec::{ClientCodec, ReadOutcome, WriteOutcome};
use crate::error::MuxError;
use crate::options::SessionOptions;
use crate::runtime::{push_outlet, CloseSignal, PushReceiver, PushSender};
use crate::session::next_session_id;
use crate::transport::{self, split_stream, SessionReader, SessionStream, SessionWriter};

use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

/// One-shot reply slot registered by a command caller.
type Waiter<T> = oneshot::Sender<ReadOutcome<T>>;

/// Client side of one connection.
///
/// Commands are written by the caller's task; a background read loop decodes
/// everything the server sends, routes push items to the push outlet and
/// hands the rest to whichever command is waiting.
pub struct ClientSession<C: ClientCodec> {
  id: usize,
  peer: String,
  codec: Arc<C>,
  cmd_lock: Mutex<()>, // Held by `cmd` until its response arrives
  writer: Arc<Mutex<Option<SessionWriter>>>, // Taken by the read loop on teardown
  waiters_tx: async_channel::Sender<Waiter<C::Item>>,
  push_rx: PushReceiver<C::Item>,
  close_signal: CloseSignal,
  terminated: CloseSignal, // Fired when the read loop has finished teardown
}

impl<C: ClientCodec> ClientSession<C> {
  /// Connects to `endpoint` with default options and starts the read loop.
  pub async fn dial(codec: C, endpoint: &str) -> Result<Self, MuxError> {
    Self::dial_with_options(codec, endpoint, SessionOptions::default()).await
  }

  pub async fn dial_with_options(codec: C, endpoint: &str, options: SessionOptions) -> Result<Self, MuxError> {
    let (stream, peer) = transport::connect(endpoint, &options).await?;
    Ok(Self::start(codec, stream, peer, &options))
  }

  /// Runs a client session over an already established stream.
  pub fn from_stream<S: SessionStream>(codec: C, stream: S, options: SessionOptions) -> Self {
    Self::start(codec, stream, "stream".to_string(), &options)
  }

  fn start<S: SessionStream>(codec: C, stream: S, peer: String, options: &SessionOptions) -> Self {
    let id = next_session_id();
    let codec = Arc::new(codec);
    let (reader, writer) = split_stream(stream, options);
    let writer = Arc::new(Mutex::new(Some(writer)));
    let (push_tx, push_rx) = push_outlet();
    let (waiters_tx, waiters_rx) = async_channel::unbounded();
    let close_signal = CloseSignal::new();
    let terminated = CloseSignal::new();

    let read_loop = ReadLoop {
      session_id: id,
      codec: codec.clone(),
      reader,
      writer: writer.clone(),
      push_tx,
      waiters_rx,
      close_signal: close_signal.clone(),
      terminated: terminated.clone(),
      handoff_timeout: options.response_handoff_timeout,
      linger: options.linger,
    };
    tokio::spawn(read_loop.run());
    tracing::info!(session_id = id, peer = %peer, "Client session started");

    Self {
      id,
      peer,
      codec,
      cmd_lock: Mutex::new(()),
      writer,
      waiters_tx,
      push_rx,
      close_signal,
      terminated,
    }
  }

  pub fn id(&self) -> usize {
    self.id
  }

  pub fn peer(&self) -> &str {
    &self.peer
  }

  /// The push outlet. Every item the codec classifies as a push arrives here,
  /// in wire order. Yields `Err` once the read loop has exited.
  pub fn push_receiver(&self) -> PushReceiver<C::Item> {
    self.push_rx.clone()
  }

  pub fn is_closed(&self) -> bool {
    self.close_signal.is_fired()
  }

  /// Sends a command and waits for the next non-push item from the server.
  ///
  /// Concurrent callers are queued on an internal lock, so only one command
  /// is ever outstanding. The returned outcome is the one the read loop
  /// produced, verbatim; a failed write returns that failure instead.
  pub async fn cmd(&self, item: C::Item) -> ReadOutcome<C::Item> {
    let _cmd_guard = self.cmd_lock.lock().await;
    if self.is_closed() {
      return ReadOutcome::session_closed();
    }

    let written = self.write_and_flush(item).await;
    if !written.is_ok() {
      return match written.result {
        Err(e) => ReadOutcome::error(e, written.should_close),
        Ok(()) => ReadOutcome::error(MuxError::ConnectionClosed, true),
      };
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    if self.waiters_tx.send(reply_tx).await.is_err() {
      // Read loop already exited.
      return ReadOutcome::session_closed();
    }
    match reply_rx.await {
      Ok(outcome) => outcome,
      Err(_) => ReadOutcome::session_closed(),
    }
  }

  /// Sends a command without waiting for a response.
  ///
  /// A response the server sends anyway is handed to the next `cmd` that is
  /// waiting, or dropped if nobody claims it in time.
  pub async fn cmd_bg(&self, item: C::Item) -> WriteOutcome {
    let _cmd_guard = self.cmd_lock.lock().await;
    if self.is_closed() {
      return WriteOutcome::session_closed();
    }
    self.write_and_flush(item).await
  }

  /// Closes the session and waits for the read loop to finish teardown.
  /// Calling it again, or after the peer went away, is a no-op.
  pub async fn close(&self) -> Result<(), MuxError> {
    if self.close_signal.fire() {
      tracing::debug!(session_id = self.id, "Client session close requested");
    }
    self.terminated.fired().await;
    Ok(())
  }

  async fn write_and_flush(&self, item: C::Item) -> WriteOutcome {
    let mut guard = self.writer.lock().await;
    let Some(writer) = guard.as_mut() else {
      return WriteOutcome::session_closed();
    };

    let outcome = tokio::select! {
      biased;
      _ = self.close_signal.fired() => WriteOutcome::session_closed(),
      outcome = encode_and_flush(self.codec.as_ref(), writer, item) => outcome,
    };
    if outcome.should_close && self.close_signal.fire() {
      tracing::debug!(session_id = self.id, "Write failure closed client session");
    }
    outcome
  }
}

async fn encode_and_flush<C: ClientCodec>(codec: &C, writer: &mut SessionWriter, item: C::Item) -> WriteOutcome {
  let outcome = codec.encode(writer, item).await;
  if !outcome.is_ok() {
    return outcome;
  }
  match writer.flush().await {
    Ok(()) => WriteOutcome::ok(),
    Err(e) => WriteOutcome::write_failed(e),
  }
}

impl<C: ClientCodec> Drop for ClientSession<C> {
  fn drop(&mut self) {
    // The read loop finishes teardown on its own.
    self.close_signal.fire();
  }
}

impl<C: ClientCodec> std::fmt::Debug for ClientSession<C> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ClientSession")
      .field("id", &self.id)
      .field("peer", &self.peer)
      .field("closed", &self.is_closed())
      .finish()
  }
}

/// State owned by the background read task.
struct ReadLoop<C: ClientCodec> {
  session_id: usize,
  codec: Arc<C>,
  reader: SessionReader,
  writer: Arc<Mutex<Option<SessionWriter>>>,
  push_tx: PushSender<C::Item>,
  waiters_rx: async_channel::Receiver<Waiter<C::Item>>,
  close_signal: CloseSignal,
  terminated: CloseSignal,
  handoff_timeout: Duration,
  linger: Duration,
}

impl<C: ClientCodec> ReadLoop<C> {
  async fn run(mut self) {
    tracing::debug!(session_id = self.session_id, "Client read loop started");
    loop {
      let outcome = tokio::select! {
        biased;
        _ = self.close_signal.fired() => break,
        outcome = self.codec.decode(&mut self.reader) => outcome,
      };
      let should_close = outcome.should_close;

      let is_push = matches!(&outcome.result, Ok(item) if self.codec.is_push(item));
      if is_push {
        if let Ok(item) = outcome.result {
          if !self.deliver_push(item).await {
            break;
          }
        }
      } else if !self.hand_off(outcome).await {
        break;
      }

      if should_close {
        tracing::debug!(session_id = self.session_id, "Decode requested close");
        break;
      }
    }
    self.teardown().await;
  }

  /// Blocks until a consumer takes `item` off the push outlet. Nothing else
  /// is read meanwhile. Returns `false` if the session was closed first.
  async fn deliver_push(&mut self, item: C::Item) -> bool {
    tokio::select! {
      biased;
      _ = self.close_signal.fired() => false,
      sent = self.push_tx.send(item) => {
        if sent.is_err() {
          tracing::trace!(session_id = self.session_id, "Push outlet closed, dropping push item");
        }
        true
      }
    }
  }

  /// Gives `outcome` to the first live waiter within the handoff window.
  /// Returns `false` if the session was closed meanwhile.
  async fn hand_off(&mut self, mut outcome: ReadOutcome<C::Item>) -> bool {
    let deadline = Instant::now() + self.handoff_timeout;
    loop {
      let next_waiter = tokio::select! {
        biased;
        _ = self.close_signal.fired() => return false,
        waiter = tokio::time::timeout_at(deadline, self.waiters_rx.recv()) => waiter,
      };
      match next_waiter {
        Ok(Ok(waiter)) => match waiter.send(outcome) {
          Ok(()) => return true,
          Err(unclaimed) => {
            // That caller gave up; try the next one.
            tracing::trace!(session_id = self.session_id, "Waiter went away, retrying handoff");
            outcome = unclaimed;
          }
        },
        Ok(Err(_)) => return false,
        Err(_elapsed) => {
          match &outcome.result {
            Ok(_) => tracing::warn!(session_id = self.session_id, "Dropping unclaimed response"),
            Err(e) => tracing::warn!(session_id = self.session_id, error = %e, "Dropping unclaimed read error"),
          }
          return true;
        }
      }
    }
  }

  async fn teardown(self) {
    self.close_signal.fire();

    self.waiters_rx.close();
    let mut released = 0usize;
    while let Ok(waiter) = self.waiters_rx.try_recv() {
      let _ = waiter.send(ReadOutcome::session_closed());
      released += 1;
    }

    // A caller stuck in a write sees the close signal and drops the lock.
    let writer = match tokio::time::timeout(self.linger, self.writer.lock()).await {
      Ok(mut guard) => guard.take(),
      Err(_) => {
        tracing::warn!(session_id = self.session_id, "Timed out waiting for writer during teardown");
        None
      }
    };
    if let Some(mut writer) = writer {
      match tokio::time::timeout(self.linger, writer.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(session_id = self.session_id, error = %e, "Error shutting down client stream"),
        Err(_) => tracing::warn!(session_id = self.session_id, "Linger expired, dropping unflushed output"),
      }
    }
    drop(self.reader);

    self.push_tx.close();
    self.terminated.fire();
    tracing::info!(session_id = self.session_id, released_waiters = released, "Client session closed");
  }
}
