// src/session/mod.rs

pub mod client; // Outbound connection: command correlation + push outlet
pub mod server; // Inbound connection: arbitration loop + push injection

pub use client::ClientSession;
pub use server::ServerSession;

use crate::codec::ServerCodec;
use crate::error::MuxError;
use crate::runtime::{CloseSignal, PushSender};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;

static NEXT_SESSION_ID: AtomicUsize = AtomicUsize::new(1);

/// Generates the next process-wide session id, used in logs.
pub(crate) fn next_session_id() -> usize {
  NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle of a server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Active,
  Closing,
  Closed,
}

/// What a [`CommandHandler`] wants done after a command.
///
/// A response is written before the close (if any) takes effect.
#[derive(Debug)]
pub struct HandlerReply<T> {
  pub response: Option<T>,
  pub close: bool,
}

impl<T> HandlerReply<T> {
  pub fn respond(response: T) -> Self {
    Self {
      response: Some(response),
      close: false,
    }
  }

  pub fn respond_and_close(response: T) -> Self {
    Self {
      response: Some(response),
      close: true,
    }
  }

  pub fn no_reply() -> Self {
    Self {
      response: None,
      close: false,
    }
  }

  pub fn close() -> Self {
    Self {
      response: None,
      close: true,
    }
  }
}

/// Application logic for one server-side connection.
///
/// All methods are called from the session's single arbitration loop, never
/// concurrently with each other, so the handler may keep mutable state.
#[async_trait]
pub trait CommandHandler: Send + 'static {
  type Item: Send + 'static;

  /// Handles one decoded command.
  async fn on_command(&mut self, command: Self::Item) -> HandlerReply<Self::Item>;

  /// Called exactly once when the session tears down, before the stream is
  /// closed. May block; pushes sent meanwhile are discarded.
  async fn on_closing(&mut self) {}
}

/// Decision returned by [`SessionFactory::on_connected`].
pub enum Admission<C, H> {
  /// Run the session with this codec and handler.
  Serve { codec: C, handler: H },
  /// Close the connection without starting the session.
  Reject,
}

impl<C, H> fmt::Debug for Admission<C, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Admission::Serve { .. } => f.write_str("Admission::Serve"),
      Admission::Reject => f.write_str("Admission::Reject"),
    }
  }
}

/// Builds the per-connection codec and handler for every accepted connection.
///
/// Invoked from the listener's accept loop, one connection at a time.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
  type Item: Send + 'static;
  type Codec: ServerCodec<Item = Self::Item>;
  type Handler: CommandHandler<Item = Self::Item>;

  async fn on_connected(&self, session: SessionHandle<Self::Item>) -> Admission<Self::Codec, Self::Handler>;
}

/// Application-side handle to a server session: push injection and close trigger.
pub struct SessionHandle<T> {
  id: usize,
  peer: String,
  push_tx: PushSender<T>,
  close_signal: CloseSignal,
  state_rx: watch::Receiver<SessionState>,
}

impl<T> Clone for SessionHandle<T> {
  fn clone(&self) -> Self {
    Self {
      id: self.id,
      peer: self.peer.clone(),
      push_tx: self.push_tx.clone(),
      close_signal: self.close_signal.clone(),
      state_rx: self.state_rx.clone(),
    }
  }
}

impl<T> fmt::Debug for SessionHandle<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SessionHandle")
      .field("id", &self.id)
      .field("peer", &self.peer)
      .field("state", &self.state())
      .finish()
  }
}

impl<T> SessionHandle<T> {
  pub(crate) fn new(
    id: usize,
    peer: String,
    push_tx: PushSender<T>,
    close_signal: CloseSignal,
    state_rx: watch::Receiver<SessionState>,
  ) -> Self {
    Self {
      id,
      peer,
      push_tx,
      close_signal,
      state_rx,
    }
  }

  pub fn id(&self) -> usize {
    self.id
  }

  pub fn peer(&self) -> &str {
    &self.peer
  }

  /// Hands `item` to the session to be written to the client as a push.
  ///
  /// Returns once the session loop has taken the item. Returns
  /// [`MuxError::SessionClosed`] once the session has left `Active` or a
  /// close is requested first; pushing to a closed session is never a fault.
  pub async fn push(&self, item: T) -> Result<(), MuxError> {
    if !self.is_active() {
      return Err(MuxError::SessionClosed);
    }
    tokio::select! {
      biased;
      sent = self.push_tx.send(item) => sent,
      _ = self.close_signal.fired() => Err(MuxError::SessionClosed),
    }
  }

  /// Requests teardown. Safe to call any number of times from any task.
  pub fn close(&self) {
    if self.close_signal.fire() {
      tracing::debug!(session_id = self.id, "Close requested via session handle");
    }
  }

  /// True once a close has been requested or the session has left `Active`.
  pub fn is_closed(&self) -> bool {
    self.close_signal.is_fired() || !self.is_active()
  }

  /// Resolves once the close signal fires: on an explicit close, or at the
  /// end of teardown when the session ended for another reason.
  pub async fn closed(&self) {
    self.close_signal.fired().await
  }

  pub fn state(&self) -> SessionState {
    *self.state_rx.borrow()
  }

  /// Waits until the session reaches `target` (or can no longer change state)
  /// and returns the last observed state.
  pub async fn wait_for_state(&self, target: SessionState) -> SessionState {
    let mut rx = self.state_rx.clone();
    let reached = rx.wait_for(|state| *state == target).await.map(|state| *state);
    reached.unwrap_or_else(|_| *self.state_rx.borrow())
  }

  fn is_active(&self) -> bool {
    *self.state_rx.borrow() == SessionState::Active
  }
}
