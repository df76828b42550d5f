// src/codec/mod.rs

//! Capability traits a protocol plugs into the sessions, plus the outcome
//! records they exchange with the session loops.
//!
//! The session never interprets bytes itself: it hands a buffered
//! [`SessionReader`] to `decode`, a buffered [`SessionWriter`] to `encode`,
//! and routes the typed items it gets back.

pub mod framed;

pub use framed::{lines, FramedCodec, NeverPush};

use crate::error::MuxError;
use crate::transport::{SessionReader, SessionWriter};
use async_trait::async_trait;

/// Result of one decode attempt.
///
/// `should_close` is independent of `result`: a successfully decoded item may
/// still be the last one the stream can deliver.
#[derive(Debug)]
pub struct ReadOutcome<T> {
  pub result: Result<T, MuxError>,
  pub should_close: bool,
}

impl<T> ReadOutcome<T> {
  pub fn item(item: T) -> Self {
    Self {
      result: Ok(item),
      should_close: false,
    }
  }

  pub fn error(error: MuxError, should_close: bool) -> Self {
    Self {
      result: Err(error),
      should_close,
    }
  }

  /// The outcome reported to callers of a session that is closed or closing.
  pub fn session_closed() -> Self {
    Self::error(MuxError::SessionClosed, true)
  }
}

/// Result of one encode (or flush) attempt.
#[derive(Debug)]
pub struct WriteOutcome {
  pub result: Result<(), MuxError>,
  pub should_close: bool,
}

impl WriteOutcome {
  pub fn ok() -> Self {
    Self {
      result: Ok(()),
      should_close: false,
    }
  }

  pub fn error(error: MuxError, should_close: bool) -> Self {
    Self {
      result: Err(error),
      should_close,
    }
  }

  /// A failed stream write: the connection is unusable.
  pub fn write_failed(error: impl Into<MuxError>) -> Self {
    Self::error(error.into(), true)
  }

  pub fn session_closed() -> Self {
    Self::error(MuxError::SessionClosed, true)
  }

  pub fn is_ok(&self) -> bool {
    self.result.is_ok() && !self.should_close
  }
}

/// Decode/encode capability for the client side of a connection.
///
/// One instance is shared by the session's read loop and the command caller,
/// so `decode` runs concurrently with `encode` and `is_push`.
#[async_trait]
pub trait ClientCodec: Send + Sync + 'static {
  type Item: Send + 'static;

  /// Reads one response or push item off the stream.
  /// A read failure should set `should_close`.
  async fn decode(&self, reader: &mut SessionReader) -> ReadOutcome<Self::Item>;

  /// True if `item` is an unsolicited push rather than a command response.
  fn is_push(&self, item: &Self::Item) -> bool;

  /// Writes `item` into the buffer. The session flushes afterwards.
  async fn encode(&self, writer: &mut SessionWriter, item: Self::Item) -> WriteOutcome;
}

/// Decode/encode capability for the server side of a connection.
///
/// `decode` runs on the session's in-flight read task, concurrently with
/// `encode` on the arbitration loop.
#[async_trait]
pub trait ServerCodec: Send + Sync + 'static {
  type Item: Send + 'static;

  /// Reads one command off the stream. `None` means the connection should close.
  async fn decode(&self, reader: &mut SessionReader) -> Option<Self::Item>;

  /// Writes a response or push item into the buffer. The session flushes afterwards.
  async fn encode(&self, writer: &mut SessionWriter, item: Self::Item) -> WriteOutcome;
}
