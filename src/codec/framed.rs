// src/codec/framed.rs

//! Adapter turning any `tokio_util::codec` Decoder/Encoder pair into the
//! session codec capabilities.

use crate::codec::{ClientCodec, ReadOutcome, ServerCodec, WriteOutcome};
use crate::error::MuxError;
use crate::transport::{SessionReader, SessionWriter};
use async_trait::async_trait;
use bytes::BytesMut;
use std::fmt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::{Decoder, Encoder, LinesCodec};

const INITIAL_READ_CAPACITY: usize = 4 * 1024;

/// Classifier used when a codec never produces push items.
pub type NeverPush<T> = fn(&T) -> bool;

fn never_push<T>(_: &T) -> bool {
  false
}

struct ReadState<C> {
  codec: C,
  buffer: BytesMut, // Bytes read off the stream but not yet decoded
}

/// Wraps a framing codec so it can drive a client or server session.
///
/// Decoding keeps its partial-frame buffer between calls, so only one decode
/// may run at a time (the sessions guarantee this). Encoding uses a separate
/// clone of the codec and never contends with an in-flight decode.
pub struct FramedCodec<C, P> {
  read_side: Mutex<ReadState<C>>,
  write_side: Mutex<C>,
  classify: P,
}

impl<C> FramedCodec<C, NeverPush<<C as Decoder>::Item>>
where
  C: Decoder + Clone,
{
  /// Builds a codec whose items are never classified as push.
  pub fn new(codec: C) -> Self {
    FramedCodec::with_push_classifier(codec, never_push::<<C as Decoder>::Item> as NeverPush<_>)
  }
}

impl<C, P> FramedCodec<C, P>
where
  C: Decoder + Clone,
  P: Fn(&<C as Decoder>::Item) -> bool,
{
  pub fn with_push_classifier(codec: C, classify: P) -> Self {
    Self {
      read_side: Mutex::new(ReadState {
        codec: codec.clone(),
        buffer: BytesMut::with_capacity(INITIAL_READ_CAPACITY),
      }),
      write_side: Mutex::new(codec),
      classify,
    }
  }

  async fn decode_frame(&self, reader: &mut SessionReader) -> Result<<C as Decoder>::Item, MuxError>
  where
    <C as Decoder>::Error: fmt::Display,
  {
    let mut state = self.read_side.lock().await;
    let ReadState { codec, buffer } = &mut *state;
    loop {
      if let Some(item) = codec.decode(buffer).map_err(|e| MuxError::Decode(e.to_string()))? {
        return Ok(item);
      }
      let bytes_read = reader.read_buf(buffer).await?;
      if bytes_read == 0 {
        // Peer closed: flush out a trailing unterminated frame if the codec allows it.
        return match codec.decode_eof(buffer).map_err(|e| MuxError::Decode(e.to_string()))? {
          Some(item) => Ok(item),
          None => Err(MuxError::ConnectionClosed),
        };
      }
      tracing::trace!(bytes_read, buffered = buffer.len(), "FramedCodec read bytes");
    }
  }

  async fn encode_frame(&self, writer: &mut SessionWriter, item: <C as Decoder>::Item) -> WriteOutcome
  where
    C: Encoder<<C as Decoder>::Item>,
    <C as Encoder<<C as Decoder>::Item>>::Error: fmt::Display,
  {
    let mut frame = BytesMut::new();
    {
      let mut encoder = self.write_side.lock().await;
      if let Err(e) = encoder.encode(item, &mut frame) {
        // Nothing reached the stream, so the connection is still usable.
        return WriteOutcome::error(MuxError::Encode(e.to_string()), false);
      }
    }
    match writer.write_all(&frame).await {
      Ok(()) => WriteOutcome::ok(),
      Err(e) => WriteOutcome::write_failed(e),
    }
  }
}

impl<C, P> fmt::Debug for FramedCodec<C, P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FramedCodec")
      .field("codec", &std::any::type_name::<C>())
      .finish_non_exhaustive()
  }
}

#[async_trait]
impl<C, P> ClientCodec for FramedCodec<C, P>
where
  C: Decoder + Encoder<<C as Decoder>::Item> + Clone + Send + 'static,
  <C as Decoder>::Item: Send + 'static,
  <C as Decoder>::Error: fmt::Display,
  <C as Encoder<<C as Decoder>::Item>>::Error: fmt::Display,
  P: Fn(&<C as Decoder>::Item) -> bool + Send + Sync + 'static,
{
  type Item = <C as Decoder>::Item;

  async fn decode(&self, reader: &mut SessionReader) -> ReadOutcome<Self::Item> {
    match self.decode_frame(reader).await {
      Ok(item) => ReadOutcome::item(item),
      // Framing position is unknown after any failure.
      Err(e) => ReadOutcome::error(e, true),
    }
  }

  fn is_push(&self, item: &Self::Item) -> bool {
    (self.classify)(item)
  }

  async fn encode(&self, writer: &mut SessionWriter, item: Self::Item) -> WriteOutcome {
    self.encode_frame(writer, item).await
  }
}

#[async_trait]
impl<C, P> ServerCodec for FramedCodec<C, P>
where
  C: Decoder + Encoder<<C as Decoder>::Item> + Clone + Send + 'static,
  <C as Decoder>::Item: Send + 'static,
  <C as Decoder>::Error: fmt::Display,
  <C as Encoder<<C as Decoder>::Item>>::Error: fmt::Display,
  P: Fn(&<C as Decoder>::Item) -> bool + Send + Sync + 'static,
{
  type Item = <C as Decoder>::Item;

  async fn decode(&self, reader: &mut SessionReader) -> Option<Self::Item> {
    match self.decode_frame(reader).await {
      Ok(item) => Some(item),
      Err(e) => {
        tracing::debug!(error = %e, "FramedCodec decode ended");
        None
      }
    }
  }

  async fn encode(&self, writer: &mut SessionWriter, item: Self::Item) -> WriteOutcome {
    self.encode_frame(writer, item).await
  }
}

/// Newline-delimited UTF-8 lines, never classified as push.
pub fn lines() -> FramedCodec<LinesCodec, NeverPush<String>> {
  FramedCodec::new(LinesCodec::new())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::options::SessionOptions;
  use crate::transport::split_stream;

  fn duplex_halves() -> ((SessionReader, SessionWriter), (SessionReader, SessionWriter)) {
    let (a, b) = tokio::io::duplex(1024);
    let opts = SessionOptions::default();
    (split_stream(a, &opts), split_stream(b, &opts))
  }

  #[tokio::test]
  async fn lines_survive_split_reads() {
    let ((mut reader, _w), (_r, mut raw_writer)) = duplex_halves();
    let codec = lines();

    raw_writer.write_all(b"first\nsec").await.unwrap();
    raw_writer.flush().await.unwrap();

    let first = ClientCodec::decode(&codec, &mut reader).await;
    assert_eq!(first.result.unwrap(), "first");
    assert!(!first.should_close);

    raw_writer.write_all(b"ond\n").await.unwrap();
    raw_writer.flush().await.unwrap();
    let second = ClientCodec::decode(&codec, &mut reader).await;
    assert_eq!(second.result.unwrap(), "second");
  }

  #[tokio::test]
  async fn eof_reports_close() {
    let ((mut reader, _w), (_r, mut raw_writer)) = duplex_halves();
    let codec = lines();
    raw_writer.write_all(b"tail").await.unwrap();
    raw_writer.shutdown().await.unwrap();
    drop(raw_writer);
    drop(_r);

    // Unterminated trailing line is still delivered.
    let tail = ClientCodec::decode(&codec, &mut reader).await;
    assert_eq!(tail.result.unwrap(), "tail");

    let end = ClientCodec::decode(&codec, &mut reader).await;
    assert!(end.should_close);
    assert!(matches!(end.result, Err(MuxError::ConnectionClosed)));

    assert!(ServerCodec::decode(&codec, &mut reader).await.is_none());
  }

  #[tokio::test]
  async fn encode_appends_newline() {
    let ((_r, mut writer), (mut peer_reader, _w)) = duplex_halves();
    let codec = lines();
    let outcome = ClientCodec::encode(&codec, &mut writer, "OHAI".to_string()).await;
    assert!(outcome.is_ok());
    writer.flush().await.unwrap();

    let mut buf = [0u8; 5];
    peer_reader.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"OHAI\n");
  }

  #[tokio::test]
  async fn classifier_drives_is_push() {
    let codec = FramedCodec::with_push_classifier(LinesCodec::new(), |line: &String| !line.starts_with('~'));
    assert!(codec.is_push(&"HI".to_string()));
    assert!(!codec.is_push(&"~OHAI".to_string()));
    assert!(!lines().is_push(&"HI".to_string()));
  }

  #[tokio::test]
  async fn oversized_line_is_a_closing_decode_error() {
    let ((mut reader, _w), (_r, mut raw_writer)) = duplex_halves();
    let codec = FramedCodec::new(LinesCodec::new_with_max_length(4));
    raw_writer.write_all(b"way too long\n").await.unwrap();
    raw_writer.flush().await.unwrap();
    let outcome = ClientCodec::decode(&codec, &mut reader).await;
    assert!(outcome.should_close);
    assert!(matches!(outcome.result, Err(MuxError::Decode(_))));
  }
}
