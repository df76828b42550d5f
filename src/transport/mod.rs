// src/transport/mod.rs

//! Stream plumbing: endpoint parsing, TCP/IPC connect and bind, and the
//! buffered reader/writer halves handed to codecs.

pub mod endpoint;
#[cfg(all(unix, feature = "ipc"))]
pub mod ipc;
pub mod listener;
pub mod tcp;

pub use endpoint::{parse_endpoint, Endpoint};
pub use listener::Listener;

use crate::error::MuxError;
use crate::options::SessionOptions;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};

/// Any bidirectional byte stream a session can run over.
pub trait SessionStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<S> SessionStream for S where S: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Buffered read half handed to `decode`.
pub type SessionReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

/// Buffered write half handed to `encode`. The session flushes it after each item.
pub type SessionWriter = BufWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// Splits a stream into the buffered halves used by the session loops.
pub(crate) fn split_stream<S: SessionStream>(stream: S, options: &SessionOptions) -> (SessionReader, SessionWriter) {
  let (read_half, write_half) = tokio::io::split(stream);
  let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(read_half);
  let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);
  (
    BufReader::with_capacity(options.read_buffer_capacity, reader),
    BufWriter::with_capacity(options.write_buffer_capacity, writer),
  )
}

/// Opens an outbound stream to `endpoint`, applying transport options.
/// Returns the stream and a printable peer address.
pub(crate) async fn connect(
  endpoint_str: &str,
  options: &SessionOptions,
) -> Result<(Box<dyn SessionStream>, String), MuxError> {
  match parse_endpoint(endpoint_str)? {
    Endpoint::Tcp(addr) => {
      let stream = tcp::connect(&addr, endpoint_str, options).await?;
      let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| addr.clone());
      Ok((Box::new(stream), peer))
    }
    #[cfg(all(unix, feature = "ipc"))]
    Endpoint::Ipc(path) => {
      let stream = ipc::connect(&path, endpoint_str).await?;
      Ok((Box::new(stream), path.display().to_string()))
    }
  }
}
