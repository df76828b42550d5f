use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive] // Allows adding more variants later without breaking change
pub enum MuxError {
  // --- I/O Errors ---
  #[error("I/O error: {0}")]
  Io(#[from] io::Error), // Allows easy conversion from std::io::Error

  // --- Codec Errors ---
  #[error("Failed to decode item: {0}")]
  Decode(String), // Malformed or truncated input
  #[error("Failed to encode item: {0}")]
  Encode(String), // Item could not be serialized, nothing was written

  // --- Timeouts ---
  #[error("Operation timed out")]
  Timeout,

  // --- Connection/Binding Errors ---
  #[error("Address already in use: {0}")]
  AddrInUse(String),
  #[error("Address not available: {0}")]
  AddrNotAvailable(String),
  #[error("Connection refused by peer: {0}")]
  ConnectionRefused(String),
  #[error("Permission denied for endpoint: {0}")]
  PermissionDenied(String),
  #[error("Connection closed by peer or transport")]
  ConnectionClosed, // EOF, EPIPE, ECONNRESET

  // --- Session State ---
  #[error("Session is closed")]
  SessionClosed,

  // --- Endpoint Errors ---
  #[error("Invalid endpoint format: {0}")]
  InvalidEndpoint(String),
  #[error("Transport scheme not supported or enabled: {0}")]
  UnsupportedTransport(String),
}

// Helper function to map common std::io::Error kinds
impl MuxError {
  pub fn from_io_endpoint(e: io::Error, endpoint: &str) -> Self {
    match e.kind() {
      io::ErrorKind::AddrInUse => MuxError::AddrInUse(endpoint.to_string()),
      io::ErrorKind::AddrNotAvailable => MuxError::AddrNotAvailable(endpoint.to_string()),
      io::ErrorKind::ConnectionRefused => MuxError::ConnectionRefused(endpoint.to_string()),
      io::ErrorKind::PermissionDenied => MuxError::PermissionDenied(endpoint.to_string()),
      io::ErrorKind::TimedOut => MuxError::Timeout,
      io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => {
        MuxError::ConnectionClosed
      }
      _ => MuxError::Io(e), // Default fallback
    }
  }

  /// True for errors that mean the underlying stream can no longer be used.
  pub fn is_disconnect(&self) -> bool {
    match self {
      MuxError::ConnectionClosed | MuxError::SessionClosed => true,
      MuxError::Io(e) => matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
          | io::ErrorKind::ConnectionAborted
          | io::ErrorKind::BrokenPipe
          | io::ErrorKind::UnexpectedEof
          | io::ErrorKind::NotConnected
      ),
      _ => false,
    }
  }
}
