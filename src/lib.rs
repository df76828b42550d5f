//! pushmux - request/response plus server push over a single stream, on Tokio.
//!
//! A [`ClientSession`] sends commands and waits for their responses while a
//! background read loop routes unsolicited push items to a separate outlet.
//! A [`Listener`] accepts connections and runs one server session per
//! connection, driven by an application [`SessionFactory`] and
//! [`CommandHandler`]. The wire format is supplied by a codec
//! ([`ClientCodec`] / [`ServerCodec`]).

pub mod codec;
pub mod error;
pub mod options;
pub mod runtime;
pub mod session;
pub mod transport;

// Re-export core types for user convenience
pub use codec::{lines, ClientCodec, FramedCodec, ReadOutcome, ServerCodec, WriteOutcome};
pub use error::MuxError;
pub use options::SessionOptions;
pub use runtime::{AcceptErrorReceiver, PushReceiver};
pub use session::{
  Admission, ClientSession, CommandHandler, HandlerReply, ServerSession, SessionFactory, SessionHandle, SessionState,
};
pub use transport::{Listener, SessionReader, SessionStream, SessionWriter};

// --- Top-Level Functions ---

const VERSION_MAJOR: i32 = 0;
const VERSION_MINOR: i32 = 1;
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

/// Returns the major version number of the library.
pub fn version_major() -> i32 {
  VERSION_MAJOR
}

/// Returns the minor version number of the library.
pub fn version_minor() -> i32 {
  VERSION_MINOR
}

/// Returns the patch version number of the library.
pub fn version_patch() -> i32 {
  VERSION_PATCH
}
