// src/transport/ipc.rs

use crate::error::MuxError;
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use tokio::net::{UnixListener, UnixStream};

pub(crate) async fn connect(path: &Path, endpoint_uri: &str) -> Result<UnixStream, MuxError> {
  tracing::debug!(uri = %endpoint_uri, "Attempting IPC connect");
  let stream = UnixStream::connect(path)
    .await
    .map_err(|e| MuxError::from_io_endpoint(e, endpoint_uri))?;
  tracing::info!(uri = %endpoint_uri, "IPC connect successful");
  Ok(stream)
}

/// The socket file a listener created. Only that exact file is removed on cleanup.
#[derive(Debug)]
pub(crate) struct SocketFile {
  path: PathBuf,
  ino: u64,
}

impl SocketFile {
  /// Best-effort removal of the socket file once the listener stops.
  /// Leaves the path alone if something else has replaced it meanwhile.
  pub(crate) fn cleanup(self) {
    match std::fs::symlink_metadata(&self.path) {
      Ok(meta) if meta.ino() == self.ino => {}
      Ok(_) => {
        tracing::debug!(path = ?self.path, "IPC socket file was replaced, leaving it in place.");
        return;
      }
      Err(_) => return,
    }
    if let Err(e) = std::fs::remove_file(&self.path) {
      if e.kind() != io::ErrorKind::NotFound {
        tracing::warn!(path = ?self.path, error = %e, "Failed to remove IPC socket file on listener close.");
      }
    }
  }
}

/// Binds a Unix domain socket.
///
/// An existing socket file is removed only if nothing is listening on it.
/// A live socket, or any other kind of file, reports `AddrInUse`.
pub(crate) fn bind(path: &Path, endpoint_uri: &str) -> Result<(UnixListener, SocketFile), MuxError> {
  remove_stale_socket(path, endpoint_uri)?;
  let listener = UnixListener::bind(path).map_err(|e| MuxError::from_io_endpoint(e, endpoint_uri))?;
  let ino = std::fs::symlink_metadata(path)
    .map_err(|e| MuxError::from_io_endpoint(e, endpoint_uri))?
    .ino();
  tracing::info!(path = ?path, "IPC listener bound successfully");
  Ok((
    listener,
    SocketFile {
      path: path.to_path_buf(),
      ino,
    },
  ))
}

fn remove_stale_socket(path: &Path, endpoint_uri: &str) -> Result<(), MuxError> {
  let meta = match std::fs::symlink_metadata(path) {
    Ok(meta) => meta,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
    Err(e) => return Err(MuxError::from_io_endpoint(e, endpoint_uri)),
  };
  if !meta.file_type().is_socket() {
    tracing::warn!(path = ?path, "IPC path exists and is not a socket");
    return Err(MuxError::AddrInUse(endpoint_uri.to_string()));
  }

  // Probe it: a refused connect means the listener that created it is gone.
  match std::os::unix::net::UnixStream::connect(path) {
    Ok(_) => Err(MuxError::AddrInUse(endpoint_uri.to_string())),
    Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
      std::fs::remove_file(path).map_err(|e| MuxError::from_io_endpoint(e, endpoint_uri))?;
      tracing::debug!(path = ?path, "Removed stale IPC socket file before binding.");
      Ok(())
    }
    Err(e) => Err(MuxError::from_io_endpoint(e, endpoint_uri)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn temp_socket_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("pushmux_ipc_{}_{}.sock", tag, std::process::id()))
  }

  #[tokio::test]
  async fn stale_socket_is_replaced() {
    let path = temp_socket_path("stale");
    let _ = std::fs::remove_file(&path);
    // A std listener that is dropped leaves its socket file behind.
    drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
    assert!(path.exists());

    let (_listener, socket) = bind(&path, "ipc://stale").unwrap();
    socket.cleanup();
    assert!(!path.exists());
  }

  #[tokio::test]
  async fn live_socket_is_left_alone() {
    let path = temp_socket_path("live");
    let _ = std::fs::remove_file(&path);
    let (_first, socket) = bind(&path, "ipc://live").unwrap();

    let err = bind(&path, "ipc://live").unwrap_err();
    assert!(matches!(err, MuxError::AddrInUse(_)), "got {:?}", err);
    assert!(path.exists());
    socket.cleanup();
  }

  #[tokio::test]
  async fn regular_file_is_never_deleted() {
    let path = temp_socket_path("regular");
    std::fs::write(&path, b"not a socket").unwrap();

    let err = bind(&path, "ipc://regular").unwrap_err();
    assert!(matches!(err, MuxError::AddrInUse(_)), "got {:?}", err);
    assert_eq!(std::fs::read(&path).unwrap(), b"not a socket");
    std::fs::remove_file(&path).unwrap();
  }

  #[tokio::test]
  async fn cleanup_skips_a_replaced_file() {
    let path = temp_socket_path("replaced");
    let _ = std::fs::remove_file(&path);
    let other = path.with_extension("other");
    let (listener, socket) = bind(&path, "ipc://replaced").unwrap();
    std::fs::write(&other, b"someone else").unwrap();
    drop(listener);
    std::fs::rename(&other, &path).unwrap();

    socket.cleanup();
    assert!(path.exists());
    std::fs::remove_file(&path).unwrap();
  }
}
