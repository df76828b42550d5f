// src/transport/tcp.rs

use crate::error::MuxError;
use crate::options::{SessionOptions, TcpTransportConfig};
use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};

/// Connects to `addr` and applies TCP options. Failures map to connect errors.
pub(crate) async fn connect(addr: &str, endpoint_uri: &str, options: &SessionOptions) -> Result<TcpStream, MuxError> {
  tracing::debug!(uri = %endpoint_uri, "Attempting TCP connect");
  let stream = TcpStream::connect(addr)
    .await
    .map_err(|e| MuxError::from_io_endpoint(e, endpoint_uri))?;
  apply_tcp_socket_options(&stream, &options.tcp_config())?;
  tracing::info!(uri = %endpoint_uri, peer = ?stream.peer_addr().ok(), "TCP connect successful");
  Ok(stream)
}

/// Binds a TCP listening socket with SO_REUSEADDR set.
pub(crate) fn bind(addr: &str, endpoint_uri: &str) -> Result<TcpListener, MuxError> {
  let std_listener = std::net::TcpListener::bind(addr).map_err(|e| MuxError::from_io_endpoint(e, endpoint_uri))?;
  std_listener.set_nonblocking(true).map_err(MuxError::from)?;
  SockRef::from(&std_listener)
    .set_reuse_address(true)
    .map_err(MuxError::from)?;
  let listener = TcpListener::from_std(std_listener).map_err(MuxError::from)?;
  tracing::info!(local_addr = ?listener.local_addr().ok(), uri = %endpoint_uri, "TCP listener bound successfully");
  Ok(listener)
}

pub(crate) fn apply_tcp_socket_options(stream: &TcpStream, config: &TcpTransportConfig) -> Result<(), MuxError> {
  let socket_ref = SockRef::from(stream);
  socket_ref.set_nodelay(config.tcp_nodelay)?;
  tracing::trace!(nodelay = config.tcp_nodelay, "Applied TCP_NODELAY");

  if config.keepalive_time.is_some() || config.keepalive_interval.is_some() || config.keepalive_count.is_some() {
    let mut keepalive = TcpKeepalive::new();
    if let Some(time) = config.keepalive_time {
      keepalive = keepalive.with_time(time);
    }
    #[cfg(any(unix, target_os = "windows"))]
    if let Some(interval) = config.keepalive_interval {
      keepalive = keepalive.with_interval(interval);
    }
    #[cfg(not(any(unix, target_os = "windows")))]
    if config.keepalive_interval.is_some() {
      tracing::warn!("TCP Keepalive Interval not supported on this platform.");
    }
    #[cfg(unix)]
    if let Some(count) = config.keepalive_count {
      keepalive = keepalive.with_retries(count);
    }
    #[cfg(not(unix))]
    if config.keepalive_count.is_some() {
      tracing::warn!("TCP Keepalive Count not supported on this platform.");
    }
    socket_ref.set_tcp_keepalive(&keepalive)?;
    tracing::debug!("Applied TCP Keepalive settings: {:?}", keepalive);
  } else {
    tracing::trace!("TCP Keepalive settings not configured, using system defaults.");
  }
  Ok(())
}
