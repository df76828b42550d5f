// src/options.rs

use std::time::Duration;

/// How long the client read loop waits for a command caller to claim a response.
pub const DEFAULT_RESPONSE_HANDOFF_TIMEOUT: Duration = Duration::from_secs(2);
/// Default capacity of the listener's accept-error outlet.
pub const DEFAULT_ACCEPT_ERROR_CAPACITY: usize = 32;
pub const DEFAULT_ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);
pub const DEFAULT_BUFFER_CAPACITY: usize = 8 * 1024;
/// How long teardown may spend flushing buffered output before dropping the stream.
pub const DEFAULT_LINGER: Duration = Duration::from_secs(1);

/// Tunables shared by client sessions, server sessions and listeners.
#[derive(Debug, Clone)]
pub struct SessionOptions {
  // TCP Specific (applied to every dialed/accepted stream)
  pub tcp_nodelay: bool,
  pub tcp_keepalive_idle: Option<Duration>,
  pub tcp_keepalive_interval: Option<Duration>,
  pub tcp_keepalive_count: Option<u32>,
  // Session behavior
  pub response_handoff_timeout: Duration,
  pub read_buffer_capacity: usize,
  pub write_buffer_capacity: usize,
  pub linger: Duration,
  // Listener behavior
  pub accept_error_capacity: usize,
  pub accept_error_backoff: Duration,
}

impl Default for SessionOptions {
  fn default() -> Self {
    Self {
      tcp_nodelay: true, // Common default for request/response traffic
      tcp_keepalive_idle: None,
      tcp_keepalive_interval: None,
      tcp_keepalive_count: None,
      response_handoff_timeout: DEFAULT_RESPONSE_HANDOFF_TIMEOUT,
      read_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
      write_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
      linger: DEFAULT_LINGER,
      accept_error_capacity: DEFAULT_ACCEPT_ERROR_CAPACITY,
      accept_error_backoff: DEFAULT_ACCEPT_ERROR_BACKOFF,
    }
  }
}

impl SessionOptions {
  pub fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
    self.tcp_nodelay = nodelay;
    self
  }

  pub fn with_tcp_keepalive(mut self, idle: Duration, interval: Option<Duration>, count: Option<u32>) -> Self {
    self.tcp_keepalive_idle = Some(idle);
    self.tcp_keepalive_interval = interval;
    self.tcp_keepalive_count = count;
    self
  }

  pub fn with_response_handoff_timeout(mut self, timeout: Duration) -> Self {
    self.response_handoff_timeout = timeout;
    self
  }

  pub fn with_buffer_capacity(mut self, read: usize, write: usize) -> Self {
    self.read_buffer_capacity = read.max(1);
    self.write_buffer_capacity = write.max(1);
    self
  }

  pub fn with_linger(mut self, linger: Duration) -> Self {
    self.linger = linger;
    self
  }

  pub fn with_accept_error_capacity(mut self, capacity: usize) -> Self {
    self.accept_error_capacity = capacity.max(1);
    self
  }

  pub fn with_accept_error_backoff(mut self, backoff: Duration) -> Self {
    self.accept_error_backoff = backoff;
    self
  }

  pub(crate) fn tcp_config(&self) -> TcpTransportConfig {
    TcpTransportConfig {
      tcp_nodelay: self.tcp_nodelay,
      keepalive_time: self.tcp_keepalive_idle,
      keepalive_interval: self.tcp_keepalive_interval,
      keepalive_count: self.tcp_keepalive_count,
    }
  }
}

// Config specific to TCP transport, derived from SessionOptions
#[derive(Debug, Clone, Default)]
pub(crate) struct TcpTransportConfig {
  pub tcp_nodelay: bool,
  pub keepalive_time: Option<Duration>,
  pub keepalive_interval: Option<Duration>,
  pub keepalive_count: Option<u32>,
}
