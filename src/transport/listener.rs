// src/transport/listener.rs

use crate::error::MuxError;
use crate::options::SessionOptions;
use crate::runtime::{accept_error_outlet, AcceptErrorReceiver, AcceptErrorSender};
use crate::session::{ServerSession, SessionFactory};
use crate::transport::endpoint::{parse_endpoint, Endpoint};
use crate::transport::tcp;
#[cfg(all(unix, feature = "ipc"))]
use crate::transport::ipc;

use std::net::SocketAddr;
use tokio::net::TcpListener;
#[cfg(all(unix, feature = "ipc"))]
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

enum BoundListener {
  Tcp(TcpListener),
  #[cfg(all(unix, feature = "ipc"))]
  Ipc(UnixListener),
}

/// Accepts connections on one endpoint and runs a server session for each.
///
/// The accept loop runs on its own task until [`Listener::close`] is called
/// or the listener is dropped. Sessions that were already started keep
/// running either way.
pub struct Listener {
  endpoint: String,
  local_addr: Option<SocketAddr>,
  errors_rx: AcceptErrorReceiver,
  accept_task: JoinHandle<()>,
  #[cfg(all(unix, feature = "ipc"))]
  ipc_socket: Option<ipc::SocketFile>,
}

impl Listener {
  /// Binds `endpoint` with default options and starts accepting.
  /// Must be called from within a Tokio runtime.
  pub fn bind<F: SessionFactory>(factory: F, endpoint: &str) -> Result<Self, MuxError> {
    Self::bind_with_options(factory, endpoint, SessionOptions::default())
  }

  pub fn bind_with_options<F: SessionFactory>(
    factory: F,
    endpoint: &str,
    options: SessionOptions,
  ) -> Result<Self, MuxError> {
    #[cfg(all(unix, feature = "ipc"))]
    let mut ipc_socket = None;
    let (bound, local_addr) = match parse_endpoint(endpoint)? {
      Endpoint::Tcp(addr) => {
        let listener = tcp::bind(&addr, endpoint)?;
        let local_addr = listener.local_addr().ok();
        (BoundListener::Tcp(listener), local_addr)
      }
      #[cfg(all(unix, feature = "ipc"))]
      Endpoint::Ipc(path) => {
        let (listener, socket) = ipc::bind(&path, endpoint)?;
        ipc_socket = Some(socket);
        (BoundListener::Ipc(listener), None)
      }
    };

    let (errors_tx, errors_rx) = accept_error_outlet(options.accept_error_capacity);
    let accept_loop = AcceptLoop {
      endpoint: endpoint.to_string(),
      factory,
      listener: bound,
      options,
      errors_tx,
    };
    let accept_task = tokio::spawn(accept_loop.run());

    Ok(Self {
      endpoint: endpoint.to_string(),
      local_addr,
      errors_rx,
      accept_task,
      #[cfg(all(unix, feature = "ipc"))]
      ipc_socket,
    })
  }

  /// The bound socket address for TCP endpoints. Port 0 resolves to the
  /// port the OS picked. `None` for IPC.
  pub fn local_addr(&self) -> Option<SocketAddr> {
    self.local_addr
  }

  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }

  /// Accept errors, oldest first. Errors that arrive while the outlet is
  /// full are logged and dropped.
  pub fn errors(&self) -> AcceptErrorReceiver {
    self.errors_rx.clone()
  }

  /// Stops accepting. Idempotent.
  pub fn close(&self) {
    if !self.accept_task.is_finished() {
      tracing::info!(uri = %self.endpoint, "Closing listener");
    }
    self.accept_task.abort();
  }
}

impl Drop for Listener {
  fn drop(&mut self) {
    self.accept_task.abort();
    #[cfg(all(unix, feature = "ipc"))]
    if let Some(socket) = self.ipc_socket.take() {
      socket.cleanup();
    }
  }
}

impl std::fmt::Debug for Listener {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Listener")
      .field("endpoint", &self.endpoint)
      .field("local_addr", &self.local_addr)
      .finish_non_exhaustive()
  }
}

struct AcceptLoop<F> {
  endpoint: String,
  factory: F,
  listener: BoundListener,
  options: SessionOptions,
  errors_tx: AcceptErrorSender,
}

impl<F: SessionFactory> AcceptLoop<F> {
  async fn run(self) {
    tracing::debug!(uri = %self.endpoint, "Accept loop started");
    loop {
      let served = match &self.listener {
        BoundListener::Tcp(listener) => match listener.accept().await {
          Ok((stream, peer_addr)) => {
            let peer = peer_addr.to_string();
            match tcp::apply_tcp_socket_options(&stream, &self.options.tcp_config()) {
              Ok(()) => {
                tracing::debug!(uri = %self.endpoint, peer = %peer, "Accepted TCP connection");
                ServerSession::<F::Codec, F::Handler>::serve(&self.factory, stream, peer, &self.options).await;
                Ok(())
              }
              Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Failed to set TCP options, dropping connection");
                Err(e)
              }
            }
          }
          Err(e) => Err(MuxError::from(e)),
        },
        #[cfg(all(unix, feature = "ipc"))]
        BoundListener::Ipc(listener) => match listener.accept().await {
          Ok((stream, _addr)) => {
            tracing::debug!(uri = %self.endpoint, "Accepted IPC connection");
            ServerSession::<F::Codec, F::Handler>::serve(&self.factory, stream, self.endpoint.clone(), &self.options).await;
            Ok(())
          }
          Err(e) => Err(MuxError::from(e)),
        },
      };

      if let Err(e) = served {
        self.report(e);
        tokio::time::sleep(self.options.accept_error_backoff).await;
      }
    }
  }

  fn report(&self, error: MuxError) {
    tracing::warn!(uri = %self.endpoint, error = %error, "Accept error");
    if let Err(async_channel::TrySendError::Full(dropped)) = self.errors_tx.try_send(error) {
      tracing::warn!(uri = %self.endpoint, error = %dropped, "Accept error outlet full, dropping error");
    }
  }
}
