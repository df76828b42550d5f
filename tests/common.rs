// tests/common.rs
#![allow(dead_code)] // Not every test file uses every helper

use async_trait::async_trait;
use pushmux::{
  Admission, CommandHandler, FramedCodec, HandlerReply, MuxError, PushReceiver, SessionFactory, SessionHandle,
};
use tokio_util::codec::LinesCodec;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

static IPC_ENDPOINT_COUNTER: AtomicUsize = AtomicUsize::new(0);

// Use std::sync::Once for one-time initialization
static TRACING_INIT: Once = Once::new();

/// Initializes tracing once per test binary. Override with RUST_LOG.
pub fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    let default_filter = "pushmux=debug,warn";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_max_level(tracing::Level::TRACE)
      .with_env_filter(env_filter)
      .with_target(true)
      .with_line_number(true)
      .with_span_events(FmtSpan::CLOSE)
      .with_test_writer()
      .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set global tracing subscriber");

    println!("Tracing subscriber initialized.");
  });
}

/// Newline-delimited lines where responses start with `~` and anything else is a push.
pub type TildeLines = FramedCodec<LinesCodec, fn(&String) -> bool>;

fn is_push(line: &String) -> bool {
  !line.starts_with('~')
}

pub fn tilde_lines() -> TildeLines {
  FramedCodec::with_push_classifier(LinesCodec::new(), is_push as fn(&String) -> bool)
}

/// Helper to generate unique IPC endpoints for tests
pub fn unique_ipc_endpoint() -> String {
  let pid = std::process::id();
  let count = IPC_ENDPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
  format!("ipc:///tmp/pushmux_test_{}_{}.sock", pid, count)
}

/// Receives one push with a timeout.
pub async fn recv_timeout(pushes: &PushReceiver<String>, duration: Duration) -> Result<String, MuxError> {
  match timeout(duration, pushes.recv()).await {
    Ok(Ok(item)) => Ok(item),
    Ok(Err(_closed)) => Err(MuxError::SessionClosed),
    Err(_) => Err(MuxError::Timeout),
  }
}

/// Echo handler: answers `X` with `~X`, closes after answering `QUIT`.
pub struct EchoHandler {
  closings: Arc<AtomicUsize>,
  closing_delay: Duration,
}

#[async_trait]
impl CommandHandler for EchoHandler {
  type Item = String;

  async fn on_command(&mut self, command: String) -> HandlerReply<String> {
    println!("SERVER: received '{}'", command);
    if command == "QUIT" {
      return HandlerReply::respond_and_close("~BYE".to_string());
    }
    HandlerReply::respond(format!("~{}", command))
  }

  async fn on_closing(&mut self) {
    if !self.closing_delay.is_zero() {
      tokio::time::sleep(self.closing_delay).await;
    }
    self.closings.fetch_add(1, Ordering::SeqCst);
  }
}

/// Factory that serves every connection with an [`EchoHandler`] and hands
/// each session's handle to the test.
pub struct EchoFactory {
  pub closings: Arc<AtomicUsize>,
  pub closing_delay: Duration,
  pub reject: bool,
  handles_tx: mpsc::UnboundedSender<SessionHandle<String>>,
}

impl EchoFactory {
  pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionHandle<String>>) {
    let (handles_tx, handles_rx) = mpsc::unbounded_channel();
    let factory = Self {
      closings: Arc::new(AtomicUsize::new(0)),
      closing_delay: Duration::ZERO,
      reject: false,
      handles_tx,
    };
    (factory, handles_rx)
  }
}

#[async_trait]
impl SessionFactory for EchoFactory {
  type Item = String;
  type Codec = TildeLines;
  type Handler = EchoHandler;

  async fn on_connected(&self, session: SessionHandle<String>) -> Admission<TildeLines, EchoHandler> {
    println!("SERVER: new client {}", session.peer());
    let _ = self.handles_tx.send(session);
    if self.reject {
      return Admission::Reject;
    }
    Admission::Serve {
      codec: tilde_lines(),
      handler: EchoHandler {
        closings: self.closings.clone(),
        closing_delay: self.closing_delay,
      },
    }
  }
}

/// Waits for the next session the factory saw.
pub async fn next_session(
  handles_rx: &mut mpsc::UnboundedReceiver<SessionHandle<String>>,
  duration: Duration,
) -> SessionHandle<String> {
  timeout(duration, handles_rx.recv())
    .await
    .expect("Timed out waiting for server session")
    .expect("Factory dropped")
}
