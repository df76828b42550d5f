use crate::cli::ServeArgs;
use crate::commands::{demo_codec, DemoCodec};

use anyhow::{Context, Result};
use async_trait::async_trait;
use pushmux::{Admission, CommandHandler, HandlerReply, Listener, SessionFactory, SessionHandle};
use std::time::Duration;

struct DemoHandler {
  peer: String,
}

#[async_trait]
impl CommandHandler for DemoHandler {
  type Item = String;

  async fn on_command(&mut self, command: String) -> HandlerReply<String> {
    tracing::info!(peer = %self.peer, "SERVER: received '{}'", command);
    let response = format!("~{}", command);
    tracing::info!(peer = %self.peer, "SERVER: sending back '{}'", response);
    HandlerReply::respond(response)
  }

  async fn on_closing(&mut self) {
    tracing::info!(peer = %self.peer, "SERVER: closing the client connection");
  }
}

struct DemoFactory {
  push_every: Duration,
}

#[async_trait]
impl SessionFactory for DemoFactory {
  type Item = String;
  type Codec = DemoCodec;
  type Handler = DemoHandler;

  async fn on_connected(&self, session: SessionHandle<String>) -> Admission<DemoCodec, DemoHandler> {
    tracing::info!(peer = %session.peer(), "SERVER: new client");
    let peer = session.peer().to_string();
    tokio::spawn(push_periodically(session, self.push_every));
    Admission::Serve {
      codec: demo_codec(),
      handler: DemoHandler { peer },
    }
  }
}

async fn push_periodically(session: SessionHandle<String>, every: Duration) {
  let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
  loop {
    tokio::select! {
      _ = session.closed() => return,
      _ = tick.tick() => {
        tracing::info!(peer = %session.peer(), "SERVER: Pushing HI to the client");
        if session.push("HI".to_string()).await.is_err() {
          return;
        }
      }
    }
  }
}

pub async fn run(args: ServeArgs) -> Result<()> {
  let factory = DemoFactory {
    push_every: Duration::from_secs(args.push_every.max(1)),
  };
  let listener = Listener::bind(factory, &args.addr).with_context(|| format!("Failed to listen on {}", args.addr))?;
  match listener.local_addr() {
    Some(addr) => println!("Listening on {}", addr),
    None => println!("Listening on {}", listener.endpoint()),
  }

  let errors = listener.errors();
  tokio::spawn(async move {
    while let Ok(e) = errors.recv().await {
      eprintln!("Accept error: {}", e);
    }
  });

  tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl-C")?;
  println!("Shutting down");
  listener.close();
  Ok(())
}
