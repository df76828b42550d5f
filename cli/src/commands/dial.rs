use crate::cli::DialArgs;
use crate::commands::demo_codec;

use anyhow::{Context, Result};
use pushmux::{ClientSession, PushReceiver};
use std::time::Duration;

pub async fn run(args: DialArgs) -> Result<()> {
  let cmd_every = Duration::from_secs(args.cmd_every.max(1));
  let mut sent = 0u64;

  loop {
    tracing::info!(addr = %args.addr, "CLIENT: connecting");
    let conn = ClientSession::dial(demo_codec(), &args.addr)
      .await
      .with_context(|| format!("Failed to connect to {}", args.addr))?;
    // Pushes are handed over one at a time, so they must be drained while a command waits.
    let printer = tokio::spawn(print_pushes(conn.push_receiver()));

    loop {
      if args.count.is_some_and(|count| sent >= count) {
        break;
      }
      tokio::time::sleep(cmd_every).await;
      tracing::info!("CLIENT: Sending command OHAI");
      let outcome = conn.cmd("OHAI".to_string()).await;
      sent += 1;
      match &outcome.result {
        Ok(response) => println!("CLIENT: Got back: '{}'", response),
        Err(e) => println!("CLIENT: Command failed: {} (closed: {})", e, outcome.should_close),
      }
      if outcome.should_close {
        break;
      }
    }

    tracing::info!("CLIENT: closing");
    conn.close().await?;
    let _ = printer.await;

    let done = args.count.is_some_and(|count| sent >= count);
    if done || !args.reconnect {
      return Ok(());
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
  }
}

async fn print_pushes(pushes: PushReceiver<String>) {
  while let Ok(push) = pushes.recv().await {
    println!("CLIENT: Got push: '{}'", push);
  }
  tracing::info!("CLIENT: push channel closed");
}
