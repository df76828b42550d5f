// tests/server_session.rs

use futures::future::join_all;
use pushmux::{MuxError, ServerSession, SessionOptions, SessionState};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
mod common;

const LONG_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_producers_are_released_during_slow_teardown() -> Result<(), MuxError> {
  common::setup_tracing();
  let (mut factory, mut handles) = common::EchoFactory::new();
  factory.closing_delay = Duration::from_millis(200);
  let closings = factory.closings.clone();

  let (server_side, client_side) = tokio::io::duplex(64);
  let options = SessionOptions::default().with_linger(Duration::from_millis(100));
  let task = ServerSession::serve(&factory, server_side, "duplex".into(), &options)
    .await
    .expect("session admitted");
  let session = common::next_session(&mut handles, LONG_TIMEOUT).await;

  // Nobody reads the client side, so the tiny duplex buffer fills and
  // producers end up blocked on the push outlet.
  let mut producers = Vec::new();
  for p in 0..8 {
    let session = session.clone();
    producers.push(tokio::spawn(async move {
      let mut accepted = 0usize;
      loop {
        match session.push(format!("producer-{}-{}", p, accepted)).await {
          Ok(()) => accepted += 1,
          Err(MuxError::SessionClosed) => return accepted,
          Err(e) => panic!("unexpected push error: {}", e),
        }
      }
    }));
  }
  tokio::time::sleep(Duration::from_millis(50)).await;

  session.close();
  for producer in producers {
    tokio::time::timeout(LONG_TIMEOUT, producer)
      .await
      .expect("producer stayed blocked after close")
      .unwrap();
  }
  tokio::time::timeout(LONG_TIMEOUT, task).await.expect("teardown hung").unwrap();

  assert_eq!(session.state(), SessionState::Closed);
  assert_eq!(closings.load(Ordering::SeqCst), 1);
  drop(client_side);
  Ok(())
}

#[tokio::test]
async fn test_close_from_many_tasks_runs_teardown_once() -> Result<(), MuxError> {
  common::setup_tracing();
  let (factory, mut handles) = common::EchoFactory::new();
  let closings = factory.closings.clone();

  let (server_side, client_side) = tokio::io::duplex(1024);
  let task = ServerSession::serve(&factory, server_side, "duplex".into(), &SessionOptions::default())
    .await
    .expect("session admitted");
  let session = common::next_session(&mut handles, LONG_TIMEOUT).await;

  let (client_read, mut client_write) = tokio::io::split(client_side);
  let mut lines = BufReader::new(client_read).lines();
  client_write.write_all(b"ping\n").await?;
  assert_eq!(lines.next_line().await?.as_deref(), Some("~ping"));

  let closers = (0..16).map(|_| {
    let session = session.clone();
    tokio::spawn(async move { session.close() })
  });
  for joined in join_all(closers).await {
    joined.unwrap();
  }
  tokio::time::timeout(LONG_TIMEOUT, task).await.expect("teardown hung").unwrap();

  assert_eq!(closings.load(Ordering::SeqCst), 1);
  assert!(session.is_closed());
  assert_eq!(lines.next_line().await?, None);
  Ok(())
}

#[tokio::test]
async fn test_malformed_command_closes_session() -> Result<(), MuxError> {
  common::setup_tracing();
  let (factory, mut handles) = common::EchoFactory::new();
  let closings = factory.closings.clone();

  let (server_side, mut client_side) = tokio::io::duplex(1024);
  let task = ServerSession::serve(&factory, server_side, "duplex".into(), &SessionOptions::default())
    .await
    .expect("session admitted");
  let session = common::next_session(&mut handles, LONG_TIMEOUT).await;

  // Invalid UTF-8 is a decode error for the line codec.
  client_side.write_all(&[0xff, 0xfe, b'\n']).await?;
  tokio::time::timeout(LONG_TIMEOUT, task).await.expect("teardown hung").unwrap();

  assert_eq!(session.state(), SessionState::Closed);
  assert_eq!(closings.load(Ordering::SeqCst), 1);
  Ok(())
}
