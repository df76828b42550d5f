// src/runtime/outlet.rs

//! Session outlets, built on `async-channel`.
//!
//! The push outlet is a rendezvous: [`PushSender::send`] returns only once a
//! consumer has taken the item out of [`PushReceiver::recv`]. Each item
//! travels with a oneshot acknowledgement that the receiver completes on take.

use crate::error::MuxError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

type Envelope<T> = (T, oneshot::Sender<()>);

/// Producing end of a push outlet. Cloneable, any number of producers.
pub struct PushSender<T> {
  tx: async_channel::Sender<Envelope<T>>,
}

impl<T> Clone for PushSender<T> {
  fn clone(&self) -> Self {
    Self { tx: self.tx.clone() }
  }
}

impl<T> PushSender<T> {
  /// Hands `item` to a consumer and waits until it has been taken.
  ///
  /// Fails with [`MuxError::SessionClosed`] if the outlet is closed before
  /// the item is taken. A cancelled send withdraws the item.
  pub async fn send(&self, item: T) -> Result<(), MuxError> {
    let (ack_tx, ack_rx) = oneshot::channel();
    self
      .tx
      .send((item, ack_tx))
      .await
      .map_err(|_| MuxError::SessionClosed)?;
    ack_rx.await.map_err(|_| MuxError::SessionClosed)
  }

  /// Closes the outlet. Returns `true` if this call closed it.
  pub fn close(&self) -> bool {
    self.tx.close()
  }

  pub fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }
}

/// Consuming end of a push outlet. Yields `Err` once the outlet is closed.
pub struct PushReceiver<T> {
  rx: async_channel::Receiver<Envelope<T>>,
  _last: Arc<DiscardOnDrop<T>>,
}

impl<T> Clone for PushReceiver<T> {
  fn clone(&self) -> Self {
    Self {
      rx: self.rx.clone(),
      _last: self._last.clone(),
    }
  }
}

impl<T> PushReceiver<T> {
  /// Takes the next item a producer is still waiting to hand over.
  pub async fn recv(&self) -> Result<T, MuxError> {
    loop {
      let (item, ack) = self.rx.recv().await.map_err(|_| MuxError::SessionClosed)?;
      // Err means the producer gave up on this item.
      if ack.send(()).is_ok() {
        return Ok(item);
      }
    }
  }

  /// Closes the outlet and fails every producer still waiting on it.
  /// Returns `true` if this call closed it.
  pub fn close(&self) -> bool {
    discard_pending(&self.rx)
  }

  pub fn is_closed(&self) -> bool {
    self.rx.is_closed()
  }
}

impl<T> fmt::Debug for PushReceiver<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PushReceiver").field("closed", &self.is_closed()).finish()
  }
}

/// Shared by every clone of a receiver; closes the outlet when the last one goes.
struct DiscardOnDrop<T>(async_channel::Receiver<Envelope<T>>);

impl<T> Drop for DiscardOnDrop<T> {
  fn drop(&mut self) {
    discard_pending(&self.0);
  }
}

fn discard_pending<T>(rx: &async_channel::Receiver<Envelope<T>>) -> bool {
  let closed_now = rx.close();
  // Dropping an envelope's ack fails the producer waiting on it.
  while rx.try_recv().is_ok() {}
  closed_now
}

/// Sending end of a listener's accept-error outlet.
pub type AcceptErrorSender = async_channel::Sender<MuxError>;

/// Receiving end of a listener's accept-error outlet.
pub type AcceptErrorReceiver = async_channel::Receiver<MuxError>;

/// Creates an unbuffered push outlet.
pub fn push_outlet<T>() -> (PushSender<T>, PushReceiver<T>) {
  let (tx, rx) = async_channel::bounded(1);
  let last = Arc::new(DiscardOnDrop(rx.clone()));
  (PushSender { tx }, PushReceiver { rx, _last: last })
}

/// Creates the bounded accept-error outlet. Producers use `try_send` and drop on overflow.
pub fn accept_error_outlet(capacity: usize) -> (AcceptErrorSender, AcceptErrorReceiver) {
  async_channel::bounded(capacity.max(1))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn send_waits_until_item_is_taken() {
    let (tx, rx) = push_outlet::<u32>();
    let producer = tokio::spawn(async move { tx.send(1).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!producer.is_finished());

    assert_eq!(rx.recv().await.unwrap(), 1);
    producer.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn close_fails_waiting_producers() {
    let (tx, rx) = push_outlet::<u32>();
    let producer = tokio::spawn(async move { tx.send(1).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(rx.close());
    assert!(!rx.close());
    assert!(matches!(producer.await.unwrap(), Err(MuxError::SessionClosed)));
    assert!(rx.recv().await.is_err());
  }

  #[tokio::test]
  async fn dropping_every_receiver_fails_producers() {
    let (tx, rx) = push_outlet::<u32>();
    let clone = rx.clone();
    let producer = {
      let tx = tx.clone();
      tokio::spawn(async move { tx.send(1).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    drop(rx);
    assert!(!tx.is_closed());
    drop(clone);
    assert!(matches!(producer.await.unwrap(), Err(MuxError::SessionClosed)));
    assert!(tx.is_closed());
  }

  #[tokio::test]
  async fn withdrawn_item_is_skipped() {
    let (tx, rx) = push_outlet::<u32>();
    let first = tokio::time::timeout(Duration::from_millis(20), tx.send(1)).await;
    assert!(first.is_err());

    let producer = tokio::spawn(async move { tx.send(2).await });
    assert_eq!(rx.recv().await.unwrap(), 2);
    producer.await.unwrap().unwrap();
  }
}
