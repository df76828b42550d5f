use std::fmt;

/// A cloneable, one-shot, idempotent close request.
///
/// Firing is backed by closing an `async-channel` that never carries a value,
/// so any number of clones may fire it concurrently. Only the first call
/// observes the transition; later calls are no-ops.
#[derive(Clone)]
pub struct CloseSignal {
  tx: async_channel::Sender<()>,
  rx: async_channel::Receiver<()>,
}

impl CloseSignal {
  pub fn new() -> Self {
    let (tx, rx) = async_channel::bounded(1);
    Self { tx, rx }
  }

  /// Fires the signal.
  ///
  /// # Returns
  /// * `true` if this call fired it.
  /// * `false` if it had already been fired.
  pub fn fire(&self) -> bool {
    self.tx.close()
  }

  pub fn is_fired(&self) -> bool {
    self.tx.is_closed()
  }

  /// Resolves once the signal has been fired. Returns immediately if it already was.
  pub async fn fired(&self) {
    // Nothing is ever sent, so recv only completes with Err(Closed).
    let _ = self.rx.recv().await;
  }
}

impl Default for CloseSignal {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for CloseSignal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CloseSignal").field("fired", &self.is_fired()).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn only_first_fire_reports_transition() {
    let signal = CloseSignal::new();
    let clone = signal.clone();
    assert!(!signal.is_fired());
    assert!(clone.fire());
    assert!(!signal.fire());
    assert!(!clone.fire());
    assert!(signal.is_fired());
  }

  #[tokio::test]
  async fn fired_wakes_waiters() {
    let signal = CloseSignal::new();
    let waiter = {
      let signal = signal.clone();
      tokio::spawn(async move { signal.fired().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());
    signal.fire();
    tokio::time::timeout(Duration::from_secs(1), waiter)
      .await
      .expect("waiter not woken")
      .expect("waiter panicked");
    // Already fired: resolves immediately.
    tokio::time::timeout(Duration::from_millis(50), signal.fired())
      .await
      .expect("fired() should not block after firing");
  }

  #[tokio::test]
  async fn concurrent_fires_never_fault() {
    let signal = CloseSignal::new();
    let mut tasks = Vec::new();
    for _ in 0..16 {
      let s = signal.clone();
      tasks.push(tokio::spawn(async move { s.fire() }));
    }
    let mut winners = 0;
    for t in tasks {
      if t.await.unwrap() {
        winners += 1;
      }
    }
    assert_eq!(winners, 1);
  }
}
