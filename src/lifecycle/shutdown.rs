//! Shutdown coordination for the registry.

use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of a registry with respect to shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Accepting registrations, services may be serving.
    Open,
    /// A close was requested and the shutdown body is running.
    Closing,
    /// Shutdown body finished. Terminal.
    Closed,
}

/// Coordinator for one-shot shutdown.
///
/// Wraps a watch channel so that late subscribers still observe the current
/// state. The `Open → Closing` transition doubles as the "first caller wins"
/// latch: exactly one [`Shutdown::trigger`] call ever returns `true`.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<LifecycleState>>,
}

impl Shutdown {
    /// Create a new coordinator in the `Open` state.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecycleState::Open);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    /// Move `Open → Closing`. Returns `true` only for the caller that made the transition.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == LifecycleState::Open {
                *state = LifecycleState::Closing;
                true
            } else {
                false
            }
        })
    }

    /// Mark the shutdown body as finished.
    pub fn complete(&self) {
        self.tx.send_replace(LifecycleState::Closed);
    }

    pub fn is_closing(&self) -> bool {
        self.state() != LifecycleState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == LifecycleState::Closed
    }

    /// Wait until shutdown has begun.
    pub async fn closing(&self) {
        self.wait_until(|state| *state != LifecycleState::Open).await;
    }

    /// Wait until the shutdown body has finished.
    pub async fn closed(&self) {
        self.wait_until(|state| *state == LifecycleState::Closed).await;
    }

    async fn wait_until(&self, f: impl FnMut(&LifecycleState) -> bool) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(f).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn trigger_wins_once() {
        let shutdown = Shutdown::new();
        assert_eq!(shutdown.state(), LifecycleState::Open);

        assert!(shutdown.trigger());
        assert!(!shutdown.trigger());
        assert_eq!(shutdown.state(), LifecycleState::Closing);

        shutdown.complete();
        assert!(!shutdown.trigger());
        assert!(shutdown.is_closed());
    }

    #[tokio::test]
    async fn late_waiter_sees_closed() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.complete();

        tokio::time::timeout(Duration::from_millis(100), shutdown.closed())
            .await
            .expect("closed() should resolve immediately");
    }

    #[tokio::test]
    async fn closing_wakes_subscribers() {
        let shutdown = Shutdown::new();
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.closing().await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
