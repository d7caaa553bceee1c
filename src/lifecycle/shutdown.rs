//! Shutdown coordination for the relay.
//!
//! The trigger is level-triggered: a [`ShutdownSignal`] taken after
//! [`Shutdown::trigger`] still resolves, so a server started late in a
//! shutdown sequence stops straight away.

use tokio::sync::watch;

/// Owner side of the shutdown request.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A signal that resolves once shutdown is requested.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Waiting side of [`Shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve when shutdown is requested or the [`Shutdown`] is dropped.
    pub async fn recv(&mut self) {
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_reaches_every_subscriber() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.subscribe();

        shutdown.trigger();
        assert!(shutdown.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), async {
            a.recv().await;
            b.recv().await;
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn late_subscriber_sees_earlier_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let mut late = shutdown.subscribe();
        tokio::time::timeout(Duration::from_secs(1), late.recv())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_owner_releases_waiters() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();
        drop(shutdown);
        tokio::time::timeout(Duration::from_secs(1), signal.recv())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn signal_waits_until_triggered() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.subscribe();
        let pending = tokio::time::timeout(Duration::from_millis(50), signal.recv()).await;
        assert!(pending.is_err());
    }
}
