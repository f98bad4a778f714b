//! Directory readiness handshake.
//!
//! The filesystem bridge reports a new directory before it may be able to
//! accept files. It hands the router a [`DirReady`] and keeps the matching
//! [`DirAck`], firing it once the directory can be written into.

use std::time::Duration;
use tokio::sync::oneshot;

/// Waiting side, carried by [`EventKind::Mkdir`](super::EventKind::Mkdir).
#[derive(Debug)]
pub struct DirReady {
    rx: Option<oneshot::Receiver<()>>,
}

/// Acknowledging side, kept by the bridge.
#[derive(Debug)]
pub struct DirAck {
    tx: oneshot::Sender<()>,
}

impl DirReady {
    /// The directory already exists (e.g. reported after the fact).
    pub fn materialized() -> Self {
        Self { rx: None }
    }

    /// A handshake whose acknowledgement is still to come.
    pub fn pending() -> (DirAck, DirReady) {
        let (tx, rx) = oneshot::channel();
        (DirAck { tx }, DirReady { rx: Some(rx) })
    }

    /// Wait at most `timeout` for the acknowledgement. A dropped
    /// [`DirAck`] counts as never acknowledged.
    pub async fn wait(self, timeout: Duration) -> bool {
        match self.rx {
            None => true,
            Some(rx) => matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(()))),
        }
    }
}

impl DirAck {
    pub fn ack(self) {
        let _ = self.tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_materialized_is_ready() {
        assert!(DirReady::materialized().wait(Duration::ZERO).await);
    }

    #[tokio::test]
    async fn test_ack_releases_waiter() {
        let (ack, ready) = DirReady::pending();
        let waiter = tokio::spawn(ready.wait(Duration::from_secs(5)));
        ack.ack();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_timeout_without_ack() {
        let (_ack, ready) = DirReady::pending();
        assert!(!ready.wait(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_dropped_ack_fails_fast() {
        let (ack, ready) = DirReady::pending();
        drop(ack);
        assert!(!ready.wait(Duration::from_secs(5)).await);
    }
}
