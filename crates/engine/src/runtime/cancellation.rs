//! A cancellation token tree (spec §5 "Cancellation"), expressed as a small
//! struct over a `watch` channel rather than pulling in `tokio-util`: the
//! teacher has no existing cancellation-token dependency, and a `watch`
//! channel already covers the one thing this needs (observable, idempotent,
//! broadcast-to-many-clones cancellation).

use tokio::sync::watch;

/// Held by the submission owner (the Scheduler); flips every clone of the
/// matching [`CancellationToken`] to the cancelled state.
#[derive(Clone)]
pub struct CancellationSource {
    tx: watch::Sender<bool>,
}

/// Held by everything downstream of the Scheduler (runtime adapters, stage
/// operations, HTTP calls) that must observe cancellation.
#[derive(Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

impl CancellationSource {
    pub fn new() -> (Self, CancellationToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancellationToken { rx })
    }

    /// Idempotent: cancelling twice is a no-op the second time.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the source cancels. Safe to await concurrently from
    /// multiple clones.
    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_is_observed_by_every_clone() {
        let (source, token) = CancellationSource::new();
        let mut a = token.clone();
        let mut b = token.clone();
        assert!(!a.is_cancelled());

        source.cancel();
        a.cancelled().await;
        b.cancelled().await;
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[test]
    fn cancel_is_idempotent() {
        let (source, token) = CancellationSource::new();
        source.cancel();
        source.cancel();
        assert!(token.is_cancelled());
    }
}
