//! Cooperative cancellation signal shared by every in-flight LLM call.
//!
//! A single `bool` watch channel is enough here — the engine only ever
//! needs "has the run been cancelled", not a hierarchy of child tokens, so
//! this stays a plain pair instead of pulling in `tokio-util` for
//! `CancellationToken`.

use tokio::sync::watch;

#[derive(Clone)]
pub struct Cancel(watch::Receiver<bool>);

pub struct CancelSource(watch::Sender<bool>);

impl CancelSource {
    pub fn new() -> (CancelSource, Cancel) {
        let (tx, rx) = watch::channel(false);
        (CancelSource(tx), Cancel(rx))
    }

    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

impl Cancel {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the source has cancelled. A fresh receiver clone is
    /// used internally so concurrent callers can each await independently.
    pub async fn cancelled(&self) {
        let mut rx = self.0.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let (source, cancel) = CancelSource::new();
        assert!(!cancel.is_cancelled());
        source.cancel();
        cancel.cancelled().await;
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn clones_observe_the_same_source() {
        let (source, cancel) = CancelSource::new();
        let cloned = cancel.clone();
        source.cancel();
        cloned.cancelled().await;
        assert!(cancel.is_cancelled());
    }
}
