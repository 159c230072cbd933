//! Cooperative cancellation token (spec §5: "every request carries a
//! cancellation token threaded through driver calls").
//!
//! A small wrapper over `tokio::sync::watch<bool>` rather than
//! `tokio_util::sync::CancellationToken` — see DESIGN.md for why the extra
//! dependency isn't worth it for this narrow a need.

use tokio::sync::watch;

/// Source side: held by whoever can decide to cancel (a plan executor worker
/// reacting to `AbortCanary`/plan cancellation).
#[derive(Debug, Clone)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

/// Sink side: threaded through driver calls and timed waits. Cloning shares
/// the same underlying signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token that never cancels, for call sites with no cancellation
    /// source (e.g. CLI one-shot commands).
    pub fn never() -> Self {
        CancelSource::new().token()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; never resolves otherwise.
    pub async fn cancelled(&mut self) {
        // A `false -> true` edge is the only transition this channel ever
        // makes, so waiting for "changed" is equivalent to waiting for
        // cancellation, and an already-cancelled token returns immediately
        // via the `is_cancelled` check below.
        if *self.rx.borrow() {
            return;
        }
        let _ = self.rx.changed().await;
    }

    /// Race `fut` against cancellation; `Err(())` means cancelled first.
    pub async fn race<F, T>(&mut self, fut: F) -> Result<T, ()>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(()),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_is_observed_by_clones() {
        let source = CancelSource::new();
        let mut a = source.token();
        let b = source.token();
        assert!(!a.is_cancelled());
        source.cancel();
        a.cancelled().await;
        assert!(b.is_cancelled());
    }

    #[tokio::test]
    async fn race_returns_err_when_already_cancelled() {
        let source = CancelSource::new();
        let mut token = source.token();
        source.cancel();
        let result = token.race(async { 42 }).await;
        assert_eq!(result, Err(()));
    }

    #[tokio::test]
    async fn race_returns_ok_when_future_wins() {
        let mut token = CancelToken::never();
        let result = token.race(async { 7 }).await;
        assert_eq!(result, Ok(7));
    }
}
