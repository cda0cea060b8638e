//! Close signalling.
//!
//! Every component owns one `CloseSignal`; all of its blocking points wait on
//! the signal alongside their real work and bail out with `Closed` when it
//! fires. The implementation rides on channel disconnection: closing drops
//! the only sender of a zero-capacity channel, which wakes every waiter at
//! once and keeps later waiters from ever blocking.

use futures::future::{select, Either};
use std::future::Future;
use std::sync::{Mutex, PoisonError};

#[derive(Debug)]
pub struct CloseSignal {
    guard: Mutex<Option<flume::Sender<()>>>,
    watch: flume::Receiver<()>,
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CloseSignal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = flume::bounded(0);
        Self {
            guard: Mutex::new(Some(tx)),
            watch: rx,
        }
    }

    /// Fire the signal. Returns `true` on the first call only.
    pub fn close(&self) -> bool {
        self.guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Resolves once the signal has fired.
    pub async fn closed(&self) {
        // Nothing is ever sent; the recv completes on disconnection.
        let _ = self.watch.recv_async().await;
    }

    /// Run `fut` to completion unless the signal fires first.
    ///
    /// Returns `None` when the signal won the race.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        match select(Box::pin(self.closed()), Box::pin(fut)).await {
            Either::Left(((), _)) => None,
            Either::Right((out, _)) => Some(out),
        }
    }
}
