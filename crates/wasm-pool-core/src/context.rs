//! Cancellation and deadlines for pool operations.
//!
//! A [`RunContext`] travels with every `init` and `run` call. It ends either
//! when its deadline passes or when the paired [`CancelHandle`] fires, and
//! [`RunContext::done`] resolves at that moment. Contexts are cheap to clone;
//! clones observe the same cancellation.

use std::future::pending;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};

use wasm_pool_common::CancelReason;

/// Deadline and cancellation signal for a unit of work.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels the [`RunContext`] it was created with.
///
/// Dropping the handle without calling [`cancel`](Self::cancel) leaves the
/// context running until its deadline, if any.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel the context and every clone of it.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl RunContext {
    /// A context that never ends.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that ends after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    /// A context that ends at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::background().deadline(deadline)
    }

    /// A context that ends when the returned handle is cancelled.
    pub fn cancellable() -> (Self, CancelHandle) {
        Self::background().child()
    }

    /// Derive a context that also ends when the returned handle is cancelled.
    ///
    /// The child keeps this context's deadline. It does not observe this
    /// context's own cancel handle.
    pub fn child(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            deadline: self.deadline,
            cancel: Some(rx),
        };
        (ctx, CancelHandle { tx })
    }

    /// Tighten the deadline to at most `timeout` from now.
    #[must_use]
    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline(Instant::now() + timeout)
    }

    /// Tighten the deadline to at most `deadline`.
    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// The deadline, if any.
    pub fn get_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context ended, or `None` while it is still live.
    pub fn err(&self) -> Option<CancelReason> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(CancelReason::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(CancelReason::DeadlineExceeded);
        }
        None
    }

    /// Returns `true` once the context has ended.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolve when the context ends, yielding the reason.
    ///
    /// Never resolves for a background context.
    pub async fn done(&self) -> CancelReason {
        let cancelled = async {
            match &self.cancel {
                Some(rx) => {
                    let mut rx = rx.clone();
                    let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                    if closed {
                        // Handle dropped without cancelling.
                        pending::<()>().await;
                    }
                }
                None => pending::<()>().await,
            }
        };

        let expired = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = cancelled => CancelReason::Cancelled,
            () = expired => CancelReason::DeadlineExceeded,
        }
    }
}
