//! Cooperative cancellation for asynchronous work.
//!
//! An [`AbortController`] owns the decision; any number of [`AbortSignal`]
//! clones observe it. Cancellation is not an error: code awaiting something
//! that may be superseded wraps the await in [`map_abort_to_none`] and
//! treats `None` as "produce no observable effect".

use std::future::Future;

use tokio::sync::watch;

/// The control side of a cancellation signal.
///
/// Dropping the controller does not abort its signals; call
/// [`abort`](Self::abort) explicitly.
#[derive(Debug)]
pub struct AbortController {
    tx: watch::Sender<bool>,
}

/// A cloneable view of an [`AbortController`]'s state.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Abort every signal derived from this controller. Idempotent.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    /// A signal that is never aborted.
    pub fn never() -> Self {
        AbortController::new().signal()
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal is aborted. Never resolves if the controller
    /// is dropped without aborting.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Await `future` unless `signal` is aborted first (or already was).
///
/// Returns `None` when aborted, also when the abort lands just as the future
/// completes, so a caller never acts on a result it no longer wants.
pub async fn map_abort_to_none<F: Future>(future: F, signal: &AbortSignal) -> Option<F::Output> {
    if signal.is_aborted() {
        return None;
    }
    tokio::select! {
        biased;
        _ = signal.aborted() => None,
        output = future => {
            if signal.is_aborted() {
                None
            } else {
                Some(output)
            }
        }
    }
}
