//! Caller-supplied cancellation for the two I/O stages of a search.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Notify};

use crate::error::{SearchError, Stage};

/// Fires when the paired [`CancelHandle`] cancels. Cheap to clone.
///
/// A signal whose handle has been dropped without cancelling never fires.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// The cancelling side of a [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Create a connected handle/signal pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal that is never cancelled.
    pub fn never() -> Self {
        cancel_pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled; pends forever if the handle is gone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::never()
    }
}

/// Run `work` with a fresh signal that fires once `trigger` completes.
///
/// Bridges an outside event (Ctrl-C, a client's cancel notification) into
/// a search. After the trigger fires, `work` still runs to completion so it
/// can observe the signal and unwind.
pub async fn cancel_when<T, W, Fut>(trigger: impl Future<Output = ()>, work: W) -> T
where
    W: FnOnce(CancelSignal) -> Fut,
    Fut: Future<Output = T>,
{
    let (handle, signal) = cancel_pair();
    let work = work(signal);
    tokio::pin!(work);
    tokio::select! {
        biased;
        out = &mut work => out,
        _ = trigger => {
            handle.cancel();
            work.await
        }
    }
}

/// Stop request for one blocking collaborator call.
///
/// Each call gets its own `Abort`, so raising it never reaches work that
/// belongs to another search.
#[derive(Debug, Clone, Default)]
pub struct Abort {
    raised: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Abort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// The raw flag, for hooks that can only poll.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.raised)
    }

    /// Resolves once raised.
    pub async fn raised(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}

/// Run a blocking collaborator call on the blocking pool, racing `cancel`.
///
/// On cancellation the call's [`Abort`] is raised and the stage fails with
/// [`SearchError::Cancelled`]; whatever the call returns afterwards is
/// discarded.
pub(crate) async fn run_blocking<T, F>(
    stage: Stage,
    cancel: &CancelSignal,
    call: F,
) -> Result<T, SearchError>
where
    T: Send + 'static,
    F: FnOnce(&Abort) -> anyhow::Result<T> + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(SearchError::Cancelled { stage });
    }

    let abort = Abort::new();
    let task = tokio::task::spawn_blocking({
        let abort = abort.clone();
        move || call(&abort)
    });
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            abort.raise();
            tracing::warn!(%stage, "search stage cancelled");
            Err(SearchError::Cancelled { stage })
        }
        joined = task => match joined {
            Ok(result) => result.map_err(|e| SearchError::at(stage, e)),
            Err(e) => Err(SearchError::at(stage, anyhow::anyhow!("{stage} task failed: {e}"))),
        },
    }
}
