//! Task ownership.
//!
//! Every component that runs work in the background is handed a
//! [`TaskScope`] at construction instead of spawning onto the global
//! runtime, so shutdown (and tests) can cancel and await all of it.

use std::{future::Future, sync::Arc};

use rayon::{ThreadPool, ThreadPoolBuilder};
use rootcause::{Report, report};
use tokio::sync::{mpsc, oneshot};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

#[derive(Debug, Clone)]
pub struct TaskScope {
    tracker: TaskTracker,
    cancel: CancellationToken,
    fatal: mpsc::UnboundedSender<Report>,
}

/// Receives unrecoverable errors raised by tasks of a [`TaskScope`].
#[derive(Debug)]
pub struct FatalErrors(mpsc::UnboundedReceiver<Report>);

impl FatalErrors {
    /// Waits for the next fatal error. `None` once every scope handle is gone.
    pub async fn next(&mut self) -> Option<Report> {
        self.0.recv().await
    }

    /// Non-blocking check, mostly for tests.
    pub fn try_next(&mut self) -> Option<Report> {
        self.0.try_recv().ok()
    }
}

impl TaskScope {
    #[must_use]
    pub fn new() -> (Self, FatalErrors) {
        let (fatal, rx) = mpsc::unbounded_channel();
        let scope = Self {
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            fatal,
        };

        (scope, FatalErrors(rx))
    }

    /// Runs `fut` until it completes or the scope shuts down.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = fut => {}
            }
        });
    }

    /// Like [`TaskScope::spawn`], an `Err` is forwarded to [`FatalErrors`].
    pub fn spawn_fallible<F>(&self, fut: F)
    where
        F: Future<Output = Result<(), Report>> + Send + 'static,
    {
        let fatal = self.fatal.clone();
        self.spawn(async move {
            if let Err(error) = fut.await {
                tracing::error!("{error}");
                let _ = fatal.send(error);
            }
        });
    }

    /// Runs blocking I/O on tokio's blocking pool, owned by this scope.
    ///
    /// # Errors
    ///
    /// Fails if the closure panicked.
    pub async fn blocking<F, R>(&self, f: F) -> Result<R, Report>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        Ok(self.tracker.spawn_blocking(f).await?)
    }

    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels every task and waits for all of them, blocking calls included.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// The worker pool for pure CPU work (filtering, weighing, ranking).
///
/// Kept apart from tokio's blocking pool so a long index build can't
/// starve ranking of results that are already available.
#[derive(Debug, Clone)]
pub struct ComputePool(Arc<ThreadPool>);

impl ComputePool {
    /// `threads` of `None` lets rayon pick from the CPU count.
    ///
    /// # Errors
    ///
    /// Fails if the OS refuses to start the worker threads.
    pub fn new(threads: Option<usize>) -> Result<Self, Report> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.unwrap_or(0))
            .thread_name(|i| format!("sift-compute-{i}"))
            .build()?;

        Ok(Self(Arc::new(pool)))
    }

    /// Runs `f` on the pool and awaits its result.
    ///
    /// # Errors
    ///
    /// Fails if `f` panicked.
    pub async fn run<F, R>(&self, f: F) -> Result<R, Report>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.0.spawn(move || {
            let _ = tx.send(f());
        });

        rx.await.map_err(|_| report!("compute task panicked"))
    }
}
