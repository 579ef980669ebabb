//! Runner lifecycle: spawn, signal, drain, abort.
//!
//! On a shutdown signal the supervisor cancels the shutdown token, which makes
//! every runner stop polling, flush and commit. Runners still busy when the
//! grace period ends have their persistence calls and retry backoff
//! interrupted through the abort token. Tasks that outlive a further
//! [`ABORT_DEADLINE`] are aborted and report nothing.

use futures::future::join_all;
use snapshare_runtime::{ConsumerGroupRunner, RunnerReport};
use std::future::Future;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Time runners get to unwind after the abort token fires.
pub const ABORT_DEADLINE: Duration = Duration::from_secs(5);

/// Owns the runner tasks and the two cancellation tokens.
pub struct Supervisor {
    shutdown: CancellationToken,
    abort: CancellationToken,
    grace: Duration,
    abort_deadline: Duration,
    handles: Vec<JoinHandle<RunnerReport>>,
}

impl Supervisor {
    /// Create a supervisor with the given shutdown grace period.
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self {
            shutdown: CancellationToken::new(),
            abort: CancellationToken::new(),
            grace,
            abort_deadline: ABORT_DEADLINE,
            handles: Vec::new(),
        }
    }

    /// Override [`ABORT_DEADLINE`].
    #[must_use]
    pub const fn with_abort_deadline(mut self, deadline: Duration) -> Self {
        self.abort_deadline = deadline;
        self
    }

    /// Token that stops runners from accepting new work.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Token that interrupts retry backoff once the grace period is over.
    #[must_use]
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Start `runner` on its own task.
    pub fn spawn(&mut self, runner: ConsumerGroupRunner) {
        self.handles.push(runner.spawn());
    }

    /// Number of runners started.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no runner has been started.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for `signal`, then drain every runner and collect their reports.
    pub async fn run_until(self, signal: impl Future<Output = ()>) -> Vec<RunnerReport> {
        tracing::info!(runners = self.handles.len(), "Worker running");
        signal.await;

        tracing::info!(grace_secs = self.grace.as_secs(), "Shutting down runners");
        self.shutdown.cancel();

        let aborts: Vec<_> = self.handles.iter().map(JoinHandle::abort_handle).collect();
        let mut joined = std::pin::pin!(join_all(self.handles));
        let results = tokio::select! {
            results = &mut joined => results,
            () = tokio::time::sleep(self.grace) => {
                tracing::warn!("Grace period elapsed, aborting in-flight work");
                self.abort.cancel();
                tokio::select! {
                    results = &mut joined => results,
                    () = tokio::time::sleep(self.abort_deadline) => {
                        let stuck = aborts.iter().filter(|handle| !handle.is_finished()).count();
                        tracing::error!(stuck, "Runners did not stop, aborting their tasks");
                        for handle in &aborts {
                            handle.abort();
                        }
                        joined.await
                    },
                }
            },
        };

        results
            .into_iter()
            .filter_map(|result| match result {
                Ok(report) => Some(report),
                Err(e) if e.is_cancelled() => None,
                Err(e) => {
                    tracing::error!(error = %e, "Runner task failed");
                    None
                },
            })
            .collect()
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
