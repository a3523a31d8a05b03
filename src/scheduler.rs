// src/scheduler.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::ReconcileError;
use crate::reconcile::{LifecycleReconciler, RunReport};

/// Outcome of the most recent pass, published for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub finished_at: DateTime<Utc>,
    pub report: Option<RunReport>,
    pub error: Option<String>,
}

pub type StatusReceiver = watch::Receiver<Option<RunStatus>>;

/// Drives `run()` on a fixed interval from one task, so passes never overlap.
/// A tick that comes due while a pass is still running is skipped.
pub struct Scheduler {
    reconciler: LifecycleReconciler,
    interval: Duration,
    cancel: CancellationToken,
    status: watch::Sender<Option<RunStatus>>,
}

impl Scheduler {
    /// The token should be the one handed to the reconciler, so that a stop
    /// request also interrupts a pass in progress between listings.
    pub fn new(reconciler: LifecycleReconciler, interval: Duration, cancel: CancellationToken) -> Self {
        let (status, _) = watch::channel(None);
        Self {
            reconciler,
            interval,
            cancel,
            status,
        }
    }

    pub fn subscribe(&self) -> StatusReceiver {
        self.status.subscribe()
    }

    /// Runs until cancelled. Source outages are logged and retried on the next
    /// tick; store failures end the loop.
    pub async fn run(mut self) -> Result<(), ReconcileError> {
        tracing::info!(
            target: "scheduler",
            interval_secs = self.interval.as_secs(),
            "scheduler started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!(target: "scheduler", "scheduler stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            // Not raced against cancellation: the pass checks the token itself
            // and still commits whatever it already did.
            let outcome = self.reconciler.run().await;
            let finished_at = Utc::now();
            match outcome {
                Ok(report) => {
                    self.status.send_replace(Some(RunStatus {
                        finished_at,
                        report: Some(report),
                        error: None,
                    }));
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(target: "scheduler", error = %e, "pass skipped, retrying next tick");
                    self.status.send_replace(Some(RunStatus {
                        finished_at,
                        report: None,
                        error: Some(e.to_string()),
                    }));
                }
                Err(e) => {
                    tracing::error!(target: "scheduler", error = %e, "store failure, stopping scheduler");
                    self.status.send_replace(Some(RunStatus {
                        finished_at,
                        report: None,
                        error: Some(e.to_string()),
                    }));
                    return Err(e);
                }
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<(), ReconcileError>> {
        tokio::spawn(self.run())
    }
}

/// Cancels `cancel` on Ctrl-C or SIGTERM. Handlers are installed before this
/// returns, so a signal arriving right after the call is not lost. The task
/// also ends when the token is cancelled by someone else.
pub fn cancel_on_shutdown_signal(cancel: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        #[cfg(unix)]
        let terminated = terminate.recv();
        #[cfg(not(unix))]
        let terminated = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = cancel.cancelled() => return,
            Ok(()) = tokio::signal::ctrl_c() => {
                tracing::info!(target: "scheduler", signal = "ctrl-c", "shutdown requested");
            }
            Some(()) = terminated => {
                tracing::info!(target: "scheduler", signal = "sigterm", "shutdown requested");
            }
        }
        cancel.cancel();
    }))
}
