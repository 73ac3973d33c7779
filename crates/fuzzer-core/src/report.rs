use std::time::Duration;

use uuid::Uuid;

use crate::error::FuzzError;
use crate::models::FuzzResult;
use crate::shutdown::StopReason;
use crate::stats::StatsSnapshot;

/// Diagnostics emitted by the engine and its tasks.
#[derive(Debug, Clone)]
pub enum RunEvent<'a> {
    Started {
        run_id: Uuid,
        url: &'a str,
        method: &'a str,
        workers: usize,
        max_time: Duration,
    },
    ProbeFailed {
        url: &'a str,
        error: &'a FuzzError,
    },
    WordlistCounted {
        total: u64,
    },
    JobFailed {
        worker_id: usize,
        url: &'a str,
        error: &'a FuzzError,
    },
    ResultSaved {
        result: &'a FuzzResult,
    },
    Stats {
        url: &'a str,
        proxy_url: &'a str,
        workers: usize,
        snapshot: &'a StatsSnapshot,
    },
    Fatal {
        error: &'a FuzzError,
    },
    ShutdownTriggered {
        reason: StopReason,
        elapsed: Duration,
    },
    TaskStopped {
        task: &'a str,
        live: usize,
    },
    Finished {
        reason: Option<StopReason>,
        snapshot: &'a StatsSnapshot,
    },
}

/// Trait for receiving run diagnostics (decoupled logging).
pub trait RunReporter: Send + Sync + 'static {
    fn report(&self, event: RunEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRunReporter;

impl RunReporter for TracingRunReporter {
    fn report(&self, event: RunEvent<'_>) {
        match event {
            RunEvent::Started {
                run_id,
                url,
                method,
                workers,
                max_time,
            } => {
                tracing::info!(%run_id, %url, %method, workers, ?max_time, "Fuzzer started");
            }
            RunEvent::ProbeFailed { url, error } => {
                tracing::warn!(%url, %error, "Error in connecting to main url of server");
            }
            RunEvent::WordlistCounted { total } => {
                tracing::debug!(total, "Word list counted");
            }
            RunEvent::JobFailed {
                worker_id,
                url,
                error,
            } => {
                tracing::debug!(worker_id, %url, %error, "Request failed");
            }
            RunEvent::ResultSaved { result } => {
                tracing::debug!(url = %result.url, status = result.status_code, size = result.size, "Result saved");
            }
            RunEvent::Stats {
                url,
                proxy_url,
                workers,
                snapshot,
            } => {
                tracing::info!(
                    %url,
                    %proxy_url,
                    total = snapshot.total,
                    processed = snapshot.processed,
                    left = snapshot.left(),
                    saved = snapshot.saved,
                    errors = snapshot.errors,
                    workers,
                    req_per_sec = format!("{:.2}", snapshot.req_per_sec),
                    "stats"
                );
            }
            RunEvent::Fatal { error } => {
                tracing::error!(%error, "Fatal error, stopping run");
            }
            RunEvent::ShutdownTriggered { reason, elapsed } => {
                tracing::warn!(%reason, ?elapsed, "Shutting down");
            }
            RunEvent::TaskStopped { task, live } => {
                tracing::debug!(%task, live, "Task stopped");
            }
            RunEvent::Finished { reason, snapshot } => {
                tracing::info!(
                    reason = reason.map(|r| r.to_string()).unwrap_or_default(),
                    total = snapshot.total,
                    processed = snapshot.processed,
                    saved = snapshot.saved,
                    errors = snapshot.errors,
                    "Fuzzer finished"
                );
            }
        }
    }
}
