use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use crate::models::Job;

/// Outcome of a bounded wait on a queue.
#[derive(Debug, PartialEq, Eq)]
pub enum Received<T> {
    Item(T),
    /// Nothing arrived within the wait period.
    Idle,
    /// The queue is empty and every sender is gone.
    Closed,
}

/// Bounded job queue: one producer, many workers.
pub fn job_queue(capacity: usize) -> (mpsc::Sender<Job>, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, JobReceiver::new(rx))
}

/// Receiving half of the job queue, shared by every worker.
///
/// Each job is handed to exactly one worker.
#[derive(Debug, Clone)]
pub struct JobReceiver {
    inner: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl JobReceiver {
    pub fn new(rx: mpsc::Receiver<Job>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rx)),
        }
    }

    /// Wait at most `wait` for the next job.
    pub async fn recv_timeout(&self, wait: Duration) -> Received<Job> {
        let next = tokio::time::timeout(wait, async { self.inner.lock().await.recv().await }).await;
        match next {
            Ok(Some(job)) => Received::Item(job),
            Ok(None) => Received::Closed,
            Err(_elapsed) => Received::Idle,
        }
    }
}
