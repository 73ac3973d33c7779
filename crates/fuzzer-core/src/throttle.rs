//! Request-rate gating for the job producer.
//!
//! A single-slot gate: a pacer task deposits at most one pending permit every
//! `1000 / max_req_sec` milliseconds, and the producer must take one permit
//! before each enqueue. Permits never accumulate beyond one, so a stalled
//! producer cannot burst afterwards.
//!
//! # Example
//!
//! ```rust,no_run
//! use fuzzer_core::throttle::RateLimiter;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() {
//! let token = CancellationToken::new();
//! // At most 10 enqueues per second.
//! let mut limiter = RateLimiter::new(10).expect("non-zero rate");
//! if let Some(pacer) = limiter.pacer() {
//!     tokio::spawn(pacer.run(token.clone()));
//! }
//! while limiter.acquire(&token).await {
//!     // enqueue one job
//! #   break;
//! }
//! # }
//! ```

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Permit gate shared between the pacer task and the producer.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    permits: mpsc::Receiver<()>,
    pacer: Option<mpsc::Sender<()>>,
}

impl RateLimiter {
    /// Returns `None` when `max_req_sec` is 0 (no limit).
    pub fn new(max_req_sec: u32) -> Option<Self> {
        if max_req_sec == 0 {
            return None;
        }
        let (tx, rx) = mpsc::channel(1);
        Some(Self {
            interval: Self::interval_for(max_req_sec),
            permits: rx,
            pacer: Some(tx),
        })
    }

    /// Spacing between permits for a requests-per-second ceiling.
    pub fn interval_for(max_req_sec: u32) -> Duration {
        Duration::from_millis(1000 / u64::from(max_req_sec.max(1))).max(Duration::from_millis(1))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Take the pacer half. Must be spawned for permits to flow.
    pub fn pacer(&mut self) -> Option<Pacer> {
        self.pacer.take().map(|tx| Pacer {
            interval: self.interval,
            tx,
        })
    }

    /// Wait for one permit.
    ///
    /// Returns false if shutdown began first or the pacer is gone.
    pub async fn acquire(&mut self, cancel_token: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            () = cancel_token.cancelled() => false,
            permit = self.permits.recv() => permit.is_some(),
        }
    }
}

/// Background half of a [`RateLimiter`].
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    tx: mpsc::Sender<()>,
}

impl Pacer {
    /// Deposit permits until cancellation. Never blocks on a pending permit.
    pub async fn run(self, cancel_token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    match self.tx.try_send(()) {
                        Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
                        Err(mpsc::error::TrySendError::Closed(())) => break,
                    }
                }
            }
        }
    }
}
