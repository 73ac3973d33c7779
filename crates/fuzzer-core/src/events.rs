use std::time::Duration;

use tokio::sync::mpsc;

use crate::models::Event;

/// Longest a task will wait for room in the event channel before dropping.
pub const EVENT_SEND_TIMEOUT: Duration = Duration::from_millis(5);

/// Lossy sender side of the outward event stream.
///
/// A slow or absent consumer can never stall the engine: publishing waits at
/// most [`EVENT_SEND_TIMEOUT`] and then gives up.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<Event>,
    wait: Duration,
}

impl EventPublisher {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                wait: EVENT_SEND_TIMEOUT,
            },
            rx,
        )
    }

    /// Returns false if the event was dropped.
    pub async fn publish(&self, event: Event) -> bool {
        self.tx.send_timeout(event, self.wait).await.is_ok()
    }
}
