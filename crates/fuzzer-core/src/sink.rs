use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::error::FuzzError;
use crate::models::FuzzResult;
use crate::report::{RunEvent, RunReporter};
use crate::shutdown::{Shutdown, StopReason};

/// Exclusive writer of accepted results, one JSON object per line.
///
/// Every record is flushed and synced before the next one is taken, so a
/// crash loses at most the record being written.
#[derive(Debug)]
pub struct JsonlSink {
    file: File,
    path: PathBuf,
}

impl JsonlSink {
    /// Open for append, creating the file if needed.
    pub async fn open(path: &Path) -> Result<Self, FuzzError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| {
                FuzzError::Io(format!("Failed to open out file {}: {e}", path.display()))
            })?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub async fn write(&mut self, result: &FuzzResult) -> Result<(), FuzzError> {
        let mut line = serde_json::to_vec(result)?;
        line.push(b'\n');
        let (file, path) = (&mut self.file, &self.path);
        let written = async {
            file.write_all(&line).await?;
            file.flush().await?;
            file.sync_data().await
        };
        written
            .await
            .map_err(|e| FuzzError::Io(format!("Failed to write out file {}: {e}", path.display())))
    }

    /// Write results until cancellation.
    ///
    /// A queued backlog is only drained when the run completed on its own;
    /// any other stop reason abandons it.
    pub async fn run<R: RunReporter>(
        mut self,
        mut results: mpsc::Receiver<FuzzResult>,
        shutdown: Shutdown,
        queue_wait: Duration,
        reporter: Arc<R>,
    ) {
        let cancel_token = shutdown.token();

        loop {
            let received = tokio::select! {
                biased;
                () = cancel_token.cancelled() => break,
                received = tokio::time::timeout(queue_wait, results.recv()) => received,
            };

            match received {
                Ok(Some(result)) => {
                    if !self.save(&result, &shutdown, reporter.as_ref()).await {
                        return;
                    }
                }
                Ok(None) => {
                    // Every worker is gone; wait for the stop broadcast.
                    cancel_token.cancelled().await;
                    break;
                }
                Err(_elapsed) => continue,
            }
        }

        if shutdown.reason() == Some(StopReason::Completed) {
            while let Ok(result) = results.try_recv() {
                if !self.save(&result, &shutdown, reporter.as_ref()).await {
                    return;
                }
            }
        }
    }

    async fn save<R: RunReporter>(
        &mut self,
        result: &FuzzResult,
        shutdown: &Shutdown,
        reporter: &R,
    ) -> bool {
        match self.write(result).await {
            Ok(()) => {
                reporter.report(RunEvent::ResultSaved { result });
                true
            }
            Err(e) => {
                reporter.report(RunEvent::Fatal { error: &e });
                shutdown.fail(e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockReporter, make_test_result};

    #[tokio::test]
    async fn writes_one_json_line_per_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let mut sink = JsonlSink::open(&path).await.unwrap();

        let first = make_test_result("http://x/admin", 200);
        let second = make_test_result("http://x/login", 301);
        sink.write(&first).await.unwrap();
        sink.write(&second).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: FuzzResult = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, first);
        let parsed: FuzzResult = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed, second);
    }

    #[tokio::test]
    async fn open_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        std::fs::write(&path, "{\"previous\":true}\n").unwrap();

        let mut sink = JsonlSink::open(&path).await.unwrap();
        sink.write(&make_test_result("http://x/admin", 200))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.starts_with("{\"previous\":true}"));
    }

    #[tokio::test]
    async fn open_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = JsonlSink::open(&dir.path().join("missing/out.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, FuzzError::Io(_)));
    }

    #[tokio::test]
    async fn run_writes_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let sink = JsonlSink::open(&path).await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        let shutdown = Shutdown::new();
        let reporter = Arc::new(MockReporter::new());

        let task = tokio::spawn(sink.run(
            rx,
            shutdown.clone(),
            Duration::from_millis(20),
            reporter.clone(),
        ));

        tx.send(make_test_result("http://x/admin", 200)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.trigger(StopReason::Requested);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("sink should stop on cancellation")
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert_eq!(reporter.count("ResultSaved"), 1);

        // Receiver dropped with the task: late results fail fast.
        assert!(tx.send(make_test_result("http://x/late", 200)).await.is_err());
    }

    #[tokio::test]
    async fn completed_run_drains_backlog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let sink = JsonlSink::open(&path).await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        let shutdown = Shutdown::new();

        tx.send(make_test_result("http://x/a", 200)).await.unwrap();
        tx.send(make_test_result("http://x/b", 200)).await.unwrap();
        shutdown.trigger(StopReason::Completed);

        sink.run(
            rx,
            shutdown,
            Duration::from_millis(20),
            Arc::new(MockReporter::new()),
        )
        .await;
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn requested_stop_abandons_backlog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let sink = JsonlSink::open(&path).await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        let shutdown = Shutdown::new();

        tx.send(make_test_result("http://x/a", 200)).await.unwrap();
        shutdown.trigger(StopReason::Requested);

        sink.run(
            rx,
            shutdown,
            Duration::from_millis(20),
            Arc::new(MockReporter::new()),
        )
        .await;
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 0);
    }
}
