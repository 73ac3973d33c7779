use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::FuzzError;
use crate::models::Job;
use crate::report::{RunEvent, RunReporter};
use crate::shutdown::Shutdown;
use crate::stats::{StatsHandle, StatsUpdate};
use crate::template::{Template, clean_word};
use crate::throttle::RateLimiter;

/// Streams candidate URLs from the wordlist into the job queue.
pub struct Producer {
    template: Template,
    wordlist: PathBuf,
    jobs: mpsc::Sender<Job>,
    stats: StatsHandle,
    limiter: Option<RateLimiter>,
}

impl Producer {
    pub fn new(
        template: Template,
        wordlist: impl Into<PathBuf>,
        jobs: mpsc::Sender<Job>,
        stats: StatsHandle,
        limiter: Option<RateLimiter>,
    ) -> Self {
        Self {
            template,
            wordlist: wordlist.into(),
            jobs,
            stats,
            limiter,
        }
    }

    /// Produce until EOF or shutdown. Read errors end the run.
    pub async fn run<R: RunReporter>(self, shutdown: Shutdown, reporter: Arc<R>) {
        let cancel_token = shutdown.token();
        if let Err(e) = self.produce(&cancel_token, reporter.as_ref()).await {
            reporter.report(RunEvent::Fatal { error: &e });
            shutdown.fail(e);
        }
    }

    /// Count, rewind, then enqueue one job per non-empty line.
    ///
    /// The total reaches the stats owner before the first job is enqueued.
    /// Returns the number of jobs enqueued.
    pub async fn produce<R: RunReporter>(
        mut self,
        cancel_token: &CancellationToken,
        reporter: &R,
    ) -> Result<u64, FuzzError> {
        let file = File::open(&self.wordlist).await.map_err(|e| {
            FuzzError::Io(format!(
                "error in opening word list file {}: {e}",
                self.wordlist.display()
            ))
        })?;
        let mut reader = BufReader::new(file);

        let total = count_words(&mut reader).await?;
        self.stats.send(StatsUpdate::Total(total)).await;
        reporter.report(RunEvent::WordlistCounted { total });
        reader.seek(SeekFrom::Start(0)).await?;

        let mut enqueued = 0;
        let mut buf = Vec::new();
        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            buf.clear();
            let read = reader.read_until(b'\n', &mut buf).await.map_err(|e| {
                FuzzError::Io(format!("error in reading line from file: {e}"))
            })?;
            if read == 0 {
                break;
            }

            let word = clean_word(&String::from_utf8_lossy(&buf));
            if word.is_empty() {
                continue;
            }
            let job = Job::new(self.template.render(&word));

            if let Some(limiter) = self.limiter.as_mut()
                && !limiter.acquire(cancel_token).await
            {
                break;
            }

            let sent = tokio::select! {
                biased;
                () = cancel_token.cancelled() => break,
                sent = self.jobs.send(job) => sent,
            };
            if sent.is_err() {
                break;
            }
            enqueued += 1;
        }

        Ok(enqueued)
    }
}

/// Count lines that are non-empty after cleaning.
async fn count_words<B: AsyncBufRead + Unpin>(reader: &mut B) -> Result<u64, FuzzError> {
    let mut total = 0;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|e| FuzzError::Io(format!("error in counting word list: {e}")))?;
        if read == 0 {
            break;
        }
        if !clean_word(&String::from_utf8_lossy(&buf)).is_empty() {
            total += 1;
        }
    }
    Ok(total)
}
