use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::FuzzConfig;
use crate::events::EventPublisher;
use crate::job::{JobReceiver, Received};
use crate::models::{ClassifiedResponse, Event, FuzzRequest, FuzzResult, Job};
use crate::report::{RunEvent, RunReporter};
use crate::shutdown::Shutdown;
use crate::stats::{StatsHandle, StatsUpdate};
use crate::traits::{HeaderProvider, HttpClient, RequestTransform};

/// Everything a worker shares with its siblings.
pub struct WorkerContext<C, R>
where
    C: HttpClient,
    R: RunReporter,
{
    pub client: C,
    pub config: Arc<FuzzConfig>,
    pub headers: Arc<dyn HeaderProvider>,
    pub transform: Arc<dyn RequestTransform>,
    pub jobs: JobReceiver,
    pub stats: StatsHandle,
    pub results: mpsc::Sender<FuzzResult>,
    pub events: EventPublisher,
    pub reporter: Arc<R>,
    pub shutdown: Shutdown,
}

/// How a single job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The request failed at the transport level.
    Failed,
    /// The response matched a filter.
    Filtered,
    /// The response was handed to the sink.
    Saved,
}

/// One request executor pulling from the shared job queue.
pub struct Worker<C, R>
where
    C: HttpClient,
    R: RunReporter,
{
    id: usize,
    ctx: Arc<WorkerContext<C, R>>,
}

impl<C, R> Worker<C, R>
where
    C: HttpClient,
    R: RunReporter,
{
    pub fn new(id: usize, ctx: Arc<WorkerContext<C, R>>) -> Self {
        Self { id, ctx }
    }

    /// Process jobs until shutdown, or until the queue is closed and empty.
    pub async fn run(self) {
        let cancel_token = self.ctx.shutdown.token();
        let wait = self.ctx.config.timings.queue_wait;

        loop {
            let received = tokio::select! {
                biased;
                () = cancel_token.cancelled() => break,
                received = self.ctx.jobs.recv_timeout(wait) => received,
            };

            match received {
                Received::Item(job) => {
                    if self.process_job(&job, &cancel_token).await.is_none() {
                        break;
                    }
                }
                Received::Idle => continue,
                Received::Closed => break,
            }
        }

        if !self.ctx.config.silent {
            self.ctx.reporter.report(RunEvent::TaskStopped {
                task: "worker",
                live: self.ctx.shutdown.live_count().saturating_sub(1),
            });
        }
    }

    /// Execute and classify one job.
    ///
    /// Returns `None` when shutdown interrupted the request; such a job is
    /// not counted.
    pub async fn process_job(
        &self,
        job: &Job,
        cancel_token: &CancellationToken,
    ) -> Option<JobOutcome> {
        let ctx = &self.ctx;

        let mut url = job.url.clone();
        let mut headers = ctx.headers.headers();
        ctx.transform
            .apply(&mut url, ctx.config.proxy(), &mut headers);
        let request = FuzzRequest::new(url, ctx.config.method.as_str()).with_headers(headers);

        let response = tokio::select! {
            biased;
            () = cancel_token.cancelled() => return None,
            response = ctx.client.execute(&request) => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                ctx.stats.send(StatsUpdate::Error).await;
                ctx.stats.send(StatsUpdate::Processed).await;
                ctx.events
                    .publish(Event::Error {
                        message: e.to_string(),
                    })
                    .await;
                ctx.reporter.report(RunEvent::JobFailed {
                    worker_id: self.id,
                    url: &job.url,
                    error: &e,
                });
                return Some(JobOutcome::Failed);
            }
        };

        // Redirects are judged against the URL actually requested; the
        // record carries the job URL.
        let mut classified = ClassifiedResponse::classify(&request.url, &response);
        classified.url.clone_from(&job.url);

        let outcome = if ctx.config.filters.accepts(&classified) {
            ctx.stats.send(StatsUpdate::Saved).await;
            // The sink may already be gone during shutdown.
            let _ = ctx.results.send(FuzzResult::from(classified)).await;
            JobOutcome::Saved
        } else {
            JobOutcome::Filtered
        };

        // Counted last, so a completed run has every saved record queued.
        ctx.stats.send(StatsUpdate::Processed).await;
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::Timings;
    use crate::error::FuzzError;
    use crate::filter::Filters;
    use crate::headers::DefaultHeaders;
    use crate::job::job_queue;
    use crate::shutdown::StopReason;
    use crate::testutil::{MockClient, MockReporter};
    use crate::traits::{NoopTransform, TunnelTransform};

    struct Harness {
        ctx: Arc<WorkerContext<MockClient, MockReporter>>,
        jobs: mpsc::Sender<Job>,
        updates: mpsc::Receiver<StatsUpdate>,
        results: mpsc::Receiver<FuzzResult>,
        events: mpsc::Receiver<Event>,
    }

    fn harness(client: MockClient, config: FuzzConfig) -> Harness {
        harness_with(client, config, Arc::new(NoopTransform))
    }

    fn harness_with(
        client: MockClient,
        config: FuzzConfig,
        transform: Arc<dyn RequestTransform>,
    ) -> Harness {
        let (jobs, rx) = job_queue(16);
        let (stats, updates) = StatsHandle::channel(64);
        let (results_tx, results) = mpsc::channel(16);
        let (events_tx, events) = EventPublisher::channel(16);
        let ctx = Arc::new(WorkerContext {
            client,
            config: Arc::new(config.with_timings(Timings::uniform(Duration::from_millis(20)))),
            headers: Arc::new(DefaultHeaders::default()),
            transform,
            jobs: rx,
            stats,
            results: results_tx,
            events: events_tx,
            reporter: Arc::new(MockReporter::new()),
            shutdown: Shutdown::new(),
        });
        Harness {
            ctx,
            jobs,
            updates,
            results,
            events,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<StatsUpdate>) -> Vec<StatsUpdate> {
        let mut out = Vec::new();
        while let Ok(update) = rx.try_recv() {
            out.push(update);
        }
        out
    }

    #[tokio::test]
    async fn accepted_response_is_saved() {
        let client = MockClient::ok(200, "a b\nc");
        let mut h = harness(client.clone(), FuzzConfig::new("http://x/FUZZ", "w.txt"));
        let worker = Worker::new(0, h.ctx.clone());

        let outcome = worker
            .process_job(&Job::new("http://x/admin"), &CancellationToken::new())
            .await;
        assert_eq!(outcome, Some(JobOutcome::Saved));
        assert_eq!(
            drain(&mut h.updates),
            vec![StatsUpdate::Saved, StatsUpdate::Processed]
        );

        let result = h.results.try_recv().unwrap();
        assert_eq!(result.url, "http://x/admin");
        assert_eq!(result.status_code, 200);
        assert_eq!(result.size, 5);
        assert_eq!(result.lines, 1);
        assert_eq!(result.words, 1);
        assert_eq!(result.redirect_location, "");

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, "GET");
        assert!(calls[0].headers.contains_key("user-agent"));
    }

    #[tokio::test]
    async fn filtered_response_is_counted_but_not_saved() {
        let client = MockClient::ok(200, "ok").route("http://x/secret", 404, "nope");
        let config = FuzzConfig::new("http://x/FUZZ", "w.txt")
            .with_filters(Filters::new().with_status_codes([404]));
        let mut h = harness(client, config);
        let worker = Worker::new(0, h.ctx.clone());

        let outcome = worker
            .process_job(&Job::new("http://x/secret"), &CancellationToken::new())
            .await;
        assert_eq!(outcome, Some(JobOutcome::Filtered));
        assert_eq!(drain(&mut h.updates), vec![StatsUpdate::Processed]);
        assert!(h.results.try_recv().is_err());
    }

    #[tokio::test]
    async fn transport_error_counts_error_and_processed() {
        let client = MockClient::failing(FuzzError::Timeout(20));
        let mut h = harness(client, FuzzConfig::new("http://x/FUZZ", "w.txt"));
        let worker = Worker::new(3, h.ctx.clone());

        let outcome = worker
            .process_job(&Job::new("http://x/admin"), &CancellationToken::new())
            .await;
        assert_eq!(outcome, Some(JobOutcome::Failed));
        assert_eq!(
            drain(&mut h.updates),
            vec![StatsUpdate::Error, StatsUpdate::Processed]
        );
        assert!(matches!(h.events.try_recv(), Ok(Event::Error { .. })));
        assert_eq!(h.ctx.reporter.count("JobFailed"), 1);
        assert!(h.results.try_recv().is_err());
    }

    #[tokio::test]
    async fn redirect_is_recorded() {
        let client = MockClient::ok(200, "").redirect("http://x/old", "http://x/new");
        let mut h = harness(client, FuzzConfig::new("http://x/FUZZ", "w.txt"));
        let worker = Worker::new(0, h.ctx.clone());

        worker
            .process_job(&Job::new("http://x/old"), &CancellationToken::new())
            .await;
        let result = h.results.try_recv().unwrap();
        assert_eq!(result.url, "http://x/old");
        assert_eq!(result.redirect_location, "http://x/new");
    }

    #[tokio::test]
    async fn tunnel_transform_targets_proxy() {
        let client = MockClient::ok(200, "ok");
        let config = FuzzConfig::new("http://x/FUZZ", "w.txt").with_proxy("http://proxy:8080/");
        let mut h = harness_with(client.clone(), config, Arc::new(TunnelTransform));
        let worker = Worker::new(0, h.ctx.clone());

        worker
            .process_job(&Job::new("http://x/admin"), &CancellationToken::new())
            .await;

        let calls = client.calls();
        assert_eq!(calls[0].url, "http://proxy:8080/");
        assert_eq!(calls[0].headers.get("target").unwrap(), "http://x/admin");

        // Final URL equals the requested proxy URL: no redirect, job URL kept.
        let result = h.results.try_recv().unwrap();
        assert_eq!(result.url, "http://x/admin");
        assert_eq!(result.redirect_location, "");
    }

    #[tokio::test]
    async fn in_flight_job_is_discarded_on_shutdown() {
        let client = MockClient::ok(200, "ok").with_delay(Duration::from_secs(5));
        let mut h = harness(client, FuzzConfig::new("http://x/FUZZ", "w.txt"));
        let worker = Worker::new(0, h.ctx.clone());
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            worker.process_job(&Job::new("http://x/admin"), &token),
        )
        .await
        .expect("request must be abandoned on shutdown");
        assert_eq!(outcome, None);
        assert!(drain(&mut h.updates).is_empty());
    }

    #[tokio::test]
    async fn run_exits_when_queue_closes() {
        let client = MockClient::ok(200, "ok");
        let mut h = harness(client, FuzzConfig::new("http://x/FUZZ", "w.txt"));
        for word in ["a", "b", "c"] {
            h.jobs
                .send(Job::new(format!("http://x/{word}")))
                .await
                .unwrap();
        }
        drop(h.jobs);

        let workers: Vec<_> = (0..2)
            .map(|id| tokio::spawn(Worker::new(id, h.ctx.clone()).run()))
            .collect();
        for worker in workers {
            tokio::time::timeout(Duration::from_secs(1), worker)
                .await
                .expect("worker should exit on a closed queue")
                .unwrap();
        }

        let processed = drain(&mut h.updates)
            .into_iter()
            .filter(|u| *u == StatsUpdate::Processed)
            .count();
        assert_eq!(processed, 3);
        assert_eq!(h.ctx.reporter.count("TaskStopped"), 2);
    }

    #[tokio::test]
    async fn run_exits_on_shutdown_with_open_queue() {
        let client = MockClient::ok(200, "ok");
        let h = harness(client, FuzzConfig::new("http://x/FUZZ", "w.txt"));
        let task = tokio::spawn(Worker::new(0, h.ctx.clone()).run());

        tokio::time::sleep(Duration::from_millis(30)).await;
        h.ctx.shutdown.trigger(StopReason::Requested);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("worker should observe shutdown")
            .unwrap();
        drop(h.jobs);
    }
}
