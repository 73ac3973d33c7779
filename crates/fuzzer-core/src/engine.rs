//! The run orchestrator.
//!
//! An [`Engine`] owns one run: it validates the configuration, probes the
//! target, then launches the participants and coordinates their shutdown.
//!
//! ```text
//!  wordlist ──> Producer ──[jobs]──> Worker × N ──[results]──> JsonlSink
//!                  │                     │
//!                  └──────[stats]────────┴──────> StatsAggregator ──> watch
//!                                                        │
//!  max-runtime timer, completion watcher, pacer          └──> [events]
//! ```
//!
//! Every participant is spawned on the shared [`Shutdown`] tracker and stops
//! on its cancellation token. The first trigger (completion, max runtime,
//! `stop()` or a fatal error) decides the [`StopReason`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::config::{DEFAULT_MAX_TIME, FuzzConfig};
use crate::error::FuzzError;
use crate::events::EventPublisher;
use crate::headers::DefaultHeaders;
use crate::job::{JobReceiver, job_queue};
use crate::models::{Event, FuzzRequest, FuzzResult, Job};
use crate::producer::Producer;
use crate::report::{RunEvent, RunReporter, TracingRunReporter};
use crate::shutdown::{EngineState, Shutdown, StopReason};
use crate::sink::JsonlSink;
use crate::stats::{StatsAggregator, StatsHandle, StatsSnapshot, StatsUpdate};
use crate::throttle::RateLimiter;
use crate::traits::{HeaderProvider, HttpClient, NoopTransform, RequestTransform};
use crate::worker::{Worker, WorkerContext};

/// Queues allocated up front and handed to the participants on start.
struct Channels {
    jobs_tx: mpsc::Sender<Job>,
    jobs_rx: JobReceiver,
    results_tx: mpsc::Sender<FuzzResult>,
    results_rx: mpsc::Receiver<FuzzResult>,
    stats: StatsHandle,
    stats_rx: mpsc::Receiver<StatsUpdate>,
    snapshots: watch::Sender<StatsSnapshot>,
}

impl Channels {
    fn new(capacity: usize, snapshots: watch::Sender<StatsSnapshot>) -> Self {
        let (jobs_tx, jobs_rx) = job_queue(capacity);
        let (results_tx, results_rx) = mpsc::channel(capacity.max(1));
        let (stats, stats_rx) = StatsHandle::channel(capacity);
        Self {
            jobs_tx,
            jobs_rx,
            results_tx,
            results_rx,
            stats,
            stats_rx,
            snapshots,
        }
    }
}

/// One fuzzing run against one target.
pub struct Engine<C, R = TracingRunReporter>
where
    C: HttpClient,
    R: RunReporter,
{
    run_id: Uuid,
    config: Arc<FuzzConfig>,
    client: C,
    reporter: Arc<R>,
    headers: Arc<dyn HeaderProvider>,
    transform: Arc<dyn RequestTransform>,
    workers: usize,
    shutdown: Shutdown,
    channels: Mutex<Option<Channels>>,
    events: EventPublisher,
    events_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    snapshots: watch::Receiver<StatsSnapshot>,
    started: OnceLock<Instant>,
    finished: AtomicBool,
}

impl<C: HttpClient> Engine<C, TracingRunReporter> {
    /// Validate `config` and allocate the run's queues.
    ///
    /// Each queue holds four slots per worker.
    pub fn new(config: FuzzConfig, client: C) -> Result<Self, FuzzError> {
        let config = config.validate()?;
        let workers = config.worker_count();
        let capacity = workers * 4;

        let (events, events_rx) = EventPublisher::channel(capacity);
        let (snapshots_tx, snapshots) = watch::channel(StatsSnapshot::default());
        let headers = DefaultHeaders::new(
            config.user_agent.as_deref(),
            config.pseudo_random_user_agent,
        );

        let shutdown = Shutdown::new();
        shutdown.set_state(EngineState::Validated);

        Ok(Self {
            run_id: Uuid::new_v4(),
            config: Arc::new(config),
            client,
            reporter: Arc::new(TracingRunReporter),
            headers: Arc::new(headers),
            transform: Arc::new(NoopTransform),
            workers,
            shutdown,
            channels: Mutex::new(Some(Channels::new(capacity, snapshots_tx))),
            events,
            events_rx: Mutex::new(Some(events_rx)),
            snapshots,
            started: OnceLock::new(),
            finished: AtomicBool::new(false),
        })
    }
}

impl<C, R> Engine<C, R>
where
    C: HttpClient,
    R: RunReporter,
{
    /// Replace the diagnostics sink.
    pub fn with_reporter<R2: RunReporter>(self, reporter: Arc<R2>) -> Engine<C, R2> {
        Engine {
            run_id: self.run_id,
            config: self.config,
            client: self.client,
            reporter,
            headers: self.headers,
            transform: self.transform,
            workers: self.workers,
            shutdown: self.shutdown,
            channels: self.channels,
            events: self.events,
            events_rx: self.events_rx,
            snapshots: self.snapshots,
            started: self.started,
            finished: self.finished,
        }
    }

    /// Hook applied to every job request (not to the liveness probe).
    pub fn with_transform(mut self, transform: impl RequestTransform + 'static) -> Self {
        self.transform = Arc::new(transform);
        self
    }

    pub fn with_headers(mut self, headers: impl HeaderProvider + 'static) -> Self {
        self.headers = Arc::new(headers);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config(&self) -> &FuzzConfig {
        &self.config
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn state(&self) -> EngineState {
        self.shutdown.state()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.shutdown.reason()
    }

    /// Participants that have not returned yet.
    pub fn live_count(&self) -> usize {
        self.shutdown.live_count()
    }

    /// Latest published counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<StatsSnapshot> {
        self.snapshots.clone()
    }

    /// The event stream. Only the first caller gets it.
    pub fn take_events(&self) -> Option<mpsc::Receiver<Event>> {
        lock(&self.events_rx).take()
    }

    /// Probe the target, open the output, then launch every participant.
    ///
    /// Returns once the run is underway. A failed probe or an unopenable
    /// output leaves the engine `Stopped` with nothing spawned. Starting
    /// after a stop was requested spawns nothing and returns `Ok`.
    pub async fn start(&self) -> Result<(), FuzzError> {
        let channels = lock(&self.channels)
            .take()
            .ok_or(FuzzError::AlreadyStarted)?;
        if self.shutdown.is_triggered() {
            return Ok(());
        }

        self.shutdown.set_state(EngineState::Probing);
        if let Err(e) = self.probe().await {
            return Err(self.abort(e));
        }

        let sink = match JsonlSink::open(&self.config.out_file).await {
            Ok(sink) => sink,
            Err(e) => {
                self.reporter.report(RunEvent::Fatal { error: &e });
                return Err(self.abort(e));
            }
        };

        if self.shutdown.is_triggered() {
            return Ok(());
        }
        self.shutdown.set_state(EngineState::Running);
        let started = *self.started.get_or_init(Instant::now);
        let max_time = self.config.max_time.unwrap_or(DEFAULT_MAX_TIME);

        self.reporter.report(RunEvent::Started {
            run_id: self.run_id,
            url: &self.config.url,
            method: &self.config.method,
            workers: self.workers,
            max_time,
        });

        self.launch(channels, sink, started, max_time);
        Ok(())
    }

    /// Request shutdown and wait for every participant. Idempotent.
    pub async fn stop(&self) -> Result<(), FuzzError> {
        if self.shutdown.trigger(StopReason::Requested) {
            self.reporter.report(RunEvent::ShutdownTriggered {
                reason: StopReason::Requested,
                elapsed: self.elapsed(),
            });
        }
        self.wait().await
    }

    /// Wait until every participant has returned.
    ///
    /// Returns the error that ended the run, if any. Call after
    /// [`start`](Self::start) has returned.
    pub async fn wait(&self) -> Result<(), FuzzError> {
        self.shutdown.join().await;

        if !self.finished.swap(true, Ordering::AcqRel) {
            let snapshot = self.stats();
            self.reporter.report(RunEvent::Finished {
                reason: self.shutdown.reason(),
                snapshot: &snapshot,
            });
        }

        match self.shutdown.error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// One request to the template with an empty word.
    ///
    /// Any HTTP response passes. Transport failures abort the run as a
    /// connectivity error; client configuration errors abort it as-is.
    async fn probe(&self) -> Result<(), FuzzError> {
        let url = self.config.template().base();
        let request = FuzzRequest::new(url.as_str(), self.config.method.as_str())
            .with_headers(self.headers.headers());

        let cancel_token = self.shutdown.token();
        let result = tokio::select! {
            biased;
            () = cancel_token.cancelled() => return Ok(()),
            result = self.client.execute(&request) => result,
        };

        match result {
            Err(e) if e.is_transport() => {
                self.reporter
                    .report(RunEvent::ProbeFailed { url: &url, error: &e });
                Err(FuzzError::Connectivity(format!(
                    "error in connecting to main url of server: {e}"
                )))
            }
            Err(e) if e.is_fatal() => {
                self.reporter
                    .report(RunEvent::ProbeFailed { url: &url, error: &e });
                Err(e)
            }
            _ => Ok(()),
        }
    }

    fn abort(&self, error: FuzzError) -> FuzzError {
        self.shutdown.record_error(error.clone());
        self.shutdown.set_state(EngineState::Stopped);
        error
    }

    fn elapsed(&self) -> Duration {
        self.started
            .get()
            .map(Instant::elapsed)
            .unwrap_or_default()
    }

    fn launch(&self, channels: Channels, sink: JsonlSink, started: Instant, max_time: Duration) {
        let Channels {
            jobs_tx,
            jobs_rx,
            results_tx,
            results_rx,
            stats,
            stats_rx,
            snapshots,
        } = channels;

        let aggregator = StatsAggregator::new(
            stats_rx,
            snapshots,
            self.events.clone(),
            self.reporter.clone(),
            self.config.clone(),
            self.workers,
        );
        self.spawn_task("stats", aggregator.run(self.shutdown.token()));

        self.spawn_task(
            "sink",
            sink.run(
                results_rx,
                self.shutdown.clone(),
                self.config.timings.queue_wait,
                self.reporter.clone(),
            ),
        );

        let ctx = Arc::new(WorkerContext {
            client: self.client.clone(),
            config: self.config.clone(),
            headers: self.headers.clone(),
            transform: self.transform.clone(),
            jobs: jobs_rx,
            stats: stats.clone(),
            results: results_tx,
            events: self.events.clone(),
            reporter: self.reporter.clone(),
            shutdown: self.shutdown.clone(),
        });
        for id in 0..self.workers {
            self.shutdown.spawn(Worker::new(id, ctx.clone()).run());
        }

        let mut limiter = RateLimiter::new(self.config.max_req_sec);
        if let Some(pacer) = limiter.as_mut().and_then(RateLimiter::pacer) {
            self.spawn_task("pacer", pacer.run(self.shutdown.token()));
        }

        let producer = Producer::new(
            self.config.template(),
            &self.config.wordlist,
            jobs_tx,
            stats,
            limiter,
        );
        self.spawn_task(
            "producer",
            producer.run(self.shutdown.clone(), self.reporter.clone()),
        );

        self.spawn_task(
            "timer",
            enforce_max_runtime(
                self.shutdown.clone(),
                max_time,
                started,
                self.reporter.clone(),
            ),
        );

        self.spawn_task(
            "completion",
            watch_completion(
                self.shutdown.clone(),
                self.snapshots.clone(),
                self.config.timings.completion_poll,
                started,
                self.reporter.clone(),
            ),
        );
    }

    fn spawn_task<F>(&self, task: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let reporter = self.reporter.clone();
        let silent = self.config.silent;
        self.shutdown.spawn(async move {
            fut.await;
            if !silent {
                reporter.report(RunEvent::TaskStopped {
                    task,
                    live: shutdown.live_count().saturating_sub(1),
                });
            }
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Recovered from poisoned engine mutex");
        poisoned.into_inner()
    })
}

async fn enforce_max_runtime<R: RunReporter>(
    shutdown: Shutdown,
    max_time: Duration,
    started: Instant,
    reporter: Arc<R>,
) {
    let cancel_token = shutdown.token();
    tokio::select! {
        biased;
        () = cancel_token.cancelled() => {}
        () = tokio::time::sleep(max_time) => {
            if shutdown.trigger(StopReason::MaxRuntime) {
                shutdown.record_error(FuzzError::MaxRuntimeExceeded);
                reporter.report(RunEvent::ShutdownTriggered {
                    reason: StopReason::MaxRuntime,
                    elapsed: started.elapsed(),
                });
            }
        }
    }
}

async fn watch_completion<R: RunReporter>(
    shutdown: Shutdown,
    snapshots: watch::Receiver<StatsSnapshot>,
    poll: Duration,
    started: Instant,
    reporter: Arc<R>,
) {
    let cancel_token = shutdown.token();
    loop {
        tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            () = tokio::time::sleep(poll) => {}
        }

        let complete = snapshots.borrow().is_complete();
        if complete {
            if shutdown.trigger(StopReason::Completed) {
                reporter.report(RunEvent::ShutdownTriggered {
                    reason: StopReason::Completed,
                    elapsed: started.elapsed(),
                });
            }
            break;
        }
    }
}
