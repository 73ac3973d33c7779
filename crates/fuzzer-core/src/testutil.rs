//! Test utilities: handwritten mocks for the engine's seams.
//!
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::FuzzError;
use crate::models::{FuzzRequest, FuzzResponse, FuzzResult};
use crate::report::{RunEvent, RunReporter};
use crate::traits::HttpClient;

// ---------------------------------------------------------------------------
// MockClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Reply {
    Respond {
        status: u16,
        body: String,
        final_url: Option<String>,
    },
    Fail(FuzzError),
}

/// Mock HTTP client with per-URL replies and a fallback.
#[derive(Clone)]
pub struct MockClient {
    fallback: Reply,
    routes: Arc<Mutex<HashMap<String, Reply>>>,
    calls: Arc<Mutex<Vec<FuzzRequest>>>,
    delay: Option<Duration>,
    /// Calls answered without delay before `delay` applies.
    undelayed: usize,
}

impl MockClient {
    fn with_fallback(fallback: Reply) -> Self {
        Self {
            fallback,
            routes: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: None,
            undelayed: 0,
        }
    }

    /// Answers every URL with `status` and `body`.
    pub fn ok(status: u16, body: &str) -> Self {
        Self::with_fallback(Reply::Respond {
            status,
            body: body.to_string(),
            final_url: None,
        })
    }

    /// Fails every URL with `error`.
    pub fn failing(error: FuzzError) -> Self {
        Self::with_fallback(Reply::Fail(error))
    }

    pub fn route(self, url: &str, status: u16, body: &str) -> Self {
        self.insert(
            url,
            Reply::Respond {
                status,
                body: body.to_string(),
                final_url: None,
            },
        )
    }

    pub fn route_error(self, url: &str, error: FuzzError) -> Self {
        self.insert(url, Reply::Fail(error))
    }

    /// `url` ends up at `final_url` with a 200.
    pub fn redirect(self, url: &str, final_url: &str) -> Self {
        self.insert(
            url,
            Reply::Respond {
                status: 200,
                body: String::new(),
                final_url: Some(final_url.to_string()),
            },
        )
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delay every call after the first `calls` (e.g. all but the probe).
    pub fn with_delay_after(mut self, calls: usize, delay: Duration) -> Self {
        self.delay = Some(delay);
        self.undelayed = calls;
        self
    }

    fn insert(self, url: &str, reply: Reply) -> Self {
        self.routes.lock().unwrap().insert(url.to_string(), reply);
        self
    }

    pub fn calls(&self) -> Vec<FuzzRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl HttpClient for MockClient {
    async fn execute(&self, request: &FuzzRequest) -> Result<FuzzResponse, FuzzError> {
        let seen = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.len()
        };
        if let Some(delay) = self.delay
            && seen > self.undelayed
        {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .routes
            .lock()
            .unwrap()
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());

        match reply {
            Reply::Respond {
                status,
                body,
                final_url,
            } => Ok(FuzzResponse {
                body: body.into_bytes(),
                status_code: status,
                final_url: final_url.unwrap_or_else(|| request.url.clone()),
            }),
            Reply::Fail(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that records the variant name of every event.
#[derive(Default)]
pub struct MockReporter {
    labels: Mutex<Vec<String>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.labels.lock().unwrap().clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.labels
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.as_str() == label)
            .count()
    }
}

impl RunReporter for MockReporter {
    fn report(&self, event: RunEvent<'_>) {
        let label = match event {
            RunEvent::Started { .. } => "Started",
            RunEvent::ProbeFailed { .. } => "ProbeFailed",
            RunEvent::WordlistCounted { .. } => "WordlistCounted",
            RunEvent::JobFailed { .. } => "JobFailed",
            RunEvent::ResultSaved { .. } => "ResultSaved",
            RunEvent::Stats { .. } => "Stats",
            RunEvent::Fatal { .. } => "Fatal",
            RunEvent::ShutdownTriggered { .. } => "ShutdownTriggered",
            RunEvent::TaskStopped { .. } => "TaskStopped",
            RunEvent::Finished { .. } => "Finished",
        };
        self.labels.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn make_test_result(url: &str, status_code: u16) -> FuzzResult {
    FuzzResult {
        redirect_location: String::new(),
        url: url.to_string(),
        size: 42,
        lines: 3,
        status_code,
        words: 7,
    }
}

/// Write `lines` to `words.txt` inside `dir`, one per line.
pub fn write_wordlist(dir: &tempfile::TempDir, lines: &[&str]) -> PathBuf {
    let path = dir.path().join("words.txt");
    std::fs::write(&path, lines.join("\n")).unwrap();
    path
}
