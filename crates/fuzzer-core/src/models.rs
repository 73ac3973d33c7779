use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Request headers, keyed by lowercase header name.
pub type Headers = BTreeMap<String, String>;

/// One candidate URL produced from a wordlist line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub url: String,
}

impl Job {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// A single outbound request handed to an [`HttpClient`](crate::traits::HttpClient).
#[derive(Debug, Clone)]
pub struct FuzzRequest {
    pub url: String,
    pub method: String,
    pub body: Option<Vec<u8>>,
    pub headers: Headers,
}

impl FuzzRequest {
    pub fn new(url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            body: None,
            headers: Headers::new(),
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// What came back from the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzResponse {
    pub body: Vec<u8>,
    pub status_code: u16,
    /// URL of the final response after redirects.
    pub final_url: String,
}

/// Features extracted from one completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedResponse {
    pub url: String,
    /// Final URL when it differs from `url`, otherwise empty.
    pub redirect_location: String,
    pub size: usize,
    pub lines: usize,
    pub words: usize,
    pub status_code: u16,
}

impl ClassifiedResponse {
    /// Classify a response to a request for `requested_url`.
    ///
    /// Lines are `\n` bytes and words are space bytes in the body.
    pub fn classify(requested_url: &str, response: &FuzzResponse) -> Self {
        let body = &response.body;
        let redirect_location = if response.final_url != requested_url {
            response.final_url.clone()
        } else {
            String::new()
        };

        Self {
            url: requested_url.to_string(),
            redirect_location,
            size: body.len(),
            lines: body.iter().filter(|&&b| b == b'\n').count(),
            words: body.iter().filter(|&&b| b == b' ').count(),
            status_code: response.status_code,
        }
    }
}

/// An accepted response, persisted as one JSON line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuzzResult {
    pub redirect_location: String,
    pub url: String,
    pub size: usize,
    pub lines: usize,
    pub status_code: u16,
    pub words: usize,
}

impl From<ClassifiedResponse> for FuzzResult {
    fn from(c: ClassifiedResponse) -> Self {
        Self {
            redirect_location: c.redirect_location,
            url: c.url,
            size: c.size,
            lines: c.lines,
            status_code: c.status_code,
            words: c.words,
        }
    }
}

/// Notifications for an embedding caller. Delivery is best-effort.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    Progress { processed: u64, total: u64 },
    Throughput { per_second: f64 },
    Error { message: String },
}

impl Event {
    pub fn description(&self) -> String {
        match self {
            Event::Progress { processed, total } => format!("{processed} / {total}"),
            Event::Throughput { per_second } => format!("{per_second:.2} / sec"),
            Event::Error { message } => message.clone(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
