use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::FuzzError;
use crate::filter::Filters;
use crate::template::Template;

pub const DEFAULT_MAX_TIME: Duration = Duration::from_secs(3600);
pub const MIN_MAX_TIME: Duration = Duration::from_secs(1);
pub const DEFAULT_OUT_FILE: &str = "tmp/out.json";
pub const DEFAULT_METHOD: &str = "GET";
pub const DEFAULT_MAX_BODY_SIZE: usize = 5 << 20;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
pub const MIN_WORKERS: usize = 32;

/// Word substituted into the template when checking that it parses.
const SAMPLE_WORD: &str = "1";

/// Wait periods used by the long-running tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Upper bound on a worker or sink waiting for its next item.
    pub queue_wait: Duration,
    /// How often the completion watcher compares `processed` to `total`.
    pub completion_poll: Duration,
    /// Minimum spacing between throughput computations.
    pub stats_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            queue_wait: Duration::from_secs(3),
            completion_poll: Duration::from_secs(3),
            stats_interval: Duration::from_secs(3),
        }
    }
}

impl Timings {
    /// Same period for every wait.
    pub fn uniform(period: Duration) -> Self {
        Self {
            queue_wait: period,
            completion_poll: period,
            stats_interval: period,
        }
    }
}

/// Everything a run needs. Immutable once [`validate`](Self::validate)d.
#[derive(Debug, Clone)]
pub struct FuzzConfig {
    /// Target URL template containing the placeholder.
    pub url: String,
    pub method: String,
    pub wordlist: PathBuf,
    /// Empty means [`DEFAULT_OUT_FILE`].
    pub out_file: PathBuf,
    pub max_time: Option<Duration>,
    /// 0 disables rate limiting.
    pub max_req_sec: u32,
    pub filters: Filters,
    pub proxy_url: Option<String>,
    pub silent: bool,
    pub user_agent: Option<String>,
    pub pseudo_random_user_agent: bool,
    /// Skip TLS certificate verification.
    pub insecure: bool,
    /// Overrides the computed worker pool size.
    pub workers: Option<usize>,
    pub max_body_size: usize,
    pub request_timeout: Duration,
    pub timings: Timings,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: DEFAULT_METHOD.to_string(),
            wordlist: PathBuf::new(),
            out_file: PathBuf::new(),
            max_time: None,
            max_req_sec: 0,
            filters: Filters::default(),
            proxy_url: None,
            silent: false,
            user_agent: None,
            pseudo_random_user_agent: false,
            insecure: false,
            workers: None,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            timings: Timings::default(),
        }
    }
}

impl FuzzConfig {
    pub fn new(url: impl Into<String>, wordlist: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            wordlist: wordlist.into(),
            ..Self::default()
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_out_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.out_file = path.into();
        self
    }

    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }

    pub fn with_max_req_sec(mut self, max_req_sec: u32) -> Self {
        self.max_req_sec = max_req_sec;
        self
    }

    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy_url = Some(proxy_url.into());
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn template(&self) -> Template {
        Template::new(self.url.clone())
    }

    pub fn proxy(&self) -> &str {
        self.proxy_url.as_deref().unwrap_or_default()
    }

    /// Worker pool size: four per core, never fewer than [`MIN_WORKERS`].
    ///
    /// An explicit override wins (clamped to at least one).
    pub fn worker_count(&self) -> usize {
        if let Some(n) = self.workers {
            return n.max(1);
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cores * 4).max(MIN_WORKERS)
    }

    /// Fill defaults and reject configurations that cannot run.
    ///
    /// Creates the output file's parent directory. An unparseable proxy is
    /// dropped rather than reported.
    pub fn validate(mut self) -> Result<Self, FuzzError> {
        if self.max_time.is_none_or(|t| t < MIN_MAX_TIME) {
            self.max_time = Some(DEFAULT_MAX_TIME);
        }

        if self.method.trim().is_empty() {
            self.method = DEFAULT_METHOD.to_string();
        }

        if self.out_file.as_os_str().is_empty() {
            self.out_file = PathBuf::from(DEFAULT_OUT_FILE);
        }
        if let Some(parent) = self.out_file.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                FuzzError::Io(format!(
                    "Failed to create output directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        if self.wordlist.as_os_str().is_empty() {
            return Err(FuzzError::Config("word list must be defined".into()));
        }

        if let Some(proxy) = &self.proxy_url
            && let Err(e) = Url::parse(proxy)
        {
            tracing::debug!(proxy = %proxy, error = %e, "Ignoring unparseable proxy URL");
            self.proxy_url = None;
        }

        if self.url.trim().is_empty() {
            return Err(FuzzError::Config("target URL must be defined".into()));
        }
        let template = self.template();
        if !template.has_placeholder() {
            tracing::warn!(
                url = %self.url,
                placeholder = template.placeholder(),
                "Target URL has no placeholder"
            );
        }
        // Numeric, so a placeholder in the port position still parses.
        Url::parse(&template.render(SAMPLE_WORD))
            .map_err(|e| FuzzError::Config(format!("error in parsing target url: {e}")))?;

        if self.max_body_size == 0 {
            self.max_body_size = DEFAULT_MAX_BODY_SIZE;
        }

        Ok(self)
    }
}
