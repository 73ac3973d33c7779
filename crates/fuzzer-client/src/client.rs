use std::time::Duration;

use fuzzer_core::config::{DEFAULT_MAX_BODY_SIZE, DEFAULT_REQUEST_TIMEOUT, FuzzConfig};
use fuzzer_core::error::FuzzError;
use fuzzer_core::models::{FuzzRequest, FuzzResponse};
use fuzzer_core::traits::HttpClient;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Proxy};
use url::Url;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(5);
pub const MAX_IDLE_PER_HOST: usize = 500;

/// Transport settings for [`ReqwestClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub proxy_url: Option<String>,
    /// Skip TLS certificate verification.
    pub insecure: bool,
    pub max_body_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            proxy_url: None,
            insecure: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl ClientOptions {
    pub fn from_config(config: &FuzzConfig) -> Self {
        Self {
            timeout: config.request_timeout,
            proxy_url: config.proxy_url.clone(),
            insecure: config.insecure,
            max_body_size: config.max_body_size,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy_url = Some(proxy_url.into());
        self
    }

    /// Connect directly even if a proxy is configured.
    pub fn without_proxy(mut self) -> Self {
        self.proxy_url = None;
        self
    }

    pub fn insecure(mut self) -> Self {
        self.insecure = true;
        self
    }

    pub fn with_max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }
}

/// HTTP client using reqwest.
///
/// Follows redirects, keeps a large idle pool per host, and never reads more
/// than `max_body_size` bytes of a response body.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
    timeout_secs: u64,
    max_body_size: usize,
}

impl ReqwestClient {
    pub fn new(options: ClientOptions) -> Result<Self, FuzzError> {
        let mut builder = Client::builder()
            .timeout(options.timeout)
            .connect_timeout(options.connect_timeout)
            .tcp_keepalive(TCP_KEEPALIVE)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .danger_accept_invalid_certs(options.insecure);

        if let Some(proxy_url) = options.proxy_url.as_deref().filter(|p| !p.is_empty()) {
            let parsed = Url::parse(proxy_url)
                .map_err(|e| FuzzError::Config(format!("Invalid proxy URL: {e}")))?;
            let proxy = Proxy::all(parsed.as_str())
                .map_err(|e| FuzzError::Config(format!("Invalid proxy URL: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| FuzzError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: options.timeout.as_secs(),
            max_body_size: options.max_body_size.max(1),
        })
    }

    pub fn from_config(config: &FuzzConfig) -> Result<Self, FuzzError> {
        Self::new(ClientOptions::from_config(config))
    }

    fn map_send_error(&self, e: reqwest::Error) -> FuzzError {
        if e.is_timeout() {
            FuzzError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            FuzzError::NetworkError(format!("Connection failed: {e}"))
        } else if e.is_redirect() || e.is_body() || e.is_decode() || e.is_status() {
            // A response arrived; only following or reading it failed.
            FuzzError::InvalidResponse(e.to_string())
        } else {
            FuzzError::HttpError(e.to_string())
        }
    }
}

impl HttpClient for ReqwestClient {
    async fn execute(&self, request: &FuzzRequest) -> Result<FuzzResponse, FuzzError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| FuzzError::Config(format!("Invalid HTTP method: {e}")))?;

        let mut headers = HeaderMap::new();
        for (key, value) in &request.headers {
            if let (Ok(name), Ok(val)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, val);
            }
        }

        let mut builder = self.client.request(method, &request.url).headers(headers);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let mut response = builder
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();

        let mut body = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    if body.len() + chunk.len() > self.max_body_size {
                        return Err(FuzzError::BodyLimitReached {
                            limit: self.max_body_size,
                        });
                    }
                    body.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(e) => {
                    // Keep what arrived; the response is still classifiable.
                    tracing::debug!(url = %request.url, error = %e, read = body.len(), "Body read interrupted");
                    break;
                }
            }
        }

        Ok(FuzzResponse {
            body,
            status_code,
            final_url,
        })
    }
}
