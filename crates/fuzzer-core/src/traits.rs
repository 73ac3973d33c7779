use std::future::Future;

use crate::error::FuzzError;
use crate::models::{FuzzRequest, FuzzResponse, Headers};

/// Performs a single HTTP request on behalf of a worker.
///
/// Implementations own TLS, proxying, pooling and the per-request timeout,
/// and must cap the body they return.
pub trait HttpClient: Send + Sync + Clone + 'static {
    fn execute(
        &self,
        request: &FuzzRequest,
    ) -> impl Future<Output = Result<FuzzResponse, FuzzError>> + Send;
}

/// Supplies the headers sent with every request.
pub trait HeaderProvider: Send + Sync {
    fn headers(&self) -> Headers;
}

/// Hook applied to each request right before dispatch.
///
/// Receives the job URL, the configured proxy URL and the headers, and may
/// rewrite the URL and headers in place.
pub trait RequestTransform: Send + Sync {
    fn apply(&self, url: &mut String, proxy_url: &str, headers: &mut Headers);
}

/// Leaves requests untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransform;

impl RequestTransform for NoopTransform {
    fn apply(&self, _url: &mut String, _proxy_url: &str, _headers: &mut Headers) {}
}

/// Sends every request to the proxy, carrying the real target in a `Target` header.
#[derive(Debug, Default, Clone, Copy)]
pub struct TunnelTransform;

impl RequestTransform for TunnelTransform {
    fn apply(&self, url: &mut String, proxy_url: &str, headers: &mut Headers) {
        if proxy_url.is_empty() {
            return;
        }
        headers.insert("target".to_string(), std::mem::take(url));
        *url = proxy_url.to_string();
    }
}
