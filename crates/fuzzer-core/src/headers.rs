use chrono::Utc;

use crate::models::Headers;
use crate::traits::HeaderProvider;

pub const DEFAULT_USER_AGENT: &str = "github.com/dpanic/fuzzer";

/// Sends a `user-agent` header, optionally made unique per request.
#[derive(Debug, Clone)]
pub struct DefaultHeaders {
    user_agent: String,
    pseudo_random: bool,
}

impl DefaultHeaders {
    /// An empty agent falls back to [`DEFAULT_USER_AGENT`].
    pub fn new(user_agent: Option<&str>, pseudo_random: bool) -> Self {
        let user_agent = match user_agent {
            Some(ua) if !ua.trim().is_empty() => ua.trim().to_string(),
            _ => DEFAULT_USER_AGENT.to_string(),
        };
        Self {
            user_agent,
            pseudo_random,
        }
    }

    pub fn user_agent(&self) -> String {
        if self.pseudo_random {
            format!(
                "{}-{}",
                self.user_agent,
                Utc::now().format("%Y-%m-%dT%H:%M:%S%.9f")
            )
        } else {
            self.user_agent.clone()
        }
    }
}

impl Default for DefaultHeaders {
    fn default() -> Self {
        Self::new(None, false)
    }
}

impl HeaderProvider for DefaultHeaders {
    fn headers(&self) -> Headers {
        let mut headers = Headers::new();
        headers.insert("user-agent".to_string(), self.user_agent());
        headers
    }
}
