use thiserror::Error;

/// Error types shared by the engine and its collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FuzzError {
    /// Missing or invalid configuration, reported before any work starts.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The liveness probe could not reach the target at all.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// HTTP request could not be built or sent.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The server answered, but the response could not be used
    /// (redirect loop, too many redirects, undecodable body).
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The response body exceeded the configured cap.
    #[error("Body size limit of {limit} bytes reached")]
    BodyLimitReached { limit: usize },

    /// Wordlist or output file failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The run was stopped by the max-runtime timer.
    #[error("Maximum runtime exceeded")]
    MaxRuntimeExceeded,

    /// `start` was called on an engine that already ran.
    #[error("Engine already started")]
    AlreadyStarted,
}

impl FuzzError {
    /// Returns true if the target never produced an HTTP response.
    ///
    /// Body-limit and invalid-response errors still mean the server
    /// answered with a status.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            FuzzError::Timeout(_) | FuzzError::NetworkError(_) | FuzzError::HttpError(_)
        )
    }

    /// Returns true for errors that end the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FuzzError::Config(_)
                | FuzzError::Connectivity(_)
                | FuzzError::Io(_)
                | FuzzError::SerializationError(_)
        )
    }
}

impl From<std::io::Error> for FuzzError {
    fn from(e: std::io::Error) -> Self {
        FuzzError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for FuzzError {
    fn from(e: serde_json::Error) -> Self {
        FuzzError::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors() {
        assert!(FuzzError::NetworkError("refused".into()).is_transport());
        assert!(FuzzError::Timeout(20).is_transport());
        assert!(FuzzError::HttpError("bad request".into()).is_transport());
        assert!(!FuzzError::BodyLimitReached { limit: 10 }.is_transport());
        assert!(!FuzzError::InvalidResponse("redirect loop".into()).is_transport());
        assert!(!FuzzError::InvalidResponse("redirect loop".into()).is_fatal());
        assert!(!FuzzError::Io("disk full".into()).is_transport());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(FuzzError::Config("no wordlist".into()).is_fatal());
        assert!(FuzzError::Connectivity("refused".into()).is_fatal());
        assert!(FuzzError::Io("disk full".into()).is_fatal());
        assert!(!FuzzError::Timeout(20).is_fatal());
        assert!(!FuzzError::MaxRuntimeExceeded.is_fatal());
    }

    #[test]
    fn test_io_conversion() {
        let err: FuzzError = std::io::Error::other("boom").into();
        assert!(matches!(err, FuzzError::Io(msg) if msg.contains("boom")));
    }
}
