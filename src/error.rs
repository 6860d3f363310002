use thiserror::Error;

/// Failures while talking to the proxy's control port
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("Control connection failed: {0}")]
    ConnectFailed(String),

    #[error("Control authentication rejected: {0}")]
    AuthFailed(String),

    #[error("NEWNYM signal rejected: {0}")]
    SignalFailed(String),

    #[error("Malformed control reply: {0:?}")]
    MalformedResponse(String),

    #[error("Control port timed out")]
    Timeout,

    #[error("Control secret contains control characters")]
    InvalidSecret,
}

impl ControlError {
    /// Whether trying the same rotation again later can succeed.
    ///
    /// Rejected credentials and unusable secrets will fail the same way on
    /// every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ControlError::ConnectFailed(_) | ControlError::SignalFailed(_) | ControlError::Timeout
        )
    }
}

/// Failures of a proxied fetch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Transport failed: {0}")]
    TransportFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::InvalidUrl(_))
    }
}

/// Unified error type for the newnym crate
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing argument: {0}")]
    MissingArgument(String),

    // Session errors
    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for newnym operations
pub type Result<T> = std::result::Result<T, Error>;

// Convert from URL parse errors
impl From<url::ParseError> for FetchError {
    fn from(err: url::ParseError) -> Self {
        FetchError::InvalidUrl(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_error_retryable() {
        assert!(ControlError::Timeout.is_retryable());
        assert!(ControlError::ConnectFailed("refused".to_string()).is_retryable());
        assert!(!ControlError::AuthFailed("Bad".to_string()).is_retryable());
        assert!(!ControlError::InvalidSecret.is_retryable());
        assert!(!ControlError::MalformedResponse("250".to_string()).is_retryable());
    }

    #[test]
    fn test_fetch_error_retryable() {
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::TransportFailed("reset".to_string()).is_retryable());
        assert!(!FetchError::InvalidUrl("nope".to_string()).is_retryable());
    }

    #[test]
    fn test_error_wraps_leaf_errors() {
        let err: Error = ControlError::Timeout.into();
        assert!(matches!(err, Error::Control(ControlError::Timeout)));
        assert_eq!(err.to_string(), "Control port timed out");

        let err: Error = FetchError::InvalidUrl("x".to_string()).into();
        assert!(matches!(err, Error::Fetch(FetchError::InvalidUrl(_))));
    }

    #[test]
    fn test_url_parse_error_is_invalid_url() {
        let err: FetchError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }
}
