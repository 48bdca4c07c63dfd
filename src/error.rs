#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[derive(uniffi::Error)]
pub enum WebSrcError {
    #[error("Received {status} HTTP error code")]
    HttpStatus { status: u16 },

    #[error("Received unexpected {status} HTTP status code for range request {range}")]
    RangeMismatch { status: u16, range: String },

    #[error("Access control check failed: {message}")]
    AccessControl { message: String },

    #[error("Error loading the resource: {message}")]
    Transport { message: String },

    #[error("Invalid seek segment: {reason}")]
    MalformedSeek { reason: String },

    #[error("No resource loader available, cannot make network requests")]
    NoLoader,

    #[error("Failed to setup streaming client for the request")]
    RequestSetupFailed,

    #[error("Invalid URI: {location}")]
    InvalidLocation { location: String },

    #[error("Source was not started")]
    NotStarted,

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("IO Error: {message}")]
    Io { message: String },
}

impl From<reqwest::Error> for WebSrcError {
    fn from(err: reqwest::Error) -> Self {
        WebSrcError::Transport { message: err.to_string() }
    }
}

impl From<std::io::Error> for WebSrcError {
    fn from(err: std::io::Error) -> Self {
        WebSrcError::Io { message: err.to_string() }
    }
}

impl From<ron::error::SpannedError> for WebSrcError {
    fn from(err: ron::error::SpannedError) -> Self {
        WebSrcError::Config { message: err.to_string() }
    }
}

impl From<ron::Error> for WebSrcError {
    fn from(err: ron::Error) -> Self {
        WebSrcError::Config { message: err.to_string() }
    }
}

impl From<url::ParseError> for WebSrcError {
    fn from(err: url::ParseError) -> Self {
        WebSrcError::InvalidLocation { location: err.to_string() }
    }
}

/// Failure reported by a loader for one request. Cancellations are reported through the same
/// path but must never surface to the consumer as an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct LoadError {
    pub message: String,
    pub is_cancellation: bool,
}

impl LoadError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self { message: message.into(), is_cancellation: false }
    }

    pub fn cancelled() -> Self {
        Self { message: "Request cancelled".to_string(), is_cancellation: true }
    }
}

impl From<reqwest::Error> for LoadError {
    fn from(err: reqwest::Error) -> Self {
        LoadError::failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_messages() {
        assert_eq!(LoadError::failed("connection reset").to_string(), "connection reset");
        assert!(LoadError::cancelled().is_cancellation);

        let failure = WebSrcError::Transport { message: LoadError::failed("timed out").to_string() };
        assert_eq!(failure.to_string(), "Error loading the resource: timed out");
    }
}
