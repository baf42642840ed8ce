use std::time::Duration;
use thiserror::Error;

/// All errors generated in `strike-feed`.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The handshake was rejected with 401. Terminal for the attempt:
    /// retrying without a fresh credential cannot succeed, so this is
    /// surfaced to the operator instead of fed back into the backoff loop.
    #[error("credential expired or rejected by the venue")]
    AuthExpired,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("frame decode failed: {0}")]
    Decode(String),

    #[error("invalid session uri: {0}")]
    Url(#[from] url::ParseError),

    #[error("subscription rejected: {0}")]
    Subscription(String),
}

impl FeedError {
    /// Determine whether the reconnect loop may retry after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::AuthExpired | FeedError::Url(_) => false,
            // A single bad frame is dropped, not retried, but it never
            // forces the connection down either.
            FeedError::Decode(_) => false,
            FeedError::Handshake(_)
            | FeedError::Transport(_)
            | FeedError::Timeout(_)
            | FeedError::Subscription(_) => true,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::Transport(error.to_string())
    }
}

impl From<prost::DecodeError> for FeedError {
    fn from(error: prost::DecodeError) -> Self {
        FeedError::Decode(error.to_string())
    }
}
