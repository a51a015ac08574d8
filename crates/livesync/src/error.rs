use crate::envelope::MessageType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),
    #[error("invalid {message_type} payload: {source}")]
    InvalidPayload {
        message_type: MessageType,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("handler failed: {0}")]
    Handler(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Failures of the underlying transport. These never leave the
/// connection manager; they only feed the heartbeat recovery path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport is not open")]
    NotOpen,
    #[error("transport is closed")]
    Closed,
    #[error("connect failed: {0}")]
    Connect(String),
}
