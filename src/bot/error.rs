// Error types for the OPQ bot session

use super::types::{Destination, SendKind};

/// Content variant does not fit the declared `(kind, destination)` pair
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "type mismatch: {kind} to {destination} cannot carry {content_shape} {content_kind} content"
)]
pub struct ValidationError {
    pub kind: SendKind,
    pub destination: Destination,
    pub content_kind: SendKind,
    pub content_shape: &'static str,
}

/// Outbound HTTP failure (send or recall)
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Callback registration failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("unknown event name: {0}")]
    UnknownEvent(String),
    #[error("callback for {event} must accept {expected}, got {found}")]
    SignatureMismatch {
        event: &'static str,
        expected: &'static str,
        found: &'static str,
    },
}

/// Session lifecycle failure
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("failed to connect to backend: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("session already started")]
    AlreadyStarted,
    #[error("session already stopped")]
    Stopped,
    #[error(transparent)]
    Transport(#[from] TransportError),
}
