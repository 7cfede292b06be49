//! Error types for the feed handler

use thiserror::Error;

use crate::events::Pair;

/// Feed handler errors
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Failed to parse message: {0}")]
    Parse(String),

    #[error("Unknown message type: {0}")]
    UnknownMessage(String),

    #[error("Sequence gap on {pair}: expected {expected}, got {got}")]
    SequenceGap { pair: Pair, expected: u64, got: u64 },

    #[error("Snapshot fetch failed for {pair}: {reason}")]
    SnapshotFetch { pair: Pair, reason: String },

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Parse(err.to_string())
    }
}

impl From<rust_decimal::Error> for FeedError {
    fn from(err: rust_decimal::Error) -> Self {
        FeedError::Parse(err.to_string())
    }
}

impl From<std::io::Error> for FeedError {
    fn from(err: std::io::Error) -> Self {
        FeedError::Sink(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
