//! Error types for relayq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("work item not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::model::Status,
        to: crate::model::Status,
    },

    #[error("work item has no operation attached")]
    MissingOperation,

    #[error("work item {0} was reloaded from disk and cannot be retried")]
    OperationUnavailable(String),

    #[error("engine is stopped")]
    Stopped,

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
