use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("A synchronization with the same key is already in progress")]
    SyncInProgress,

    #[error("Rendezvous timed out after {0:?}")]
    Timeout(Duration),

    #[error("Node stopped before the operation completed")]
    Stopped,

    #[error("Node has no permanent id yet")]
    NotRegistered,

    #[error("No leader known, cannot coordinate a barrier")]
    NoLeader,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;
