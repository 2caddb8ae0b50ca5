//! Error types for taskq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("task {task} on queue {queue} was already completed")]
    AlreadyCompleted { queue: String, task: String },

    #[error("runtime unavailable: {0}")]
    Runtime(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
