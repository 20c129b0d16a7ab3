//! Worker error types

use resilience::ResilienceError;
use shared::SharedError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Supervisor link error: {message}")]
    LinkError { message: String },

    #[error("Not connected to a supervisor")]
    NotConnected,

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Shared component error")]
    SharedError(#[from] SharedError),

    #[error("Resilience primitive error")]
    ResilienceError(#[from] ResilienceError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

impl WorkerError {
    pub fn link(message: impl Into<String>) -> Self {
        WorkerError::LinkError {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        WorkerError::ConfigError {
            message: message.into(),
        }
    }
}
