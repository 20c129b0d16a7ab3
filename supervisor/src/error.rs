//! Supervisor-specific error types

use resilience::ResilienceError;
use shared::SharedError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to spawn worker_{worker_id}: {message}")]
    SpawnFailed { worker_id: u32, message: String },

    #[error("worker_{worker_id} did not signal ready within {timeout_ms}ms")]
    StartupTimeout { worker_id: u32, timeout_ms: u64 },

    #[error("Worker transport error: {message}")]
    TransportError { message: String },

    #[error("Process control failed: {message}")]
    ProcessControl { message: String },

    #[error("Configuration error: {field}")]
    ConfigurationError { field: String },

    #[error("Supervision gave up: {reason}")]
    GaveUp { reason: String },

    #[error("Shared component error")]
    SharedError(#[from] SharedError),

    #[error("Resilience primitive error")]
    ResilienceError(#[from] ResilienceError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl SupervisorError {
    pub fn config(field: impl Into<String>) -> Self {
        SupervisorError::ConfigurationError { field: field.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        SupervisorError::TransportError {
            message: message.into(),
        }
    }

    pub fn process(message: impl Into<String>) -> Self {
        SupervisorError::ProcessControl {
            message: message.into(),
        }
    }
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
