//! Error types for the resilience primitives

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::breaker::BreakerStats;

#[derive(Error, Debug, Clone)]
pub enum ResilienceError {
    #[error("Operation '{operation}' timed out after {duration_ms}ms (started {started_at})")]
    Timeout {
        operation: String,
        duration_ms: u64,
        started_at: DateTime<Utc>,
    },

    #[error("Circuit breaker '{name}' is open")]
    CircuitOpen { name: String, stats: BreakerStats },

    #[error("Queue full: capacity {capacity} reached")]
    QueueFull { capacity: usize },

    #[error("{message}")]
    Operation { message: String },
}

impl ResilienceError {
    /// Wrap an arbitrary failure so it can flow through retry classification
    pub fn operation(message: impl Into<String>) -> Self {
        ResilienceError::Operation {
            message: message.into(),
        }
    }
}

pub type ResilienceResult<T> = Result<T, ResilienceError>;
