//! Message types for the worker supervision system
//!
//! This module organizes all inter-process communication messages by category:
//! - `worker`: Supervisor ↔ Worker communication
//! - `stats`: Lifecycle vocabulary and observability snapshots

pub mod stats;
pub mod worker;

// Re-export commonly used types at module level for convenience
pub use worker::{HeartbeatRecord, SupervisorCommand, WorkerMessage};

pub use stats::{
    FailureReason, HeartbeatStats, RecoveryAction, RecoveryDecision, RecoverySnapshot,
    SupervisorState, SupervisorStatsSnapshot, WorkerState, WorkerStatsSnapshot,
};
