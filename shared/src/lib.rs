//! Shared types for the worker supervision system
//!
//! Contains only truly shared types for inter-process communication.
//! Component-internal types (like the supervisor's failure history) are kept
//! in their respective components.

pub mod errors;
pub mod framing;
pub mod logging;
pub mod messages;
pub mod types;

pub use errors::*;
pub use types::*;

// Re-export only inter-process communication messages
pub use messages::{
    // Worker ↔ Supervisor communication
    HeartbeatRecord, SupervisorCommand, WorkerMessage,

    // Observability snapshots
    HeartbeatStats, RecoveryDecision, RecoverySnapshot, SupervisorStatsSnapshot, WorkerStatsSnapshot,

    // Lifecycle vocabulary
    FailureReason, RecoveryAction, SupervisorState, WorkerState,
};
