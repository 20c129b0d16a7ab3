//! Core supervision logic
//!
//! Pure state machines and policy, separated from the service layer so they
//! can be exercised with scripted spawners and transports.

pub mod heartbeat;
pub mod recovery;
pub mod worker;

pub use heartbeat::{HeartbeatMonitor, HeartbeatSignal};
pub use recovery::{
    DecisionStrategy, FailureRecord, HeuristicStrategy, PatternAnalysis, RecoveryContext, RecoveryEngine,
};
pub use worker::{WorkerEvent, WorkerManager, WorkerManagerHandle};
