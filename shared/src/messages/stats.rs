//! Lifecycle vocabulary and observability snapshots
//!
//! These types cross the supervisor's API boundary (event subscribers, stats
//! queries, structured logs) but never the process boundary, so they are free
//! to carry JSON metadata.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::worker::HeartbeatRecord;

/// Worker lifecycle states as tracked by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
    Restarting,
    Hung,
    Failed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Starting => write!(f, "starting"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Stopping => write!(f, "stopping"),
            WorkerState::Stopped => write!(f, "stopped"),
            WorkerState::Crashed => write!(f, "crashed"),
            WorkerState::Restarting => write!(f, "restarting"),
            WorkerState::Hung => write!(f, "hung"),
            WorkerState::Failed => write!(f, "failed"),
        }
    }
}

/// Supervisor lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Starting => write!(f, "starting"),
            SupervisorState::Running => write!(f, "running"),
            SupervisorState::Stopping => write!(f, "stopping"),
            SupervisorState::Stopped => write!(f, "stopped"),
            SupervisorState::Failed => write!(f, "failed"),
        }
    }
}

/// Why a worker needed recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    /// Process exited without being asked to
    Crash,
    /// Process alive but heartbeats stopped
    Hang,
    /// Automatic restart budget exhausted
    MaxRestarts,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Crash => write!(f, "crash"),
            FailureReason::Hang => write!(f, "hang"),
            FailureReason::MaxRestarts => write!(f, "max_restarts"),
        }
    }
}

/// What the recovery engine wants done about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryAction {
    /// Let the automatic restart proceed now
    Restart,
    /// Let the automatic restart proceed after a longer pause
    Wait,
    /// Keep the worker down and ask for outside attention
    Escalate,
    /// Stop trying altogether
    GiveUp,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryAction::Restart => write!(f, "restart"),
            RecoveryAction::Wait => write!(f, "wait"),
            RecoveryAction::Escalate => write!(f, "escalate"),
            RecoveryAction::GiveUp => write!(f, "give_up"),
        }
    }
}

/// A recovery decision with its rationale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryDecision {
    pub id: Uuid,
    pub action: RecoveryAction,
    /// Extra pause requested by `Wait`, milliseconds
    pub wait_ms: Option<u64>,
    /// How sure the deciding strategy is, 0.0 to 1.0
    pub confidence: f64,
    /// Human-readable explanation of the chosen action
    pub reason: String,
    /// Strategy-specific details (rule name, counters, uptime)
    pub metadata: serde_json::Value,
    pub decided_at: DateTime<Utc>,
}

impl RecoveryDecision {
    pub fn new(action: RecoveryAction, confidence: f64, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            wait_ms: None,
            confidence,
            reason: reason.into(),
            metadata: serde_json::Value::Null,
            decided_at: Utc::now(),
        }
    }

    pub fn with_wait_ms(mut self, wait_ms: u64) -> Self {
        self.wait_ms = Some(wait_ms);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Heartbeat health as seen by the supervisor's monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatStats {
    /// False once the missed-count reaches the configured threshold
    pub alive: bool,
    pub missed_count: u32,
    pub total_received: u64,
    /// Time since the last heartbeat arrived, if any ever did
    pub last_seen_ms_ago: Option<u64>,
    /// Rolling average gap between recent heartbeats
    pub avg_interval_ms: Option<f64>,
    pub last_record: Option<HeartbeatRecord>,
}

impl Default for HeartbeatStats {
    fn default() -> Self {
        Self {
            alive: true,
            missed_count: 0,
            total_received: 0,
            last_seen_ms_ago: None,
            avg_interval_ms: None,
            last_record: None,
        }
    }
}

/// Point-in-time view of one managed worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatsSnapshot {
    pub worker_id: u32,
    pub state: WorkerState,
    pub pid: Option<u32>,
    pub uptime_ms: u64,
    pub consecutive_restarts: u32,
    pub total_restarts: u32,
    pub last_exit_code: Option<i32>,
    pub last_exit_signal: Option<i32>,
    pub auto_restart: bool,
    pub heartbeat: HeartbeatStats,
}

/// Recovery engine activity rolled into the supervisor snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoverySnapshot {
    pub total_failures: u64,
    pub total_decisions: u64,
    pub last_decision: Option<RecoveryDecision>,
    /// Most recent decisions, newest last, bounded to a small window
    pub recent_decisions: Vec<RecoveryDecision>,
}

/// Point-in-time view of the whole supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorStatsSnapshot {
    pub state: SupervisorState,
    pub uptime_ms: u64,
    pub worker: WorkerStatsSnapshot,
    pub recovery: RecoverySnapshot,
}
