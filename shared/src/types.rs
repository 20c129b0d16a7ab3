//! Core types used throughout the supervision system

use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Global process ID singleton - set once at startup
static PROCESS_ID: OnceLock<ProcessId> = OnceLock::new();

/// Process identifier for any component in the system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessId {
    /// Supervisor process (singleton)
    Supervisor,
    /// Worker process with user-friendly number
    Worker(u32),
}

impl ProcessId {
    /// Initialize the global process ID for the supervisor
    pub fn init_supervisor() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Supervisor)
    }

    /// Initialize the global process ID for a worker with explicit ID
    pub fn init_worker(id: u32) -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Worker(id))
    }

    /// Get the global process ID (must be initialized first)
    pub fn current() -> &'static ProcessId {
        PROCESS_ID.get().expect("ProcessId not initialized - call init_* first")
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessId::Supervisor => write!(f, "supervisor"),
            ProcessId::Worker(id) => write!(f, "worker_{id}"),
        }
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        ProcessId::Worker(1)
    }
}
