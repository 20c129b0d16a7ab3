//! Supervisor ↔ Worker communication messages
//!
//! The message set is closed on both directions: anything that fails to
//! decode as one of these variants is rejected at the transport layer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Messages sent from Worker to Supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerMessage {
    /// Startup handshake carrying the worker's OS pid and its own
    /// command-listener port
    Ready {
        worker_id: u32,
        pid: u32,
        listen_port: u16,
    },

    /// Periodic liveness report
    Heartbeat {
        worker_id: u32,
        record: HeartbeatRecord,
    },

    /// Application-defined payload, opaque to the supervisor (JSON text by
    /// convention)
    Custom { worker_id: u32, payload: String },
}

/// Commands sent from Supervisor to Worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SupervisorCommand {
    /// Request a graceful exit
    Shutdown { reason: String },

    /// Application-defined payload, opaque to the supervisor
    Custom { payload: String },
}

/// One heartbeat as reported by a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    /// Monotonic per-process sequence number, starting at 1
    pub seq: u64,
    /// OS pid of the sending process
    pub pid: u32,
    /// Wall-clock send time (epoch milliseconds)
    pub sent_at_ms: u64,
    /// Worker uptime at send time
    pub uptime_ms: u64,
    /// Resident set size if the platform exposes it
    pub memory_rss_kb: Option<u64>,
    /// Arbitrary worker-reported fields
    pub fields: HashMap<String, String>,
}

impl HeartbeatRecord {
    pub fn new(seq: u64, sent_at_ms: u64, uptime_ms: u64) -> Self {
        Self {
            seq,
            pid: 0,
            sent_at_ms,
            uptime_ms,
            memory_rss_kb: None,
            fields: HashMap::new(),
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }
}
