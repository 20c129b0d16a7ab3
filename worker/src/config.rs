//! Worker runtime configuration

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Fault-injection switches for exercising supervision paths
///
/// All off by default; the binary exposes them as CLI flags so a test run
/// can script crashes, hangs, and shutdown refusal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Exit on purpose after this many completed work cycles
    pub crash_after_cycles: Option<u64>,
    /// Exit code used for the scripted crash
    pub crash_exit_code: i32,
    /// Stop sending heartbeats so the supervisor sees a hang
    pub mute_heartbeats: bool,
    /// Keep running when the supervisor asks for a shutdown
    pub ignore_shutdown: bool,
}

/// Everything the worker needs to run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Identity reported in every message to the supervisor
    pub worker_id: u32,
    /// Address the supervisor's worker link listens on
    pub supervisor_addr: SocketAddr,
    /// Pause between heartbeats
    pub heartbeat_interval_ms: u64,
    /// Pause between work cycles
    pub work_interval_ms: u64,
    /// Per-attempt time limit on one unit of work
    pub work_timeout_ms: u64,
    pub fault: FaultConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: 1,
            supervisor_addr: "127.0.0.1:7100".parse().expect("static address"),
            heartbeat_interval_ms: 2_000,
            work_interval_ms: 5_000,
            work_timeout_ms: 10_000,
            fault: FaultConfig {
                crash_after_cycles: None,
                crash_exit_code: 1,
                mute_heartbeats: false,
                ignore_shutdown: false,
            },
        }
    }
}

impl WorkerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn work_interval(&self) -> Duration {
        Duration::from_millis(self.work_interval_ms)
    }

    pub fn work_timeout(&self) -> Duration {
        Duration::from_millis(self.work_timeout_ms)
    }
}
