//! Supervision policy knobs
//!
//! Every threshold the recovery heuristics and restart scheduling depend on
//! lives here with a default, so deployments can tune policy without touching
//! the state machines. Durations are carried as milliseconds to match the
//! wire-level heartbeat records.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Heartbeat monitor tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// How often the monitor checks for silence
    pub check_interval_ms: u64,
    /// Silence longer than this counts as a missed beat
    pub timeout_ms: u64,
    /// Missed beats before the worker is declared hung
    pub missed_threshold: u32,
    /// Recent inter-beat gaps kept for the rolling average
    pub history_size: usize,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 5_000,
            timeout_ms: 15_000,
            missed_threshold: 3,
            history_size: 20,
        }
    }
}

impl HeartbeatConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Worker lifecycle and restart scheduling tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerManagerConfig {
    /// Restart budget for one failure episode
    pub max_restarts: u32,
    /// Base delay before the first restart of an episode
    pub restart_delay_ms: u64,
    /// Ceiling for the backed-off restart delay
    pub max_restart_delay_ms: u64,
    /// Exponential growth factor applied per consecutive restart
    pub backoff_multiplier: f64,
    /// Quiet time after which consecutive-restart counting starts over
    pub restart_window_ms: u64,
    /// How long a fresh worker gets to signal ready
    pub startup_timeout_ms: u64,
    /// How long a worker gets to exit voluntarily after a shutdown request
    pub shutdown_timeout_ms: u64,
    /// Pause between the graceful and forceful kill signals
    pub kill_grace_ms: u64,
}

impl Default for WorkerManagerConfig {
    fn default() -> Self {
        Self {
            max_restarts: 10,
            restart_delay_ms: 1_000,
            max_restart_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            restart_window_ms: 300_000,
            startup_timeout_ms: 30_000,
            shutdown_timeout_ms: 10_000,
            kill_grace_ms: 5_000,
        }
    }
}

impl WorkerManagerConfig {
    /// Backoff delay for the Nth consecutive restart (1-based)
    pub fn restart_delay_for(&self, consecutive_restarts: u32) -> Duration {
        let exponent = consecutive_restarts.saturating_sub(1);
        let delay = self.restart_delay_ms as f64 * self.backoff_multiplier.powi(exponent as i32);
        Duration::from_millis((delay as u64).min(self.max_restart_delay_ms))
    }

    pub fn restart_window(&self) -> Duration {
        Duration::from_millis(self.restart_window_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// Recovery heuristic thresholds
///
/// The boot-loop and rapid-failure numbers are policy choices, not structural
/// requirements, so they are configuration with defaults rather than
/// constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Rolling window used by the rapid-failure and boot-loop rules
    pub rapid_failure_window_ms: u64,
    /// Failures within the window that count as "rapid"
    pub rapid_failure_count: usize,
    /// Uptime below this marks a failure as part of a boot loop
    pub boot_loop_uptime_ms: u64,
    /// Uptime at or above this marks the preceding run as stable
    pub stable_uptime_ms: u64,
    /// Consecutive crashes still considered early in an episode
    pub early_episode_crashes: u32,
    /// Consecutive crashes still considered mid-episode
    pub mid_episode_crashes: u32,
    /// Ceiling on any wait the engine asks for
    pub max_wait_ms: u64,
    /// Failure records retained for pattern analysis
    pub history_size: usize,
    /// Minimum spacing between decision cycles
    pub cooldown_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            rapid_failure_window_ms: 300_000,
            rapid_failure_count: 3,
            boot_loop_uptime_ms: 10_000,
            stable_uptime_ms: 60_000,
            early_episode_crashes: 3,
            mid_episode_crashes: 7,
            max_wait_ms: 60_000,
            history_size: 50,
            cooldown_ms: 5_000,
        }
    }
}

/// Top-level supervisor tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Consecutive crashes beyond which the supervisor fails outright,
    /// independent of what the recovery engine would say
    pub crash_ceiling: u32,
    /// Decisions retained in the stats snapshot
    pub decision_window: usize,
    /// Spacing of the periodic stats log line (0 disables it)
    pub stats_interval_ms: u64,
    pub worker: WorkerManagerConfig,
    pub heartbeat: HeartbeatConfig,
    pub recovery: RecoveryConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            crash_ceiling: 15,
            decision_window: 10,
            stats_interval_ms: 30_000,
            worker: WorkerManagerConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_restart_has_no_backoff() {
        let config = WorkerManagerConfig::default();
        assert_eq!(config.restart_delay_for(1), Duration::from_millis(1_000));
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let config = WorkerManagerConfig {
            restart_delay_ms: 1_000,
            max_restart_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            ..Default::default()
        };
        assert_eq!(config.restart_delay_for(2), Duration::from_millis(2_000));
        assert_eq!(config.restart_delay_for(3), Duration::from_millis(4_000));
        assert_eq!(config.restart_delay_for(4), Duration::from_millis(5_000));
        assert_eq!(config.restart_delay_for(10), Duration::from_millis(5_000));
    }
}
