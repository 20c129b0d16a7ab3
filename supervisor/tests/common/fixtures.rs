//! Shared configuration fixtures for supervision tests

use supervisor::{HeartbeatConfig, RecoveryConfig, SupervisorConfig, WorkerLaunchSpec, WorkerManagerConfig};

/// Worker id used by every scripted worker
pub const WORKER_ID: u32 = 1;

pub fn launch_spec() -> WorkerLaunchSpec {
    WorkerLaunchSpec::new(WORKER_ID, "scripted-worker")
}

/// Heartbeat config that never fires, for tests about restarts only
pub fn quiet_heartbeat() -> HeartbeatConfig {
    HeartbeatConfig {
        check_interval_ms: 1_000_000,
        timeout_ms: 1_000_000,
        missed_threshold: 1_000,
        history_size: 10,
    }
}

/// Heartbeat config that declares a hang quickly
pub fn tight_heartbeat() -> HeartbeatConfig {
    HeartbeatConfig {
        check_interval_ms: 1_000,
        timeout_ms: 3_000,
        missed_threshold: 2,
        history_size: 10,
    }
}

pub fn manager_config() -> WorkerManagerConfig {
    WorkerManagerConfig {
        max_restarts: 10,
        restart_delay_ms: 1_000,
        max_restart_delay_ms: 60_000,
        backoff_multiplier: 2.0,
        restart_window_ms: 300_000,
        startup_timeout_ms: 5_000,
        shutdown_timeout_ms: 2_000,
        kill_grace_ms: 1_000,
    }
}

/// Recovery config whose window rules never fire, isolating streak rules
pub fn streak_only_recovery() -> RecoveryConfig {
    RecoveryConfig {
        rapid_failure_window_ms: 0,
        cooldown_ms: 0,
        ..Default::default()
    }
}

pub fn supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        crash_ceiling: 50,
        decision_window: 10,
        stats_interval_ms: 0,
        worker: manager_config(),
        heartbeat: quiet_heartbeat(),
        recovery: streak_only_recovery(),
    }
}
