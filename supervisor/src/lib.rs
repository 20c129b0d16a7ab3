//! Supervisor library for keeping one worker process alive
//!
//! Composes process spawning, heartbeat liveness monitoring, backed-off
//! restarts, and a failure-pattern recovery engine behind a single
//! [`Supervisor`] entry point with injectable services.

pub mod config;
pub mod core;
pub mod error;
pub mod services;
pub mod supervisor;
pub mod traits;

// Re-export commonly used types
pub use config::{HeartbeatConfig, RecoveryConfig, SupervisorConfig, WorkerManagerConfig};
pub use core::{HeartbeatMonitor, RecoveryEngine, WorkerEvent, WorkerManager, WorkerManagerHandle};
pub use error::{SupervisorError, SupervisorResult};
pub use supervisor::{Supervisor, SupervisorEvent};
pub use traits::{WorkerExit, WorkerLaunchSpec, WorkerProcess, WorkerSpawner, WorkerTransport};
