//! Reference worker for the supervision system
//!
//! Implements the worker-side contract: connect back to the supervisor,
//! signal ready, heartbeat periodically, work under retry/breaker
//! protection, and honor shutdown commands. Fault switches allow scripted
//! crashes and hangs for exercising the supervisor end to end.

pub mod config;
pub mod error;
pub mod heartbeat;
pub mod services;
pub mod traits;
pub mod worker_impl;

// Re-export commonly used types
pub use config::{FaultConfig, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use heartbeat::HeartbeatSender;
pub use services::{FlakyWorkload, HttpWorkload, TcpSupervisorLink};
pub use traits::{SupervisorLink, Workload};
pub use worker_impl::{RunOutcome, Worker};
