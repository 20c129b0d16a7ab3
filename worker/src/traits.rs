//! Service trait definitions with mockall annotations for testing
//!
//! The worker reaches its supervisor and its actual workload only through
//! these traits, so the run loop can be exercised with scripted fakes.

use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::error::WorkerResult;
use resilience::ResilienceResult;
use shared::{SupervisorCommand, WorkerMessage};

/// Framed message channel back to the supervisor
///
/// One connection per worker lifetime; a lost link is fatal for the worker,
/// the supervisor restarts it.
#[mockall::automock]
#[async_trait::async_trait]
pub trait SupervisorLink: Send + Sync {
    /// Connect to the supervisor's worker endpoint
    async fn connect(&self, addr: SocketAddr) -> WorkerResult<()>;

    /// Begin reading supervisor commands, yielding them in arrival order
    ///
    /// The channel closes when the supervisor side goes away.
    async fn commands(&self) -> WorkerResult<mpsc::Receiver<SupervisorCommand>>;

    /// Send one message to the supervisor
    async fn send(&self, message: WorkerMessage) -> WorkerResult<()>;

    /// Drop the connection
    async fn disconnect(&self);
}

/// One unit of the worker's actual job
///
/// Errors come back as `ResilienceError` so the retry/breaker stack can
/// classify them directly.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Workload: Send + Sync {
    /// Perform one work cycle, returning a short outcome description
    async fn perform(&self, cycle: u64) -> ResilienceResult<String>;
}
