//! Service trait definitions with mockall annotations for testing
//!
//! The worker manager never touches the OS or the network directly; it goes
//! through these traits so tests can script process lifetimes and inject
//! worker messages without spawning anything.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::error::SupervisorResult;
use shared::{SupervisorCommand, WorkerMessage};

/// Everything needed to launch one worker process
#[derive(Debug, Clone)]
pub struct WorkerLaunchSpec {
    /// User-friendly worker number, used for log tags and message routing
    pub worker_id: u32,
    /// Program to execute
    pub program: String,
    /// Arguments passed verbatim
    pub args: Vec<String>,
    /// Extra environment entries layered over the parent's environment
    pub env: HashMap<String, String>,
}

impl WorkerLaunchSpec {
    pub fn new(worker_id: u32, program: impl Into<String>) -> Self {
        Self {
            worker_id,
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// How a worker process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl WorkerExit {
    /// Exit that counts as successful for crash classification
    pub fn is_clean(&self) -> bool {
        self.code == Some(0)
    }
}

/// A live spawned worker process
///
/// `wait` must be cancel safe: the manager polls it inside a `select!` loop
/// and may drop the future between iterations.
#[mockall::automock]
#[async_trait::async_trait]
pub trait WorkerProcess: Send {
    /// OS process id
    fn pid(&self) -> u32;

    /// Resolve when the process exits
    async fn wait(&mut self) -> WorkerExit;

    /// Ask the process to die politely (SIGTERM on unix)
    async fn terminate(&mut self) -> SupervisorResult<()>;

    /// Kill the process unconditionally (SIGKILL on unix)
    async fn kill(&mut self) -> SupervisorResult<()>;
}

/// Process spawn abstraction
#[mockall::automock]
#[async_trait::async_trait]
pub trait WorkerSpawner: Send + Sync {
    /// Launch a worker, wiring its stdout/stderr into the supervisor's logs
    async fn spawn(&self, spec: &WorkerLaunchSpec) -> SupervisorResult<Box<dyn WorkerProcess>>;
}

/// Structured message channel between supervisor and worker
///
/// One worker connection at a time; a reconnect from a restarted worker
/// replaces the previous link.
#[mockall::automock]
#[async_trait::async_trait]
pub trait WorkerTransport: Send + Sync {
    /// Begin accepting worker connections, yielding inbound messages in
    /// arrival order
    async fn start(&self) -> SupervisorResult<mpsc::Receiver<WorkerMessage>>;

    /// Address workers should connect back to
    fn endpoint(&self) -> SocketAddr;

    /// Send a command to the connected worker
    ///
    /// Returns `Ok(false)` when no worker is currently connected.
    async fn send(&self, command: SupervisorCommand) -> SupervisorResult<bool>;

    /// Drop the current worker link, if any
    async fn disconnect(&self);
}
