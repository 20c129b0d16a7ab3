//! Main entry point for the supervisor binary
//!
//! Wires the real spawner and transport into the supervisor and keeps the
//! configured worker binary alive until shutdown or give-up. Exits non-zero
//! on give-up so an OS-level service manager can take over.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;

use shared::{logging, process_info, ProcessId};
use supervisor::{
    services::{RealWorkerSpawner, RealWorkerTransport},
    Supervisor, SupervisorConfig, SupervisorError, SupervisorResult, WorkerLaunchSpec,
    WorkerTransport,
};

/// Supervisor keeping a single worker process alive around the clock
#[derive(Parser)]
#[command(name = "supervisor")]
#[command(about = "Spawns, monitors and restarts a worker process")]
pub struct Args {
    /// Worker program to supervise
    #[arg(long, default_value = "worker")]
    pub worker_cmd: String,

    /// Extra arguments passed to the worker program
    #[arg(long)]
    pub worker_arg: Vec<String>,

    /// Address the worker link listens on (port 0 picks a free port)
    #[arg(long, default_value = "127.0.0.1:0")]
    pub listen_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Restart budget for one failure episode
    #[arg(long)]
    pub max_restarts: Option<u32>,

    /// Base restart delay in milliseconds
    #[arg(long)]
    pub restart_delay_ms: Option<u64>,

    /// Heartbeat silence tolerated before a beat counts as missed, ms
    #[arg(long)]
    pub heartbeat_timeout_ms: Option<u64>,

    /// Missed heartbeats before the worker is declared hung
    #[arg(long)]
    pub missed_threshold: Option<u32>,

    /// Time the worker gets to signal ready, ms
    #[arg(long)]
    pub startup_timeout_ms: Option<u64>,
}

impl Args {
    fn to_config(&self) -> SupervisorConfig {
        let mut config = SupervisorConfig::default();
        if let Some(v) = self.max_restarts {
            config.worker.max_restarts = v;
        }
        if let Some(v) = self.restart_delay_ms {
            config.worker.restart_delay_ms = v;
        }
        if let Some(v) = self.heartbeat_timeout_ms {
            config.heartbeat.timeout_ms = v;
        }
        if let Some(v) = self.missed_threshold {
            config.heartbeat.missed_threshold = v;
        }
        if let Some(v) = self.startup_timeout_ms {
            config.worker.startup_timeout_ms = v;
        }
        config
    }
}

#[tokio::main]
async fn main() -> SupervisorResult<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    ProcessId::init_supervisor();
    logging::init_tracing_with_level(Some(&args.log_level));
    logging::log_startup(ProcessId::current(), "supervisor");

    let config = args.to_config();

    let listen_addr: SocketAddr = args
        .listen_addr
        .parse()
        .map_err(|e| SupervisorError::config(format!("Invalid listen address: {e}")))?;
    let transport = Arc::new(RealWorkerTransport::bind(listen_addr).await?);

    let worker_id = 1;
    let mut worker_args = args.worker_arg.clone();
    worker_args.extend([
        "--worker-id".to_string(),
        worker_id.to_string(),
        "--supervisor-addr".to_string(),
        transport.endpoint().to_string(),
        "--log-level".to_string(),
        args.log_level.clone(),
    ]);
    let launch = WorkerLaunchSpec::new(worker_id, &args.worker_cmd).with_args(worker_args);

    process_info!(
        ProcessId::current(),
        "🔌 Worker link on {}, supervising '{}'",
        transport.endpoint(),
        args.worker_cmd
    );

    let mut supervisor = Supervisor::new(config, launch, RealWorkerSpawner::new(), transport);
    supervisor.start()?;

    // Graceful shutdown on Ctrl+C
    let shutdown_sender = supervisor.get_shutdown_sender();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                logging::log_shutdown(ProcessId::current(), "Received Ctrl+C signal");
                let _ = shutdown_sender.send(()).await;
            }
            Err(err) => {
                logging::log_error(ProcessId::current(), "Signal handling", &err);
            }
        }
    });

    // A give-up propagates as Err, making the process exit non-zero
    supervisor.run().await?;

    logging::log_success(ProcessId::current(), "Supervisor stopped gracefully");
    Ok(())
}
