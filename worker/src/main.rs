//! Main entry point for the worker binary
//!
//! Normally spawned by the supervisor with `--worker-id` and
//! `--supervisor-addr`; the fault flags exist so supervision paths can be
//! exercised from the command line.

use std::net::SocketAddr;

use clap::Parser;

use shared::{logging, process_info, ProcessId};
use worker::{
    FaultConfig, FlakyWorkload, HttpWorkload, RunOutcome, TcpSupervisorLink, Worker, WorkerConfig,
    WorkerResult, Workload,
};

/// Supervised worker doing periodic resilient work
#[derive(Parser)]
#[command(name = "worker")]
#[command(about = "Worker process supervised over a local TCP link")]
struct Args {
    /// Identity reported to the supervisor
    #[arg(long, default_value_t = 1)]
    worker_id: u32,

    /// Address of the supervisor's worker link
    #[arg(long, default_value = "127.0.0.1:7100")]
    supervisor_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Pause between heartbeats, ms
    #[arg(long)]
    heartbeat_interval_ms: Option<u64>,

    /// Pause between work cycles, ms
    #[arg(long)]
    work_interval_ms: Option<u64>,

    /// URL to GET each cycle instead of the simulated flaky work
    #[arg(long)]
    target_url: Option<String>,

    /// Fault switch: exit on purpose after this many work cycles
    #[arg(long)]
    crash_after: Option<u64>,

    /// Fault switch: exit code for the scripted crash
    #[arg(long, default_value_t = 1)]
    exit_code: i32,

    /// Fault switch: stop sending heartbeats (looks like a hang)
    #[arg(long)]
    mute_heartbeats: bool,

    /// Fault switch: keep running when asked to shut down
    #[arg(long)]
    ignore_shutdown: bool,
}

impl Args {
    fn to_config(&self) -> WorkerConfig {
        let mut config = WorkerConfig {
            worker_id: self.worker_id,
            supervisor_addr: self.supervisor_addr,
            fault: FaultConfig {
                crash_after_cycles: self.crash_after,
                crash_exit_code: self.exit_code,
                mute_heartbeats: self.mute_heartbeats,
                ignore_shutdown: self.ignore_shutdown,
            },
            ..WorkerConfig::default()
        };
        if let Some(v) = self.heartbeat_interval_ms {
            config.heartbeat_interval_ms = v;
        }
        if let Some(v) = self.work_interval_ms {
            config.work_interval_ms = v;
        }
        config
    }
}

#[tokio::main]
async fn main() -> WorkerResult<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    ProcessId::init_worker(args.worker_id);
    logging::init_tracing_with_level(Some(&args.log_level));
    logging::log_startup(ProcessId::current(), "worker");

    let config = args.to_config();
    let link = TcpSupervisorLink::new();

    let outcome = match args.target_url {
        Some(url) => {
            process_info!(ProcessId::current(), "🌐 Working against {}", url);
            run_worker(config, link, HttpWorkload::new(url)).await?
        }
        None => run_worker(config, link, FlakyWorkload::default()).await?,
    };

    match outcome {
        RunOutcome::ShutdownRequested => {
            logging::log_success(ProcessId::current(), "Worker stopped gracefully");
            Ok(())
        }
        RunOutcome::LinkClosed => {
            // Supervisor vanished; exit quietly, nothing is watching anymore
            logging::log_shutdown(ProcessId::current(), "Supervisor link lost");
            Ok(())
        }
        RunOutcome::FaultCrash { exit_code } => {
            std::process::exit(exit_code);
        }
    }
}

async fn run_worker<W: Workload>(
    config: WorkerConfig,
    link: TcpSupervisorLink,
    workload: W,
) -> WorkerResult<RunOutcome> {
    let worker = Worker::new(config, link, workload);
    worker.run().await
}
