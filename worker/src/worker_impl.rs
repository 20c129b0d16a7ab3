//! Worker run loop
//!
//! Implements the worker side of the supervision contract: connect to the
//! supervisor, announce readiness, heartbeat on an interval, do the actual
//! work under retry/breaker protection, and exit voluntarily on a shutdown
//! command. The fault switches let a test run script crashes and hangs.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::heartbeat::HeartbeatSender;
use crate::traits::{SupervisorLink, Workload};
use resilience::{BreakerRegistry, ResilientCall, RetryPolicy};
use shared::{
    logging, process_debug, process_info, process_warn, ProcessId, SupervisorCommand, WorkerMessage,
};

/// Name of the breaker guarding the workload dependency
const WORKLOAD_BREAKER: &str = "workload";

/// How a worker run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Supervisor asked for a shutdown and the worker complied
    ShutdownRequested,
    /// The command channel closed; the supervisor is gone
    LinkClosed,
    /// A scripted fault decided the worker should die now
    FaultCrash { exit_code: i32 },
}

/// Reference worker with injected link and workload
pub struct Worker<L, W>
where
    L: SupervisorLink + 'static,
    W: Workload,
{
    config: WorkerConfig,
    link: Arc<L>,
    workload: W,
    breakers: Arc<BreakerRegistry>,
}

impl<L, W> Worker<L, W>
where
    L: SupervisorLink + 'static,
    W: Workload,
{
    pub fn new(config: WorkerConfig, link: L, workload: W) -> Self {
        Self {
            config,
            link: Arc::new(link),
            workload,
            breakers: Arc::new(BreakerRegistry::default()),
        }
    }

    /// Breaker registry guarding the workload, for stats inspection
    pub fn breakers(&self) -> Arc<BreakerRegistry> {
        self.breakers.clone()
    }

    /// Connect, announce readiness, and run until shutdown or fault
    pub async fn run(&self) -> WorkerResult<RunOutcome> {
        self.link.connect(self.config.supervisor_addr).await?;
        let mut commands = self.link.commands().await?;

        self.link
            .send(WorkerMessage::Ready {
                worker_id: self.config.worker_id,
                pid: std::process::id(),
                listen_port: 0,
            })
            .await?;
        process_info!(ProcessId::current(), "✅ Ready signal sent");

        let heartbeat = if self.config.fault.mute_heartbeats {
            process_warn!(ProcessId::current(), "🔇 Heartbeats muted by fault switch");
            None
        } else {
            let sender =
                HeartbeatSender::new(self.config.worker_id, self.config.heartbeat_interval());
            Some(sender.start(self.link.clone()))
        };

        let call = ResilientCall::new("work_cycle")
            .with_policy(RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(5),
                multiplier: 2.0,
                jitter: 0.1,
            })
            .with_attempt_timeout(self.config.work_timeout())
            .with_breakers(self.breakers.clone())
            .with_breaker_name(WORKLOAD_BREAKER);

        let mut work_ticks = interval(self.config.work_interval());
        // The immediate first tick would start working at t=0
        work_ticks.tick().await;
        let mut cycle = 0u64;

        let outcome = loop {
            tokio::select! {
                _ = work_ticks.tick() => {
                    cycle += 1;
                    match call.run(|| self.workload.perform(cycle)).await {
                        Ok(outcome) => {
                            process_debug!(ProcessId::current(), "🔧 {}", outcome);
                        }
                        Err(e) => {
                            // Work failures are the supervisor's problem only
                            // if they kill the process; keep cycling
                            process_warn!(ProcessId::current(), "⚠️ Work cycle {} failed: {}", cycle, e);
                        }
                    }

                    if let Some(limit) = self.config.fault.crash_after_cycles {
                        if cycle >= limit {
                            process_warn!(
                                ProcessId::current(),
                                "💥 Scripted crash after {} cycles",
                                cycle
                            );
                            break RunOutcome::FaultCrash {
                                exit_code: self.config.fault.crash_exit_code,
                            };
                        }
                    }
                }
                command = commands.recv() => {
                    match command {
                        Some(SupervisorCommand::Shutdown { reason }) => {
                            if self.config.fault.ignore_shutdown {
                                process_warn!(
                                    ProcessId::current(),
                                    "🙉 Ignoring shutdown request by fault switch: {}",
                                    reason
                                );
                                continue;
                            }
                            logging::log_shutdown(ProcessId::current(), &reason);
                            break RunOutcome::ShutdownRequested;
                        }
                        Some(SupervisorCommand::Custom { payload }) => {
                            process_debug!(ProcessId::current(), "📨 Custom command: {}", payload);
                        }
                        None => {
                            process_warn!(ProcessId::current(), "🔌 Supervisor link closed, stopping");
                            break RunOutcome::LinkClosed;
                        }
                    }
                }
            }
        };

        if let Some(token) = heartbeat {
            token.cancel();
        }
        self.link.disconnect().await;
        Ok(outcome)
    }
}
