//! Top-level supervision orchestration
//!
//! Wires the worker manager and the recovery engine together: worker
//! lifecycle events come in, recovery decisions go out, and everything of
//! interest is re-published as typed [`SupervisorEvent`]s on a broadcast
//! channel for whoever is watching. Persistent failure surfaces as an error
//! from [`Supervisor::run`] so the hosting process can exit non-zero.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::config::SupervisorConfig;
use crate::core::recovery::{RecoveryContext, RecoveryEngine};
use crate::core::worker::{WorkerEvent, WorkerManager, WorkerManagerHandle};
use crate::error::{SupervisorError, SupervisorResult};
use crate::traits::{WorkerLaunchSpec, WorkerSpawner, WorkerTransport};
use shared::{
    process_debug, process_info, process_warn, FailureReason, HeartbeatStats, ProcessId,
    RecoveryAction, RecoveryDecision, SupervisorCommand, SupervisorState, SupervisorStatsSnapshot,
    WorkerState, WorkerStatsSnapshot,
};

/// Capacity of the broadcast event channel
const EVENT_BUFFER: usize = 64;

/// Everything observable about the supervisor, as discrete typed events
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    WorkerStarted { pid: u32 },
    WorkerReady { pid: u32 },
    WorkerCrashed {
        reason: FailureReason,
        uptime_ms: u64,
        consecutive_restarts: u32,
    },
    WorkerHung { pid: u32 },
    RestartScheduled { delay_ms: u64, attempt: u32 },
    RecoveryDecided { decision: RecoveryDecision },
    /// External attention requested; alerting is a collaborator's job
    Escalated { decision: RecoveryDecision },
    Failed { reason: String },
    Stopped,
}

/// Composes worker manager + recovery engine under one state machine
pub struct Supervisor<S, T>
where
    S: WorkerSpawner + 'static,
    T: WorkerTransport + 'static,
{
    config: SupervisorConfig,
    state: SupervisorState,
    started_at: Instant,

    /// Taken by `start`
    parts: Option<(WorkerLaunchSpec, S, Arc<T>)>,
    handle: Option<WorkerManagerHandle>,
    manager_task: Option<JoinHandle<()>>,
    worker_events: Option<mpsc::Receiver<WorkerEvent>>,

    recovery: RecoveryEngine,
    /// Cooldown gate so failure bursts cannot race decision cycles
    last_decision_at: Option<Instant>,
    /// Crash streak as seen at this layer, reset on a successful ready
    crash_streak: u32,

    events_tx: broadcast::Sender<SupervisorEvent>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl<S, T> Supervisor<S, T>
where
    S: WorkerSpawner + 'static,
    T: WorkerTransport + 'static,
{
    pub fn new(config: SupervisorConfig, launch: WorkerLaunchSpec, spawner: S, transport: Arc<T>) -> Self {
        let recovery = RecoveryEngine::new(config.recovery.clone(), config.decision_window);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Self {
            config,
            state: SupervisorState::Stopped,
            started_at: Instant::now(),
            parts: Some((launch, spawner, transport)),
            handle: None,
            manager_task: None,
            worker_events: None,
            recovery,
            last_decision_at: None,
            crash_streak: 0,
            events_tx,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events_tx.subscribe()
    }

    /// Sender used to request a graceful shutdown from outside the run loop
    pub fn get_shutdown_sender(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Start the worker manager task
    pub fn start(&mut self) -> SupervisorResult<()> {
        let (launch, spawner, transport) = self
            .parts
            .take()
            .ok_or_else(|| SupervisorError::config("supervisor already started"))?;

        self.state = SupervisorState::Starting;
        self.started_at = Instant::now();

        let (manager, handle, events_rx) = WorkerManager::new(
            self.config.worker.clone(),
            self.config.heartbeat.clone(),
            launch,
            spawner,
            transport,
        );

        self.handle = Some(handle);
        self.worker_events = Some(events_rx);
        self.manager_task = Some(tokio::spawn(manager.run()));
        self.state = SupervisorState::Running;

        process_info!(ProcessId::current(), "🛡️ Supervision running");
        Ok(())
    }

    /// Main event loop; returns an error when supervision gave up
    pub async fn run(&mut self) -> SupervisorResult<()> {
        let mut worker_events = self
            .worker_events
            .take()
            .ok_or_else(|| SupervisorError::config("run called before start"))?;

        let stats_period = self.config.stats_interval_ms.max(1);
        let mut stats_ticks = interval(std::time::Duration::from_millis(stats_period));
        stats_ticks.tick().await;
        let stats_enabled = self.config.stats_interval_ms > 0;

        loop {
            tokio::select! {
                event = worker_events.recv() => {
                    match event {
                        Some(event) => {
                            if let Some(exit) = self.handle_worker_event(event).await {
                                self.shutdown().await;
                                return exit;
                            }
                        }
                        None => {
                            // Manager ended on its own; its last events told us why
                            if self.state == SupervisorState::Failed {
                                self.shutdown().await;
                                return Err(SupervisorError::GaveUp {
                                    reason: "worker manager stopped after giving up".to_string(),
                                });
                            }
                            self.shutdown().await;
                            return Ok(());
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    process_info!(ProcessId::current(), "🛑 Shutdown requested");
                    self.shutdown().await;
                    return Ok(());
                }
                _ = stats_ticks.tick(), if stats_enabled => {
                    let stats = self.stats();
                    process_debug!(
                        ProcessId::current(),
                        "📊 state={} worker={} restarts={}/{} heartbeats={}",
                        stats.state,
                        stats.worker.state,
                        stats.worker.consecutive_restarts,
                        stats.worker.total_restarts,
                        stats.worker.heartbeat.total_received
                    );
                }
            }
        }
    }

    /// React to one worker lifecycle event
    ///
    /// Returns `Some(result)` when the run loop should terminate with it.
    async fn handle_worker_event(&mut self, event: WorkerEvent) -> Option<SupervisorResult<()>> {
        match event {
            WorkerEvent::Started { pid } => {
                self.publish(SupervisorEvent::WorkerStarted { pid });
                None
            }
            WorkerEvent::Ready { pid } => {
                self.crash_streak = 0;
                self.publish(SupervisorEvent::WorkerReady { pid });
                None
            }
            WorkerEvent::Hung { pid } => {
                self.publish(SupervisorEvent::WorkerHung { pid });
                None
            }
            WorkerEvent::RestartScheduled { delay_ms, attempt } => {
                self.publish(SupervisorEvent::RestartScheduled { delay_ms, attempt });
                None
            }
            WorkerEvent::Crashed { reason, uptime_ms, consecutive_restarts, .. } => {
                self.crash_streak += 1;
                self.publish(SupervisorEvent::WorkerCrashed {
                    reason,
                    uptime_ms,
                    consecutive_restarts,
                });

                if self.crash_streak > self.config.crash_ceiling {
                    return Some(self.fail(format!(
                        "{} consecutive crashes exceeded the ceiling of {}",
                        self.crash_streak, self.config.crash_ceiling
                    )));
                }

                self.recover(reason, uptime_ms).await
            }
            WorkerEvent::MaxRestartsReached { count } => {
                process_warn!(ProcessId::current(), "🚫 Restart budget exhausted at {}", count);
                self.recover(FailureReason::MaxRestarts, 0).await
            }
            WorkerEvent::Stopped => {
                // Final event before the manager task ends; the recv() None
                // that follows decides how the run loop exits
                None
            }
        }
    }

    /// Ask the recovery engine about a failure, subject to the cooldown
    async fn recover(&mut self, reason: FailureReason, uptime_ms: u64) -> Option<SupervisorResult<()>> {
        let cooldown = std::time::Duration::from_millis(self.config.recovery.cooldown_ms);
        if let Some(last) = self.last_decision_at {
            if last.elapsed() < cooldown {
                process_debug!(ProcessId::current(), "🧊 Recovery decision suppressed by cooldown");
                return None;
            }
        }
        self.last_decision_at = Some(Instant::now());

        let worker = self.worker_stats();
        let ctx = RecoveryContext {
            reason,
            consecutive_crashes: self.crash_streak,
            uptime_ms,
            worker,
        };
        let decision = self.recovery.decide(&ctx);
        process_info!(
            ProcessId::current(),
            "🧭 Recovery decision: {} (confidence {:.2}) - {}",
            decision.action,
            decision.confidence,
            decision.reason
        );
        self.publish(SupervisorEvent::RecoveryDecided {
            decision: decision.clone(),
        });

        match decision.action {
            // The manager's own backoff already applies
            RecoveryAction::Restart | RecoveryAction::Wait => None,
            RecoveryAction::Escalate => {
                self.publish(SupervisorEvent::Escalated { decision });
                None
            }
            RecoveryAction::GiveUp => Some(self.fail(decision.reason)),
        }
    }

    /// Enter the terminal failed state
    fn fail(&mut self, reason: String) -> SupervisorResult<()> {
        process_warn!(ProcessId::current(), "💀 Supervision failed: {}", reason);
        self.state = SupervisorState::Failed;
        self.publish(SupervisorEvent::Failed { reason: reason.clone() });
        Err(SupervisorError::GaveUp { reason })
    }

    /// Graceful shutdown of the worker manager; idempotent
    pub async fn shutdown(&mut self) {
        if self.state != SupervisorState::Failed {
            self.state = SupervisorState::Stopping;
        }

        if let Some(handle) = self.handle.take() {
            handle.stop().await;
        }
        if let Some(task) = self.manager_task.take() {
            let _ = task.await;
        }

        if self.state != SupervisorState::Failed {
            self.state = SupervisorState::Stopped;
        }
        self.publish(SupervisorEvent::Stopped);
    }

    /// Aggregate point-in-time stats
    pub fn stats(&self) -> SupervisorStatsSnapshot {
        SupervisorStatsSnapshot {
            state: self.state,
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
            worker: self.worker_stats(),
            recovery: self.recovery.snapshot(),
        }
    }

    /// Pass a command through to the worker; `false` when none is connected
    pub async fn send_to_worker(&self, command: SupervisorCommand) -> bool {
        match &self.handle {
            Some(handle) => handle.send(command).await,
            None => false,
        }
    }

    fn worker_stats(&self) -> WorkerStatsSnapshot {
        match &self.handle {
            Some(handle) => handle.stats(),
            None => WorkerStatsSnapshot {
                worker_id: 0,
                state: WorkerState::Stopped,
                pid: None,
                uptime_ms: 0,
                consecutive_restarts: 0,
                total_restarts: 0,
                last_exit_code: None,
                last_exit_signal: None,
                auto_restart: false,
                heartbeat: HeartbeatStats::default(),
            },
        }
    }

    fn publish(&self, event: SupervisorEvent) {
        // No subscribers is fine; events are observability, not control flow
        let _ = self.events_tx.send(event);
    }
}
