//! Worker process lifecycle management
//!
//! Owns the single worker: spawn, wait for the ready handshake, feed
//! heartbeats to the monitor, classify exits, schedule backed-off restarts,
//! and force-kill on hangs. Runs as one task whose loop reacts to process
//! exit, inbound messages, heartbeat signals, the restart timer, and control
//! requests; everything it learns goes out as typed [`WorkerEvent`]s.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::config::{HeartbeatConfig, WorkerManagerConfig};
use crate::core::heartbeat::{HeartbeatMonitor, HeartbeatSignal};
use crate::traits::{WorkerExit, WorkerLaunchSpec, WorkerProcess, WorkerSpawner, WorkerTransport};
use shared::{
    process_debug, process_info, process_warn, FailureReason, ProcessId, SupervisorCommand,
    WorkerMessage, WorkerState, WorkerStatsSnapshot,
};

/// Capacity of the event channel toward the supervisor
const EVENT_BUFFER: usize = 64;
/// Capacity of the control channel from the handle
const CONTROL_BUFFER: usize = 16;

/// Lifecycle notifications published by the manager
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Process spawned, ready handshake pending
    Started { pid: u32 },
    /// Ready handshake received within the startup timeout
    Ready { pid: u32 },
    /// Worker died or was killed; `reason` distinguishes crash from hang
    Crashed {
        reason: FailureReason,
        exit: Option<WorkerExit>,
        uptime_ms: u64,
        consecutive_restarts: u32,
    },
    /// Heartbeat monitor declared the worker hung; forced kill follows
    Hung { pid: u32 },
    /// A restart will be attempted after the delay
    RestartScheduled { delay_ms: u64, attempt: u32 },
    /// Restart budget exhausted; auto-restart disabled for this episode
    MaxRestartsReached { count: u32 },
    /// Manager finished, voluntarily or after giving up
    Stopped,
}

/// Requests from the handle into the run loop
enum ControlRequest {
    Stop { ack: oneshot::Sender<()> },
    Send {
        command: SupervisorCommand,
        ack: oneshot::Sender<bool>,
    },
}

/// Stats-visible worker bookkeeping, shared between loop and handle
struct WorkerShared {
    state: WorkerState,
    pid: Option<u32>,
    started_at: Option<Instant>,
    consecutive_restarts: u32,
    total_restarts: u32,
    last_exit_code: Option<i32>,
    last_exit_signal: Option<i32>,
    last_restart_at: Option<Instant>,
    auto_restart: bool,
}

impl WorkerShared {
    fn new() -> Self {
        Self {
            state: WorkerState::Stopped,
            pid: None,
            started_at: None,
            consecutive_restarts: 0,
            total_restarts: 0,
            last_exit_code: None,
            last_exit_signal: None,
            last_restart_at: None,
            auto_restart: true,
        }
    }
}

/// Caller-side handle to a running [`WorkerManager`] task
#[derive(Clone)]
pub struct WorkerManagerHandle {
    worker_id: u32,
    shared: Arc<Mutex<WorkerShared>>,
    monitor: HeartbeatMonitor,
    control_tx: mpsc::Sender<ControlRequest>,
}

impl WorkerManagerHandle {
    /// Point-in-time worker stats
    pub fn stats(&self) -> WorkerStatsSnapshot {
        let shared = self.shared.lock().expect("worker shared lock poisoned");
        let uptime_ms = match shared.state {
            WorkerState::Starting | WorkerState::Running | WorkerState::Stopping | WorkerState::Hung => {
                shared.started_at.map(|t| t.elapsed().as_millis() as u64).unwrap_or(0)
            }
            _ => 0,
        };

        WorkerStatsSnapshot {
            worker_id: self.worker_id,
            state: shared.state,
            pid: shared.pid,
            uptime_ms,
            consecutive_restarts: shared.consecutive_restarts,
            total_restarts: shared.total_restarts,
            last_exit_code: shared.last_exit_code,
            last_exit_signal: shared.last_exit_signal,
            auto_restart: shared.auto_restart,
            heartbeat: self.monitor.stats(),
        }
    }

    /// Graceful stop; idempotent once the manager has already finished
    pub async fn stop(&self) {
        let (ack, done) = oneshot::channel();
        if self.control_tx.send(ControlRequest::Stop { ack }).await.is_err() {
            return;
        }
        let _ = done.await;
    }

    /// Send a command to the worker; `false` when none is connected
    pub async fn send(&self, command: SupervisorCommand) -> bool {
        let (ack, answer) = oneshot::channel();
        if self
            .control_tx
            .send(ControlRequest::Send { command, ack })
            .await
            .is_err()
        {
            return false;
        }
        answer.await.unwrap_or(false)
    }
}

/// What woke the supervise loop up
enum Wake {
    Exited(WorkerExit),
    Signal(HeartbeatSignal),
    Message(WorkerMessage),
    Control(Option<ControlRequest>),
    StartupTimeout,
}

/// How one worker instance's episode ended
enum EpisodeEnd {
    StopRequested,
    Failure {
        reason: FailureReason,
        exit: Option<WorkerExit>,
        uptime_ms: u64,
    },
}

/// The manager task; construct with [`WorkerManager::new`], then spawn
/// [`WorkerManager::run`]
pub struct WorkerManager<S, T>
where
    S: WorkerSpawner,
    T: WorkerTransport,
{
    config: WorkerManagerConfig,
    launch: WorkerLaunchSpec,
    spawner: S,
    transport: Arc<T>,
    monitor: HeartbeatMonitor,
    signals: mpsc::Receiver<HeartbeatSignal>,
    shared: Arc<Mutex<WorkerShared>>,
    control_rx: mpsc::Receiver<ControlRequest>,
    events: mpsc::Sender<WorkerEvent>,
}

impl<S, T> WorkerManager<S, T>
where
    S: WorkerSpawner,
    T: WorkerTransport,
{
    pub fn new(
        config: WorkerManagerConfig,
        heartbeat_config: HeartbeatConfig,
        launch: WorkerLaunchSpec,
        spawner: S,
        transport: Arc<T>,
    ) -> (Self, WorkerManagerHandle, mpsc::Receiver<WorkerEvent>) {
        let (monitor, signals) = HeartbeatMonitor::new(heartbeat_config);
        let shared = Arc::new(Mutex::new(WorkerShared::new()));
        let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);
        let (events, events_rx) = mpsc::channel(EVENT_BUFFER);

        let handle = WorkerManagerHandle {
            worker_id: launch.worker_id,
            shared: shared.clone(),
            monitor: monitor.clone(),
            control_tx,
        };

        let manager = Self {
            config,
            launch,
            spawner,
            transport,
            monitor,
            signals,
            shared,
            control_rx,
            events,
        };

        (manager, handle, events_rx)
    }

    /// Supervision loop: one worker instance at a time, restarts in between
    pub async fn run(mut self) {
        let mut messages = match self.transport.start().await {
            Ok(rx) => rx,
            Err(e) => {
                process_warn!(ProcessId::current(), "⚠️ Worker transport failed to start: {}", e);
                self.set_state(WorkerState::Failed);
                self.emit(WorkerEvent::Stopped).await;
                return;
            }
        };
        self.monitor.start();

        loop {
            match self.run_one(&mut messages).await {
                EpisodeEnd::StopRequested => {
                    self.set_state(WorkerState::Stopped);
                    self.emit(WorkerEvent::Stopped).await;
                    break;
                }
                EpisodeEnd::Failure { reason, exit, uptime_ms } => {
                    if !self.handle_failure(reason, exit, uptime_ms, &mut messages).await {
                        break;
                    }
                }
            }
        }

        self.monitor.stop();
        self.transport.disconnect().await;
    }

    /// Classify a failure and either schedule a restart or park the manager
    ///
    /// Returns `false` when the manager should exit its loop.
    async fn handle_failure(
        &mut self,
        reason: FailureReason,
        exit: Option<WorkerExit>,
        uptime_ms: u64,
        messages: &mut mpsc::Receiver<WorkerMessage>,
    ) -> bool {
        // Restart-window amnesty: sporadic old failures start a new episode
        {
            let mut shared = self.shared.lock().expect("worker shared lock poisoned");
            if let Some(last) = shared.last_restart_at {
                if last.elapsed() > self.config.restart_window() {
                    shared.consecutive_restarts = 0;
                }
            }
            shared.state = WorkerState::Crashed;
            shared.pid = None;
        }

        let consecutive = self.shared_consecutive();
        self.emit(WorkerEvent::Crashed {
            reason,
            exit,
            uptime_ms,
            consecutive_restarts: consecutive,
        })
        .await;

        if !self.auto_restart_enabled() {
            self.set_state(WorkerState::Stopped);
            self.emit(WorkerEvent::Stopped).await;
            return false;
        }

        if consecutive >= self.config.max_restarts {
            process_warn!(
                ProcessId::current(),
                "🚫 worker_{} hit the restart ceiling ({}), auto-restart disabled",
                self.launch.worker_id,
                self.config.max_restarts
            );
            {
                let mut shared = self.shared.lock().expect("worker shared lock poisoned");
                shared.auto_restart = false;
                shared.state = WorkerState::Failed;
            }
            self.emit(WorkerEvent::MaxRestartsReached { count: consecutive }).await;
            // Stay reachable for stats and stop until the supervisor decides
            let stopped = self.idle_until_stop().await;
            self.set_state(WorkerState::Stopped);
            self.emit(WorkerEvent::Stopped).await;
            let _ = stopped;
            return false;
        }

        let attempt = {
            let mut shared = self.shared.lock().expect("worker shared lock poisoned");
            shared.consecutive_restarts += 1;
            shared.total_restarts += 1;
            shared.last_restart_at = Some(Instant::now());
            shared.state = WorkerState::Restarting;
            shared.consecutive_restarts
        };

        let delay = self.config.restart_delay_for(attempt);
        process_info!(
            ProcessId::current(),
            "🔄 Restarting worker_{} in {}ms (attempt {} of {})",
            self.launch.worker_id,
            delay.as_millis(),
            attempt,
            self.config.max_restarts
        );
        self.emit(WorkerEvent::RestartScheduled {
            delay_ms: delay.as_millis() as u64,
            attempt,
        })
        .await;

        if !self.backoff_sleep(delay, messages).await {
            // Stop request cancels the pending restart immediately
            self.set_state(WorkerState::Stopped);
            self.emit(WorkerEvent::Stopped).await;
            return false;
        }

        self.monitor.reset();
        true
    }

    /// Spawn one worker and supervise it until it ends
    async fn run_one(&mut self, messages: &mut mpsc::Receiver<WorkerMessage>) -> EpisodeEnd {
        self.set_state(WorkerState::Starting);

        let mut process = match self.spawner.spawn(&self.launch).await {
            Ok(process) => process,
            Err(e) => {
                process_warn!(ProcessId::current(), "⚠️ Spawn failed: {}", e);
                return EpisodeEnd::Failure {
                    reason: FailureReason::Crash,
                    exit: None,
                    uptime_ms: 0,
                };
            }
        };

        let pid = process.pid();
        let started_at = Instant::now();
        {
            let mut shared = self.shared.lock().expect("worker shared lock poisoned");
            shared.pid = Some(pid);
            shared.started_at = Some(started_at);
        }
        self.emit(WorkerEvent::Started { pid }).await;

        // Startup phase: the worker must signal ready before the timeout
        let deadline = tokio::time::Instant::now() + self.config.startup_timeout();
        loop {
            let wake = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => Wake::StartupTimeout,
                exit = process.wait() => Wake::Exited(exit),
                Some(message) = messages.recv() => Wake::Message(message),
                request = self.control_rx.recv() => Wake::Control(request),
            };

            match wake {
                Wake::StartupTimeout => {
                    process_warn!(
                        ProcessId::current(),
                        "⏱️ worker_{} failed to signal ready within {}ms",
                        self.launch.worker_id,
                        self.config.startup_timeout_ms
                    );
                    let exit = self.force_kill(&mut process).await;
                    return EpisodeEnd::Failure {
                        reason: FailureReason::Crash,
                        exit,
                        uptime_ms: started_at.elapsed().as_millis() as u64,
                    };
                }
                Wake::Exited(exit) => {
                    // Died before signaling ready: same path as a crash
                    self.record_exit(exit);
                    return EpisodeEnd::Failure {
                        reason: FailureReason::Crash,
                        exit: Some(exit),
                        uptime_ms: started_at.elapsed().as_millis() as u64,
                    };
                }
                Wake::Message(WorkerMessage::Ready { worker_id, pid: worker_pid, .. }) => {
                    if worker_id != self.launch.worker_id {
                        process_warn!(
                            ProcessId::current(),
                            "⚠️ Ignoring ready from unexpected worker_{worker_id}"
                        );
                        continue;
                    }
                    process_debug!(
                        ProcessId::current(),
                        "✅ worker_{} ready (reported pid {})",
                        worker_id,
                        worker_pid
                    );
                    break;
                }
                Wake::Message(message) => self.handle_message(message),
                Wake::Control(request) => {
                    if self.handle_control(request, &mut process).await {
                        return EpisodeEnd::StopRequested;
                    }
                }
                Wake::Signal(_) => unreachable!("signals are not polled during startup"),
            }
        }

        self.set_state(WorkerState::Running);
        self.monitor.reset();
        // Discard liveness signals accumulated while no worker was up
        while self.signals.try_recv().is_ok() {}
        self.emit(WorkerEvent::Ready { pid }).await;

        // Supervise phase: react to exit, silence, messages, and control
        loop {
            let wake = tokio::select! {
                exit = process.wait() => Wake::Exited(exit),
                Some(signal) = self.signals.recv() => Wake::Signal(signal),
                Some(message) = messages.recv() => Wake::Message(message),
                request = self.control_rx.recv() => Wake::Control(request),
            };

            match wake {
                Wake::Exited(exit) => {
                    self.record_exit(exit);
                    return EpisodeEnd::Failure {
                        reason: FailureReason::Crash,
                        exit: Some(exit),
                        uptime_ms: started_at.elapsed().as_millis() as u64,
                    };
                }
                Wake::Signal(HeartbeatSignal::Missed { missed_count }) => {
                    process_warn!(
                        ProcessId::current(),
                        "💔 worker_{} missed heartbeat ({} so far)",
                        self.launch.worker_id,
                        missed_count
                    );
                }
                Wake::Signal(HeartbeatSignal::Dead { missed_count }) => {
                    process_warn!(
                        ProcessId::current(),
                        "☠️ worker_{} declared hung after {} missed heartbeats",
                        self.launch.worker_id,
                        missed_count
                    );
                    self.set_state(WorkerState::Hung);
                    self.emit(WorkerEvent::Hung { pid }).await;
                    let exit = self.force_kill(&mut process).await;
                    return EpisodeEnd::Failure {
                        reason: FailureReason::Hang,
                        exit,
                        uptime_ms: started_at.elapsed().as_millis() as u64,
                    };
                }
                Wake::Message(message) => self.handle_message(message),
                Wake::Control(request) => {
                    if self.handle_control(request, &mut process).await {
                        return EpisodeEnd::StopRequested;
                    }
                }
                Wake::StartupTimeout => unreachable!("no startup deadline while running"),
            }
        }
    }

    /// Route one inbound worker message
    fn handle_message(&self, message: WorkerMessage) {
        match message {
            WorkerMessage::Heartbeat { worker_id, record } => {
                if worker_id == self.launch.worker_id {
                    self.monitor.record(record);
                } else {
                    process_warn!(
                        ProcessId::current(),
                        "⚠️ Dropping heartbeat from unexpected worker_{worker_id}"
                    );
                }
            }
            WorkerMessage::Custom { worker_id, payload } => {
                process_debug!(
                    ProcessId::current(),
                    "📨 worker_{} custom payload: {}",
                    worker_id,
                    payload
                );
            }
            WorkerMessage::Ready { worker_id, .. } => {
                // Duplicate handshake after startup already completed
                process_warn!(ProcessId::current(), "⚠️ Ignoring duplicate ready from worker_{worker_id}");
            }
        }
    }

    /// Handle a control request while a process is alive
    ///
    /// Returns `true` when a stop was requested and carried out.
    async fn handle_control(
        &mut self,
        request: Option<ControlRequest>,
        process: &mut Box<dyn WorkerProcess>,
    ) -> bool {
        match request {
            Some(ControlRequest::Stop { ack }) => {
                self.graceful_stop(process).await;
                let _ = ack.send(());
                true
            }
            Some(ControlRequest::Send { command, ack }) => {
                let delivered = self.transport.send(command).await.unwrap_or(false);
                let _ = ack.send(delivered);
                false
            }
            // Handle dropped: supervisor is gone, shut the worker down too
            None => {
                self.graceful_stop(process).await;
                true
            }
        }
    }

    /// Shutdown request, bounded wait, then force kill
    async fn graceful_stop(&mut self, process: &mut Box<dyn WorkerProcess>) {
        {
            let mut shared = self.shared.lock().expect("worker shared lock poisoned");
            shared.auto_restart = false;
            shared.state = WorkerState::Stopping;
        }

        let asked = self
            .transport
            .send(SupervisorCommand::Shutdown {
                reason: "supervisor stop".to_string(),
            })
            .await
            .unwrap_or(false);

        if asked {
            if let Ok(exit) =
                resilience::with_timeout("worker_shutdown", self.config.shutdown_timeout(), process.wait())
                    .await
            {
                self.record_exit(exit);
                return;
            }
            process_warn!(
                ProcessId::current(),
                "⏱️ worker_{} ignored shutdown request, killing",
                self.launch.worker_id
            );
        }

        self.force_kill(process).await;
    }

    /// Graceful signal first, escalate to a forceful kill after the grace
    async fn force_kill(&mut self, process: &mut Box<dyn WorkerProcess>) -> Option<WorkerExit> {
        if process.terminate().await.is_ok() {
            if let Ok(exit) =
                resilience::with_timeout("worker_terminate", self.config.kill_grace(), process.wait()).await
            {
                self.record_exit(exit);
                return Some(exit);
            }
        }

        if let Err(e) = process.kill().await {
            process_warn!(ProcessId::current(), "⚠️ Force kill failed: {}", e);
            return None;
        }
        // SIGKILL cannot be ignored; still bound the reap defensively
        match resilience::with_timeout("worker_kill_reap", self.config.kill_grace(), process.wait()).await {
            Ok(exit) => {
                self.record_exit(exit);
                Some(exit)
            }
            Err(_) => None,
        }
    }

    /// Sleep out the restart backoff, staying responsive to control
    ///
    /// Returns `false` when a stop request cancelled the pending restart.
    async fn backoff_sleep(
        &mut self,
        delay: std::time::Duration,
        messages: &mut mpsc::Receiver<WorkerMessage>,
    ) -> bool {
        let restart_at = tokio::time::Instant::now() + delay;
        loop {
            let wake = tokio::select! {
                _ = tokio::time::sleep_until(restart_at) => None,
                request = self.control_rx.recv() => Some(Wake::Control(request)),
                Some(message) = messages.recv() => Some(Wake::Message(message)),
            };

            match wake {
                None => return true,
                Some(Wake::Control(Some(ControlRequest::Stop { ack }))) => {
                    {
                        let mut shared = self.shared.lock().expect("worker shared lock poisoned");
                        shared.auto_restart = false;
                    }
                    let _ = ack.send(());
                    return false;
                }
                Some(Wake::Control(Some(ControlRequest::Send { ack, .. }))) => {
                    // No worker between restarts
                    let _ = ack.send(false);
                }
                Some(Wake::Control(None)) => return false,
                Some(Wake::Message(message)) => {
                    // Stray traffic from the dying connection
                    process_debug!(ProcessId::current(), "📨 Dropping message during backoff: {:?}", message);
                }
                _ => {}
            }
        }
    }

    /// Park after the restart ceiling, answering stats and stop requests
    ///
    /// Returns once a stop arrives or the handle is dropped.
    async fn idle_until_stop(&mut self) -> bool {
        loop {
            match self.control_rx.recv().await {
                Some(ControlRequest::Stop { ack }) => {
                    let _ = ack.send(());
                    return true;
                }
                Some(ControlRequest::Send { ack, .. }) => {
                    let _ = ack.send(false);
                }
                None => return false,
            }
        }
    }

    fn record_exit(&self, exit: WorkerExit) {
        let mut shared = self.shared.lock().expect("worker shared lock poisoned");
        shared.last_exit_code = exit.code;
        shared.last_exit_signal = exit.signal;
    }

    fn set_state(&self, state: WorkerState) {
        self.shared.lock().expect("worker shared lock poisoned").state = state;
    }

    fn shared_consecutive(&self) -> u32 {
        self.shared
            .lock()
            .expect("worker shared lock poisoned")
            .consecutive_restarts
    }

    fn auto_restart_enabled(&self) -> bool {
        self.shared.lock().expect("worker shared lock poisoned").auto_restart
    }

    async fn emit(&self, event: WorkerEvent) {
        if self.events.send(event).await.is_err() {
            process_debug!(ProcessId::current(), "📪 Worker event dropped, supervisor gone");
        }
    }
}
