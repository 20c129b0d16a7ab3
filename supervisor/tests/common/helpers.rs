//! Scripted fakes for supervision tests
//!
//! A `FakeSpawner` plays back `WorkerScript`s: each spawned "process" can
//! signal ready, heartbeat, and exit on a schedule, all on virtual time. The
//! `FakeTransport` exposes the injection side of the message channel and
//! records every command the manager sends.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use supervisor::error::{SupervisorError, SupervisorResult};
use supervisor::traits::{WorkerExit, WorkerLaunchSpec, WorkerProcess, WorkerSpawner, WorkerTransport};
use supervisor::WorkerEvent;
use shared::{HeartbeatRecord, SupervisorCommand, WorkerMessage};

/// Behavior of one scripted worker instance
#[derive(Debug, Clone)]
pub struct WorkerScript {
    pub ready: bool,
    pub ready_delay_ms: u64,
    pub heartbeat_every_ms: Option<u64>,
    pub exit_after_ms: Option<u64>,
    pub exit: WorkerExit,
}

impl WorkerScript {
    /// Signals ready, heartbeats forever, never exits on its own
    pub fn healthy() -> Self {
        Self {
            ready: true,
            ready_delay_ms: 50,
            heartbeat_every_ms: Some(1_000),
            exit_after_ms: None,
            exit: WorkerExit { code: Some(0), signal: None },
        }
    }

    /// Runs normally, then exits with code 1 after the given uptime
    pub fn crash_after(ms: u64) -> Self {
        Self {
            ready: true,
            ready_delay_ms: 50,
            heartbeat_every_ms: Some(1_000),
            exit_after_ms: Some(ms),
            exit: WorkerExit { code: Some(1), signal: None },
        }
    }

    /// Signals ready but never heartbeats and never exits: a hang
    pub fn silent() -> Self {
        Self {
            ready: true,
            ready_delay_ms: 50,
            heartbeat_every_ms: None,
            exit_after_ms: None,
            exit: WorkerExit { code: Some(0), signal: None },
        }
    }

    /// Never signals ready and never exits: a startup hang
    pub fn never_ready() -> Self {
        Self {
            ready: false,
            ready_delay_ms: 0,
            heartbeat_every_ms: None,
            exit_after_ms: None,
            exit: WorkerExit { code: Some(0), signal: None },
        }
    }

    /// Dies almost immediately, before signaling ready
    pub fn stillborn() -> Self {
        Self {
            ready: false,
            ready_delay_ms: 0,
            heartbeat_every_ms: None,
            exit_after_ms: Some(10),
            exit: WorkerExit { code: Some(1), signal: None },
        }
    }
}

struct SpawnerInner {
    scripts: Mutex<VecDeque<WorkerScript>>,
    /// Replayed once the queue runs dry
    fallback: Mutex<WorkerScript>,
    message_tx: mpsc::Sender<WorkerMessage>,
    next_pid: AtomicU32,
    spawn_count: AtomicU32,
}

/// Spawner that plays back scripts instead of launching processes
#[derive(Clone)]
pub struct FakeSpawner {
    inner: Arc<SpawnerInner>,
}

impl FakeSpawner {
    pub fn new(message_tx: mpsc::Sender<WorkerMessage>, scripts: Vec<WorkerScript>) -> Self {
        let fallback = scripts.last().cloned().unwrap_or_else(WorkerScript::healthy);
        Self {
            inner: Arc::new(SpawnerInner {
                scripts: Mutex::new(scripts.into()),
                fallback: Mutex::new(fallback),
                message_tx,
                next_pid: AtomicU32::new(1_000),
                spawn_count: AtomicU32::new(0),
            }),
        }
    }

    pub fn spawn_count(&self) -> u32 {
        self.inner.spawn_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerSpawner for FakeSpawner {
    async fn spawn(&self, spec: &WorkerLaunchSpec) -> SupervisorResult<Box<dyn WorkerProcess>> {
        let script = {
            let mut queue = self.inner.scripts.lock().unwrap();
            match queue.pop_front() {
                Some(script) => {
                    *self.inner.fallback.lock().unwrap() = script.clone();
                    script
                }
                None => self.inner.fallback.lock().unwrap().clone(),
            }
        };

        let pid = self.inner.next_pid.fetch_add(1, Ordering::SeqCst);
        self.inner.spawn_count.fetch_add(1, Ordering::SeqCst);

        let (exit_tx, exit_rx) = mpsc::channel(4);
        let alive = Arc::new(AtomicBool::new(true));
        let worker_id = spec.worker_id;
        let message_tx = self.inner.message_tx.clone();

        // Script driver: handshake, heartbeats, then scripted death
        {
            let alive = alive.clone();
            let exit_tx = exit_tx.clone();
            let script = script.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(script.ready_delay_ms)).await;
                if script.ready && alive.load(Ordering::SeqCst) {
                    let _ = message_tx
                        .send(WorkerMessage::Ready {
                            worker_id,
                            pid,
                            listen_port: 0,
                        })
                        .await;
                }

                if let Some(every) = script.heartbeat_every_ms {
                    let alive = alive.clone();
                    let message_tx = message_tx.clone();
                    tokio::spawn(async move {
                        let mut seq = 0u64;
                        while alive.load(Ordering::SeqCst) {
                            tokio::time::sleep(Duration::from_millis(every)).await;
                            if !alive.load(Ordering::SeqCst) {
                                break;
                            }
                            seq += 1;
                            let _ = message_tx
                                .send(WorkerMessage::Heartbeat {
                                    worker_id,
                                    record: HeartbeatRecord::new(seq, seq * every, seq * every),
                                })
                                .await;
                        }
                    });
                }

                if let Some(lifetime) = script.exit_after_ms {
                    tokio::time::sleep(Duration::from_millis(lifetime.saturating_sub(script.ready_delay_ms)))
                        .await;
                    if alive.swap(false, Ordering::SeqCst) {
                        let _ = exit_tx.send(script.exit).await;
                    }
                }
            });
        }

        Ok(Box::new(FakeProcess {
            pid,
            alive,
            exit_tx,
            exit_rx,
        }))
    }
}

/// Process handle backed by the script driver
pub struct FakeProcess {
    pid: u32,
    alive: Arc<AtomicBool>,
    exit_tx: mpsc::Sender<WorkerExit>,
    exit_rx: mpsc::Receiver<WorkerExit>,
}

#[async_trait]
impl WorkerProcess for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn wait(&mut self) -> WorkerExit {
        self.exit_rx.recv().await.unwrap_or(WorkerExit {
            code: None,
            signal: None,
        })
    }

    async fn terminate(&mut self) -> SupervisorResult<()> {
        if self.alive.swap(false, Ordering::SeqCst) {
            let _ = self
                .exit_tx
                .send(WorkerExit {
                    code: None,
                    signal: Some(15),
                })
                .await;
        }
        Ok(())
    }

    async fn kill(&mut self) -> SupervisorResult<()> {
        if self.alive.swap(false, Ordering::SeqCst) {
            let _ = self
                .exit_tx
                .send(WorkerExit {
                    code: None,
                    signal: Some(9),
                })
                .await;
        }
        Ok(())
    }
}

/// Transport fake exposing the injection side of the message channel
pub struct FakeTransport {
    message_tx: mpsc::Sender<WorkerMessage>,
    message_rx: Mutex<Option<mpsc::Receiver<WorkerMessage>>>,
    sent: Mutex<Vec<SupervisorCommand>>,
    connected: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        let (message_tx, message_rx) = mpsc::channel(256);
        Arc::new(Self {
            message_tx,
            message_rx: Mutex::new(Some(message_rx)),
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        })
    }

    /// Sender scripted workers use to inject messages
    pub fn injector(&self) -> mpsc::Sender<WorkerMessage> {
        self.message_tx.clone()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn sent_commands(&self) -> Vec<SupervisorCommand> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerTransport for FakeTransport {
    async fn start(&self) -> SupervisorResult<mpsc::Receiver<WorkerMessage>> {
        self.message_rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| SupervisorError::transport("transport already started"))
    }

    fn endpoint(&self) -> SocketAddr {
        "127.0.0.1:7100".parse().unwrap()
    }

    async fn send(&self, command: SupervisorCommand) -> SupervisorResult<bool> {
        self.sent.lock().unwrap().push(command);
        Ok(self.connected.load(Ordering::SeqCst))
    }

    async fn disconnect(&self) {}
}

/// Receive the next worker event, failing loudly instead of hanging
pub async fn next_event(events: &mut mpsc::Receiver<WorkerEvent>) -> WorkerEvent {
    tokio::time::timeout(Duration::from_secs(600), events.recv())
        .await
        .expect("timed out waiting for a worker event")
        .expect("event channel closed unexpectedly")
}

/// Drain events until one matches, failing if the channel ends first
pub async fn wait_for<F>(events: &mut mpsc::Receiver<WorkerEvent>, mut matches: F) -> WorkerEvent
where
    F: FnMut(&WorkerEvent) -> bool,
{
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}
