//! Heartbeat-based liveness monitoring
//!
//! The monitor never talks to the worker; it only watches the clock between
//! [`HeartbeatMonitor::record`] calls. Silence past the timeout counts as a
//! missed beat, and enough missed beats raise a single `Dead` signal that the
//! worker manager turns into a forced kill.

use std::sync::{Arc, Mutex};

use tokio::time::Instant;

use resilience::{BoundedQueue, OverflowStrategy};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::HeartbeatConfig;
use shared::{HeartbeatRecord, HeartbeatStats};

/// Capacity of the signal channel toward the worker manager
const SIGNAL_BUFFER: usize = 16;

/// Liveness signals raised by the periodic check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatSignal {
    /// One more check interval passed without a beat
    Missed { missed_count: u32 },
    /// The missed threshold was reached; fired once per occurrence
    Dead { missed_count: u32 },
}

struct MonitorState {
    alive: bool,
    missed_count: u32,
    dead_fired: bool,
    total_received: u64,
    last_seen: Option<Instant>,
    last_record: Option<HeartbeatRecord>,
    /// Recent inter-beat gaps in milliseconds, oldest evicted
    gaps: BoundedQueue<u64>,
}

impl MonitorState {
    fn fresh(history_size: usize) -> Self {
        Self {
            alive: true,
            missed_count: 0,
            dead_fired: false,
            total_received: 0,
            last_seen: None,
            last_record: None,
            gaps: BoundedQueue::new(history_size.max(1), OverflowStrategy::DropOldest),
        }
    }
}

struct MonitorInner {
    config: HeartbeatConfig,
    state: Mutex<MonitorState>,
    signal_tx: mpsc::Sender<HeartbeatSignal>,
    cancel: Mutex<Option<CancellationToken>>,
}

/// Tracks worker liveness from periodic heartbeat records
///
/// Cheaply cloneable; all clones share the same state, so the manager's run
/// loop can feed records while stats queries come from elsewhere.
#[derive(Clone)]
pub struct HeartbeatMonitor {
    inner: Arc<MonitorInner>,
}

impl HeartbeatMonitor {
    /// Create a monitor and the signal channel it reports on
    pub fn new(config: HeartbeatConfig) -> (Self, mpsc::Receiver<HeartbeatSignal>) {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        let history_size = config.history_size;

        let monitor = Self {
            inner: Arc::new(MonitorInner {
                config,
                state: Mutex::new(MonitorState::fresh(history_size)),
                signal_tx,
                cancel: Mutex::new(None),
            }),
        };
        (monitor, signal_rx)
    }

    /// Start the periodic silence check
    ///
    /// Idempotent: a second start while running is a no-op.
    pub fn start(&self) {
        let mut cancel_slot = self.inner.cancel.lock().expect("monitor cancel lock poisoned");
        if cancel_slot.is_some() {
            return;
        }

        let token = CancellationToken::new();
        *cancel_slot = Some(token.clone());
        drop(cancel_slot);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(inner.config.check_interval());
            // The immediate first tick would run a check at t=0
            ticks.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticks.tick() => {
                        if let Some(signal) = Self::check(&inner) {
                            if inner.signal_tx.send(signal).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    /// One silence check; returns the signal to raise, if any
    fn check(inner: &MonitorInner) -> Option<HeartbeatSignal> {
        let mut state = inner.state.lock().expect("monitor state lock poisoned");

        let silent = match state.last_seen {
            None => true,
            Some(seen) => seen.elapsed() > inner.config.timeout(),
        };
        if !silent {
            return None;
        }

        state.missed_count += 1;
        if state.missed_count >= inner.config.missed_threshold && !state.dead_fired {
            state.dead_fired = true;
            state.alive = false;
            Some(HeartbeatSignal::Dead {
                missed_count: state.missed_count,
            })
        } else if !state.dead_fired {
            Some(HeartbeatSignal::Missed {
                missed_count: state.missed_count,
            })
        } else {
            // Already declared dead; stay quiet until reset
            None
        }
    }

    /// Feed one heartbeat record, restoring liveness
    pub fn record(&self, record: HeartbeatRecord) {
        let mut state = self.inner.state.lock().expect("monitor state lock poisoned");
        let now = Instant::now();

        if let Some(previous) = state.last_seen {
            let gap = now.duration_since(previous).as_millis() as u64;
            let _ = state.gaps.enqueue(gap);
        }

        state.alive = true;
        state.missed_count = 0;
        state.dead_fired = false;
        state.total_received += 1;
        state.last_seen = Some(now);
        state.last_record = Some(record);
    }

    /// Clear all liveness state without stopping the check loop
    ///
    /// Used when a restarted worker comes up under the same monitor.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock().expect("monitor state lock poisoned");
        *state = MonitorState::fresh(self.inner.config.history_size);
    }

    /// Stop the periodic check loop
    pub fn stop(&self) {
        if let Some(token) = self
            .inner
            .cancel
            .lock()
            .expect("monitor cancel lock poisoned")
            .take()
        {
            token.cancel();
        }
    }

    /// Point-in-time liveness view
    pub fn stats(&self) -> HeartbeatStats {
        let state = self.inner.state.lock().expect("monitor state lock poisoned");

        let avg_interval_ms = if state.gaps.is_empty() {
            None
        } else {
            let total: u64 = state.gaps.iter().sum();
            Some(total as f64 / state.gaps.len() as f64)
        };

        HeartbeatStats {
            alive: state.alive,
            missed_count: state.missed_count,
            total_received: state.total_received,
            last_seen_ms_ago: state.last_seen.map(|seen| seen.elapsed().as_millis() as u64),
            avg_interval_ms,
            last_record: state.last_record.clone(),
        }
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        if let Some(token) = self.cancel.lock().ok().and_then(|mut slot| slot.take()) {
            token.cancel();
        }
    }
}
