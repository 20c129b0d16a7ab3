//! Periodic heartbeat sender
//!
//! Companion of the supervisor's heartbeat monitor: an interval loop that
//! packages pid, uptime, and memory usage into `HeartbeatRecord`s and pushes
//! them over the supervisor link. Send failures are logged and tolerated;
//! the supervisor treats the resulting silence as a hang.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::traits::SupervisorLink;
use shared::{process_debug, process_warn, HeartbeatRecord, ProcessId, WorkerMessage};

pub struct HeartbeatSender {
    worker_id: u32,
    interval: Duration,
    started_at: Instant,
}

impl HeartbeatSender {
    pub fn new(worker_id: u32, interval: Duration) -> Self {
        Self {
            worker_id,
            interval,
            started_at: Instant::now(),
        }
    }

    /// Spawn the beat loop; cancel the returned token to stop it
    pub fn start<L>(self, link: Arc<L>) -> CancellationToken
    where
        L: SupervisorLink + 'static,
    {
        let token = CancellationToken::new();
        let loop_token = token.clone();

        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(self.interval);
            // The immediate first tick would beat at t=0
            ticks.tick().await;
            let mut seq = 0u64;

            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticks.tick() => {
                        seq += 1;
                        let message = WorkerMessage::Heartbeat {
                            worker_id: self.worker_id,
                            record: self.build_record(seq),
                        };
                        if let Err(e) = link.send(message).await {
                            process_warn!(ProcessId::current(), "💔 Heartbeat send failed: {}", e);
                        } else {
                            process_debug!(ProcessId::current(), "💓 Heartbeat {} sent", seq);
                        }
                    }
                }
            }
        });

        token
    }

    fn build_record(&self, seq: u64) -> HeartbeatRecord {
        let mut record = HeartbeatRecord::new(
            seq,
            Utc::now().timestamp_millis() as u64,
            self.started_at.elapsed().as_millis() as u64,
        )
        .with_pid(std::process::id());
        record.memory_rss_kb = memory_rss_kb();
        record
    }
}

/// Resident set size of this process, if the platform exposes it
#[cfg(target_os = "linux")]
fn memory_rss_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|line| line.starts_with("VmRSS:"))?;
    line.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(not(target_os = "linux"))]
fn memory_rss_kb() -> Option<u64> {
    None
}
