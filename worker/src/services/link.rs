//! TCP supervisor link for the worker side
//!
//! The worker dials the supervisor once at startup and keeps a single duplex
//! connection: framed `WorkerMessage`s outbound, framed `SupervisorCommand`s
//! inbound. Losing the link is fatal for the worker; the supervisor notices
//! the silence and restarts it.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use crate::error::{WorkerError, WorkerResult};
use crate::traits::SupervisorLink;
use shared::framing::{read_frame, write_frame};
use shared::{process_debug, process_warn, ProcessId, SupervisorCommand, WorkerMessage};

/// Capacity of the inbound command channel
const COMMAND_BUFFER: usize = 32;

/// Real link using TCP + length-framed bincode
pub struct TcpSupervisorLink {
    /// Read half parked here between `connect` and `commands`
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
}

impl TcpSupervisorLink {
    pub fn new() -> Self {
        Self {
            reader: Mutex::new(None),
            writer: Arc::new(Mutex::new(None)),
        }
    }
}

impl Default for TcpSupervisorLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SupervisorLink for TcpSupervisorLink {
    async fn connect(&self, addr: SocketAddr) -> WorkerResult<()> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| WorkerError::link(format!("connect {addr} failed: {e}")))?;

        let (read_half, write_half) = stream.into_split();
        *self.reader.lock().await = Some(read_half);
        *self.writer.lock().await = Some(write_half);

        process_debug!(ProcessId::current(), "🔌 Connected to supervisor at {}", addr);
        Ok(())
    }

    async fn commands(&self) -> WorkerResult<mpsc::Receiver<SupervisorCommand>> {
        let mut read_half = self
            .reader
            .lock()
            .await
            .take()
            .ok_or(WorkerError::NotConnected)?;

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(async move {
            loop {
                match read_frame::<_, SupervisorCommand>(&mut read_half).await {
                    Ok(Some(command)) => {
                        if tx.send(command).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        process_debug!(ProcessId::current(), "🔌 Supervisor closed the link");
                        return;
                    }
                    Err(e) => {
                        process_warn!(
                            ProcessId::current(),
                            "⚠️ Dropping unreadable supervisor frame: {}",
                            e
                        );
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send(&self, message: WorkerMessage) -> WorkerResult<()> {
        let mut guard = self.writer.lock().await;
        let write_half = guard.as_mut().ok_or(WorkerError::NotConnected)?;

        write_frame(write_half, &message).await.map_err(|e| {
            WorkerError::link(format!("send to supervisor failed: {e}"))
        })
    }

    async fn disconnect(&self) {
        *self.writer.lock().await = None;
        *self.reader.lock().await = None;
    }
}
