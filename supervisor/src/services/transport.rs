//! TCP transport for the supervisor side of the worker link
//!
//! The supervisor listens; each worker connects back once it is up and keeps
//! a single duplex connection: framed `WorkerMessage`s inbound, framed
//! `SupervisorCommand`s outbound. A reconnect from a restarted worker
//! replaces the previous link.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};

use crate::error::{SupervisorError, SupervisorResult};
use crate::traits::WorkerTransport;
use shared::framing::{read_frame, write_frame};
use shared::{process_debug, process_warn, ProcessId, SupervisorCommand, WorkerMessage};

/// Capacity of the inbound message channel
const INBOUND_BUFFER: usize = 256;

/// Real transport using TCP + length-framed bincode
pub struct RealWorkerTransport {
    local_addr: SocketAddr,
    /// Listener parked here between `bind` and `start`
    listener: Mutex<Option<TcpListener>>,
    /// Write half of the currently connected worker, if any
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
}

impl RealWorkerTransport {
    /// Bind the listening socket, resolving port 0 to a concrete port
    pub async fn bind(addr: SocketAddr) -> SupervisorResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SupervisorError::transport(format!("bind {addr} failed: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SupervisorError::transport(format!("local_addr failed: {e}")))?;

        Ok(Self {
            local_addr,
            listener: Mutex::new(Some(listener)),
            writer: Arc::new(Mutex::new(None)),
        })
    }
}

#[async_trait]
impl WorkerTransport for RealWorkerTransport {
    async fn start(&self) -> SupervisorResult<mpsc::Receiver<WorkerMessage>> {
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or_else(|| SupervisorError::transport("transport already started"))?;

        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        let writer = self.writer.clone();

        tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        process_warn!(ProcessId::current(), "⚠️ Worker accept failed: {}", e);
                        continue;
                    }
                };

                process_debug!(ProcessId::current(), "🔌 Worker connected from {}", peer);

                let (mut read_half, write_half) = stream.into_split();
                *writer.lock().await = Some(write_half);

                // Read this connection to completion before accepting the
                // next one; only one worker exists at a time.
                loop {
                    match read_frame::<_, WorkerMessage>(&mut read_half).await {
                        Ok(Some(message)) => {
                            if tx.send(message).await.is_err() {
                                // Manager gone, nothing left to deliver to
                                return;
                            }
                        }
                        Ok(None) => {
                            process_debug!(ProcessId::current(), "🔌 Worker link closed by {}", peer);
                            break;
                        }
                        Err(e) => {
                            process_warn!(
                                ProcessId::current(),
                                "⚠️ Rejecting unreadable worker frame: {}",
                                e
                            );
                            break;
                        }
                    }
                }

                *writer.lock().await = None;
            }
        });

        Ok(rx)
    }

    fn endpoint(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send(&self, command: SupervisorCommand) -> SupervisorResult<bool> {
        let mut guard = self.writer.lock().await;
        let Some(write_half) = guard.as_mut() else {
            return Ok(false);
        };

        match write_frame(write_half, &command).await {
            Ok(()) => Ok(true),
            Err(e) => {
                // A dead link counts as "no worker connected"
                process_warn!(ProcessId::current(), "⚠️ Worker send failed, dropping link: {}", e);
                *guard = None;
                Ok(false)
            }
        }
    }

    async fn disconnect(&self) {
        *self.writer.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::framing;
    use tokio::net::TcpStream;

    async fn bound_transport() -> RealWorkerTransport {
        RealWorkerTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_without_worker_is_false() {
        let transport = bound_transport().await;
        let _rx = transport.start().await.unwrap();

        let sent = transport
            .send(SupervisorCommand::Shutdown {
                reason: "test".to_string(),
            })
            .await
            .unwrap();
        assert!(!sent);
    }

    #[tokio::test]
    async fn test_messages_arrive_in_order() {
        let transport = bound_transport().await;
        let mut rx = transport.start().await.unwrap();

        let mut stream = TcpStream::connect(transport.endpoint()).await.unwrap();
        for seq in 1..=3u64 {
            let message = WorkerMessage::Heartbeat {
                worker_id: 1,
                record: shared::HeartbeatRecord::new(seq, 0, 0),
            };
            framing::write_frame(&mut stream, &message).await.unwrap();
        }

        for expected in 1..=3u64 {
            match rx.recv().await.unwrap() {
                WorkerMessage::Heartbeat { record, .. } => assert_eq!(record.seq, expected),
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_command_reaches_connected_worker() {
        let transport = bound_transport().await;
        let _rx = transport.start().await.unwrap();

        let mut stream = TcpStream::connect(transport.endpoint()).await.unwrap();
        // Give the accept loop a turn to install the writer
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let sent = transport
            .send(SupervisorCommand::Shutdown {
                reason: "maintenance".to_string(),
            })
            .await
            .unwrap();
        assert!(sent);

        let received: Option<SupervisorCommand> = framing::read_frame(&mut stream).await.unwrap();
        match received {
            Some(SupervisorCommand::Shutdown { reason }) => assert_eq!(reason, "maintenance"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let transport = bound_transport().await;
        let _rx = transport.start().await.unwrap();
        assert!(transport.start().await.is_err());
    }
}
