//! Control connection task
//!
//! Drives one accepted socket: reads frames under the idle timeout, feeds them
//! to a [`RegistrationHandler`], writes outbound frames, and runs teardown no
//! matter how the connection ends.

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::SinkExt;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use tunnel_proto::DelimiterCodec;
use tunnel_router::{ConnectionHandle, ConnectionId, HandleError, TunnelRegistry};

use crate::config::ControlConfig;
use crate::handler::{FrameError, RegistrationHandler};

/// Outbound frames queued per connection before `send` waits
const OUTBOUND_QUEUE_DEPTH: usize = 64;

const READ_BUFFER_CAPACITY: usize = 4 * 1024;

/// How long teardown waits for the writer to flush and shut down
const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer closed its side of the socket
    PeerClosed,
    /// Nothing was read for the configured idle timeout
    IdleTimeout,
    /// Closed locally through the handle or by listener shutdown
    Closed,
    /// Read, decode or write failure
    Fault(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed"),
            Self::IdleTimeout => write!(f, "idle timeout"),
            Self::Closed => write!(f, "closed"),
            Self::Fault(reason) => write!(f, "fault: {}", reason),
        }
    }
}

/// One accepted control connection
pub struct ControlConnection {
    config: Arc<ControlConfig>,
    handler: RegistrationHandler,
}

impl ControlConnection {
    /// Serve `stream` until it closes, then release its hosts
    pub async fn serve(
        stream: TcpStream,
        peer_addr: SocketAddr,
        id: ConnectionId,
        registry: Arc<TunnelRegistry>,
        config: Arc<ControlConfig>,
        cancel: CancellationToken,
    ) -> DisconnectReason {
        info!("Control connection {} accepted from {}", id, peer_addr);

        let (reader, writer) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let handle = ConnectionHandle::new(id, peer_addr, outbound_tx, cancel.clone());

        let mut writer_task = tokio::spawn(write_loop(
            writer,
            outbound_rx,
            DelimiterCodec::with_max_frame_length(config.max_frame_length),
            cancel,
        ));

        let mut connection = Self {
            handler: RegistrationHandler::new(registry, handle, config.cleanup_policy),
            config,
        };

        let reason = connection.read_loop(reader).await;
        let lifetime = Utc::now() - connection.handler.connection().connected_at();
        match &reason {
            DisconnectReason::Fault(e) => {
                error!(
                    "Control connection {} failed after {}s: {}",
                    id,
                    lifetime.num_seconds(),
                    e
                );
            }
            other => {
                info!(
                    "Control connection {} ended after {}s: {}",
                    id,
                    lifetime.num_seconds(),
                    other
                );
            }
        }

        connection.handler.teardown();
        if tokio::time::timeout(WRITER_SHUTDOWN_TIMEOUT, &mut writer_task)
            .await
            .is_err()
        {
            debug!("Writer for {} did not shut down in time, aborting", id);
            writer_task.abort();
        }

        reason
    }

    async fn read_loop(&mut self, mut reader: OwnedReadHalf) -> DisconnectReason {
        let mut codec = DelimiterCodec::with_max_frame_length(self.config.max_frame_length);
        let mut buf = BytesMut::with_capacity(READ_BUFFER_CAPACITY);

        loop {
            let read = tokio::select! {
                _ = self.handler.connection().closed() => return DisconnectReason::Closed,
                read = tokio::time::timeout(self.config.idle_timeout, reader.read_buf(&mut buf)) => read,
            };

            match read {
                Err(_) => return DisconnectReason::IdleTimeout,
                Ok(Ok(0)) => return DisconnectReason::PeerClosed,
                Ok(Err(e)) => return DisconnectReason::Fault(e.to_string()),
                Ok(Ok(n)) => trace!("Read {} bytes on {}", n, self.id()),
            }

            loop {
                match codec.decode(&mut buf) {
                    Ok(Some(frame)) => {
                        if let Some(reason) = self.process_frame(&frame) {
                            return reason;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => return DisconnectReason::Fault(e.to_string()),
                }
            }
        }
    }

    /// Acks never wait for queue space, so a peer that stops reading cannot
    /// stall the read loop or its idle timeout.
    fn queue_ack(&self, ack: String) {
        match self.handler.connection().try_send(Bytes::from(ack)) {
            Ok(()) => {}
            Err(HandleError::Full(id)) => {
                warn!("Outbound queue full on {}, dropping registration ack", id);
            }
            Err(e) => debug!("Failed to queue registration ack: {}", e),
        }
    }

    fn process_frame(&mut self, frame: &str) -> Option<DisconnectReason> {
        if frame.is_empty() {
            trace!("Heartbeat on {}", self.id());
            return None;
        }

        match self.handler.handle_frame(frame) {
            Ok(outcome) => {
                if self.config.send_ack {
                    self.queue_ack(outcome.to_ack().to_payload());
                }
                None
            }
            Err(FrameError::Malformed(e)) => {
                debug!("Ignoring frame on {}: {}", self.id(), e);
                None
            }
            Err(FrameError::TornDown) => Some(DisconnectReason::Closed),
        }
    }

    fn id(&self) -> ConnectionId {
        self.handler.connection().id()
    }
}

async fn write_loop(
    writer: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<Bytes>,
    codec: DelimiterCodec,
    cancel: CancellationToken,
) {
    let mut sink = FramedWrite::new(writer, codec);

    loop {
        let payload = tokio::select! {
            biased;
            payload = outbound.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        // A peer that stops reading must not hold the writer past close
        tokio::select! {
            sent = sink.send(payload) => {
                if let Err(e) = sent {
                    debug!("Control connection write failed: {}", e);
                    cancel.cancel();
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    let _ = sink.into_inner().shutdown().await;
}
