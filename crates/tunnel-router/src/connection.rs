//! Handles to live control connections

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("Connection {0} is closed")]
    Closed(ConnectionId),

    #[error("Outbound queue for connection {0} is full")]
    Full(ConnectionId),
}

/// Process-unique identifier of a control connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection ID generator, shared by everything that accepts connections
#[derive(Clone)]
pub struct ConnectionIdGenerator {
    next_id: Arc<AtomicU64>,
}

impl ConnectionIdGenerator {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn generate(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

struct ConnectionInner {
    id: ConnectionId,
    peer_addr: SocketAddr,
    connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

/// Cheap, cloneable reference to a live control connection
///
/// Payloads passed to [`send`](Self::send) are framed and written by the
/// connection's writer task. [`close`](Self::close) stops both the reader and
/// the writer; the reader then releases every host the connection owns.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        peer_addr: SocketAddr,
        outbound: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                peer_addr,
                connected_at: Utc::now(),
                outbound,
                cancel,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.inner.connected_at
    }

    /// Queue a payload for delivery to the client
    ///
    /// Waits for queue space, but gives up as soon as the connection closes.
    pub async fn send(&self, payload: Bytes) -> Result<(), HandleError> {
        if self.is_closed() {
            return Err(HandleError::Closed(self.id()));
        }

        tokio::select! {
            sent = self.inner.outbound.send(payload) => {
                sent.map_err(|_| HandleError::Closed(self.id()))
            }
            _ = self.inner.cancel.cancelled() => Err(HandleError::Closed(self.id())),
        }
    }

    /// Queue a payload without waiting
    ///
    /// Fails with [`HandleError::Full`] when the peer is not draining its
    /// outbound queue.
    pub fn try_send(&self, payload: Bytes) -> Result<(), HandleError> {
        if self.is_closed() {
            return Err(HandleError::Closed(self.id()));
        }

        self.inner.outbound.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => HandleError::Full(self.id()),
            mpsc::error::TrySendError::Closed(_) => HandleError::Closed(self.id()),
        })
    }

    /// Ask the connection to shut down. Safe to call more than once.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled() || self.inner.outbound.is_closed()
    }

    /// Resolves once [`close`](Self::close) has been called
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: u64) -> (ConnectionHandle, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(8);
        let handle = ConnectionHandle::new(
            ConnectionId::from(id),
            "127.0.0.1:40000".parse().unwrap(),
            tx,
            CancellationToken::new(),
        );
        (handle, rx)
    }

    #[test]
    fn test_id_generator_is_monotonic() {
        let ids = ConnectionIdGenerator::new();
        let first = ids.generate();
        let second = ids.clone().generate();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_send_reaches_writer() {
        let (handle, mut rx) = handle(1);

        handle.send(Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (handle, _rx) = handle(2);

        handle.close();
        handle.close();
        assert!(handle.is_closed());

        let result = handle.send(Bytes::from_static(b"late")).await;
        assert!(matches!(result, Err(HandleError::Closed(id)) if id == ConnectionId::from(2)));
    }

    #[tokio::test]
    async fn test_try_send_reports_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(
            ConnectionId::from(4),
            "127.0.0.1:40000".parse().unwrap(),
            tx,
            CancellationToken::new(),
        );

        handle.try_send(Bytes::from_static(b"one")).unwrap();
        let result = handle.try_send(Bytes::from_static(b"two"));
        assert!(matches!(result, Err(HandleError::Full(_))));

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"one"));
        handle.try_send(Bytes::from_static(b"three")).unwrap();
    }

    #[tokio::test]
    async fn test_blocked_send_returns_on_close() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(
            ConnectionId::from(5),
            "127.0.0.1:40000".parse().unwrap(),
            tx,
            CancellationToken::new(),
        );
        handle.send(Bytes::from_static(b"fills the queue")).await.unwrap();

        let closer = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            closer.close();
        });

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            handle.send(Bytes::from_static(b"waits")),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(HandleError::Closed(_))));
    }

    #[tokio::test]
    async fn test_closed_when_writer_gone() {
        let (handle, rx) = handle(3);
        drop(rx);
        assert!(handle.is_closed());
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::from(42).to_string(), "conn-42");
    }
}
