//! Control channel listener
//!
//! Accepts registration connections and hands each one to its own
//! [`ControlConnection`] task. The accept loop never waits on connection work.

use socket2::SockRef;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use tunnel_router::{ConnectionIdGenerator, TunnelRegistry};

use crate::config::ControlConfig;
use crate::connection::ControlConnection;

/// Pause after a failed accept so persistent errors (e.g. EMFILE) do not spin
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Control listener errors
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind control port {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: SocketAddr,
        port: u16,
        reason: String,
    },
}

/// Listener for the tunnel registration (control) channel
pub struct ControlListener {
    config: Arc<ControlConfig>,
    registry: Arc<TunnelRegistry>,
    ids: ConnectionIdGenerator,
    shutdown: CancellationToken,
    connections: TaskTracker,
}

impl ControlListener {
    pub fn new(config: ControlConfig, registry: Arc<TunnelRegistry>) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            ids: ConnectionIdGenerator::new(),
            shutdown: CancellationToken::new(),
            connections: TaskTracker::new(),
        }
    }

    /// Use an externally owned shutdown token
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bind the configured control port
    pub fn bind(&self) -> Result<TcpListener, ControlError> {
        let addr = self.config.bind_addr;
        let bind_error = |e: std::io::Error| ControlError::BindError {
            address: addr,
            port: addr.port(),
            reason: e.to_string(),
        };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_error)?;

        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;
        socket.listen(self.config.backlog).map_err(bind_error)
    }

    /// Bind and serve until shut down
    ///
    /// A bind failure ends this task with an error. It is not retried.
    pub async fn run(self) -> Result<(), ControlError> {
        let listener = match self.bind() {
            Ok(listener) => listener,
            Err(e) => {
                error!("Control listener stopped: {}", e);
                return Err(e);
            }
        };

        self.serve(listener).await
    }

    /// Run in a background task
    pub fn spawn(self) -> JoinHandle<Result<(), ControlError>> {
        tokio::spawn(self.run())
    }

    /// Accept connections on an already bound listener until shut down
    pub async fn serve(self, listener: TcpListener) -> Result<(), ControlError> {
        let local_addr = listener.local_addr()?;
        info!("Tunnel control listener started on {}", local_addr);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => self.dispatch(stream, peer_addr),
                    Err(e) => {
                        error!("Failed to accept control connection: {}", e);
                        if !accept_backoff(&self.shutdown).await {
                            break;
                        }
                    }
                },
            }
        }

        info!(
            "Tunnel control listener on {} shutting down, closing {} connection(s)",
            local_addr,
            self.connections.len()
        );
        drop(listener);
        self.connections.close();
        self.connections.wait().await;

        Ok(())
    }

    fn dispatch(&self, stream: TcpStream, peer_addr: SocketAddr) {
        if let Err(e) = configure_stream(&stream, &self.config) {
            warn!("Failed to set socket options for {}: {}", peer_addr, e);
        }

        let id = self.ids.generate();
        debug!("Dispatching control connection {} from {}", id, peer_addr);

        self.connections.spawn(ControlConnection::serve(
            stream,
            peer_addr,
            id,
            self.registry.clone(),
            self.config.clone(),
            self.shutdown.child_token(),
        ));
    }
}

/// Wait out [`ACCEPT_ERROR_BACKOFF`]. Returns `false` if shut down meanwhile.
async fn accept_backoff(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => true,
    }
}

fn configure_stream(stream: &TcpStream, config: &ControlConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;
    SockRef::from(stream).set_keepalive(config.keepalive)?;
    Ok(())
}
