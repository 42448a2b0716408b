//! Registered tunnel routes

use crate::connection::{ConnectionHandle, ConnectionId};

/// One registered route: a public host bound to the control connection that
/// requested it.
///
/// The owning connection is fixed at construction. When that connection goes
/// away the tunnel is removed from the registry, never rebound.
#[derive(Debug, Clone)]
pub struct Tunnel {
    host: String,
    client_name: String,
    index: usize,
    connection: ConnectionHandle,
}

impl Tunnel {
    pub fn new(
        host: impl AsRef<str>,
        client_name: impl Into<String>,
        index: usize,
        connection: ConnectionHandle,
    ) -> Self {
        Self {
            host: host.as_ref().trim().to_string(),
            client_name: client_name.into(),
            index,
            connection,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Position of this host within the registration message that created it
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_tunnel_trims_host() {
        let (tx, _rx) = mpsc::channel(1);
        let connection = ConnectionHandle::new(
            ConnectionId::from(7),
            "10.0.0.1:5000".parse().unwrap(),
            tx,
            CancellationToken::new(),
        );

        let tunnel = Tunnel::new("  api.example.com ", "svcA", 1, connection);
        assert_eq!(tunnel.host(), "api.example.com");
        assert_eq!(tunnel.client_name(), "svcA");
        assert_eq!(tunnel.index(), 1);
        assert_eq!(tunnel.connection_id(), ConnectionId::from(7));
    }
}
