//! Per-connection registration handling
//!
//! A [`RegistrationHandler`] owns everything one control connection knows
//! about its registrations: which hosts it must release on teardown and
//! whether teardown has already happened.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use tunnel_proto::{ParseError, RegistrationAck, RegistrationRequest};
use tunnel_router::{ConnectionHandle, Tunnel, TunnelRegistry};

use crate::config::CleanupPolicy;

/// Why a frame produced no registration
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame is not a registration message. The connection stays open.
    #[error("Malformed registration frame: {0}")]
    Malformed(#[from] ParseError),

    #[error("Connection already torn down")]
    TornDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingFirstMessage,
    Registered,
    TornDown,
}

/// Per-host result of one registration message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationOutcome {
    pub client_name: String,
    /// Hosts now owned by this connection, in message order
    pub succeeded: Vec<String>,
    /// Hosts that were already taken, in message order
    pub failed: Vec<String>,
}

impl RegistrationOutcome {
    pub fn to_ack(&self) -> RegistrationAck {
        RegistrationAck {
            succeeded: self.succeeded.clone(),
            failed: self.failed.clone(),
        }
    }
}

pub struct RegistrationHandler {
    registry: Arc<TunnelRegistry>,
    connection: ConnectionHandle,
    cleanup_policy: CleanupPolicy,
    state: ConnectionState,
    /// Hosts released on teardown
    tracked_hosts: Vec<String>,
}

impl RegistrationHandler {
    pub fn new(
        registry: Arc<TunnelRegistry>,
        connection: ConnectionHandle,
        cleanup_policy: CleanupPolicy,
    ) -> Self {
        Self {
            registry,
            connection,
            cleanup_policy,
            state: ConnectionState::AwaitingFirstMessage,
            tracked_hosts: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Hosts this connection will release when torn down
    pub fn tracked_hosts(&self) -> &[String] {
        &self.tracked_hosts
    }

    /// Parse one frame payload and register its hosts
    pub fn handle_frame(&mut self, payload: &str) -> Result<RegistrationOutcome, FrameError> {
        if self.state == ConnectionState::TornDown {
            return Err(FrameError::TornDown);
        }

        let request = RegistrationRequest::parse(payload)?;
        Ok(self.register(request))
    }

    /// Register every host of `request`, each independently of the others
    pub fn register(&mut self, request: RegistrationRequest) -> RegistrationOutcome {
        let RegistrationRequest { client_name, hosts } = request;

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();

        for (index, host) in hosts.iter().enumerate() {
            let tunnel = Tunnel::new(host, client_name.as_str(), index, self.connection.clone());

            if self.registry.add(tunnel) {
                succeeded.push(host.clone());
            } else {
                failed.push(host.clone());
            }
        }

        match self.cleanup_policy {
            CleanupPolicy::FirstMessage => {
                if self.state == ConnectionState::AwaitingFirstMessage {
                    self.tracked_hosts = hosts;
                }
            }
            CleanupPolicy::OwnedHosts => {
                self.tracked_hosts.extend(succeeded.iter().cloned());
            }
        }
        self.state = ConnectionState::Registered;

        if !failed.is_empty() {
            warn!(
                "Client {} on {} could not register {} host(s), already taken: {}",
                client_name,
                self.connection.id(),
                failed.len(),
                failed.join(",")
            );
        }
        info!(
            "Client {} registered on {}: {} succeeded, {} failed",
            client_name,
            self.connection.id(),
            succeeded.len(),
            failed.len()
        );

        RegistrationOutcome {
            client_name,
            succeeded,
            failed,
        }
    }

    /// Release this connection's hosts and close it
    ///
    /// Runs once. Later calls return an empty list.
    pub fn teardown(&mut self) -> Vec<String> {
        if self.state == ConnectionState::TornDown {
            return Vec::new();
        }
        self.state = ConnectionState::TornDown;

        let owner = self.connection.id();
        let released: Vec<String> = std::mem::take(&mut self.tracked_hosts)
            .into_iter()
            .filter(|host| {
                let removed = match self.cleanup_policy {
                    CleanupPolicy::FirstMessage => self.registry.remove(host),
                    CleanupPolicy::OwnedHosts => self.registry.remove_if_owned(host, owner),
                };
                removed.is_some()
            })
            .collect();

        self.connection.close();

        if self.cleanup_policy == CleanupPolicy::FirstMessage {
            let remaining = self.registry.hosts_for_connection(owner);
            if !remaining.is_empty() {
                warn!(
                    "Connection {} torn down, {} host(s) from later messages stay registered: {}",
                    owner,
                    remaining.len(),
                    remaining.join(",")
                );
            }
        }

        if released.is_empty() {
            debug!("Connection {} torn down, no hosts released", owner);
        } else {
            info!(
                "Connection {} torn down, released {} host(s): {}",
                owner,
                released.len(),
                released.join(",")
            );
        }

        released
    }
}

impl Drop for RegistrationHandler {
    fn drop(&mut self) {
        self.teardown();
    }
}
