//! Host → tunnel registry
//!
//! One instance is shared by every control connection for the lifetime of the
//! process. Keys are unique: the first connection to claim a host keeps it
//! until it is removed.

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::tunnel::Tunnel;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

/// Concurrent registry of tunnels keyed by host
///
/// Backed by a sharded map, so operations on different hosts rarely contend
/// and operations on the same host are serialized by its shard lock.
pub struct TunnelRegistry {
    tunnels: DashMap<String, Tunnel>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self {
            tunnels: DashMap::new(),
        }
    }

    /// Insert `tunnel` under its host if the host is free
    ///
    /// Returns `false` and leaves the existing entry untouched when the host is
    /// already taken, including by the same connection.
    pub fn add(&self, tunnel: Tunnel) -> bool {
        match self.tunnels.entry(tunnel.host().to_string()) {
            Entry::Occupied(existing) => {
                trace!(
                    "Host {} already owned by {} ({})",
                    existing.key(),
                    existing.get().client_name(),
                    existing.get().connection_id()
                );
                false
            }
            Entry::Vacant(slot) => {
                trace!(
                    "Registering host {} -> {} ({})",
                    tunnel.host(),
                    tunnel.client_name(),
                    tunnel.connection_id()
                );
                slot.insert(tunnel);
                true
            }
        }
    }

    /// Remove the entry for `host`, returning it if one existed
    pub fn remove(&self, host: &str) -> Option<Tunnel> {
        self.tunnels.remove(host).map(|(_, tunnel)| tunnel)
    }

    /// Remove the entry for `host` only if it belongs to `owner`
    pub fn remove_if_owned(&self, host: &str, owner: ConnectionId) -> Option<Tunnel> {
        self.tunnels
            .remove_if(host, |_, tunnel| tunnel.connection_id() == owner)
            .map(|(_, tunnel)| tunnel)
    }

    pub fn lookup(&self, host: &str) -> Option<Tunnel> {
        self.tunnels.get(host).map(|entry| entry.value().clone())
    }

    /// Resolve the control connection that should receive traffic for `host`
    pub fn lookup_connection(&self, host: &str) -> Option<ConnectionHandle> {
        self.tunnels
            .get(host)
            .map(|entry| entry.value().connection().clone())
    }

    pub fn exists(&self, host: &str) -> bool {
        self.tunnels.contains_key(host)
    }

    /// Hosts currently owned by the given connection
    pub fn hosts_for_connection(&self, owner: ConnectionId) -> Vec<String> {
        self.tunnels
            .iter()
            .filter(|entry| entry.value().connection_id() == owner)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn all_tunnels(&self) -> Vec<Tunnel> {
        self.tunnels
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }
}

impl Default for TunnelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
