//! Control channel configuration

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tunnel_proto::DEFAULT_MAX_FRAME_LENGTH;

/// Client heartbeat interval the idle timeout is sized against
pub const CLIENT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Read-idle timeout after which a silent connection is closed
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(15);

pub const DEFAULT_BACKLOG: u32 = 128;

/// Which hosts a connection releases when it is torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupPolicy {
    /// Remove every host named in the first registration message,
    /// whether or not this connection won it. Hosts added by later messages
    /// are not released.
    #[default]
    FirstMessage,
    /// Remove every host this connection successfully registered, across all
    /// messages, and only while the registry entry still belongs to it.
    OwnedHosts,
}

impl FromStr for CleanupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first-message" | "first_message" => Ok(Self::FirstMessage),
            "owned-hosts" | "owned_hosts" => Ok(Self::OwnedHosts),
            other => Err(format!(
                "unknown cleanup policy '{}', expected 'first-message' or 'owned-hosts'",
                other
            )),
        }
    }
}

/// Control channel listener configuration
#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub bind_addr: SocketAddr,
    /// Pending connection queue depth
    pub backlog: u32,
    pub tcp_nodelay: bool,
    pub keepalive: bool,
    pub idle_timeout: Duration,
    /// Largest accepted frame, delimiter excluded
    pub max_frame_length: usize,
    /// Write a `succeeded#failed` acknowledgement after each registration
    pub send_ack: bool,
    pub cleanup_policy: CleanupPolicy,
}

impl ControlConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            backlog: DEFAULT_BACKLOG,
            tcp_nodelay: true,
            keepalive: true,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            send_ack: false,
            cleanup_policy: CleanupPolicy::default(),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }

    pub fn with_send_ack(mut self, send_ack: bool) -> Self {
        self.send_ack = send_ack;
        self
    }

    pub fn with_cleanup_policy(mut self, cleanup_policy: CleanupPolicy) -> Self {
        self.cleanup_policy = cleanup_policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControlConfig::new("0.0.0.0:7000".parse().unwrap());
        assert_eq!(config.backlog, 128);
        assert!(config.tcp_nodelay);
        assert!(config.keepalive);
        assert_eq!(config.idle_timeout, Duration::from_secs(15));
        assert_eq!(config.max_frame_length, 1024 * 1024);
        assert!(!config.send_ack);
        assert_eq!(config.cleanup_policy, CleanupPolicy::FirstMessage);
        assert!(config.idle_timeout > CLIENT_HEARTBEAT_INTERVAL);
    }

    #[test]
    fn test_cleanup_policy_from_str() {
        assert_eq!(
            "first-message".parse::<CleanupPolicy>().unwrap(),
            CleanupPolicy::FirstMessage
        );
        assert_eq!(
            " Owned_Hosts ".parse::<CleanupPolicy>().unwrap(),
            CleanupPolicy::OwnedHosts
        );
        assert!("everything".parse::<CleanupPolicy>().is_err());
    }
}
