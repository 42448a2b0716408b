//! Relay configuration
//!
//! Maps `register.*` properties, plus command-line overrides, onto a
//! [`ControlConfig`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tunnel_control::config::{DEFAULT_BACKLOG, DEFAULT_IDLE_TIMEOUT};
use tunnel_control::{CleanupPolicy, ControlConfig};

use crate::properties::Properties;

pub const PORT_KEY: &str = "register.port";
pub const HOST_KEY: &str = "register.host";
pub const BACKLOG_KEY: &str = "register.backlog";
pub const TCP_NODELAY_KEY: &str = "register.tcp_nodelay";
pub const KEEPALIVE_KEY: &str = "register.keepalive";
pub const IDLE_TIMEOUT_KEY: &str = "register.idle_timeout_secs";
pub const MAX_FRAME_LENGTH_KEY: &str = "register.max_frame_length";
pub const SEND_ACK_KEY: &str = "register.send_ack";
pub const CLEANUP_POLICY_KEY: &str = "register.cleanup_policy";

/// Bind address used when `register.host` is absent
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}\n\nSet it in the properties file or pass it on the command line (e.g. --port)")]
    MissingKey(String),

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Values given on the command line, which win over the properties file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
}

impl ConfigOverrides {
    /// Build the control channel configuration
    pub fn apply(&self, props: &Properties) -> Result<ControlConfig, ConfigError> {
        let port = match self.port {
            Some(port) => port,
            None => port_from(props)?,
        };

        let host = props.get_string(HOST_KEY, &DEFAULT_HOST.to_string());
        let ip = host.parse::<IpAddr>().map_err(|e| invalid(HOST_KEY, &host, e))?;

        let backlog = non_negative(
            BACKLOG_KEY,
            props.get_long(BACKLOG_KEY, DEFAULT_BACKLOG as i64),
        )?;
        let backlog = u32::try_from(backlog).map_err(|e| invalid(BACKLOG_KEY, backlog, e))?;

        let idle_timeout_secs = non_negative(
            IDLE_TIMEOUT_KEY,
            props.get_long(IDLE_TIMEOUT_KEY, DEFAULT_IDLE_TIMEOUT.as_secs() as i64),
        )?;
        if idle_timeout_secs == 0 {
            return Err(invalid(IDLE_TIMEOUT_KEY, 0, "must be at least 1 second"));
        }

        let mut config = ControlConfig::new(SocketAddr::new(ip, port));

        let max_frame_length = non_negative(
            MAX_FRAME_LENGTH_KEY,
            props.get_long(MAX_FRAME_LENGTH_KEY, config.max_frame_length as i64),
        )?;
        if max_frame_length == 0 {
            return Err(invalid(MAX_FRAME_LENGTH_KEY, 0, "must be positive"));
        }

        let cleanup_policy = match props.get(CLEANUP_POLICY_KEY) {
            Some(value) => value
                .parse::<CleanupPolicy>()
                .map_err(|reason| invalid(CLEANUP_POLICY_KEY, value, reason))?,
            None => CleanupPolicy::default(),
        };

        config.backlog = backlog;
        config.tcp_nodelay = props.get_bool(TCP_NODELAY_KEY, config.tcp_nodelay);
        config.keepalive = props.get_bool(KEEPALIVE_KEY, config.keepalive);

        Ok(config
            .with_idle_timeout(Duration::from_secs(idle_timeout_secs))
            .with_max_frame_length(max_frame_length as usize)
            .with_send_ack(props.get_bool(SEND_ACK_KEY, false))
            .with_cleanup_policy(cleanup_policy))
    }
}

fn port_from(props: &Properties) -> Result<u16, ConfigError> {
    let value = props
        .get(PORT_KEY)
        .ok_or_else(|| ConfigError::MissingKey(PORT_KEY.to_string()))?;

    match value.parse::<u16>() {
        Ok(0) => Err(invalid(PORT_KEY, value, "port must be between 1 and 65535")),
        Ok(port) => Ok(port),
        Err(e) => Err(invalid(PORT_KEY, value, e)),
    }
}

fn non_negative(key: &str, value: i64) -> Result<u64, ConfigError> {
    u64::try_from(value).map_err(|_| invalid(key, value, "must not be negative"))
}

fn invalid(key: &str, value: impl ToString, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_with_port_only() {
        let props = Properties::parse("register.port=7000\n");
        let config = ConfigOverrides::default().apply(&props).unwrap();

        assert_eq!(config.bind_addr, SocketAddr::new(DEFAULT_HOST, 7000));
        assert_eq!(config.backlog, 128);
        assert!(config.tcp_nodelay);
        assert!(config.keepalive);
        assert_eq!(config.idle_timeout, Duration::from_secs(15));
        assert_eq!(config.max_frame_length, 1024 * 1024);
        assert!(!config.send_ack);
        assert_eq!(config.cleanup_policy, CleanupPolicy::FirstMessage);
    }

    #[test]
    fn test_all_keys() {
        let props = Properties::parse(
            "register.port=7100\n\
             register.host=127.0.0.1\n\
             register.backlog=16\n\
             register.tcp_nodelay=false\n\
             register.keepalive=false\n\
             register.idle_timeout_secs=30\n\
             register.max_frame_length=4096\n\
             register.send_ack=true\n\
             register.cleanup_policy=owned-hosts\n",
        );
        let config = ConfigOverrides::default().apply(&props).unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:7100".parse().unwrap());
        assert_eq!(config.backlog, 16);
        assert!(!config.tcp_nodelay);
        assert!(!config.keepalive);
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.max_frame_length, 4096);
        assert!(config.send_ack);
        assert_eq!(config.cleanup_policy, CleanupPolicy::OwnedHosts);
    }

    #[test]
    fn test_cli_port_overrides_file() {
        let props = Properties::parse("register.port=7000\n");
        let overrides = ConfigOverrides { port: Some(9000) };
        let config = overrides.apply(&props).unwrap();
        assert_eq!(config.bind_addr.port(), 9000);

        let config = overrides.apply(&Properties::new()).unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
    }

    #[test]
    fn test_missing_port() {
        let err = ConfigOverrides::default()
            .apply(&Properties::new())
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey(key) if key == PORT_KEY));
    }

    #[test]
    fn test_invalid_values() {
        for contents in [
            "register.port=http",
            "register.port=0",
            "register.port=70000",
            "register.port=7000\nregister.host=not-an-ip",
            "register.port=7000\nregister.idle_timeout_secs=0",
            "register.port=7000\nregister.idle_timeout_secs=-5",
            "register.port=7000\nregister.max_frame_length=0",
            "register.port=7000\nregister.cleanup_policy=everything",
        ] {
            let props = Properties::parse(contents);
            let result = ConfigOverrides::default().apply(&props);
            assert!(
                matches!(result, Err(ConfigError::InvalidValue { .. })),
                "expected invalid value for {:?}",
                contents
            );
        }
    }

    #[test]
    fn test_unparseable_optional_value_falls_back() {
        let props = Properties::parse("register.port=7000\nregister.backlog=lots\n");
        let config = ConfigOverrides::default().apply(&props).unwrap();
        assert_eq!(config.backlog, 128);
    }
}
