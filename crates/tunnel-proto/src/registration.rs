//! Registration messages exchanged on the control channel

use crate::{HOST_SEPARATOR, SPLIT_FLAG};
use thiserror::Error;

/// Registration parse errors
///
/// All of these are recoverable: the offending frame is skipped and the
/// connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Empty registration frame")]
    Empty,

    #[error("Registration frame has no '#' separator")]
    MissingSeparator,

    #[error("Registration frame for client '{0}' has no hosts")]
    EmptyHostList(String),
}

/// A parsed `clientName#host1,host2,...` registration message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub client_name: String,
    /// Trimmed, non-empty hosts in the order the client sent them
    pub hosts: Vec<String>,
}

impl RegistrationRequest {
    pub fn new(client_name: impl Into<String>, hosts: Vec<String>) -> Self {
        Self {
            client_name: client_name.into(),
            hosts,
        }
    }

    /// Parse a frame payload
    ///
    /// Only the first two `#`-separated parts are used. Host tokens are
    /// trimmed and empty tokens are dropped.
    pub fn parse(payload: &str) -> Result<Self, ParseError> {
        if payload.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let mut parts = payload.split(SPLIT_FLAG);
        let client_name = parts.next().unwrap_or_default().trim();
        let host_list = parts.next().ok_or(ParseError::MissingSeparator)?;

        let hosts: Vec<String> = host_list
            .split(HOST_SEPARATOR)
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_string)
            .collect();

        if hosts.is_empty() {
            return Err(ParseError::EmptyHostList(client_name.to_string()));
        }

        Ok(Self::new(client_name, hosts))
    }
}

/// Per-host outcome of one registration message, as sent back to the client
///
/// Wire form: `succeeded-csv#failed-csv`, either side possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationAck {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl RegistrationAck {
    pub fn to_payload(&self) -> String {
        let separator = HOST_SEPARATOR.to_string();
        format!(
            "{}{}{}",
            self.succeeded.join(&separator),
            SPLIT_FLAG,
            self.failed.join(&separator)
        )
    }

    pub fn parse(payload: &str) -> Result<Self, ParseError> {
        let (succeeded, failed) = payload
            .split_once(SPLIT_FLAG)
            .ok_or(ParseError::MissingSeparator)?;

        let split = |list: &str| -> Vec<String> {
            list.split(HOST_SEPARATOR)
                .map(str::trim)
                .filter(|host| !host.is_empty())
                .map(str::to_string)
                .collect()
        };

        Ok(Self {
            succeeded: split(succeeded),
            failed: split(failed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let request =
            RegistrationRequest::parse("svcA#api.example.com,admin.example.com").unwrap();
        assert_eq!(request.client_name, "svcA");
        assert_eq!(request.hosts, vec!["api.example.com", "admin.example.com"]);
    }

    #[test]
    fn test_parse_trims_hosts() {
        let request = RegistrationRequest::parse("client# a.com ,\tb.com\n").unwrap();
        assert_eq!(request.hosts, vec!["a.com", "b.com"]);
    }

    #[test]
    fn test_parse_keeps_duplicate_hosts() {
        let request = RegistrationRequest::parse("clientX#a,b,a").unwrap();
        assert_eq!(request.hosts, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_parse_drops_empty_tokens() {
        let request = RegistrationRequest::parse("client#a.com,, ,b.com,").unwrap();
        assert_eq!(request.hosts, vec!["a.com", "b.com"]);
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(RegistrationRequest::parse(""), Err(ParseError::Empty));
        assert_eq!(RegistrationRequest::parse("  \r\n"), Err(ParseError::Empty));
    }

    #[test]
    fn test_parse_missing_separator() {
        assert_eq!(
            RegistrationRequest::parse("just-a-heartbeat"),
            Err(ParseError::MissingSeparator)
        );
    }

    #[test]
    fn test_parse_empty_host_list() {
        assert_eq!(
            RegistrationRequest::parse("client#"),
            Err(ParseError::EmptyHostList("client".to_string()))
        );
        assert_eq!(
            RegistrationRequest::parse("client# , ,"),
            Err(ParseError::EmptyHostList("client".to_string()))
        );
    }

    #[test]
    fn test_parse_ignores_extra_parts() {
        let request = RegistrationRequest::parse("client#a.com#trailing").unwrap();
        assert_eq!(request.hosts, vec!["a.com"]);
    }

    #[test]
    fn test_ack_payload() {
        let ack = RegistrationAck {
            succeeded: vec!["a".into(), "b".into()],
            failed: vec!["c".into()],
        };
        assert_eq!(ack.to_payload(), "a,b#c");

        let all_failed = RegistrationAck {
            succeeded: vec![],
            failed: vec!["a".into()],
        };
        assert_eq!(all_failed.to_payload(), "#a");
    }

    #[test]
    fn test_ack_parse() {
        let ack = RegistrationAck::parse("a,b#").unwrap();
        assert_eq!(ack.succeeded, vec!["a", "b"]);
        assert!(ack.failed.is_empty());

        assert!(RegistrationAck::parse("no separator").is_err());
    }
}
