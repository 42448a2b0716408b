//! Tunnel relay process support
//!
//! Loads the relay's `.properties` file and turns it into the control channel
//! configuration consumed by the `tunnel-relay` binary.

pub mod config;
pub mod properties;

pub use config::{ConfigError, ConfigOverrides};
pub use properties::Properties;
