//! Control plane for tunnel registration
//!
//! Clients connect to the control port and register the public hosts they
//! serve. Each connection owns the hosts it registered; when it closes, times
//! out or fails, those hosts are released from the shared
//! [`TunnelRegistry`](tunnel_router::TunnelRegistry).
pub mod config;
pub mod connection;
pub mod handler;
pub mod listener;

pub use config::{CleanupPolicy, ControlConfig};
pub use connection::{ControlConnection, DisconnectReason};
pub use handler::{ConnectionState, FrameError, RegistrationHandler, RegistrationOutcome};
pub use listener::{ControlError, ControlListener};
