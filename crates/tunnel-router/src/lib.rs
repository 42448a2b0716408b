//! Host routing for the tunnel relay
//!
//! Holds the process-wide host → [`Tunnel`] registry and the handle type that
//! ties every registered host back to the control connection that owns it.

pub mod connection;
pub mod registry;
pub mod tunnel;

pub use connection::{ConnectionHandle, ConnectionId, ConnectionIdGenerator, HandleError};
pub use registry::TunnelRegistry;
pub use tunnel::Tunnel;
