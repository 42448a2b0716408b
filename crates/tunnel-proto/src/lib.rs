//! Wire protocol for the tunnel control channel
//!
//! The control channel is a plain TCP byte stream split into frames by a fixed
//! marker ([`FRAME_DELIMITER`]). Each non-empty frame is a UTF-8 registration
//! message of the form `clientName#host1,host2,...`.

pub mod codec;
pub mod registration;

pub use codec::{CodecError, DelimiterCodec};
pub use registration::{ParseError, RegistrationAck, RegistrationRequest};

/// Marker terminating every frame on the control channel
pub const FRAME_DELIMITER: &[u8] = b"$END$";

/// Separates the client name from the host list in a registration message
pub const SPLIT_FLAG: char = '#';

/// Separates individual hosts inside the host list
pub const HOST_SEPARATOR: char = ',';

/// Default upper bound for a single frame, delimiter excluded (1 MiB)
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 1024 * 1024;
