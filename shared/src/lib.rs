//! Wire format and data model shared by the broadcast client and the recorder
//!
//! Pure code only: the codec for the simulator's UDP broadcasting protocol,
//! the decoded message types, and the parser for the shared-memory telemetry
//! pages. Nothing in this crate touches a socket or a clock.

pub mod codec;
pub mod error;
pub mod snapshot;
pub mod types;

pub use codec::{InboundMessage, OutboundMessage, PROTOCOL_VERSION};
pub use error::{DecodeError, PageTooShort};
pub use snapshot::{GForce, PlayerSnapshot};
pub use types::*;

/// Port the simulator's broadcasting interface listens on out of the box
pub const DEFAULT_BROADCAST_PORT: u16 = 9000;
/// Largest datagram the peer sends (full entry list with long names)
pub const MAX_DATAGRAM_SIZE: usize = 32 * 1024;
