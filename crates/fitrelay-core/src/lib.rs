//! fitrelay-core: Shared protocol library for the workout signaling relay.
//!
//! Provides the JSON envelope exchanged over every transport, the named
//! signaling events, and the text codec used by the server and its clients.

pub mod codec;
pub mod error;
pub mod messages;

// Re-export commonly used items at crate root.
pub use codec::{decode_batch, decode_frame, encode_envelope};
pub use error::{RelayError, RelayResult};
pub use messages::{events, Envelope, InboundKind, PongPayload};
