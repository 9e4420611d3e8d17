//! Signaling relay: connection registry, privileged-peer coordinator,
//! router, and the event loop that owns them.

pub mod coordinator;
pub mod event_loop;
pub mod outbox;
pub mod policy;
pub mod registry;
pub mod router;
pub mod state;

pub use event_loop::{spawn, RelayHandle};
pub use registry::{ConnectionId, PeerEntry};
pub use state::RelayState;
