//! Client transports: WebSocket, with HTTP long-polling as a fallback.

pub mod polling;
pub mod websocket;

pub use polling::PollHub;
