//! Signaling events exchanged between browser clients, the pose-analysis
//! process, and the relay.
//!
//! Every frame is a JSON envelope `{"event": "...", "data": ...}`. The relay
//! reads the event name to pick a route and otherwise treats `data` as opaque.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event names as they appear on the wire.
pub mod events {
    pub const CONNECT_PYTHON: &str = "connect-python";
    pub const WEBRTC_OFFER: &str = "webrtc-offer";
    pub const WEBRTC_ANSWER: &str = "webrtc-answer";
    pub const ICE_CANDIDATE: &str = "ice-candidate";
    pub const EXERCISE_CHANGE: &str = "exercise-change";
    pub const EXERCISE_FEEDBACK: &str = "exercise-feedback";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const PYTHON_DISCONNECTED: &str = "python-disconnected";
}

/// Payload field carrying the selected exercise on offers and changes.
pub const EXERCISE_TYPE_FIELD: &str = "exerciseType";

/// A single framed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name (see [`events`]).
    pub event: String,
    /// Opaque payload. Absent and `null` are equivalent; both serialize
    /// with the field omitted.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// An envelope with no payload.
    pub fn bare(event: impl Into<String>) -> Self {
        Self::new(event, Value::Null)
    }

    /// The `exerciseType` string carried by the payload, if any.
    pub fn exercise_type(&self) -> Option<&str> {
        self.data.get(EXERCISE_TYPE_FIELD).and_then(Value::as_str)
    }
}

/// Inbound event kinds the relay knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundKind {
    /// `connect-python`: the sender asks to become the privileged peer.
    ClaimPrivileged,
    /// `webrtc-offer`: ordinary peer to privileged peer.
    Offer,
    /// `webrtc-answer`: privileged peer to ordinary peers.
    Answer,
    /// `ice-candidate`: either direction.
    IceCandidate,
    /// `exercise-change`: ordinary peer to privileged peer.
    ExerciseChange,
    /// `exercise-feedback`: privileged peer to ordinary peers.
    Feedback,
    /// `ping`: answered directly with `pong`.
    Ping,
}

impl InboundKind {
    pub const ALL: [InboundKind; 7] = [
        InboundKind::ClaimPrivileged,
        InboundKind::Offer,
        InboundKind::Answer,
        InboundKind::IceCandidate,
        InboundKind::ExerciseChange,
        InboundKind::Feedback,
        InboundKind::Ping,
    ];

    /// Map a wire event name to its kind. Unknown names yield `None`.
    pub fn from_event(name: &str) -> Option<Self> {
        match name {
            events::CONNECT_PYTHON => Some(Self::ClaimPrivileged),
            events::WEBRTC_OFFER => Some(Self::Offer),
            events::WEBRTC_ANSWER => Some(Self::Answer),
            events::ICE_CANDIDATE => Some(Self::IceCandidate),
            events::EXERCISE_CHANGE => Some(Self::ExerciseChange),
            events::EXERCISE_FEEDBACK => Some(Self::Feedback),
            events::PING => Some(Self::Ping),
            _ => None,
        }
    }

    pub fn event_name(self) -> &'static str {
        match self {
            Self::ClaimPrivileged => events::CONNECT_PYTHON,
            Self::Offer => events::WEBRTC_OFFER,
            Self::Answer => events::WEBRTC_ANSWER,
            Self::IceCandidate => events::ICE_CANDIDATE,
            Self::ExerciseChange => events::EXERCISE_CHANGE,
            Self::Feedback => events::EXERCISE_FEEDBACK,
            Self::Ping => events::PING,
        }
    }
}

/// Body of the `pong` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PongPayload {
    pub python_connected: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl PongPayload {
    pub fn into_envelope(self) -> Envelope {
        // Serializing a struct of plain fields cannot fail.
        let data = serde_json::to_value(self).unwrap_or(Value::Null);
        Envelope::new(events::PONG, data)
    }
}
