//! Outbound delivery to connections.
//!
//! Each transport task owns the receiving half of a bounded queue; the relay
//! pushes into the sending half without waiting. A full or closed queue is
//! logged and the envelope dropped.

use super::registry::ConnectionId;
use fitrelay_core::Envelope;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Sink for envelopes addressed to a connection.
pub trait Outbox {
    /// Queue `envelope` for `to`. Returns `false` if it could not be queued.
    fn deliver(&mut self, to: ConnectionId, envelope: &Envelope) -> bool;
}

/// Send `envelope` to every target. Returns the number successfully queued.
pub fn broadcast<I>(outbox: &mut dyn Outbox, targets: I, envelope: &Envelope) -> usize
where
    I: IntoIterator<Item = ConnectionId>,
{
    targets
        .into_iter()
        .filter(|id| outbox.deliver(*id, envelope))
        .count()
}

/// Outbox backed by per-connection mpsc queues.
#[derive(Debug, Default)]
pub struct ChannelOutbox {
    senders: HashMap<ConnectionId, mpsc::Sender<Envelope>>,
}

impl ChannelOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, id: ConnectionId, tx: mpsc::Sender<Envelope>) {
        self.senders.insert(id, tx);
    }

    /// Drop the sender; the transport sees its queue close once drained.
    pub fn detach(&mut self, id: ConnectionId) {
        self.senders.remove(&id);
    }
}

impl Outbox for ChannelOutbox {
    fn deliver(&mut self, to: ConnectionId, envelope: &Envelope) -> bool {
        let Some(tx) = self.senders.get(&to) else {
            debug!(conn_id = to, event = %envelope.event, "no outbound queue for connection");
            return false;
        };
        match tx.try_send(envelope.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = to, event = %envelope.event, "outbound queue full, dropping");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = to, event = %envelope.event, "outbound queue closed");
                false
            }
        }
    }
}

/// Outbox that records every delivery, for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingOutbox {
    pub sent: Vec<(ConnectionId, Envelope)>,
}

#[cfg(test)]
impl RecordingOutbox {
    pub fn to(&self, id: ConnectionId) -> Vec<&Envelope> {
        self.sent
            .iter()
            .filter(|(to, _)| *to == id)
            .map(|(_, env)| env)
            .collect()
    }

    pub fn clear(&mut self) {
        self.sent.clear();
    }
}

#[cfg(test)]
impl Outbox for RecordingOutbox {
    fn deliver(&mut self, to: ConnectionId, envelope: &Envelope) -> bool {
        self.sent.push((to, envelope.clone()));
        true
    }
}
