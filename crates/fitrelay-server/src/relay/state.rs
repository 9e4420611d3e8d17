//! Process-wide relay state, owned by the event loop.

use super::coordinator::{DisconnectOutcome, SessionCoordinator};
use super::outbox::Outbox;
use super::policy::ClaimPolicy;
use super::registry::{ConnectionId, ConnectionRegistry, PeerEntry};
use super::router::{self, RouteOutcome};
use fitrelay_core::Envelope;
use tracing::info;

/// Registry plus privileged-peer coordinator.
///
/// Built once at startup and handed to the relay loop; never shared.
pub struct RelayState {
    pub(crate) registry: ConnectionRegistry,
    pub(crate) coordinator: SessionCoordinator,
}

/// Read-only view published after every event, for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct RelaySnapshot {
    pub python_connected: bool,
    pub clients_count: usize,
    pub peers: Vec<PeerEntry>,
}

impl RelayState {
    pub fn new(policy: Box<dyn ClaimPolicy>) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            coordinator: SessionCoordinator::new(policy),
        }
    }

    pub fn connect(&mut self, id: ConnectionId) {
        self.registry.register(id);
        info!(conn_id = id, clients = self.registry.len(), "client connected");
    }

    pub fn disconnect(&mut self, outbox: &mut dyn Outbox, id: ConnectionId) -> DisconnectOutcome {
        let outcome = self
            .coordinator
            .on_disconnect(&mut self.registry, outbox, id);
        info!(conn_id = id, clients = self.registry.len(), "client disconnected");
        outcome
    }

    pub fn handle_frame(
        &mut self,
        outbox: &mut dyn Outbox,
        from: ConnectionId,
        envelope: Envelope,
    ) -> RouteOutcome {
        router::route(self, outbox, from, envelope)
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        RelaySnapshot {
            python_connected: self.coordinator.current_privileged().is_some(),
            clients_count: self.registry.len(),
            peers: self.registry.all().cloned().collect(),
        }
    }
}
