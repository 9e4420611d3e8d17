//! Privileged-peer coordination.
//!
//! At most one connection (the pose-analysis process) holds the privileged
//! role. The coordinator keeps that reference in step with the registry and
//! tells everyone else when the privileged peer goes away.

use super::outbox::{broadcast, Outbox};
use super::policy::ClaimPolicy;
use super::registry::{ConnectionId, ConnectionRegistry, PeerPatch, PeerRole};
use fitrelay_core::{events, Envelope};
use serde_json::Value;
use tracing::{info, warn};

/// Result of a `connect-python` handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The sender is now privileged. `replaced` is the previous holder, if any.
    Claimed { replaced: Option<ConnectionId> },
    /// The sender already held the role.
    AlreadyHeld,
    /// The claim policy refused the handshake.
    Denied,
    /// The sender is no longer registered.
    NotConnected,
}

/// Result of a transport disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectOutcome {
    /// Whether the departing connection was the privileged peer.
    pub was_privileged: bool,
    /// How many remaining peers were sent `python-disconnected`.
    pub notified: usize,
}

/// Owns the single privileged-peer reference.
pub struct SessionCoordinator {
    privileged: Option<ConnectionId>,
    policy: Box<dyn ClaimPolicy>,
}

impl SessionCoordinator {
    pub fn new(policy: Box<dyn ClaimPolicy>) -> Self {
        Self {
            privileged: None,
            policy,
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Make `id` the privileged peer, replacing any previous holder.
    ///
    /// A replaced holder stays connected but is demoted to `Unknown`.
    pub fn claim_privileged(
        &mut self,
        registry: &mut ConnectionRegistry,
        id: ConnectionId,
        data: &Value,
    ) -> ClaimOutcome {
        if !registry.contains(id) {
            return ClaimOutcome::NotConnected;
        }
        if !self.policy.authorize(id, data) {
            warn!(conn_id = id, policy = self.policy.name(), "privileged claim denied");
            return ClaimOutcome::Denied;
        }
        if self.privileged == Some(id) {
            return ClaimOutcome::AlreadyHeld;
        }

        let replaced = self.privileged.replace(id);
        if let Some(previous) = replaced {
            registry.set_metadata(previous, PeerPatch::role(PeerRole::Unknown));
            warn!(
                conn_id = id,
                previous,
                "privileged peer replaced by a new handshake"
            );
        }
        registry.set_metadata(id, PeerPatch::role(PeerRole::Privileged));
        info!(conn_id = id, "pose-analysis peer connected");

        ClaimOutcome::Claimed { replaced }
    }

    pub fn current_privileged(&self) -> Option<ConnectionId> {
        self.privileged
    }

    pub fn is_privileged(&self, id: ConnectionId) -> bool {
        self.privileged == Some(id)
    }

    /// Remove `id` from the registry; if it was privileged, clear the
    /// reference and notify every remaining peer.
    pub fn on_disconnect(
        &mut self,
        registry: &mut ConnectionRegistry,
        outbox: &mut dyn Outbox,
        id: ConnectionId,
    ) -> DisconnectOutcome {
        registry.unregister(id);

        if !self.is_privileged(id) {
            return DisconnectOutcome {
                was_privileged: false,
                notified: 0,
            };
        }

        self.privileged = None;
        let targets = registry.ids_except(id);
        let notified = broadcast(
            outbox,
            targets,
            &Envelope::bare(events::PYTHON_DISCONNECTED),
        );
        warn!(conn_id = id, notified, "pose-analysis peer disconnected");

        DisconnectOutcome {
            was_privileged: true,
            notified,
        }
    }
}
