//! The relay event loop.
//!
//! A single task owns [`RelayState`] and processes one command at a time,
//! so handlers run to completion without locks. Transports talk to it
//! through a cloneable [`RelayHandle`].

use super::outbox::ChannelOutbox;
use super::registry::ConnectionId;
use super::state::{RelaySnapshot, RelayState};
use fitrelay_core::{Envelope, RelayError, RelayResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Capacity of the shared inbound command queue.
const COMMAND_QUEUE: usize = 1024;

/// Input to the relay loop.
#[derive(Debug)]
pub enum RelayCommand {
    /// A transport accepted a connection.
    Connect {
        id: ConnectionId,
        outbox: mpsc::Sender<Envelope>,
    },
    /// A decoded frame from a connection.
    Frame { id: ConnectionId, envelope: Envelope },
    /// The transport closed.
    Disconnect { id: ConnectionId },
}

/// Cloneable entry point into the relay loop.
#[derive(Clone)]
pub struct RelayHandle {
    commands: mpsc::Sender<RelayCommand>,
    next_conn_id: Arc<AtomicU64>,
    snapshot: watch::Receiver<RelaySnapshot>,
    outbound_queue: usize,
}

impl RelayHandle {
    /// Register a new connection. Returns its ID and the queue of envelopes
    /// addressed to it.
    pub async fn open(&self) -> RelayResult<(ConnectionId, mpsc::Receiver<Envelope>)> {
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.outbound_queue);
        self.send(RelayCommand::Connect { id, outbox: tx }).await?;
        Ok((id, rx))
    }

    /// Submit a frame received on `id`.
    pub async fn frame(&self, id: ConnectionId, envelope: Envelope) -> RelayResult<()> {
        self.send(RelayCommand::Frame { id, envelope }).await
    }

    /// Report that `id` closed.
    pub async fn close(&self, id: ConnectionId) -> RelayResult<()> {
        self.send(RelayCommand::Disconnect { id }).await
    }

    /// Latest published state.
    pub fn snapshot(&self) -> RelaySnapshot {
        self.snapshot.borrow().clone()
    }

    async fn send(&self, command: RelayCommand) -> RelayResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RelayError::Transport("relay loop has stopped".into()))
    }
}

/// Start the relay loop on its own task.
///
/// The loop exits once every [`RelayHandle`] is dropped.
pub fn spawn(state: RelayState, outbound_queue: usize) -> (RelayHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
    let (snap_tx, snap_rx) = watch::channel(state.snapshot());

    let handle = RelayHandle {
        commands: cmd_tx,
        next_conn_id: Arc::new(AtomicU64::new(1)),
        snapshot: snap_rx,
        outbound_queue: outbound_queue.max(1),
    };
    let task = tokio::spawn(run(state, cmd_rx, snap_tx));
    (handle, task)
}

async fn run(
    mut state: RelayState,
    mut commands: mpsc::Receiver<RelayCommand>,
    snapshot: watch::Sender<RelaySnapshot>,
) {
    let mut outbox = ChannelOutbox::new();
    info!(policy = state.coordinator().policy_name(), "relay loop started");

    while let Some(command) = commands.recv().await {
        let revision = state.registry().revision();
        match command {
            RelayCommand::Connect { id, outbox: tx } => {
                outbox.attach(id, tx);
                state.connect(id);
            }
            RelayCommand::Frame { id, envelope } => {
                if !state.registry().contains(id) {
                    debug!(conn_id = id, event = %envelope.event, "frame from closed connection");
                    continue;
                }
                let event = envelope.event.clone();
                let outcome = state.handle_frame(&mut outbox, id, envelope);
                debug!(conn_id = id, event = %event, ?outcome, "routed");
            }
            RelayCommand::Disconnect { id } => {
                if !state.registry().contains(id) {
                    continue;
                }
                state.disconnect(&mut outbox, id);
                outbox.detach(id);
            }
        }
        // Relayed traffic (answers, candidates, feedback, pings) leaves the
        // registry alone and publishes nothing.
        if state.registry().revision() != revision {
            snapshot.send_replace(state.snapshot());
        }
    }

    info!("relay loop stopped");
}
