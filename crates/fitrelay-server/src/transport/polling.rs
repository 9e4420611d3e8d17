//! HTTP long-poll fallback for clients that cannot hold a WebSocket open.
//!
//! A polling session is a relay connection whose outbound queue is drained
//! by `GET` requests instead of a socket writer. Sessions are addressed by
//! an unguessable hex token and reaped once they stop polling.

use crate::relay::{ConnectionId, RelayHandle};
use fitrelay_core::{Envelope, RelayError, RelayResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};

/// Upper bound on envelopes returned by one poll.
const MAX_BATCH: usize = 256;

struct PollSession {
    conn_id: ConnectionId,
    queue: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    last_seen: Instant,
}

/// Registry of active long-poll sessions.
pub struct PollHub {
    relay: RelayHandle,
    sessions: RwLock<HashMap<String, PollSession>>,
    wait: Duration,
    idle_timeout: Duration,
}

impl PollHub {
    pub fn new(relay: RelayHandle, wait: Duration, idle_timeout: Duration) -> Self {
        Self {
            relay,
            sessions: RwLock::new(HashMap::new()),
            wait,
            idle_timeout,
        }
    }

    /// Open a polling connection. Returns its session token.
    pub async fn open(&self) -> RelayResult<String> {
        let (conn_id, queue) = self.relay.open().await?;
        let sid = generate_sid();
        self.sessions.write().await.insert(
            sid.clone(),
            PollSession {
                conn_id,
                queue: Arc::new(Mutex::new(queue)),
                last_seen: Instant::now(),
            },
        );
        info!(conn_id, "polling client connected");
        Ok(sid)
    }

    /// Submit envelopes from a polling client, in order.
    pub async fn push(&self, sid: &str, envelopes: Vec<Envelope>) -> RelayResult<()> {
        let conn_id = self.touch(sid).await?.0;
        for envelope in envelopes {
            self.relay.frame(conn_id, envelope).await?;
        }
        Ok(())
    }

    /// Wait up to the configured hold time for envelopes addressed to `sid`.
    ///
    /// Returns as soon as at least one is queued, along with anything else
    /// already waiting. An empty batch means the hold time elapsed.
    pub async fn poll(&self, sid: &str) -> RelayResult<Vec<Envelope>> {
        let (_, queue) = self.touch(sid).await?;
        let mut queue = queue.lock().await;

        let mut batch = Vec::new();
        match tokio::time::timeout(self.wait, queue.recv()).await {
            Ok(Some(first)) => batch.push(first),
            Ok(None) => {
                drop(queue);
                self.remove(sid).await;
                return Err(RelayError::SessionNotFound(sid.to_string()));
            }
            Err(_) => return Ok(batch),
        }
        while batch.len() < MAX_BATCH {
            match queue.try_recv() {
                Ok(envelope) => batch.push(envelope),
                Err(_) => break,
            }
        }
        drop(queue);

        // A long hold must not count as idleness.
        let _ = self.touch(sid).await;
        Ok(batch)
    }

    /// Close a polling connection.
    pub async fn close(&self, sid: &str) -> RelayResult<()> {
        let conn_id = self
            .remove(sid)
            .await
            .ok_or_else(|| RelayError::SessionNotFound(sid.to_string()))?;
        self.relay.close(conn_id).await?;
        info!(conn_id, "polling client disconnected");
        Ok(())
    }

    /// Close every session that has not polled or pushed within the idle timeout.
    pub async fn reap_idle(&self) -> Vec<ConnectionId> {
        let expired: Vec<(String, ConnectionId)> = {
            let mut sessions = self.sessions.write().await;
            let expired: Vec<_> = sessions
                .iter()
                .filter(|(_, s)| s.last_seen.elapsed() > self.idle_timeout)
                .map(|(sid, s)| (sid.clone(), s.conn_id))
                .collect();
            for (sid, _) in &expired {
                sessions.remove(sid);
            }
            expired
        };

        let mut closed = Vec::with_capacity(expired.len());
        for (_, conn_id) in expired {
            if self.relay.close(conn_id).await.is_ok() {
                closed.push(conn_id);
            }
        }
        if !closed.is_empty() {
            debug!(count = closed.len(), "reaped idle polling clients");
        }
        closed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    async fn touch(
        &self,
        sid: &str,
    ) -> RelayResult<(ConnectionId, Arc<Mutex<mpsc::Receiver<Envelope>>>)> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(sid)
            .ok_or_else(|| RelayError::SessionNotFound(sid.to_string()))?;
        session.last_seen = Instant::now();
        Ok((session.conn_id, session.queue.clone()))
    }

    async fn remove(&self, sid: &str) -> Option<ConnectionId> {
        self.sessions.write().await.remove(sid).map(|s| s.conn_id)
    }
}

fn generate_sid() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}
