//! Core server: wires the relay loop to its transports.
//!
//! Owns the relay handle, the long-poll hub, and the HTTP state, and runs
//! the WebSocket accept loop alongside the periodic housekeeping tasks.

use crate::config::ServerConfig;
use crate::http::{self, AppState};
use crate::relay::{self, policy, RelayHandle, RelayState};
use crate::transport::{websocket, PollHub};
use fitrelay_core::RelayResult;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// The relay server instance.
pub struct RelayServer {
    config: ServerConfig,
    relay: RelayHandle,
    polls: Option<Arc<PollHub>>,
    app_state: Arc<AppState>,
}

impl RelayServer {
    /// Build the relay state and start its event loop.
    pub fn new(config: ServerConfig) -> Self {
        let claim_policy = policy::from_secret(config.claim_secret.as_deref());
        if config.claim_secret.is_none() {
            warn!("no claim secret configured, any client may claim the pose-analysis role");
        }

        let (relay, _loop_task) = relay::spawn(RelayState::new(claim_policy), config.outbound_queue);

        let polls = config.polling_enabled.then(|| {
            Arc::new(PollHub::new(
                relay.clone(),
                config.poll_wait,
                config.poll_idle_timeout,
            ))
        });
        let app_state = Arc::new(AppState::new(
            relay.clone(),
            polls.clone(),
            config.max_frame_bytes,
        ));

        Self {
            config,
            relay,
            polls,
            app_state,
        }
    }

    /// Start listening on the WebSocket and HTTP ports.
    pub async fn run(self) -> RelayResult<()> {
        let ws_addr = SocketAddr::new(self.config.bind, self.config.ws_port);
        let http_addr = SocketAddr::new(self.config.bind, self.config.http_port);

        // Bind both ports up front; either failure ends startup.
        let http_listener = http::bind(http_addr).await?;
        let mut ws_rx = websocket::start_listener(ws_addr, self.config.max_frame_bytes).await?;
        self.app_state.websocket_running.store(true, Ordering::Relaxed);

        let http_state = self.app_state.clone();
        tokio::spawn(async move {
            if let Err(e) = http::serve(http_listener, http_state).await {
                error!(error = %e, "HTTP listener stopped");
            }
        });

        if !self.config.stats_interval.is_zero() {
            tokio::spawn(log_stats(
                self.relay.clone(),
                self.polls.clone(),
                self.config.stats_interval,
            ));
        }
        if let Some(polls) = &self.polls {
            tokio::spawn(reap_polling_clients(polls.clone()));
        }

        info!(
            ws_port = self.config.ws_port,
            http_port = self.config.http_port,
            polling = self.config.polling_enabled,
            "fitrelay-server ready"
        );

        while let Some(ws_conn) = ws_rx.recv().await {
            let relay = self.relay.clone();
            let max_frame_bytes = self.config.max_frame_bytes;
            tokio::spawn(async move {
                if let Err(e) = websocket::serve_connection(ws_conn, relay, max_frame_bytes).await {
                    warn!(error = %e, "WebSocket connection error");
                }
            });
        }

        info!("WebSocket listener closed, shutting down");
        self.app_state.websocket_running.store(false, Ordering::Relaxed);
        Ok(())
    }
}

/// Periodically log how many clients are connected.
async fn log_stats(relay: RelayHandle, polls: Option<Arc<PollHub>>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        interval.tick().await;
        let snap = relay.snapshot();
        let polling = match &polls {
            Some(hub) => hub.len().await,
            None => 0,
        };
        info!(
            clients = snap.clients_count,
            polling,
            python_connected = snap.python_connected,
            "relay stats"
        );
    }
}

/// Disconnect polling clients that stopped polling.
async fn reap_polling_clients(polls: Arc<PollHub>) {
    let period = (polls.idle_timeout() / 2).max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let reaped = polls.reap_idle().await;
        for conn_id in reaped {
            info!(conn_id, "polling client timed out");
        }
    }
}
