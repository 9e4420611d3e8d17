//! fitrelay-server: signaling relay for live workout analysis.
//!
//! Brokers WebRTC offers, answers, and ICE candidates between browser
//! clients and the single pose-analysis process, and exposes liveness and
//! status endpoints over HTTP.

mod config;
mod http;
mod relay;
mod server;
mod transport;

use clap::Parser;
use config::{CliOverrides, ServerConfig};
use server::RelayServer;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{error, info};

/// fitrelay-server: workout signaling relay
#[derive(Parser, Debug)]
#[command(name = "fitrelay-server", version, about = "Workout signaling relay")]
struct Cli {
    /// Address to bind both listeners on
    #[arg(long)]
    bind: Option<IpAddr>,

    /// WebSocket signaling port
    #[arg(long)]
    ws_port: Option<u16>,

    /// HTTP diagnostics / long-poll port
    #[arg(long)]
    http_port: Option<u16>,

    /// Config file path
    #[arg(long, default_value = "~/.fitrelay/config.toml")]
    config: String,

    /// Shared secret required to claim the pose-analysis role
    #[arg(long, env = "FITRELAY_CLAIM_SECRET")]
    claim_secret: Option<String>,

    /// Disable the HTTP long-poll fallback
    #[arg(long)]
    no_polling: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting fitrelay-server");

    let config_path = PathBuf::from(&cli.config);
    let overrides = CliOverrides {
        bind: cli.bind,
        ws_port: cli.ws_port,
        http_port: cli.http_port,
        claim_secret: cli.claim_secret,
        disable_polling: cli.no_polling,
    };
    let server_config = match ServerConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let relay_server = RelayServer::new(server_config);

    tokio::select! {
        result = relay_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
    }

    info!("fitrelay-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
