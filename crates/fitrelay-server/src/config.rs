//! Server configuration: TOML file + CLI overrides.

use fitrelay_core::{RelayError, RelayResult};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub polling: PollingSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            ws_port: default_ws_port(),
            http_port: default_http_port(),
            max_frame_bytes: default_max_frame_bytes(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

/// `[relay]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySection {
    /// Shared secret required on `connect-python`. Unset = open claim.
    #[serde(default)]
    pub claim_secret: Option<String>,
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u64,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            claim_secret: None,
            stats_interval: default_stats_interval(),
        }
    }
}

/// `[polling]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct PollingSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_wait")]
    pub wait_secs: u64,
    #[serde(default = "default_poll_idle_timeout")]
    pub idle_timeout: u64,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            wait_secs: default_poll_wait(),
            idle_timeout: default_poll_idle_timeout(),
        }
    }
}

fn default_bind() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_ws_port() -> u16 {
    5002
}
fn default_http_port() -> u16 {
    5001
}
fn default_max_frame_bytes() -> usize {
    1_048_576
}
fn default_outbound_queue() -> usize {
    64
}
fn default_stats_interval() -> u64 {
    60
}
fn default_poll_wait() -> u64 {
    25
}
fn default_poll_idle_timeout() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

/// Resolved server configuration (CLI overrides applied, validated).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub ws_port: u16,
    pub http_port: u16,
    pub max_frame_bytes: usize,
    pub outbound_queue: usize,
    pub claim_secret: Option<String>,
    /// Zero disables the periodic stats log.
    pub stats_interval: Duration,
    pub polling_enabled: bool,
    pub poll_wait: Duration,
    pub poll_idle_timeout: Duration,
}

/// Values given on the command line, each overriding the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<IpAddr>,
    pub ws_port: Option<u16>,
    pub http_port: Option<u16>,
    pub claim_secret: Option<String>,
    pub disable_polling: bool,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: CliOverrides) -> RelayResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file_config, cli)
    }

    /// Merge CLI overrides into a parsed file and validate the result.
    pub fn resolve(file: ConfigFile, cli: CliOverrides) -> RelayResult<Self> {
        let config = Self {
            bind: cli.bind.unwrap_or(file.server.bind),
            ws_port: cli.ws_port.unwrap_or(file.server.ws_port),
            http_port: cli.http_port.unwrap_or(file.server.http_port),
            max_frame_bytes: file.server.max_frame_bytes,
            outbound_queue: file.server.outbound_queue,
            claim_secret: cli.claim_secret.or(file.relay.claim_secret),
            stats_interval: Duration::from_secs(file.relay.stats_interval),
            polling_enabled: file.polling.enabled && !cli.disable_polling,
            poll_wait: Duration::from_secs(file.polling.wait_secs),
            poll_idle_timeout: Duration::from_secs(file.polling.idle_timeout),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> RelayResult<()> {
        if self.ws_port == 0 || self.http_port == 0 {
            return Err(RelayError::Config("ports must be non-zero".into()));
        }
        if self.ws_port == self.http_port {
            return Err(RelayError::Config(format!(
                "ws_port and http_port must differ (both {})",
                self.ws_port
            )));
        }
        if self.outbound_queue == 0 {
            return Err(RelayError::Config("outbound_queue must be at least 1".into()));
        }
        if self.max_frame_bytes == 0 {
            return Err(RelayError::Config("max_frame_bytes must be at least 1".into()));
        }
        if self.polling_enabled && self.poll_idle_timeout <= self.poll_wait {
            return Err(RelayError::Config(
                "polling.idle_timeout must exceed polling.wait_secs".into(),
            ));
        }
        Ok(())
    }
}

fn parse(content: &str) -> RelayResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| RelayError::Config(format!("config parse error: {e}")))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
