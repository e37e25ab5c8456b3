//! Configuration system for the chatter mediator.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/chatter-mediator/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

/// Errors that can occur when loading mediator configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The room service URL is not a valid absolute URL.
    #[error("invalid room service URL {url:?}: {source}")]
    InvalidUrl {
        /// URL as configured.
        url: String,
        /// Parse failure.
        source: url::ParseError,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the mediator.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct MediatorConfigFile {
    server: ServerFileConfig,
    backend: BackendFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    room_id: Option<String>,
}

/// `[backend]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BackendFileConfig {
    url: Option<String>,
    timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the mediator.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Game On room mediator")]
pub struct MediatorCliArgs {
    /// Address to listen on for WebSocket connections.
    #[arg(short, long, env = "MEDIATOR_ADDR")]
    pub bind: Option<String>,

    /// Port to listen on; replaces the port of the resolved bind address.
    #[arg(long, env = "WEBSOCKET_PORT")]
    pub websocket_port: Option<u16>,

    /// Game On room id; when set, inbound messages must be addressed to it.
    #[arg(long, env = "ROOM_ID")]
    pub room_id: Option<String>,

    /// Base URL of the room service.
    #[arg(long, env = "ROOM_SERVICE_URL")]
    pub room_service_url: Option<String>,

    /// Deadline for a single room service call, in seconds.
    #[arg(long)]
    pub backend_timeout_secs: Option<u64>,

    /// Path to config file (default: `~/.config/chatter-mediator/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "MEDIATOR_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved mediator configuration.
#[derive(Debug, Clone)]
pub struct MediatorConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:3000`).
    pub bind_addr: String,
    /// Room id inbound envelopes must be addressed to, if any.
    pub room_id: Option<String>,
    /// Base URL of the room service.
    pub room_service_url: Url,
    /// Deadline for a single room service call.
    pub backend_timeout: Duration,
    /// Log level filter string.
    pub log_level: String,
}

/// Default listen address.
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Default room service URL.
const DEFAULT_ROOM_SERVICE_URL: &str = "http://localhost:6379/room";

/// Default room service call deadline.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(5);

impl MediatorConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if the room service URL is invalid.
    pub fn load(cli: &MediatorCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `MediatorConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. An empty room id means "no room id".
    /// `--websocket-port` only swaps the port of whichever address wins.
    fn resolve(cli: &MediatorCliArgs, file: &MediatorConfigFile) -> Result<Self, ConfigError> {
        let raw_url = cli
            .room_service_url
            .as_deref()
            .or(file.backend.url.as_deref())
            .unwrap_or(DEFAULT_ROOM_SERVICE_URL);
        let room_service_url = Url::parse(raw_url).map_err(|source| ConfigError::InvalidUrl {
            url: raw_url.to_string(),
            source,
        })?;

        let bind_addr = cli
            .bind
            .as_deref()
            .or(file.server.bind_addr.as_deref())
            .unwrap_or(DEFAULT_BIND_ADDR);

        Ok(Self {
            bind_addr: match cli.websocket_port {
                Some(port) => with_port(bind_addr, port),
                None => bind_addr.to_string(),
            },
            room_id: cli
                .room_id
                .clone()
                .or_else(|| file.server.room_id.clone())
                .filter(|id| !id.is_empty()),
            room_service_url,
            backend_timeout: cli
                .backend_timeout_secs
                .or(file.backend.timeout_secs)
                .map_or(DEFAULT_BACKEND_TIMEOUT, Duration::from_secs),
            log_level: cli.log_level.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Replaces the port of a `host:port` address, keeping the host.
fn with_port(addr: &str, port: u16) -> String {
    let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
    format!("{host}:{port}")
}

/// Load and parse a TOML config file for the mediator.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<MediatorConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(MediatorConfigFile::default());
        };
        config_dir.join("chatter-mediator").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MediatorConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
