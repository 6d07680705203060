//! Configuration system for the `taskwatch` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskwatch/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use taskwatch_proto::task::{DEFAULT_PRIORITY, TaskType};
use url::Url;

use crate::api::{DEFAULT_REQUEST_TIMEOUT, DEFAULT_TASK_LIMIT};
use crate::connection::{HeartbeatPolicy, ReconnectPolicy};
use crate::net::{DEFAULT_COMMAND_CAPACITY, SessionOptions, SyncConfig};
use crate::transport::ws::DEFAULT_CONNECT_TIMEOUT;

/// Default server base URL.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8000";

/// Errors that can occur when loading configuration.
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

    /// A URL setting does not parse or has an unsupported scheme.
    #[error("invalid {field} {value:?}: {reason}")]
    InvalidUrl {
        /// Setting name.
        field: &'static str,
        /// Offending value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A numeric setting is out of range.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Setting name.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    sync: SyncFileConfig,
    reconnect: ReconnectFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    url: Option<String>,
    ws_url: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    task_limit: Option<usize>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    heartbeat_interval_secs: Option<u64>,
    command_capacity: Option<usize>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    strategy: Option<ReconnectStrategy>,
    interval_secs: Option<u64>,
    initial_delay_ms: Option<u64>,
    max_delay_secs: Option<u64>,
    jitter: Option<f64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Which reconnect delay policy to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectStrategy {
    /// Same delay every time.
    #[default]
    Fixed,
    /// Doubling delay with jitter and a cap.
    Exponential,
}

/// Reconnect settings (used to build a [`ReconnectPolicy`]).
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Policy kind.
    pub strategy: ReconnectStrategy,
    /// Delay for [`ReconnectStrategy::Fixed`].
    pub interval: Duration,
    /// First delay for [`ReconnectStrategy::Exponential`].
    pub initial_delay: Duration,
    /// Delay cap for [`ReconnectStrategy::Exponential`].
    pub max_delay: Duration,
    /// Relative jitter for [`ReconnectStrategy::Exponential`].
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            strategy: ReconnectStrategy::Fixed,
            interval: Duration::from_secs(5),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl ReconnectConfig {
    /// The policy these settings describe.
    #[must_use]
    pub fn policy(&self) -> ReconnectPolicy {
        match self.strategy {
            ReconnectStrategy::Fixed => ReconnectPolicy::Fixed {
                interval: self.interval,
            },
            ReconnectStrategy::Exponential => ReconnectPolicy::Exponential {
                initial: self.initial_delay,
                max: self.max_delay,
                jitter: self.jitter,
            },
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// HTTP base URL of the task-queue server.
    pub server_url: String,
    /// WebSocket URL; derived from `server_url` when unset.
    pub ws_url: Option<String>,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Timeout for each HTTP request.
    pub request_timeout: Duration,
    /// `limit` sent with task list requests.
    pub task_limit: usize,

    // -- Sync --
    /// Interval between `ping` probes.
    pub heartbeat_interval: Duration,
    /// Capacity of the session command channel.
    pub command_capacity: usize,

    // -- Reconnect --
    /// Reconnect delay settings.
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            ws_url: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            task_limit: DEFAULT_TASK_LIMIT,
            heartbeat_interval: Duration::from_secs(30),
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path
    /// (`~/.config/taskwatch/config.toml`) is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let reconnect = &file.reconnect;

        Self {
            server_url: cli
                .server_url
                .clone()
                .or_else(|| file.server.url.clone())
                .unwrap_or(defaults.server_url),
            ws_url: cli.ws_url.clone().or_else(|| file.server.ws_url.clone()),
            connect_timeout: file
                .server
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: file
                .server
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            task_limit: file.server.task_limit.unwrap_or(defaults.task_limit),
            heartbeat_interval: file
                .sync
                .heartbeat_interval_secs
                .map_or(defaults.heartbeat_interval, Duration::from_secs),
            command_capacity: file
                .sync
                .command_capacity
                .unwrap_or(defaults.command_capacity),
            reconnect: ReconnectConfig {
                strategy: reconnect.strategy.unwrap_or(defaults.reconnect.strategy),
                interval: reconnect
                    .interval_secs
                    .map_or(defaults.reconnect.interval, Duration::from_secs),
                initial_delay: reconnect
                    .initial_delay_ms
                    .map_or(defaults.reconnect.initial_delay, Duration::from_millis),
                max_delay: reconnect
                    .max_delay_secs
                    .map_or(defaults.reconnect.max_delay, Duration::from_secs),
                jitter: reconnect.jitter.unwrap_or(defaults.reconnect.jitter),
            },
        }
    }

    /// The HTTP base URL, validated.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidUrl`] unless it is an `http(s)` URL.
    pub fn server_url(&self) -> Result<Url, ConfigError> {
        let url = parse_url("server url", &self.server_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                field: "server url",
                value: self.server_url.clone(),
                reason: "expected http or https".into(),
            });
        }
        Ok(url)
    }

    /// The WebSocket URL: the explicit setting, or `server_url` with the
    /// scheme switched to `ws`/`wss` and the path set to `/ws`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidUrl`] if either URL is malformed.
    pub fn ws_url(&self) -> Result<Url, ConfigError> {
        if let Some(explicit) = &self.ws_url {
            let url = parse_url("ws url", explicit)?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(ConfigError::InvalidUrl {
                    field: "ws url",
                    value: explicit.clone(),
                    reason: "expected ws or wss".into(),
                });
            }
            return Ok(url);
        }

        let mut url = self.server_url()?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| ConfigError::InvalidUrl {
                field: "server url",
                value: self.server_url.clone(),
                reason: format!("cannot switch scheme to {scheme}"),
            })?;
        url.set_path("/ws");
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }

    /// Build a [`SyncConfig`] from this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for malformed URLs, zero intervals, zero
    /// capacities, or jitter outside `[0, 1]`.
    pub fn to_sync_config(&self) -> Result<SyncConfig, ConfigError> {
        require_nonzero("heartbeat_interval_secs", self.heartbeat_interval)?;
        require_nonzero("connect_timeout_secs", self.connect_timeout)?;
        require_nonzero("request_timeout_secs", self.request_timeout)?;
        match self.reconnect.strategy {
            ReconnectStrategy::Fixed => {
                require_nonzero("reconnect.interval_secs", self.reconnect.interval)?;
            }
            ReconnectStrategy::Exponential => {
                require_nonzero("reconnect.initial_delay_ms", self.reconnect.initial_delay)?;
                require_nonzero("reconnect.max_delay_secs", self.reconnect.max_delay)?;
            }
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.jitter",
                reason: "must be between 0.0 and 1.0",
            });
        }
        if self.command_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "command_capacity",
                reason: "must be at least 1",
            });
        }
        if self.task_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "task_limit",
                reason: "must be at least 1",
            });
        }

        Ok(SyncConfig {
            server_url: self.server_url()?,
            ws_url: self.ws_url()?,
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            session: SessionOptions {
                heartbeat: HeartbeatPolicy::new(self.heartbeat_interval),
                reconnect: self.reconnect.policy(),
                task_limit: self.task_limit,
                command_capacity: self.command_capacity,
            },
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Live task-queue dashboard client")]
pub struct CliArgs {
    /// HTTP base URL of the task-queue server.
    #[arg(long, env = "TASKWATCH_SERVER_URL", global = true)]
    pub server_url: Option<String>,

    /// WebSocket URL (default: derived from the server URL, path `/ws`).
    #[arg(long, env = "TASKWATCH_WS_URL", global = true)]
    pub ws_url: Option<String>,

    /// Path to config file (default: `~/.config/taskwatch/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKWATCH_LOG", global = true)]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/taskwatch.log`).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// What to do (default: `watch`).
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands of the `taskwatch` binary.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Follow the live task stream. Type `refresh` or `quit` on stdin.
    Watch,
    /// Create a task.
    Create {
        /// Task name.
        #[arg(long)]
        name: String,
        /// Task type.
        #[arg(long, default_value = "email")]
        task_type: TaskType,
        /// Priority (1-10).
        #[arg(long, default_value_t = DEFAULT_PRIORITY)]
        priority: i32,
        /// Payload as a JSON object.
        #[arg(long, default_value = "")]
        payload: String,
    },
    /// Show one task.
    Get {
        /// Task identifier.
        task_id: String,
    },
    /// Print the current stats and task list once.
    List,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn require_nonzero(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "must be greater than zero",
        });
    }
    Ok(())
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("taskwatch").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
