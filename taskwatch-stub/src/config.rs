//! Configuration for the taskwatch stub server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskwatch-stub/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

use crate::worker::SimulationConfig;

/// Errors that can occur when loading stub configuration.
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

    /// A value is outside its accepted range.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Offending setting.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StubConfigFile {
    server: ServerFileConfig,
    simulation: SimulationFileConfig,
}

/// `[server]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
}

/// `[simulation]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SimulationFileConfig {
    enabled: Option<bool>,
    tick_ms: Option<u64>,
    failure_rate: Option<f64>,
    max_retries: Option<u32>,
}

/// CLI arguments for the stub server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "In-memory task-queue server for taskwatch")]
pub struct StubCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "TASKWATCH_STUB_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/taskwatch-stub/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Advance pending tasks through processing to a final state.
    #[arg(long)]
    pub simulate: bool,

    /// Milliseconds between simulation steps.
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Chance (0.0 to 1.0) that a processing task fails at a step.
    #[arg(long)]
    pub failure_rate: Option<f64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKWATCH_STUB_LOG")]
    pub log_level: String,
}

/// Fully resolved stub configuration.
#[derive(Debug, Clone)]
pub struct StubConfig {
    /// Address to bind the server to.
    pub bind_addr: String,
    /// Run the task simulation.
    pub simulate: bool,
    /// Simulation parameters.
    pub simulation: SimulationConfig,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            simulate: false,
            simulation: SimulationConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl StubConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read or
    /// parsed, or a simulation value is out of range.
    pub fn load(cli: &StubCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    fn resolve(cli: &StubCliArgs, file: &StubConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let sim = &file.simulation;

        let failure_rate = cli
            .failure_rate
            .or(sim.failure_rate)
            .unwrap_or(defaults.simulation.failure_rate);
        if !(0.0..=1.0).contains(&failure_rate) {
            return Err(ConfigError::InvalidValue {
                field: "failure_rate",
                reason: "must be between 0.0 and 1.0",
            });
        }
        let tick = cli
            .tick_ms
            .or(sim.tick_ms)
            .map_or(defaults.simulation.tick, Duration::from_millis);
        if tick.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "tick_ms",
                reason: "must be greater than zero",
            });
        }

        Ok(Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            simulate: cli.simulate || sim.enabled.unwrap_or(defaults.simulate),
            simulation: SimulationConfig {
                tick,
                failure_rate,
                max_retries: sim.max_retries.unwrap_or(defaults.simulation.max_retries),
            },
            log_level: cli.log_level.clone(),
        })
    }
}

fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<StubConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(StubConfigFile::default());
        };
        config_dir.join("taskwatch-stub").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StubConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
