//! Application configuration (`agentbridge.yaml`).
//!
//! One YAML file describes the model endpoint, the tool servers to launch,
//! and the engine limits. Every section has defaults, so an empty file is a
//! valid config with no tool servers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::agent_core::{EngineSettings, LocatorExtractor};
use crate::inference::config::{expand_tilde, interpolate_env_vars};
use crate::inference::ModelConfig;
use crate::mcp_client::transport::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use crate::mcp_client::{BridgeSettings, ServerConfig};

/// File name searched for when `AGENTBRIDGE_CONFIG` is unset.
pub const CONFIG_FILE_NAME: &str = "agentbridge.yaml";

/// Env var naming an explicit config path.
pub const CONFIG_ENV_VAR: &str = "AGENTBRIDGE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not find agentbridge.yaml (set AGENTBRIDGE_CONFIG or run from a project directory)")]
    NotFound,

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}

// ─── Sections ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    /// Tool servers to launch, keyed by server name (the tool namespace).
    #[serde(default)]
    pub servers: HashMap<String, ServerConfig>,
    #[serde(default)]
    pub bridge: BridgeSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub locator: LocatorSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeSection {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}
fn default_handshake_timeout_secs() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT.as_secs()
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_model_attempts")]
    pub max_model_attempts: u32,
    #[serde(default = "default_overload_backoff_secs")]
    pub overload_backoff_secs: u64,
    #[serde(default = "default_transient_retry_delay_secs")]
    pub transient_retry_delay_secs: u64,
    #[serde(default = "default_max_tool_result_chars")]
    pub max_tool_result_chars: usize,
}

fn default_max_iterations() -> u32 {
    20
}
fn default_max_model_attempts() -> u32 {
    3
}
fn default_overload_backoff_secs() -> u64 {
    2
}
fn default_transient_retry_delay_secs() -> u64 {
    1
}
fn default_max_tool_result_chars() -> usize {
    6_000
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_model_attempts: default_max_model_attempts(),
            overload_backoff_secs: default_overload_backoff_secs(),
            transient_retry_delay_secs: default_transient_retry_delay_secs(),
            max_tool_result_chars: default_max_tool_result_chars(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_idle_timeout_secs() -> u64 {
    30 * 60
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocatorSection {
    /// Tool-name prefixes stripped when deriving action labels.
    #[serde(default = "default_action_prefixes")]
    pub action_prefixes: Vec<String>,
}

fn default_action_prefixes() -> Vec<String> {
    vec!["browser_".into()]
}

impl Default for LocatorSection {
    fn default() -> Self {
        Self {
            action_prefixes: default_action_prefixes(),
        }
    }
}

// ─── Conversions ────────────────────────────────────────────────────────────

impl AppConfig {
    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            request_timeout: Duration::from_secs(self.bridge.request_timeout_secs),
            handshake_timeout: Duration::from_secs(self.bridge.handshake_timeout_secs),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_iterations: self.engine.max_iterations,
            max_model_attempts: self.engine.max_model_attempts,
            overload_backoff: Duration::from_secs(self.engine.overload_backoff_secs),
            transient_retry_delay: Duration::from_secs(self.engine.transient_retry_delay_secs),
            max_tool_result_chars: self.engine.max_tool_result_chars,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session.idle_timeout_secs)
    }

    pub fn locator_extractor(&self) -> LocatorExtractor {
        LocatorExtractor::new(self.locator.action_prefixes.clone())
    }

    /// Reject limits the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model.validate().map_err(|e| ConfigError::Invalid {
            reason: e.to_string(),
        })?;
        if self.engine.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                reason: "engine.max_iterations must be at least 1".into(),
            });
        }
        if self.engine.max_model_attempts == 0 {
            return Err(ConfigError::Invalid {
                reason: "engine.max_model_attempts must be at least 1".into(),
            });
        }
        if self.session.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                reason: "session.idle_timeout_secs must be positive".into(),
            });
        }
        if let Some((name, _)) = self.servers.iter().find(|(_, s)| s.command.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                reason: format!("server '{name}' has an empty command"),
            });
        }
        Ok(())
    }
}

// ─── Loading ────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// `AGENTBRIDGE_CONFIG` wins when set; otherwise searches upward from `start`
/// for `agentbridge.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, ConfigError> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.exists() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} points at a missing file");
    }
    search_upward(start)
}

fn search_upward(start: &Path) -> Result<PathBuf, ConfigError> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }
    Err(ConfigError::NotFound)
}

/// Read, interpolate, parse and validate a config file.
///
/// `${VAR}` and `${VAR:-default}` are resolved before parsing; server
/// commands and working directories get `~` expanded. Relative working
/// directories are resolved against the config file's directory.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = parse_config(&raw).map_err(|reason| ConfigError::Parse {
        path: path.to_path_buf(),
        reason,
    })?;

    let base = path.parent().unwrap_or(Path::new("."));
    for server in config.servers.values_mut() {
        server.command = expand_tilde(&server.command);
        if let Some(cwd) = server.cwd.take() {
            let cwd = PathBuf::from(expand_tilde(&cwd));
            let cwd = if cwd.is_relative() { base.join(cwd) } else { cwd };
            server.cwd = Some(cwd.to_string_lossy().into_owned());
        }
    }

    config.validate()?;
    tracing::info!(
        path = %path.display(),
        servers = config.servers.len(),
        model = %config.model.model_name,
        "configuration loaded"
    );
    Ok(config)
}

fn parse_config(raw: &str) -> Result<AppConfig, String> {
    let interpolated = interpolate_env_vars(raw);
    if interpolated.trim().is_empty() {
        return Ok(AppConfig::default());
    }
    serde_yaml::from_str(&interpolated).map_err(|e| e.to_string())
}

// ─── Tests ──────────────────────────────────────────────────────────────────
