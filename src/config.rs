//! Configuration management for Toolmux
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from YAML files and environment variables. The file maps
//! server names to the command that launches each MCP server, plus the
//! client-side timeouts shared by every channel.

use crate::error::{Result, ToolmuxError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for Toolmux
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// MCP servers keyed by name. The name becomes the tool origin key.
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,

    /// Client timeouts and handshake settings
    #[serde(default)]
    pub client: ClientConfig,
}

/// How to launch one MCP server subprocess
///
/// The child inherits the parent environment; entries in `env` are added on
/// top, replacing inherited values with the same name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Executable to run (resolved through `PATH`)
    pub command: String,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides for the child
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory for the child
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl ServerConfig {
    /// Create a server entry with no arguments or environment overrides.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    /// Add command-line arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add one environment override.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Client-side protocol settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Timeout for each `tools/list` / `tools/call` request (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Timeout for the `initialize` handshake (seconds)
    #[serde(default = "default_init_timeout")]
    pub init_timeout_seconds: u64,

    /// Grace delay between spawning a server and sending `initialize` (ms)
    #[serde(default = "default_startup_delay")]
    pub startup_delay_ms: u64,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_init_timeout() -> u64 {
    30
}

fn default_startup_delay() -> u64 {
    1000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: default_request_timeout(),
            init_timeout_seconds: default_init_timeout(),
            startup_delay_ms: default_startup_delay(),
        }
    }
}

impl ClientConfig {
    /// Per-request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Handshake timeout as a [`Duration`].
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_seconds)
    }

    /// Startup grace delay as a [`Duration`].
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}

impl Config {
    /// Load configuration from file with environment overrides
    ///
    /// A missing file is not an error: defaults are used and a warning is
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            Self::default()
        };

        config.apply_env_vars();

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ToolmuxError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string
    ///
    /// # Errors
    ///
    /// Returns error if the YAML is malformed
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| ToolmuxError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(timeout) = std::env::var("TOOLMUX_REQUEST_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.client.request_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid TOOLMUX_REQUEST_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(timeout) = std::env::var("TOOLMUX_INIT_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.client.init_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid TOOLMUX_INIT_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(delay) = std::env::var("TOOLMUX_STARTUP_DELAY_MS") {
            if let Ok(value) = delay.parse() {
                self.client.startup_delay_ms = value;
            } else {
                tracing::warn!("Invalid TOOLMUX_STARTUP_DELAY_MS: {}", delay);
            }
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if a timeout is zero, a server has an empty command, or
    /// a server name has no characters usable in a tool name
    pub fn validate(&self) -> Result<()> {
        if self.client.request_timeout_seconds == 0 {
            return Err(ToolmuxError::Config(
                "client.request_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.client.init_timeout_seconds == 0 {
            return Err(ToolmuxError::Config(
                "client.init_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        for (name, server) in &self.servers {
            if server.command.trim().is_empty() {
                return Err(ToolmuxError::Config(format!(
                    "servers.{}.command cannot be empty",
                    name
                ))
                .into());
            }
            if crate::tools::naming::normalize_name(name).is_empty() {
                return Err(ToolmuxError::Config(format!(
                    "server name `{}` has no characters usable in a tool name",
                    name
                ))
                .into());
            }
        }

        Ok(())
    }
}
