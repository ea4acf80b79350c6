//! Engine configuration: retry/health timings and kubectl invocation.
//!
//! Stored in JSON format at `~/.kubetunnel/config.json`. Every field has a
//! default, so a missing file or a partial one is always usable.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// Exponential backoff applied between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Consecutive errors tolerated before a tunnel is marked failed.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay to use after `current`: doubled, capped at `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay())
    }
}

/// Periodic TCP probe of the local end of an active tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthCheckPolicy {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for HealthCheckPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            timeout_ms: 2_000,
        }
    }
}

impl HealthCheckPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration data stored in JSON format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Explicit kubectl binary; discovered when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubectl_path: Option<PathBuf>,

    /// Arguments placed before every kubectl subcommand, for wrappers such as
    /// `minikube kubectl --`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kubectl_args: Vec<String>,

    /// How long a fresh subprocess may take to report "Forwarding from".
    pub connect_timeout_ms: u64,

    pub retry: RetryPolicy,

    pub health_check: HealthCheckPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kubectl_path: None,
            kubectl_args: Vec::new(),
            connect_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
            health_check: HealthCheckPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Resolves the settings handed to every tunnel instance.
    pub fn forward_settings(&self, kubectl: PathBuf) -> ForwardSettings {
        ForwardSettings {
            kubectl,
            kubectl_args: self.kubectl_args.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            retry: self.retry.clone(),
            health_check: self.health_check.clone(),
        }
    }
}

/// Immutable settings shared by every tunnel of one manager.
#[derive(Debug, Clone)]
pub struct ForwardSettings {
    pub kubectl: PathBuf,
    pub kubectl_args: Vec<String>,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    pub health_check: HealthCheckPolicy,
}

/// Reads and writes [`EngineConfig`] on disk.
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    /// Create a new config store with the default path.
    ///
    /// Default path: `~/.kubetunnel/config.json`
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

        Ok(Self {
            config_path: home.join(".kubetunnel").join("config.json"),
        })
    }

    /// Create a config store with a custom path.
    pub fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Load configuration from disk.
    ///
    /// Returns default config if the file doesn't exist.
    pub async fn load(&self) -> Result<EngineConfig> {
        if !self.config_path.exists() {
            return Ok(EngineConfig::default());
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to disk, creating the directory if needed.
    pub async fn save(&self, config: &EngineConfig) -> Result<()> {
        if let Some(config_dir) = self.config_path.parent() {
            fs::create_dir_all(config_dir)
                .await
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let content = serde_json::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        // Write atomically by writing to temp file then renaming
        let temp_path = self.config_path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to create temp config file: {}", e)))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        file.sync_all()
            .await
            .map_err(|e| Error::Config(format!("Failed to sync config: {}", e)))?;

        fs::rename(&temp_path, &self.config_path)
            .await
            .map_err(|e| Error::Config(format!("Failed to rename config file: {}", e)))?;

        Ok(())
    }
}
