//! Tunnel configuration, identity, and status snapshots.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What the caller asks to forward: one Service port to one local port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelConfig {
    /// Kubeconfig context the tunnel runs against.
    pub cluster: String,
    pub namespace: String,
    pub service: String,
    pub service_port: u16,
    pub local_port: u16,
}

impl TunnelConfig {
    pub fn new(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        service: impl Into<String>,
        service_port: u16,
        local_port: u16,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            namespace: namespace.into(),
            service: service.into(),
            service_port,
            local_port,
        }
    }

    /// Checks that every field is present and both ports are in [1, 65535].
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("cluster", &self.cluster),
            ("namespace", &self.namespace),
            ("service", &self.service),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("{} must not be empty", field)));
            }
        }
        if self.service_port == 0 {
            return Err(Error::InvalidConfig(
                "servicePort must be between 1 and 65535".to_string(),
            ));
        }
        if self.local_port == 0 {
            return Err(Error::InvalidConfig(
                "localPort must be between 1 and 65535".to_string(),
            ));
        }
        Ok(())
    }

    /// Derives the identity key for this configuration.
    pub fn identity(&self) -> TunnelIdentity {
        TunnelIdentity::from(self)
    }
}

/// Stable key `{cluster}-{namespace}-{service}-{servicePort}-{localPort}`.
///
/// At most one live tunnel exists per identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TunnelIdentity(String);

impl TunnelIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&TunnelConfig> for TunnelIdentity {
    fn from(config: &TunnelConfig) -> Self {
        Self(format!(
            "{}-{}-{}-{}-{}",
            config.cluster, config.namespace, config.service, config.service_port, config.local_port
        ))
    }
}

impl fmt::Display for TunnelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TunnelIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelState {
    #[default]
    Connecting,
    Active,
    Reconnecting,
    Failed,
    Stopped,
}

impl TunnelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    /// Whether no automatic transition will leave this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of one tunnel, as published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatus {
    pub id: TunnelIdentity,
    #[serde(flatten)]
    pub config: TunnelConfig,
    pub state: TunnelState,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Present only while a retry timer is pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
}
