//! KubeTunnel Core Library
//!
//! Supervision engine for `kubectl port-forward` tunnels.
//! Provides functionality to:
//! - Start, stop and restart tunnels keyed by a stable identity
//! - Reconnect failed tunnels with exponential backoff
//! - Health-check active tunnels over TCP
//! - Detect and resolve local port conflicts
//! - Discover contexts, namespaces and services through kubectl
//!
//! # Architecture
//! This library follows hexagonal architecture (ports & adapters):
//! - `domain`: Tunnel configuration, identity and status models
//! - `ports`: Trait definitions (interfaces)
//! - `adapters`: Host OS implementations
//! - `kubernetes`: kubectl-backed discovery and the supervision engine
//!
//! # Platform Support
//! - macOS / Linux: Uses `lsof` and `ps` to find port owners
//! - Windows: Uses `netstat` and `tasklist`

// Hexagonal architecture layers
pub mod domain;
pub mod ports;
pub mod adapters;

pub mod config;
pub mod error;
pub mod kubernetes;

#[cfg(test)]
mod testing;

// Re-export domain types (primary API)
pub use domain::{ProcessInfo, TunnelConfig, TunnelIdentity, TunnelState, TunnelStatus};

// Re-export other commonly used types
pub use adapters::{SystemCommandRunner, SystemPortResolver};
pub use config::{ConfigStore, EngineConfig, ForwardSettings};
pub use error::{Error, Result};
pub use kubernetes::{KubernetesDiscovery, PortConflictDecision, PortForwardManager};
pub use ports::{ClusterApi, PortConflictResolver};
