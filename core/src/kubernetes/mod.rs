//! Kubernetes module for port forwarding and service discovery.
//!
//! This module provides:
//! - Context, namespace, service, endpoint and pod discovery via kubectl
//! - Scoped kubeconfig context switching
//! - Pod resolution for a Service
//! - Supervision of `kubectl port-forward` subprocesses with retry and health checks
//! - A registry of live tunnels with an aggregate status stream

pub mod context;
pub mod discovery;
pub mod errors;
pub mod instance;
pub mod manager;
pub mod models;
pub mod pod_resolver;
pub mod process;

// Re-export commonly used types
pub use context::with_context;
pub use discovery::KubernetesDiscovery;
pub use errors::KubectlError;
pub use instance::PortForwardInstance;
pub use manager::{PortConflictDecision, PortForwardManager};
pub use models::{
    KubeContext, KubernetesNamespace, KubernetesPod, KubernetesService, ServiceEndpoints,
    ServicePort,
};
pub use pod_resolver::resolve_pod_name;
