//! Kubernetes data models and kubectl JSON response parsing.

use serde::{Deserialize, Serialize};

// ============================================================================
// Kubernetes Discovery Models
// ============================================================================

/// A kubeconfig context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KubeContext {
    pub name: String,
    pub cluster: String,
}

/// A Kubernetes namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KubernetesNamespace {
    pub name: String,
}

/// A port exposed by a Kubernetes service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub name: Option<String>,
    pub port: u16,
    pub target_port: u16,
    pub protocol: Option<String>,
}

impl ServicePort {
    /// Returns a display name for the port (e.g., "8080 (http)").
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => format!("{} ({})", self.port, name),
            _ => self.port.to_string(),
        }
    }
}

/// A Kubernetes service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesService {
    pub name: String,
    pub namespace: String,
    pub service_type: String,
    pub cluster_ip: Option<String>,
    pub ports: Vec<ServicePort>,
}

impl KubernetesService {
    /// Returns the service ID in the format "namespace/name".
    pub fn id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// A pod with its lifecycle phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubernetesPod {
    pub name: String,
    pub phase: Option<String>,
}

impl KubernetesPod {
    pub fn is_running(&self) -> bool {
        self.phase.as_deref() == Some("Running")
    }
}

// ============================================================================
// kubectl JSON Response Parsing
// ============================================================================

/// Response structure for `kubectl config view -o json`.
#[derive(Debug, Deserialize)]
pub struct KubeconfigView {
    #[serde(default)]
    pub contexts: Option<Vec<NamedContext>>,
}

#[derive(Debug, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: Option<ContextDetails>,
}

#[derive(Debug, Deserialize)]
pub struct ContextDetails {
    pub cluster: Option<String>,
}

impl KubeconfigView {
    /// Converts the kubectl response to a list of KubeContext.
    pub fn into_contexts(self) -> Vec<KubeContext> {
        self.contexts
            .unwrap_or_default()
            .into_iter()
            .map(|ctx| KubeContext {
                cluster: ctx
                    .context
                    .and_then(|details| details.cluster)
                    .unwrap_or_default(),
                name: ctx.name,
            })
            .collect()
    }
}

/// Response structure for `kubectl get namespaces -o json`.
#[derive(Debug, Deserialize)]
pub struct NamespaceListResponse {
    pub items: Vec<NamespaceItem>,
}

#[derive(Debug, Deserialize)]
pub struct NamespaceItem {
    pub metadata: NamespaceMetadata,
}

#[derive(Debug, Deserialize)]
pub struct NamespaceMetadata {
    pub name: String,
}

impl NamespaceListResponse {
    /// Converts the kubectl response to a list of KubernetesNamespace.
    pub fn into_namespaces(self) -> Vec<KubernetesNamespace> {
        self.items
            .into_iter()
            .map(|item| KubernetesNamespace {
                name: item.metadata.name,
            })
            .collect()
    }
}

/// Response structure for `kubectl get services -o json`.
#[derive(Debug, Deserialize)]
pub struct ServiceListResponse {
    pub items: Vec<ServiceItem>,
}

#[derive(Debug, Deserialize)]
pub struct ServiceItem {
    pub metadata: ServiceMetadata,
    pub spec: ServiceSpec,
}

#[derive(Debug, Deserialize)]
pub struct ServiceMetadata {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(rename = "type")]
    pub service_type: Option<String>,
    pub cluster_ip: Option<String>,
    pub ports: Option<Vec<ServicePortSpec>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePortSpec {
    pub name: Option<String>,
    pub port: u16,
    pub target_port: Option<TargetPort>,
    pub protocol: Option<String>,
}

/// Kubernetes targetPort can be either an integer or a string (named port).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TargetPort {
    Int(u16),
    String(String),
}

impl TargetPort {
    /// Returns the integer value if available.
    pub fn as_int(&self) -> Option<u16> {
        match self {
            TargetPort::Int(v) => Some(*v),
            TargetPort::String(_) => None,
        }
    }
}

impl ServiceListResponse {
    /// Converts the kubectl response to a list of KubernetesService.
    pub fn into_services(self) -> Vec<KubernetesService> {
        self.items
            .into_iter()
            .map(|item| KubernetesService {
                name: item.metadata.name,
                namespace: item.metadata.namespace,
                service_type: item
                    .spec
                    .service_type
                    .unwrap_or_else(|| "ClusterIP".to_string()),
                cluster_ip: item.spec.cluster_ip,
                ports: item
                    .spec
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .map(|p| ServicePort {
                        name: p.name,
                        port: p.port,
                        target_port: p.target_port.and_then(|tp| tp.as_int()).unwrap_or(p.port),
                        protocol: p.protocol,
                    })
                    .collect(),
            })
            .collect()
    }
}

/// Response structure for `kubectl get endpoints <service> -o json`.
///
/// Only `addresses` (ready endpoints) are kept; `notReadyAddresses` never
/// receive traffic.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ServiceEndpoints {
    #[serde(default)]
    pub subsets: Option<Vec<EndpointSubset>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointSubset {
    #[serde(default)]
    pub addresses: Option<Vec<EndpointAddress>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointAddress {
    pub ip: Option<String>,
    pub target_ref: Option<ObjectReference>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectReference {
    pub kind: Option<String>,
    pub name: Option<String>,
}

impl ServiceEndpoints {
    /// Target name of the first ready address.
    pub fn first_ready_target(&self) -> Option<&str> {
        self.subsets
            .iter()
            .flatten()
            .flat_map(|subset| subset.addresses.iter().flatten())
            .find_map(|address| address.target_ref.as_ref()?.name.as_deref())
    }
}

/// Response structure for `kubectl get pods -o json`.
#[derive(Debug, Deserialize)]
pub struct PodListResponse {
    pub items: Vec<PodItem>,
}

#[derive(Debug, Deserialize)]
pub struct PodItem {
    pub metadata: NamespaceMetadata,
    pub status: Option<PodStatus>,
}

#[derive(Debug, Deserialize)]
pub struct PodStatus {
    pub phase: Option<String>,
}

impl PodListResponse {
    /// Converts the kubectl response to a list of KubernetesPod.
    pub fn into_pods(self) -> Vec<KubernetesPod> {
        self.items
            .into_iter()
            .map(|item| KubernetesPod {
                name: item.metadata.name,
                phase: item.status.and_then(|s| s.phase),
            })
            .collect()
    }
}
