//! Cluster context provider port (interface).

use crate::error::Result;
use crate::kubernetes::models::{
    KubeContext, KubernetesNamespace, KubernetesPod, KubernetesService, ServiceEndpoints,
};

/// Port for read access to clusters named in the local kubeconfig.
///
/// Namespace and service listings run against the *current* context; callers
/// that need another one wrap them in [`crate::kubernetes::with_context`].
/// Endpoint and pod lookups name their context explicitly.
pub trait ClusterApi: Send + Sync + 'static {
    /// Enumerate every context in the kubeconfig.
    fn list_contexts(&self) -> impl std::future::Future<Output = Result<Vec<KubeContext>>> + Send;

    /// Name of the active context.
    fn current_context(&self) -> impl std::future::Future<Output = Result<String>> + Send;

    /// Make `name` the active context.
    fn set_context(&self, name: &str) -> impl std::future::Future<Output = Result<()>> + Send;

    fn list_namespaces(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<KubernetesNamespace>>> + Send;

    fn list_services(
        &self,
        namespace: &str,
    ) -> impl std::future::Future<Output = Result<Vec<KubernetesService>>> + Send;

    /// Live Endpoints object backing a Service.
    fn get_endpoints(
        &self,
        context: &str,
        namespace: &str,
        service: &str,
    ) -> impl std::future::Future<Output = Result<ServiceEndpoints>> + Send;

    fn list_pods(
        &self,
        context: &str,
        namespace: &str,
    ) -> impl std::future::Future<Output = Result<Vec<KubernetesPod>>> + Send;
}
