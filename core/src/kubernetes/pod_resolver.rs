//! Picks the pod a tunnel should forward to.

use crate::domain::TunnelConfig;
use crate::ports::ClusterApi;

/// Resolves a concrete pod behind `config.service`.
///
/// The first ready endpoint wins. When the endpoints lookup fails or has no
/// ready address, the first `Running` pod in the namespace is used instead.
/// Returns `None` when neither source yields a pod.
pub async fn resolve_pod_name<K: ClusterApi>(cluster: &K, config: &TunnelConfig) -> Option<String> {
    match cluster
        .get_endpoints(&config.cluster, &config.namespace, &config.service)
        .await
    {
        Ok(endpoints) => {
            if let Some(pod) = endpoints.first_ready_target() {
                return Some(pod.to_string());
            }
            tracing::debug!(service = %config.service, "no ready endpoints, falling back to pods");
        }
        Err(e) => {
            tracing::debug!(service = %config.service, error = %e, "endpoints lookup failed");
        }
    }

    match cluster.list_pods(&config.cluster, &config.namespace).await {
        Ok(pods) => pods.into_iter().find(|pod| pod.is_running()).map(|pod| pod.name),
        Err(e) => {
            tracing::warn!(namespace = %config.namespace, error = %e, "pod lookup failed");
            None
        }
    }
}
