//! Scoped kubeconfig context switching.

use std::future::Future;

use crate::error::Result;
use crate::ports::ClusterApi;

/// Runs `op` with `name` as the active kubeconfig context.
///
/// The previous context is restored on every path. When `op` succeeds but
/// the restore fails, the restore error is returned; when both fail, the
/// error from `op` wins and the restore failure is only logged.
pub async fn with_context<K, F, Fut, T>(cluster: &K, name: &str, op: F) -> Result<T>
where
    K: ClusterApi,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let previous = cluster.current_context().await?;
    if previous == name {
        return op().await;
    }

    cluster.set_context(name).await?;
    tracing::debug!(from = %previous, to = %name, "switched kubeconfig context");

    let result = op().await;

    match cluster.set_context(&previous).await {
        Ok(()) => result,
        Err(restore_err) => {
            tracing::warn!(
                context = %previous,
                error = %restore_err,
                "failed to restore kubeconfig context"
            );
            result.and(Err(restore_err))
        }
    }
}
