//! Registry of live tunnels keyed by identity.
//!
//! Provides the operations a presentation layer needs: start/stop/restart,
//! status queries, an aggregate update stream, port-conflict resolution, and
//! context-scoped discovery.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};

use super::context::with_context;
use super::instance::PortForwardInstance;
use super::models::{KubeContext, KubernetesNamespace, KubernetesService};
use crate::config::ForwardSettings;
use crate::domain::{TunnelConfig, TunnelIdentity, TunnelStatus};
use crate::error::{Error, Result};
use crate::ports::{ClusterApi, PortConflictResolver};

/// Capacity of the aggregate update channel.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Time for the OS to release a port after its owner is killed.
const PORT_RELEASE_DELAY: Duration = Duration::from_millis(500);

/// Outcome of the operator's decision about an occupied local port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortConflictDecision {
    /// Kill the owning process, then start the tunnel again.
    KillAndRetry,
    /// Abandon the start attempt.
    Cancel,
}

/// Manages port forward tunnels.
pub struct PortForwardManager<K, P> {
    cluster: Arc<K>,
    resolver: Arc<P>,
    settings: ForwardSettings,

    /// Live instances by identity.
    forwards: RwLock<HashMap<TunnelIdentity, PortForwardInstance<K, P>>>,

    /// Aggregate status updates.
    updates: broadcast::Sender<TunnelStatus>,
}

impl<K, P> PortForwardManager<K, P>
where
    K: ClusterApi,
    P: PortConflictResolver,
{
    /// Creates a new manager.
    pub fn new(cluster: K, resolver: P, settings: ForwardSettings) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            cluster: Arc::new(cluster),
            resolver: Arc::new(resolver),
            settings,
            forwards: RwLock::new(HashMap::new()),
            updates,
        }
    }

    pub fn cluster(&self) -> &K {
        &self.cluster
    }

    pub fn resolver(&self) -> &P {
        &self.resolver
    }

    /// Receives every status change of every tunnel from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TunnelStatus> {
        self.updates.subscribe()
    }

    // =========================================================================
    // Tunnel Lifecycle
    // =========================================================================

    /// Registers and starts a tunnel.
    ///
    /// Fails with [`Error::AlreadyExists`] when the identity is live and with
    /// [`Error::PortInUse`] when another process owns the local port. A failed
    /// start leaves nothing registered.
    pub async fn start_port_forward(&self, config: TunnelConfig) -> Result<TunnelStatus> {
        config.validate()?;
        let id = config.identity();

        let instance = {
            let mut forwards = self.forwards.write();
            if forwards.contains_key(&id) {
                return Err(Error::AlreadyExists(id.to_string()));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let instance = PortForwardInstance::new(
                config,
                self.settings.clone(),
                Arc::clone(&self.cluster),
                Arc::clone(&self.resolver),
                tx,
            );
            self.spawn_relay(rx);
            forwards.insert(id.clone(), instance.clone());
            instance
        };

        tracing::info!(id = %id, "starting port forward");

        if let Err(e) = instance.start().await {
            instance.stop();
            self.unregister(&id, &instance);
            return Err(e);
        }

        Ok(instance.status())
    }

    /// Stops and unregisters a tunnel. Returns false for an unknown identity.
    pub fn stop_port_forward(&self, id: &TunnelIdentity) -> bool {
        let removed = self.forwards.write().remove(id);
        match removed {
            Some(instance) => {
                instance.stop();
                true
            }
            None => false,
        }
    }

    /// Stop-then-start with the same configuration; resets the retry count.
    pub async fn restart_port_forward(&self, id: &TunnelIdentity) -> Result<TunnelStatus> {
        let config = self
            .forwards
            .read()
            .get(id)
            .map(|instance| instance.config().clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        self.stop_port_forward(id);
        self.start_port_forward(config).await
    }

    /// Stops every tunnel and clears the registry.
    pub fn stop_all(&self) {
        let drained: Vec<_> = self.forwards.write().drain().collect();
        for (_, instance) in drained {
            instance.stop();
        }
    }

    pub fn get_forward(&self, id: &TunnelIdentity) -> Option<TunnelStatus> {
        self.forwards.read().get(id).map(|instance| instance.status())
    }

    /// Snapshots of all registered tunnels, ordered by identity.
    pub fn get_active_forwards(&self) -> Vec<TunnelStatus> {
        let mut statuses: Vec<_> = self
            .forwards
            .read()
            .values()
            .map(|instance| instance.status())
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    // =========================================================================
    // Port Conflicts
    // =========================================================================

    /// Applies the operator's answer to a [`Error::PortInUse`] start failure.
    ///
    /// `Cancel` does nothing and returns `None`. `KillAndRetry` kills whatever
    /// owns the local port now, then starts the tunnel.
    pub async fn respond_to_port_conflict(
        &self,
        config: TunnelConfig,
        decision: PortConflictDecision,
    ) -> Result<Option<TunnelStatus>> {
        match decision {
            PortConflictDecision::Cancel => {
                tracing::info!(id = %config.identity(), "port conflict: start cancelled");
                Ok(None)
            }
            PortConflictDecision::KillAndRetry => {
                config.validate()?;
                if let Some(owner) = self
                    .resolver
                    .get_process_using_port(config.local_port)
                    .await?
                {
                    tracing::warn!(
                        pid = owner.pid,
                        process = %owner.process_name,
                        port = config.local_port,
                        "killing process holding local port"
                    );
                    self.resolver.kill_process(owner.pid).await?;
                    tokio::time::sleep(PORT_RELEASE_DELAY).await;
                }
                self.start_port_forward(config).await.map(Some)
            }
        }
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    pub async fn list_contexts(&self) -> Result<Vec<KubeContext>> {
        self.cluster.list_contexts().await
    }

    /// Lists namespaces of `context` without changing the active context.
    pub async fn list_namespaces(&self, context: &str) -> Result<Vec<KubernetesNamespace>> {
        let cluster = self.cluster.as_ref();
        with_context(cluster, context, || cluster.list_namespaces()).await
    }

    /// Lists services of `context`/`namespace` without changing the active context.
    pub async fn list_services(
        &self,
        context: &str,
        namespace: &str,
    ) -> Result<Vec<KubernetesService>> {
        let cluster = self.cluster.as_ref();
        with_context(cluster, context, || cluster.list_services(namespace)).await
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    /// Forwards one instance's events to the aggregate channel until it is dropped.
    fn spawn_relay(&self, mut rx: mpsc::UnboundedReceiver<TunnelStatus>) {
        let updates = self.updates.clone();
        tokio::spawn(async move {
            while let Some(status) = rx.recv().await {
                // No subscribers is fine
                let _ = updates.send(status);
            }
        });
    }

    /// Removes `id` only while it still maps to `instance`.
    fn unregister(&self, id: &TunnelIdentity, instance: &PortForwardInstance<K, P>) {
        let mut forwards = self.forwards.write();
        if forwards
            .get(id)
            .is_some_and(|current| current.same_instance(instance))
        {
            forwards.remove(id);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::TunnelState;
    use crate::testing::{fast_settings, write_script, FakeCluster, FakeResolver};
    use std::path::Path;
    use tempfile::tempdir;

    type TestManager = PortForwardManager<FakeCluster, FakeResolver>;

    fn manager(script: &Path) -> TestManager {
        manager_with(script, FakeResolver::new())
    }

    fn manager_with(script: &Path, resolver: FakeResolver) -> TestManager {
        let cluster = FakeCluster::new("c1").with_pod("svc-pod", "Running");
        PortForwardManager::new(cluster, resolver, fast_settings(script))
    }

    fn sample_config() -> TunnelConfig {
        TunnelConfig::new("c1", "default", "svc", 80, 8080)
    }

    async fn collect_until_terminal(
        rx: &mut broadcast::Receiver<TunnelStatus>,
    ) -> Vec<TunnelStatus> {
        tokio::time::timeout(Duration::from_secs(10), async {
            let mut seen = Vec::new();
            loop {
                let status = rx.recv().await.unwrap();
                let done = status.state.is_terminal();
                seen.push(status);
                if done {
                    return seen;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_returns_connecting_status() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "kubectl.sh", "sleep 5");
        let manager = manager(&script);

        let status = manager.start_port_forward(sample_config()).await.unwrap();

        assert_eq!(status.id.as_str(), "c1-default-svc-80-8080");
        assert_eq!(status.state, TunnelState::Connecting);
        assert_eq!(status.retry_count, 0);
        assert_eq!(manager.get_active_forwards().len(), 1);
        manager.stop_all();
    }

    #[tokio::test]
    async fn test_consecutive_failures_end_in_failed() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "kubectl.sh", "exit 1");
        let manager = manager(&script);
        let mut rx = manager.subscribe();

        manager.start_port_forward(sample_config()).await.unwrap();
        let seen = collect_until_terminal(&mut rx).await;

        let reconnecting: Vec<_> = seen
            .iter()
            .filter(|s| s.state == TunnelState::Reconnecting)
            .map(|s| s.retry_count)
            .collect();
        assert_eq!(reconnecting, vec![1, 2, 3, 4]);

        let last = seen.last().unwrap();
        assert_eq!(last.state, TunnelState::Failed);
        assert_eq!(last.retry_count, 5);
        assert_eq!(last.error.as_deref(), Some("kubectl exited with code 1"));
        assert!(last.next_retry_at.is_none());

        // Failed tunnels stay registered until stopped
        let id = sample_config().identity();
        assert_eq!(manager.get_forward(&id).unwrap().state, TunnelState::Failed);
        assert!(manager.stop_port_forward(&id));
    }

    #[tokio::test]
    async fn test_success_resets_retry_count() {
        let dir = tempdir().unwrap();
        let counter = dir.path().join("attempts");
        let script = write_script(
            dir.path(),
            "kubectl.sh",
            &format!(
                "echo x >> {counter}\nif [ $(wc -l < {counter}) -lt 3 ]; then exit 1; fi\necho 'Forwarding from 127.0.0.1:8080 -> 80'\nsleep 5",
                counter = counter.display()
            ),
        );
        let manager = manager(&script);
        let mut rx = manager.subscribe();

        manager.start_port_forward(sample_config()).await.unwrap();

        let active = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let status = rx.recv().await.unwrap();
                if status.state == TunnelState::Active {
                    return status;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(active.retry_count, 0);
        assert_eq!(active.error, None);
        manager.stop_all();
    }

    #[tokio::test]
    async fn test_health_check_failure_reconnects() {
        let dir = tempdir().unwrap();
        // Reports forwarding but never listens on the port
        let script = write_script(
            dir.path(),
            "kubectl.sh",
            "echo 'Forwarding from 127.0.0.1:1 -> 80'\nsleep 5",
        );
        let mut settings = fast_settings(&script);
        settings.health_check.interval_ms = 50;
        let manager = PortForwardManager::new(
            FakeCluster::new("c1").with_pod("svc-pod", "Running"),
            FakeResolver::new(),
            settings,
        );
        let mut rx = manager.subscribe();

        manager
            .start_port_forward(TunnelConfig::new("c1", "default", "svc", 80, 1))
            .await
            .unwrap();

        let mut states = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let status = rx.recv().await.unwrap();
                states.push(status.state);
                if status.state == TunnelState::Reconnecting {
                    assert!(status.error.unwrap().contains("Health check"));
                    return;
                }
            }
        })
        .await
        .unwrap();

        assert!(states.contains(&TunnelState::Active));
        manager.stop_all();
    }

    #[tokio::test]
    async fn test_duplicate_identity_rejected() {
        let dir = tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "kubectl.sh",
            "echo 'Forwarding from 127.0.0.1:8080 -> 80'\nsleep 5",
        );
        let manager = manager(&script);
        let mut rx = manager.subscribe();
        let id = sample_config().identity();

        manager.start_port_forward(sample_config()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while rx.recv().await.unwrap().state != TunnelState::Active {}
        })
        .await
        .unwrap();
        let before = manager.get_forward(&id).unwrap();

        let err = manager.start_port_forward(sample_config()).await.unwrap_err();

        assert!(matches!(err, Error::AlreadyExists(ref id) if id == "c1-default-svc-80-8080"));
        assert_eq!(manager.get_active_forwards().len(), 1);
        let after = manager.get_forward(&id).unwrap();
        assert_eq!(after.state, TunnelState::Active);
        assert_eq!(after.state, before.state);
        assert_eq!(after.retry_count, before.retry_count);
        manager.stop_all();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "kubectl.sh", "sleep 5");
        let manager = manager(&script);

        let result = manager
            .start_port_forward(TunnelConfig::new("c1", "default", "svc", 80, 0))
            .await;

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        assert!(manager.get_active_forwards().is_empty());
    }

    #[tokio::test]
    async fn test_port_conflict_leaves_no_entry() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "kubectl.sh", "sleep 5");
        let manager = manager_with(&script, FakeResolver::new().occupied(8080, 4242, "node"));

        let err = manager.start_port_forward(sample_config()).await.unwrap_err();

        assert_eq!(err.port_conflict().map(|p| p.pid), Some(4242));
        assert!(manager.get_active_forwards().is_empty());
    }

    #[tokio::test]
    async fn test_kill_and_retry() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "kubectl.sh", "sleep 5");
        let manager = manager_with(&script, FakeResolver::new().occupied(8080, 4242, "node"));

        assert!(manager.start_port_forward(sample_config()).await.is_err());
        let status = manager
            .respond_to_port_conflict(sample_config(), PortConflictDecision::KillAndRetry)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(status.state, TunnelState::Connecting);
        assert_eq!(manager.resolver().killed(), vec![4242]);
        manager.stop_all();
    }

    #[tokio::test]
    async fn test_cancel_conflict() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "kubectl.sh", "sleep 5");
        let manager = manager_with(&script, FakeResolver::new().occupied(8080, 4242, "node"));

        let result = manager
            .respond_to_port_conflict(sample_config(), PortConflictDecision::Cancel)
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(manager.resolver().killed().is_empty());
        assert!(manager.get_active_forwards().is_empty());
    }

    #[tokio::test]
    async fn test_stop_unknown_and_stop_all() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "kubectl.sh", "sleep 5");
        let manager = manager(&script);

        assert!(!manager.stop_port_forward(&sample_config().identity()));

        manager.start_port_forward(sample_config()).await.unwrap();
        manager
            .start_port_forward(TunnelConfig::new("c1", "default", "svc", 80, 8081))
            .await
            .unwrap();
        assert_eq!(manager.get_active_forwards().len(), 2);
        let mut rx = manager.subscribe();

        manager.stop_all();
        assert!(manager.get_active_forwards().is_empty());

        let mut last_states = HashMap::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while last_states.len() < 2
                || last_states.values().any(|state| *state != TunnelState::Stopped)
            {
                let status = rx.recv().await.unwrap();
                last_states.insert(status.id, status.state);
            }
        })
        .await
        .unwrap();
        assert!(last_states.values().all(|state| *state == TunnelState::Stopped));
    }

    #[tokio::test]
    async fn test_restart_resets_count() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "kubectl.sh", "exit 1");
        let manager = manager(&script);
        let mut rx = manager.subscribe();
        let id = sample_config().identity();

        manager.start_port_forward(sample_config()).await.unwrap();
        collect_until_terminal(&mut rx).await;

        let status = manager.restart_port_forward(&id).await.unwrap();
        assert_eq!(status.retry_count, 0);
        assert_eq!(status.state, TunnelState::Connecting);
        manager.stop_all();
    }

    #[tokio::test]
    async fn test_scoped_discovery_restores_context() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "kubectl.sh", "sleep 5");
        let manager = manager(&script);

        let namespaces = manager.list_namespaces("c2").await.unwrap();

        assert_eq!(namespaces[0].name, "default");
        assert_eq!(manager.cluster().switches(), vec!["c2", "c1"]);
    }
}
