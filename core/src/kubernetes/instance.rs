//! State machine and supervisor for a single tunnel.
//!
//! An instance owns at most one kubectl subprocess plus three timers: the
//! connection-establishment timeout, the retry backoff, and the health-check
//! interval. Every attempt gets a generation number; callbacks from an older
//! attempt are ignored, so a late exit or stderr line never affects the next
//! subprocess.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant};

use super::pod_resolver::resolve_pod_name;
use super::process::{
    describe_exit, detect_port_conflict, is_error_line, is_forwarding_line, ForwardProcess,
    ProcessEvent,
};
use crate::config::ForwardSettings;
use crate::domain::{TunnelConfig, TunnelIdentity, TunnelState, TunnelStatus};
use crate::error::{Error, Result};
use crate::ports::{ClusterApi, PortConflictResolver};

/// One supervised `kubectl port-forward` tunnel.
///
/// Cloning yields another handle to the same tunnel.
pub struct PortForwardInstance<K, P> {
    inner: Arc<Inner<K, P>>,
}

impl<K, P> Clone for PortForwardInstance<K, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<K, P> {
    id: TunnelIdentity,
    config: TunnelConfig,
    settings: ForwardSettings,
    cluster: Arc<K>,
    resolver: Arc<P>,
    events: mpsc::UnboundedSender<TunnelStatus>,
    shared: Mutex<Shared>,
}

struct Shared {
    state: TunnelState,
    retry_count: u32,
    retry_delay: Duration,
    error: Option<String>,
    next_retry_at: Option<DateTime<Utc>>,
    generation: u64,
    connect_timeout: Option<JoinHandle<()>>,
    retry_timer: Option<JoinHandle<()>>,
    health_check: Option<JoinHandle<()>>,
    process: Option<ForwardProcess>,
    /// First pod a lookup returned.
    pod: Option<String>,
}

impl Shared {
    /// Cancels every timer and terminates the subprocess.
    fn teardown(&mut self) {
        for handle in [
            self.connect_timeout.take(),
            self.retry_timer.take(),
            self.health_check.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
        if let Some(process) = self.process.take() {
            tracing::debug!(pid = ?process.pid(), "terminating kubectl");
            process.terminate();
        }
    }
}

impl<K, P> PortForwardInstance<K, P> {
    /// Creates an idle instance in `Connecting` state.
    ///
    /// Every status change is sent on `events`, in order.
    pub fn new(
        config: TunnelConfig,
        settings: ForwardSettings,
        cluster: Arc<K>,
        resolver: Arc<P>,
        events: mpsc::UnboundedSender<TunnelStatus>,
    ) -> Self {
        let retry_delay = settings.retry.initial_delay();
        Self {
            inner: Arc::new(Inner {
                id: config.identity(),
                config,
                settings,
                cluster,
                resolver,
                events,
                shared: Mutex::new(Shared {
                    state: TunnelState::Connecting,
                    retry_count: 0,
                    retry_delay,
                    error: None,
                    next_retry_at: None,
                    generation: 0,
                    connect_timeout: None,
                    retry_timer: None,
                    health_check: None,
                    process: None,
                    pod: None,
                }),
            }),
        }
    }

    pub fn id(&self) -> &TunnelIdentity {
        &self.inner.id
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.inner.config
    }

    pub fn state(&self) -> TunnelState {
        self.inner.shared.lock().state
    }

    pub fn status(&self) -> TunnelStatus {
        self.inner.snapshot(&self.inner.shared.lock())
    }

    /// Stops the tunnel. Safe to call any number of times.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Whether both handles refer to the same tunnel.
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<K, P> PortForwardInstance<K, P>
where
    K: ClusterApi,
    P: PortConflictResolver,
{
    /// Resolves the pod, checks the local port, and spawns kubectl.
    ///
    /// No-op once stopped. Runtime failures turn into state transitions; the
    /// only error returned is [`Error::PortInUse`], after which the instance
    /// is stopped and waits for an external decision.
    pub async fn start(&self) -> Result<()> {
        self.inner.connect(true).await
    }
}

impl<K, P> Inner<K, P> {
    fn snapshot(&self, shared: &Shared) -> TunnelStatus {
        TunnelStatus {
            id: self.id.clone(),
            config: self.config.clone(),
            state: shared.state,
            retry_count: shared.retry_count,
            error: shared.error.clone(),
            next_retry_at: shared.next_retry_at,
        }
    }

    /// Sent while the lock is held so observers see transitions in order.
    fn emit(&self, shared: &Shared) {
        let _ = self.events.send(self.snapshot(shared));
    }

    fn is_current(&self, generation: u64) -> bool {
        let shared = self.shared.lock();
        shared.generation == generation && shared.state == TunnelState::Connecting
    }

    fn stop(&self) {
        let mut shared = self.shared.lock();
        if shared.state == TunnelState::Stopped {
            return;
        }
        shared.teardown();
        shared.generation += 1;
        shared.state = TunnelState::Stopped;
        shared.next_retry_at = None;

        tracing::info!(id = %self.id, "port forward stopped");
        self.emit(&shared);
    }
}

impl<K, P> Inner<K, P>
where
    K: ClusterApi,
    P: PortConflictResolver,
{
    async fn connect(self: &Arc<Self>, first_attempt: bool) -> Result<()> {
        let generation = {
            let mut shared = self.shared.lock();
            if shared.state == TunnelState::Stopped {
                return Ok(());
            }
            shared.teardown();
            shared.generation += 1;
            shared.state = TunnelState::Connecting;
            shared.next_retry_at = None;
            shared.connect_timeout = Some(self.spawn_connect_timeout(shared.generation));
            tracing::debug!(id = %self.id, retry_count = shared.retry_count, "connecting");
            self.emit(&shared);
            shared.generation
        };

        if first_attempt {
            self.check_local_port(generation).await?;
        }

        let Some(pod) = self.pod_name().await else {
            self.handle_error(
                generation,
                format!(
                    "No running pod found for service {}/{}",
                    self.config.namespace, self.config.service
                ),
            );
            return Ok(());
        };

        self.spawn_process(generation, &pod);
        Ok(())
    }

    /// Fails with [`Error::PortInUse`] and stops the instance if another
    /// process owns the local port. A failed lookup counts as a free port.
    async fn check_local_port(&self, generation: u64) -> Result<()> {
        let owner = self
            .resolver
            .get_process_using_port(self.config.local_port)
            .await;
        match owner {
            Ok(Some(_)) if !self.is_current(generation) => Ok(()),
            Ok(Some(process)) => {
                let error = Error::PortInUse {
                    port: self.config.local_port,
                    process,
                };
                tracing::warn!(id = %self.id, error = %error, "local port is occupied");
                self.shared.lock().error = Some(error.to_string());
                self.stop();
                Err(error)
            }
            Ok(None) => Ok(()),
            Err(e) => {
                tracing::warn!(id = %self.id, error = %e, "port owner lookup failed");
                Ok(())
            }
        }
    }

    /// Looked up once; later attempts reuse the first pod found.
    async fn pod_name(&self) -> Option<String> {
        if let Some(pod) = self.shared.lock().pod.clone() {
            return Some(pod);
        }
        let pod = resolve_pod_name(self.cluster.as_ref(), &self.config).await?;
        self.shared.lock().pod = Some(pod.clone());
        Some(pod)
    }

    fn spawn_process(self: &Arc<Self>, generation: u64, pod: &str) {
        let mut shared = self.shared.lock();
        if shared.generation != generation || shared.state != TunnelState::Connecting {
            return;
        }

        let weak = Arc::downgrade(self);
        let spawned = ForwardProcess::spawn(&self.settings, pod, &self.config, move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_process_event(generation, event);
            }
        });

        match spawned {
            Ok(process) => {
                tracing::info!(id = %self.id, pod = %pod, pid = ?process.pid(), "kubectl port-forward started");
                shared.process = Some(process);
            }
            Err(e) => {
                drop(shared);
                self.handle_error(generation, e.to_string());
            }
        }
    }

    fn on_process_event(self: &Arc<Self>, generation: u64, event: ProcessEvent) {
        match event {
            ProcessEvent::Stdout(line) => {
                tracing::debug!(id = %self.id, line = %line, "kubectl stdout");
                if is_forwarding_line(&line) {
                    self.mark_active(generation);
                }
            }
            ProcessEvent::Stderr(line) => {
                if !is_error_line(&line) {
                    tracing::debug!(id = %self.id, line = %line, "kubectl stderr");
                    return;
                }
                let message = match detect_port_conflict(&line) {
                    Some(port) => format!("Local port {} is already in use", port),
                    None => line.trim().to_string(),
                };
                self.handle_error(generation, message);
            }
            ProcessEvent::Exited(Ok(status)) if status.success() => {
                tracing::info!(id = %self.id, "kubectl exited cleanly");
            }
            ProcessEvent::Exited(Ok(status)) => {
                self.handle_error(generation, format!("kubectl {}", describe_exit(&status)));
            }
            ProcessEvent::Exited(Err(e)) => {
                self.handle_error(generation, format!("Failed to wait for kubectl: {}", e));
            }
        }
    }

    fn mark_active(self: &Arc<Self>, generation: u64) {
        let mut shared = self.shared.lock();
        if shared.generation != generation || shared.state != TunnelState::Connecting {
            return;
        }

        if let Some(handle) = shared.connect_timeout.take() {
            handle.abort();
        }
        shared.state = TunnelState::Active;
        shared.retry_count = 0;
        shared.retry_delay = self.settings.retry.initial_delay();
        shared.error = None;
        shared.next_retry_at = None;
        shared.health_check = Some(self.spawn_health_check(generation));

        tracing::info!(id = %self.id, local_port = self.config.local_port, "port forward active");
        self.emit(&shared);
    }

    /// Counts an error and either schedules a retry or gives up.
    fn handle_error(self: &Arc<Self>, generation: u64, message: String) {
        let mut shared = self.shared.lock();
        if shared.generation != generation
            || !matches!(shared.state, TunnelState::Connecting | TunnelState::Active)
        {
            return;
        }

        shared.teardown();
        shared.retry_count += 1;
        shared.error = Some(message);

        if shared.retry_count >= self.settings.retry.max_retries {
            shared.state = TunnelState::Failed;
            shared.next_retry_at = None;
            tracing::info!(
                id = %self.id,
                retry_count = shared.retry_count,
                error = ?shared.error,
                "port forward failed"
            );
            self.emit(&shared);
            return;
        }

        let delay = shared.retry_delay;
        shared.retry_delay = self.settings.retry.next_delay(delay);
        shared.state = TunnelState::Reconnecting;
        shared.next_retry_at = chrono::Duration::from_std(delay)
            .ok()
            .map(|d| Utc::now() + d);

        let weak = Arc::downgrade(self);
        shared.retry_timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.retry(generation).await;
            }
        }));

        tracing::warn!(
            id = %self.id,
            retry_count = shared.retry_count,
            delay_ms = delay.as_millis() as u64,
            error = ?shared.error,
            "port forward reconnecting"
        );
        self.emit(&shared);
    }

    async fn retry(self: Arc<Self>, generation: u64) {
        {
            let mut shared = self.shared.lock();
            if shared.generation != generation || shared.state != TunnelState::Reconnecting {
                return;
            }
            // Detach so the teardown in connect() does not abort this task
            shared.retry_timer.take();
        }

        if let Err(e) = self.connect(false).await {
            tracing::warn!(id = %self.id, error = %e, "reconnect attempt failed");
        }
    }

    fn spawn_connect_timeout(self: &Arc<Self>, generation: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let limit = self.settings.connect_timeout;
        tokio::spawn(async move {
            sleep(limit).await;
            if let Some(inner) = weak.upgrade() {
                if inner.is_current(generation) {
                    inner.handle_error(
                        generation,
                        format!(
                            "Timed out after {}s waiting for port forward",
                            limit.as_secs_f32()
                        ),
                    );
                }
            }
        })
    }

    fn spawn_health_check(self: &Arc<Self>, generation: u64) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let policy = self.settings.health_check.clone();
        let port = self.config.local_port;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + policy.interval(), policy.interval());
            loop {
                ticker.tick().await;
                let Err(reason) = probe(port, policy.timeout()).await else {
                    continue;
                };
                if let Some(inner) = weak.upgrade() {
                    inner.handle_error(generation, reason);
                }
                return;
            }
        })
    }
}

impl<K, P> Drop for Inner<K, P> {
    fn drop(&mut self) {
        self.shared.get_mut().teardown();
    }
}

/// TCP connect to the forwarded local port.
async fn probe(port: u16, limit: Duration) -> std::result::Result<(), String> {
    match timeout(limit, TcpStream::connect(("127.0.0.1", port))).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(format!("Health check failed on port {}: {}", port, e)),
        Err(_) => Err(format!(
            "Health check timed out after {}ms on port {}",
            limit.as_millis(),
            port
        )),
    }
}
