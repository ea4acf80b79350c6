//! Kubernetes discovery using kubectl commands.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use super::errors::{KubectlError, Result};
use super::models::{
    KubeContext, KubeconfigView, KubernetesNamespace, KubernetesPod, KubernetesService,
    NamespaceListResponse, PodListResponse, ServiceEndpoints, ServiceListResponse,
};
use crate::config::EngineConfig;
use crate::ports::ClusterApi;

/// Default paths to search for kubectl.
const KUBECTL_PATHS: &[&str] = &[
    "/opt/homebrew/bin/kubectl", // Apple Silicon
    "/usr/local/bin/kubectl",    // Intel Mac / Homebrew
    "/usr/bin/kubectl",          // System
];

/// Timeout for kubectl discovery commands.
const KUBECTL_TIMEOUT: Duration = Duration::from_secs(15);

/// Cluster access through the kubectl binary.
#[derive(Debug, Clone)]
pub struct KubernetesDiscovery {
    kubectl_path: Option<PathBuf>,
    kubectl_args: Vec<String>,
}

impl KubernetesDiscovery {
    /// Creates a new KubernetesDiscovery, searching well-known paths and PATH.
    pub fn new() -> Self {
        Self {
            kubectl_path: find_kubectl(),
            kubectl_args: Vec::new(),
        }
    }

    /// Honors `kubectlPath` and `kubectlArgs` from the engine config.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            kubectl_path: config.kubectl_path.clone().or_else(find_kubectl),
            kubectl_args: config.kubectl_args.clone(),
        }
    }

    /// Creates a new KubernetesDiscovery with an explicit binary.
    pub fn with_paths(kubectl_path: Option<PathBuf>, kubectl_args: Vec<String>) -> Self {
        Self {
            kubectl_path,
            kubectl_args,
        }
    }

    /// Returns the kubectl path if found.
    pub fn kubectl_path(&self) -> Option<&PathBuf> {
        self.kubectl_path.as_ref()
    }

    /// Returns true if kubectl is available.
    pub fn is_kubectl_available(&self) -> bool {
        self.kubectl_path.is_some()
    }

    async fn fetch_contexts(&self) -> Result<Vec<KubeContext>> {
        let output = self.execute_kubectl(&["config", "view", "-o", "json"]).await?;

        let view: KubeconfigView = serde_json::from_str(&output)
            .map_err(|e| KubectlError::ParsingFailed(e.to_string()))?;

        Ok(view.into_contexts())
    }

    async fn fetch_current_context(&self) -> Result<String> {
        let output = self.execute_kubectl(&["config", "current-context"]).await?;
        Ok(output.trim().to_string())
    }

    async fn use_context(&self, name: &str) -> Result<()> {
        self.execute_kubectl(&["config", "use-context", name]).await?;
        Ok(())
    }

    /// Fetches all Kubernetes namespaces.
    pub async fn fetch_namespaces(&self) -> Result<Vec<KubernetesNamespace>> {
        let output = self
            .execute_kubectl(&["get", "namespaces", "-o", "json", "--request-timeout=10s"])
            .await?;

        let response: NamespaceListResponse = serde_json::from_str(&output)
            .map_err(|e| KubectlError::ParsingFailed(e.to_string()))?;

        let mut namespaces = response.into_namespaces();
        namespaces.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(namespaces)
    }

    /// Fetches services in a specific namespace.
    pub async fn fetch_services(&self, namespace: &str) -> Result<Vec<KubernetesService>> {
        let output = self
            .execute_kubectl(&[
                "get",
                "services",
                "-n",
                namespace,
                "-o",
                "json",
                "--request-timeout=10s",
            ])
            .await?;

        let response: ServiceListResponse = serde_json::from_str(&output)
            .map_err(|e| KubectlError::ParsingFailed(e.to_string()))?;

        let mut services = response.into_services();
        services.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(services)
    }

    async fn fetch_endpoints(
        &self,
        context: &str,
        namespace: &str,
        service: &str,
    ) -> Result<ServiceEndpoints> {
        let output = self
            .execute_kubectl(&[
                "get",
                "endpoints",
                service,
                "-n",
                namespace,
                "--context",
                context,
                "-o",
                "json",
            ])
            .await?;

        serde_json::from_str(&output).map_err(|e| KubectlError::ParsingFailed(e.to_string()))
    }

    async fn fetch_pods(&self, context: &str, namespace: &str) -> Result<Vec<KubernetesPod>> {
        let output = self
            .execute_kubectl(&[
                "get", "pods", "-n", namespace, "--context", context, "-o", "json",
            ])
            .await?;

        let response: PodListResponse = serde_json::from_str(&output)
            .map_err(|e| KubectlError::ParsingFailed(e.to_string()))?;

        Ok(response.into_pods())
    }

    /// Executes a kubectl command and returns the output.
    async fn execute_kubectl(&self, args: &[&str]) -> Result<String> {
        let kubectl_path = self
            .kubectl_path
            .as_ref()
            .ok_or(KubectlError::KubectlNotFound)?;

        tracing::debug!(kubectl = %kubectl_path.display(), ?args, "running kubectl");

        let result = timeout(KUBECTL_TIMEOUT, async {
            let output = Command::new(kubectl_path)
                .args(&self.kubectl_args)
                .args(args)
                .kill_on_drop(true)
                .output()
                .await?;

            Ok::<_, std::io::Error>((output.status, output.stdout, output.stderr))
        })
        .await;

        match result {
            Ok(Ok((status, stdout, stderr))) => {
                if status.success() {
                    String::from_utf8(stdout)
                        .map_err(|e| KubectlError::ParsingFailed(e.to_string()))
                } else {
                    let stderr_str = String::from_utf8_lossy(&stderr);
                    Err(KubectlError::from_kubectl_error(&stderr_str))
                }
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(KubectlError::KubectlNotFound)
            }
            Ok(Err(e)) => Err(KubectlError::Io(e)),
            Err(_) => Err(KubectlError::Timeout),
        }
    }
}

impl Default for KubernetesDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterApi for KubernetesDiscovery {
    async fn list_contexts(&self) -> crate::Result<Vec<KubeContext>> {
        Ok(self.fetch_contexts().await?)
    }

    async fn current_context(&self) -> crate::Result<String> {
        Ok(self.fetch_current_context().await?)
    }

    async fn set_context(&self, name: &str) -> crate::Result<()> {
        Ok(self.use_context(name).await?)
    }

    async fn list_namespaces(&self) -> crate::Result<Vec<KubernetesNamespace>> {
        Ok(self.fetch_namespaces().await?)
    }

    async fn list_services(&self, namespace: &str) -> crate::Result<Vec<KubernetesService>> {
        Ok(self.fetch_services(namespace).await?)
    }

    async fn get_endpoints(
        &self,
        context: &str,
        namespace: &str,
        service: &str,
    ) -> crate::Result<ServiceEndpoints> {
        Ok(self.fetch_endpoints(context, namespace, service).await?)
    }

    async fn list_pods(&self, context: &str, namespace: &str) -> crate::Result<Vec<KubernetesPod>> {
        Ok(self.fetch_pods(context, namespace).await?)
    }
}

/// Locates kubectl in the well-known install locations, then on PATH.
pub fn find_kubectl() -> Option<PathBuf> {
    find_executable(KUBECTL_PATHS).or_else(|| {
        let path_var = env::var_os("PATH")?;
        env::split_paths(&path_var)
            .filter(|dir| !dir.as_os_str().is_empty())
            .flat_map(|dir| kubectl_binary_candidates(&dir))
            .find(|candidate| candidate.is_file())
    })
}

fn kubectl_binary_candidates(dir: &Path) -> Vec<PathBuf> {
    #[cfg(windows)]
    {
        vec![dir.join("kubectl.exe"), dir.join("kubectl.cmd"), dir.join("kubectl")]
    }
    #[cfg(not(windows))]
    {
        vec![dir.join("kubectl")]
    }
}

/// Finds an executable in the given paths.
fn find_executable(paths: &[&str]) -> Option<PathBuf> {
    paths.iter().map(PathBuf::from).find(|path| path.exists())
}
