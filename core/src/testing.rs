//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{ForwardSettings, HealthCheckPolicy, RetryPolicy};
use crate::domain::ProcessInfo;
use crate::error::{Error, Result};
use crate::kubernetes::models::{
    EndpointAddress, EndpointSubset, KubeContext, KubernetesNamespace, KubernetesPod,
    KubernetesService, ObjectReference, ServiceEndpoints,
};
use crate::kubernetes::KubectlError;
use crate::ports::{ClusterApi, CommandOutput, CommandRunner, PortConflictResolver};

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Answers commands from canned outputs keyed by `"program arg1 arg2..."`.
#[derive(Default)]
pub struct FixtureRunner {
    outputs: HashMap<String, CommandOutput>,
}

impl FixtureRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, command: &str, output: CommandOutput) -> Self {
        self.outputs.insert(command.to_string(), output);
        self
    }
}

impl CommandRunner for FixtureRunner {
    async fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        let key = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.outputs.get(&key).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no fixture for `{}`", key))
        })
    }
}

/// In-memory kubeconfig with a single namespace.
pub struct FakeCluster {
    current: Mutex<String>,
    switches: Mutex<Vec<String>>,
    failing_switches: Mutex<Vec<String>>,
    endpoints: HashMap<String, ServiceEndpoints>,
    pods: Vec<KubernetesPod>,
    failing_lookups: bool,
    endpoint_lookups: AtomicUsize,
}

impl FakeCluster {
    pub fn new(current: &str) -> Self {
        Self {
            current: Mutex::new(current.to_string()),
            switches: Mutex::new(Vec::new()),
            failing_switches: Mutex::new(Vec::new()),
            endpoints: HashMap::new(),
            pods: Vec::new(),
            failing_lookups: false,
            endpoint_lookups: AtomicUsize::new(0),
        }
    }

    pub fn with_endpoint(mut self, service: &str, pod: &str) -> Self {
        let endpoints = ServiceEndpoints {
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![EndpointAddress {
                    ip: Some("10.1.0.5".to_string()),
                    target_ref: Some(ObjectReference {
                        kind: Some("Pod".to_string()),
                        name: Some(pod.to_string()),
                    }),
                }]),
            }]),
        };
        self.endpoints.insert(service.to_string(), endpoints);
        self
    }

    pub fn with_pod(mut self, name: &str, phase: &str) -> Self {
        self.pods.push(KubernetesPod {
            name: name.to_string(),
            phase: Some(phase.to_string()),
        });
        self
    }

    /// Endpoint and pod lookups fail as if the cluster were unreachable.
    pub fn failing_lookups(mut self) -> Self {
        self.failing_lookups = true;
        self
    }

    pub fn fail_switch_to(&self, name: &str) {
        self.failing_switches.lock().push(name.to_string());
    }

    /// Every context switch, in order.
    pub fn switches(&self) -> Vec<String> {
        self.switches.lock().clone()
    }

    /// Number of `get_endpoints` calls so far.
    pub fn endpoint_lookups(&self) -> usize {
        self.endpoint_lookups.load(Ordering::SeqCst)
    }

    fn unreachable() -> Error {
        KubectlError::ClusterNotConnected("dial tcp 10.0.0.1:6443: connect: refused".to_string())
            .into()
    }
}

impl ClusterApi for FakeCluster {
    async fn list_contexts(&self) -> Result<Vec<KubeContext>> {
        Ok(["c1", "c2"]
            .into_iter()
            .map(|name| KubeContext {
                name: name.to_string(),
                cluster: format!("{}-cluster", name),
            })
            .collect())
    }

    async fn current_context(&self) -> Result<String> {
        Ok(self.current.lock().clone())
    }

    async fn set_context(&self, name: &str) -> Result<()> {
        if self.failing_switches.lock().iter().any(|n| n == name) {
            let message = format!("no context exists with the name: \"{}\"", name);
            return Err(KubectlError::CommandFailed(message).into());
        }
        *self.current.lock() = name.to_string();
        self.switches.lock().push(name.to_string());
        Ok(())
    }

    async fn list_namespaces(&self) -> Result<Vec<KubernetesNamespace>> {
        Ok(vec![KubernetesNamespace {
            name: "default".to_string(),
        }])
    }

    async fn list_services(&self, _namespace: &str) -> Result<Vec<KubernetesService>> {
        Ok(Vec::new())
    }

    async fn get_endpoints(
        &self,
        _context: &str,
        _namespace: &str,
        service: &str,
    ) -> Result<ServiceEndpoints> {
        self.endpoint_lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing_lookups {
            return Err(Self::unreachable());
        }
        Ok(self.endpoints.get(service).cloned().unwrap_or_default())
    }

    async fn list_pods(&self, _context: &str, _namespace: &str) -> Result<Vec<KubernetesPod>> {
        if self.failing_lookups {
            return Err(Self::unreachable());
        }
        Ok(self.pods.clone())
    }
}

/// Port ownership table; killing a PID frees its ports.
#[derive(Default)]
pub struct FakeResolver {
    occupied: Mutex<HashMap<u16, ProcessInfo>>,
    killed: Mutex<Vec<u32>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn occupied(self, port: u16, pid: u32, name: &str) -> Self {
        self.occupied.lock().insert(
            port,
            ProcessInfo {
                pid,
                port,
                process_name: name.to_string(),
                command_line: name.to_string(),
            },
        );
        self
    }

    pub fn killed(&self) -> Vec<u32> {
        self.killed.lock().clone()
    }
}

impl PortConflictResolver for FakeResolver {
    async fn get_process_using_port(&self, port: u16) -> Result<Option<ProcessInfo>> {
        Ok(self.occupied.lock().get(&port).cloned())
    }

    async fn kill_process(&self, pid: u32) -> Result<()> {
        self.occupied.lock().retain(|_, info| info.pid != pid);
        self.killed.lock().push(pid);
        Ok(())
    }
}

/// Writes a shell script that stands in for kubectl.
///
/// Scripts are run as `/bin/sh <script>`, so no exec bit is needed.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    path
}

/// Settings running `script` as kubectl with millisecond-scale timers.
pub fn fast_settings(script: &Path) -> ForwardSettings {
    ForwardSettings {
        kubectl: PathBuf::from("/bin/sh"),
        kubectl_args: vec![script.to_string_lossy().into_owned()],
        connect_timeout: Duration::from_millis(500),
        retry: RetryPolicy {
            max_retries: 5,
            initial_delay_ms: 10,
            max_delay_ms: 50,
        },
        health_check: HealthCheckPolicy {
            interval_ms: 60_000,
            timeout_ms: 200,
        },
    }
}
