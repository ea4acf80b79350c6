//! The `kubectl port-forward` subprocess and its output classification.

use std::future::pending;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::errors::{KubectlError, Result};
use crate::config::ForwardSettings;
use crate::domain::TunnelConfig;

/// Grace period between SIGTERM and SIGKILL.
const KILL_GRACE_PERIOD: Duration = Duration::from_millis(300);

/// How long buffered output is still read after the process exits.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Something the subprocess did.
#[derive(Debug)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    Exited(io::Result<ExitStatus>),
}

/// A running `kubectl port-forward`.
///
/// Output and the exit are delivered through the callback given to
/// [`ForwardProcess::spawn`]. Dropping the handle terminates the process.
#[derive(Debug)]
pub struct ForwardProcess {
    pid: Option<u32>,
    cancel: CancellationToken,
}

impl ForwardProcess {
    /// Spawns kubectl forwarding `config.local_port` to `pod`.
    pub fn spawn<F>(
        settings: &ForwardSettings,
        pod: &str,
        config: &TunnelConfig,
        on_event: F,
    ) -> Result<Self>
    where
        F: Fn(ProcessEvent) + Send + Sync + 'static,
    {
        let mut child = Command::new(&settings.kubectl)
            .args(&settings.kubectl_args)
            .args(forward_args(pod, config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| KubectlError::ProcessError(format!("Failed to start kubectl: {}", e)))?;

        let pid = child.id();
        let stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let stderr = child.stderr.take().map(|s| BufReader::new(s).lines());
        let cancel = CancellationToken::new();

        tracing::debug!(pid = ?pid, pod = %pod, local_port = config.local_port, "spawned kubectl port-forward");

        tokio::spawn(supervise(child, stdout, stderr, cancel.clone(), on_event));

        Ok(Self { pid, cancel })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Asks the process to exit; it is killed if still alive after the grace period.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ForwardProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Arguments after any leading kubectl args.
pub fn forward_args(pod: &str, config: &TunnelConfig) -> Vec<String> {
    vec![
        "port-forward".to_string(),
        format!("pod/{}", pod),
        format!("{}:{}", config.local_port, config.service_port),
        "-n".to_string(),
        config.namespace.clone(),
        "--context".to_string(),
        config.cluster.clone(),
    ]
}

enum Step {
    Cancelled,
    Stdout(Option<String>),
    Stderr(Option<String>),
    Exited(io::Result<ExitStatus>),
}

async fn supervise<R, E, F>(
    mut child: Child,
    mut stdout: Option<Lines<R>>,
    mut stderr: Option<Lines<E>>,
    cancel: CancellationToken,
    on_event: F,
) where
    R: AsyncBufRead + Unpin,
    E: AsyncBufRead + Unpin,
    F: Fn(ProcessEvent),
{
    loop {
        let step = tokio::select! {
            _ = cancel.cancelled() => Step::Cancelled,
            line = next_line(&mut stdout) => Step::Stdout(line),
            line = next_line(&mut stderr) => Step::Stderr(line),
            status = child.wait() => Step::Exited(status),
        };

        match step {
            Step::Cancelled => {
                shutdown(&mut child).await;
                return;
            }
            Step::Stdout(Some(line)) => on_event(ProcessEvent::Stdout(line)),
            Step::Stderr(Some(line)) => on_event(ProcessEvent::Stderr(line)),
            Step::Stdout(None) | Step::Stderr(None) => {}
            Step::Exited(status) => {
                let _ = timeout(DRAIN_TIMEOUT, async {
                    drain(&mut stdout, |line| on_event(ProcessEvent::Stdout(line))).await;
                    drain(&mut stderr, |line| on_event(ProcessEvent::Stderr(line))).await;
                })
                .await;
                if !cancel.is_cancelled() {
                    on_event(ProcessEvent::Exited(status));
                }
                return;
            }
        }
    }
}

/// Next line of a stream; closed streams are set to `None` and then never resolve.
async fn next_line<R: AsyncBufRead + Unpin>(lines: &mut Option<Lines<R>>) -> Option<String> {
    let Some(reader) = lines.as_mut() else {
        return pending().await;
    };
    let line = reader.next_line().await;
    match line {
        Ok(Some(line)) => Some(line),
        _ => {
            *lines = None;
            None
        }
    }
}

async fn drain<R: AsyncBufRead + Unpin>(lines: &mut Option<Lines<R>>, on_line: impl Fn(String)) {
    if let Some(reader) = lines.as_mut() {
        while let Ok(Some(line)) = reader.next_line().await {
            on_line(line);
        }
    }
}

async fn shutdown(child: &mut Child) {
    // id() is None once the child has been reaped
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match i32::try_from(pid) {
            Ok(raw) => {
                if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                    tracing::debug!(pid = pid, error = %e, "SIGTERM failed");
                }
                if timeout(KILL_GRACE_PERIOD, child.wait()).await.is_ok() {
                    tracing::debug!(pid = pid, "kubectl exited after SIGTERM");
                    return;
                }
            }
            Err(_) => tracing::debug!(pid = pid, "pid out of range for signals"),
        }
    }

    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "failed to kill kubectl");
    }
}

// ============================================================================
// Output Parsing
// ============================================================================

/// Checks if a stdout line reports an established forward.
pub fn is_forwarding_line(line: &str) -> bool {
    line.contains("Forwarding from")
}

/// Checks if a line indicates an error.
pub fn is_error_line(line: &str) -> bool {
    let line_lower = line.to_lowercase();
    line_lower.contains("error")
        || line_lower.contains("failed")
        || line_lower.contains("unable to")
        || line_lower.contains("connection refused")
        || line_lower.contains("lost connection")
        || line_lower.contains("address already in use")
}

/// Detects port conflict from output line.
/// Returns the conflicting port if detected.
pub fn detect_port_conflict(line: &str) -> Option<u16> {
    // kubectl format: "listen tcp4 127.0.0.1:8080: bind: address already in use"
    if !line.to_lowercase().contains("address already in use") {
        return None;
    }

    // Leading digits after a colon; small numbers are IP octets or IPv6 groups
    line.split(':')
        .skip(1)
        .filter_map(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u16>().ok()
        })
        .find(|port| *port > 255)
}

/// Human-readable exit description.
pub fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with code {}", code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {}", signal);
        }
    }

    "exited".to_string()
}
