//! lsof/ps/kill flavour.

use std::path::Path;

use tracing::{debug, warn};

use crate::domain::ProcessInfo;
use crate::error::{Error, Result};
use crate::ports::CommandRunner;

/// Find the listener on `port`.
///
/// Executes: `lsof -nP -iTCP:<port> -sTCP:LISTEN -t`, then `ps -p <pid>` twice
/// for the short name and the full command line.
pub(super) async fn find_process<R: CommandRunner>(runner: &R, port: u16) -> Option<ProcessInfo> {
    let filter = format!("-iTCP:{}", port);
    let output = match runner
        .run("lsof", &["-nP", &filter, "-sTCP:LISTEN", "-t"])
        .await
    {
        Ok(output) => output,
        Err(e) => {
            warn!(port = port, error = %e, "lsof unavailable, assuming port is free");
            return None;
        }
    };

    // lsof exits 1 with empty output when nothing matches
    let pid = parse_lsof_pid(&output.stdout)?;
    let pid_arg = pid.to_string();

    let process_name = ps_field(runner, &pid_arg, "comm=")
        .await
        .map(|comm| short_name(&comm))
        .unwrap_or_else(|| "unknown".to_string());
    let command_line = ps_field(runner, &pid_arg, "args=")
        .await
        .unwrap_or_else(|| process_name.clone());

    debug!(port = port, pid = pid, process = %process_name, "Port owner found");

    Some(ProcessInfo {
        pid,
        port,
        process_name,
        command_line,
    })
}

/// Send SIGKILL through `kill -9`.
pub(super) async fn kill<R: CommandRunner>(runner: &R, pid: u32) -> Result<()> {
    let pid_arg = pid.to_string();
    let output = runner
        .run("kill", &["-9", &pid_arg])
        .await
        .map_err(|e| Error::CommandFailed(format!("Failed to run kill: {}", e)))?;

    if output.success {
        debug!(pid = pid, "Process killed");
        return Ok(());
    }

    let reason = match output.stderr.trim() {
        "" => format!("kill exited with code {:?}", output.code),
        stderr => stderr.to_string(),
    };
    Err(Error::KillFailed { pid, reason })
}

async fn ps_field<R: CommandRunner>(runner: &R, pid: &str, field: &str) -> Option<String> {
    let output = runner.run("ps", &["-p", pid, "-o", field]).await.ok()?;
    if !output.success {
        return None;
    }
    let value = output.stdout.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// First PID printed by `lsof -t`.
fn parse_lsof_pid(output: &str) -> Option<u32> {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .find(|pid| *pid > 0)
}

/// `ps -o comm=` prints a full path on macOS; keep the file name.
fn short_name(comm: &str) -> String {
    Path::new(comm)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(comm)
        .to_string()
}
