//! netstat/tasklist/taskkill flavour.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::domain::ProcessInfo;
use crate::error::{Error, Result};
use crate::ports::CommandRunner;

use super::utils::parse_address;

/// First two CSV columns of `tasklist /FO CSV /NH`: image name and PID.
static TASKLIST_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^"([^"]+)","(\d+)""#).expect("valid tasklist regex"));

/// Find the listener on `port`.
///
/// Executes: `netstat -ano` (IPv4 and IPv6 rows), then `tasklist /FI "PID eq <pid>"`.
/// tasklist has no command-line column, so the image name stands in for it.
pub(super) async fn find_process<R: CommandRunner>(runner: &R, port: u16) -> Option<ProcessInfo> {
    let output = match runner.run("netstat", &["-ano"]).await {
        Ok(output) => output,
        Err(e) => {
            warn!(port = port, error = %e, "netstat unavailable, assuming port is free");
            return None;
        }
    };

    let pid = parse_netstat_pid(&output.stdout, port)?;
    let filter = format!("PID eq {}", pid);

    let process_name = match runner
        .run("tasklist", &["/FI", &filter, "/FO", "CSV", "/NH"])
        .await
    {
        Ok(output) if output.success => parse_tasklist_name(&output.stdout, pid),
        _ => None,
    }
    .unwrap_or_else(|| "unknown".to_string());

    debug!(port = port, pid = pid, process = %process_name, "Port owner found");

    Some(ProcessInfo {
        pid,
        port,
        command_line: process_name.clone(),
        process_name,
    })
}

/// Force-terminate through `taskkill /F`.
pub(super) async fn kill<R: CommandRunner>(runner: &R, pid: u32) -> Result<()> {
    let pid_arg = pid.to_string();
    let output = runner
        .run("taskkill", &["/PID", &pid_arg, "/F"])
        .await
        .map_err(|e| Error::CommandFailed(format!("Failed to run taskkill: {}", e)))?;

    if output.success {
        debug!(pid = pid, "Process killed");
        return Ok(());
    }

    let combined = format!("{} {}", output.stdout.trim(), output.stderr.trim());
    Err(Error::KillFailed {
        pid,
        reason: combined.trim().to_string(),
    })
}

/// PID of the `LISTENING` TCP row whose local address ends in `port`.
///
/// Expected netstat output format:
/// ```text
///   Proto  Local Address          Foreign Address        State           PID
///   TCP    127.0.0.1:8080         0.0.0.0:0              LISTENING       4242
/// ```
fn parse_netstat_pid(output: &str, port: u16) -> Option<u32> {
    output.lines().find_map(|line| {
        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.len() < 5
            || !columns[0].eq_ignore_ascii_case("TCP")
            || !columns[3].eq_ignore_ascii_case("LISTENING")
        {
            return None;
        }

        let (_, local_port) = parse_address(columns[1])?;
        if local_port != port {
            return None;
        }
        columns[4].parse().ok().filter(|pid| *pid > 0)
    })
}

fn parse_tasklist_name(output: &str, pid: u32) -> Option<String> {
    output.lines().find_map(|line| {
        let caps = TASKLIST_ROW.captures(line.trim())?;
        let row_pid: u32 = caps[2].parse().ok()?;
        (row_pid == pid).then(|| caps[1].to_string())
    })
}
