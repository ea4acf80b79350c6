//! Command runner backed by `tokio::process`.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::ports::{CommandOutput, CommandRunner};

/// Upper bound for one inspection command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs commands on the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        debug!(program = program, args = ?args, "Running command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = timeout(COMMAND_TIMEOUT, child).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} did not finish within {:?}", program, COMMAND_TIMEOUT),
            )
        })??;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
