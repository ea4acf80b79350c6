//! Port conflict resolution using platform inspection tools.
//!
//! - Unix-like systems: `lsof` finds the listener, `ps` describes it, `kill -9`
//!   terminates it.
//! - Windows: `netstat -ano` finds the listener, `tasklist` describes it,
//!   `taskkill /F` terminates it.
//!
//! Output parsing is platform-independent so each flavour can be tested
//! against captured fixtures on any host.

mod unix;
mod utils;
mod windows;

use crate::domain::ProcessInfo;
use crate::error::{Error, Result};
use crate::ports::{CommandRunner, PortConflictResolver};

use super::command::SystemCommandRunner;

/// Which family of inspection tools to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    /// The platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

/// Resolves port owners by shelling out to the platform's tools.
pub struct SystemPortResolver<R: CommandRunner = SystemCommandRunner> {
    runner: R,
    platform: Platform,
}

impl SystemPortResolver<SystemCommandRunner> {
    /// Create a resolver for the current platform.
    pub fn new() -> Self {
        Self::with_runner(SystemCommandRunner::new(), Platform::current())
    }
}

impl Default for SystemPortResolver<SystemCommandRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> SystemPortResolver<R> {
    /// Create a resolver with a custom runner and platform.
    pub fn with_runner(runner: R, platform: Platform) -> Self {
        Self { runner, platform }
    }
}

impl<R: CommandRunner> PortConflictResolver for SystemPortResolver<R> {
    async fn get_process_using_port(&self, port: u16) -> Result<Option<ProcessInfo>> {
        if port == 0 {
            return Err(Error::InvalidPort(port));
        }

        let found = match self.platform {
            Platform::Unix => unix::find_process(&self.runner, port).await,
            Platform::Windows => windows::find_process(&self.runner, port).await,
        };
        Ok(found)
    }

    async fn kill_process(&self, pid: u32) -> Result<()> {
        if pid == 0 || pid > i32::MAX as u32 {
            return Err(Error::InvalidPid(pid));
        }

        match self.platform {
            Platform::Unix => unix::kill(&self.runner, pid).await,
            Platform::Windows => windows::kill(&self.runner, pid).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::CommandOutput;
    use crate::testing::FixtureRunner;

    fn unix_fixture() -> FixtureRunner {
        FixtureRunner::new()
            .with(
                "lsof -nP -iTCP:8080 -sTCP:LISTEN -t",
                CommandOutput::ok("12345\n"),
            )
            .with("ps -p 12345 -o comm=", CommandOutput::ok("node\n"))
            .with(
                "ps -p 12345 -o args=",
                CommandOutput::ok("node /srv/app/server.js --port 8080\n"),
            )
            .with("lsof -nP -iTCP:9090 -sTCP:LISTEN -t", CommandOutput::failed(1, ""))
    }

    #[tokio::test]
    async fn test_unix_port_owner() {
        let resolver = SystemPortResolver::with_runner(unix_fixture(), Platform::Unix);

        let info = resolver.get_process_using_port(8080).await.unwrap().unwrap();
        assert_eq!(
            info,
            ProcessInfo {
                pid: 12345,
                port: 8080,
                process_name: "node".to_string(),
                command_line: "node /srv/app/server.js --port 8080".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_unix_unoccupied_port() {
        let resolver = SystemPortResolver::with_runner(unix_fixture(), Platform::Unix);
        assert!(resolver.get_process_using_port(9090).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_tool_is_not_an_error() {
        let resolver = SystemPortResolver::with_runner(FixtureRunner::new(), Platform::Unix);
        assert!(resolver.get_process_using_port(8080).await.unwrap().is_none());

        let resolver = SystemPortResolver::with_runner(FixtureRunner::new(), Platform::Windows);
        assert!(resolver.get_process_using_port(8080).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_invalid_input() {
        let resolver = SystemPortResolver::with_runner(FixtureRunner::new(), Platform::Unix);
        assert!(matches!(
            resolver.get_process_using_port(0).await,
            Err(Error::InvalidPort(0))
        ));
        assert!(matches!(
            resolver.kill_process(0).await,
            Err(Error::InvalidPid(0))
        ));
    }

    #[tokio::test]
    async fn test_unix_kill() {
        let runner = FixtureRunner::new()
            .with("kill -9 12345", CommandOutput::ok(""))
            .with(
                "kill -9 1",
                CommandOutput::failed(1, "kill: (1) - Operation not permitted\n"),
            );
        let resolver = SystemPortResolver::with_runner(runner, Platform::Unix);

        assert!(resolver.kill_process(12345).await.is_ok());

        match resolver.kill_process(1).await {
            Err(Error::KillFailed { pid, reason }) => {
                assert_eq!(pid, 1);
                assert!(reason.contains("Operation not permitted"));
            }
            other => panic!("expected KillFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_windows_port_owner() {
        let netstat = "\r\nActive Connections\r\n\r\n  Proto  Local Address          Foreign Address        State           PID\r\n  TCP    0.0.0.0:135            0.0.0.0:0              LISTENING       1004\r\n  TCP    127.0.0.1:8080         0.0.0.0:0              LISTENING       4242\r\n  TCP    127.0.0.1:8080         127.0.0.1:50123        ESTABLISHED     4242\r\n  TCP    [::]:5432              [::]:0                 LISTENING       900\r\n  UDP    0.0.0.0:5353           *:*                                    1200\r\n";
        let runner = FixtureRunner::new()
            .with("netstat -ano", CommandOutput::ok(netstat))
            .with(
                "tasklist /FI PID eq 4242 /FO CSV /NH",
                CommandOutput::ok("\"node.exe\",\"4242\",\"Console\",\"1\",\"45,120 K\"\r\n"),
            )
            .with(
                "tasklist /FI PID eq 900 /FO CSV /NH",
                CommandOutput::ok("\"postgres.exe\",\"900\",\"Services\",\"0\",\"12,004 K\"\r\n"),
            );
        let resolver = SystemPortResolver::with_runner(runner, Platform::Windows);

        let info = resolver.get_process_using_port(8080).await.unwrap().unwrap();
        assert_eq!(info.pid, 4242);
        assert_eq!(info.process_name, "node.exe");
        assert_eq!(info.command_line, "node.exe");

        let v6 = resolver.get_process_using_port(5432).await.unwrap().unwrap();
        assert_eq!(v6.pid, 900);
        assert_eq!(v6.process_name, "postgres.exe");

        assert!(resolver.get_process_using_port(5353).await.unwrap().is_none());
        assert!(resolver.get_process_using_port(9000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_windows_kill_failure() {
        let runner = FixtureRunner::new().with(
            "taskkill /PID 4242 /F",
            CommandOutput::failed(128, "ERROR: The process \"4242\" not found.\r\n"),
        );
        let resolver = SystemPortResolver::with_runner(runner, Platform::Windows);

        assert!(matches!(
            resolver.kill_process(4242).await,
            Err(Error::KillFailed { pid: 4242, .. })
        ));
    }
}
