//! Command runner port (interface).

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Port for running short-lived inspection commands (lsof, ps, netstat...).
pub trait CommandRunner: Send + Sync + 'static {
    /// Run `program` with `args` to completion and capture its output.
    ///
    /// A missing program surfaces as an `io::Error` of kind `NotFound`.
    fn run(
        &self,
        program: &str,
        args: &[&str],
    ) -> impl std::future::Future<Output = std::io::Result<CommandOutput>> + Send;
}
