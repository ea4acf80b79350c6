//! Port conflict resolver port (interface).

use crate::domain::ProcessInfo;
use crate::error::Result;

/// Port for answering "who owns local TCP port P" and "kill PID X".
pub trait PortConflictResolver: Send + Sync + 'static {
    /// Find the process listening on `port`.
    ///
    /// Returns `Ok(None)` when nothing owns the port or the inspection tool
    /// is unavailable. Fails only for an out-of-range port.
    fn get_process_using_port(
        &self,
        port: u16,
    ) -> impl std::future::Future<Output = Result<Option<ProcessInfo>>> + Send;

    /// Forcibly terminate `pid`.
    ///
    /// Destructive and irreversible; callers obtain confirmation first.
    fn kill_process(&self, pid: u32) -> impl std::future::Future<Output = Result<()>> + Send;
}
