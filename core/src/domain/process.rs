//! Owner of a local TCP port.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Whatever OS process currently owns a local port.
///
/// Produced per query and never cached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub pid: u32,
    pub port: u16,
    pub process_name: String,
    pub command_line: String,
}

impl fmt::Display for ProcessInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ":{} (PID: {}, Process: {})",
            self.port, self.pid, self.process_name
        )
    }
}
