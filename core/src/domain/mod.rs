//! Domain layer - Pure data models.
//!
//! This module contains the tunnel and process types shared by every
//! other layer. It has no dependencies on external systems.

mod process;
mod tunnel;

pub use process::ProcessInfo;
pub use tunnel::{TunnelConfig, TunnelIdentity, TunnelState, TunnelStatus};
