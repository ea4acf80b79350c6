//! Ports layer - Trait definitions (interfaces).
//!
//! This module defines the interfaces the supervision engine uses to
//! interact with external systems. Implementations live in `adapters`
//! and `kubernetes::discovery`.

mod cluster;
mod command;
mod conflict;

pub use cluster::ClusterApi;
pub use command::{CommandOutput, CommandRunner};
pub use conflict::PortConflictResolver;
