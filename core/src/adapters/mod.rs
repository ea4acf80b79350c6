//! Adapters layer - External system implementations.
//!
//! This module contains implementations of the port traits
//! that interact with the host OS.

pub mod command;
pub mod conflict;

pub use command::SystemCommandRunner;
pub use conflict::{Platform, SystemPortResolver};
