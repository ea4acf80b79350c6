//! Subcommand implementations.

pub mod cluster;
pub mod config;
pub mod forward;
pub mod port;

/// Shortens `s` to at most `max` characters.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}
