//! Locating the Claude Code CLI binary

use std::path::{Path, PathBuf};

use crate::error::{ClaudeError, Result};

/// Find Claude Code CLI binary
///
/// Looks on `PATH` first, then in the usual install locations.
///
/// # Errors
/// Returns `CliNotFound` with installation guidance if nothing is found
pub fn find_cli() -> Result<PathBuf> {
    if let Ok(path) = which::which("claude") {
        return Ok(path);
    }

    let home = dirs::home_dir();
    candidate_locations(home.as_deref())
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(ClaudeError::cli_not_found)
}

fn candidate_locations(home: Option<&Path>) -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(home) = home {
        locations.push(home.join(".claude/local/claude"));
        locations.push(home.join(".npm-global/bin/claude"));
    }
    locations.push(PathBuf::from("/usr/local/bin/claude"));
    if let Some(home) = home {
        locations.push(home.join(".local/bin/claude"));
        locations.push(home.join("node_modules/.bin/claude"));
        locations.push(home.join(".yarn/bin/claude"));
    }
    locations
}
