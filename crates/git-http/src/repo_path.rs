//! Repository-name validation and on-disk resolution.

use std::path::{Path, PathBuf};

/// Built-in name validation: non-empty `/`-separated segments of
/// `[A-Za-z0-9_-]`, no `..`, no backslashes, no control characters.
pub fn validate_repo_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("repository name is empty".into());
    }
    for segment in name.split('/') {
        if segment.is_empty() {
            return Err("repository name contains an empty segment".into());
        }
        if segment == ".." {
            return Err("repository name cannot traverse upwards".into());
        }
        if !segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!("repository name segment {segment:?} has invalid characters"));
        }
    }
    Ok(())
}

/// Accepts both `<name>` and `<name>.git` directory layouts under the root.
pub fn resolve_repo_dir(root: &Path, name: &str) -> Option<PathBuf> {
    let plain = root.join(name);
    if plain.is_dir() {
        return Some(plain);
    }
    let suffixed = root.join(format!("{name}.git"));
    if suffixed.is_dir() {
        return Some(suffixed);
    }
    None
}
