use std::path::PathBuf;

use dirs_next::home_dir;

/// Resolves a leading `~` against the home directory.
///
/// Paths without a leading `~` are returned trimmed but otherwise unchanged.
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    let rest = match trimmed.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') => rest,
        _ => return PathBuf::from(trimmed),
    };
    let home = home_dir().unwrap_or_else(|| PathBuf::from("~"));
    let relative = rest.trim_start_matches(['/', '\\']);
    if relative.is_empty() { home } else { home.join(relative) }
}
