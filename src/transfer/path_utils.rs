//! Path helpers for task display names and delete keys
//!
//! Remote SFTP paths always use `/`. Local paths may be Windows-style
//! (`C:\Users\me\a.txt`, `\\server\share\a.txt`), so display names split on
//! both separators regardless of the host OS.

/// Last component of a local or remote path, for display.
///
/// Trailing separators are ignored; a bare root yields the input unchanged.
pub fn display_name(path: &str) -> String {
    let trimmed = path.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        return path.to_string();
    }
    match trimmed.rfind(['/', '\\']) {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

/// Canonical key for a remote path: no trailing `/`, no doubled `/`.
///
/// Used to key recursive-delete progress so `/srv/a/` and `/srv/a` are the
/// same target.
pub fn normalize_remote_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len());
    for segment in path.split('/') {
        if segment.is_empty() {
            continue;
        }
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        return if path.starts_with('/') {
            "/".to_string()
        } else {
            String::new()
        };
    }
    if !path.starts_with('/') {
        // Relative paths stay relative
        normalized.remove(0);
    }
    normalized
}
