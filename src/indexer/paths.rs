//! Canonical path strings.
//!
//! Ledger keys, chunk `path` metadata and delete filters all compare path
//! strings, so every path entering the pipeline goes through
//! [`canonical_path`] exactly once.
use std::path::Path;

/// Resolve `path` to the one string form used throughout the index.
///
/// Symlinks and `..` are resolved when the path exists; otherwise the path is
/// made absolute lexically. Separators are normalised to `/`.
pub fn canonical_path(path: &Path) -> std::io::Result<String> {
    let resolved = match std::fs::canonicalize(path) {
        Ok(p) => p,
        Err(_) => std::path::absolute(path)?,
    };
    Ok(normalize_separators(&resolved.to_string_lossy()))
}

fn normalize_separators(path: &str) -> String {
    let path = path.replace('\\', "/");
    // canonicalize on Windows yields verbatim `//?/C:/...` paths
    match path.strip_prefix("//?/") {
        Some(rest) => rest.to_string(),
        None => path,
    }
}

/// Basename of a canonical path string.
pub fn file_name(canonical: &str) -> &str {
    canonical.rsplit('/').next().unwrap_or(canonical)
}

/// Whether `path` lies in `dir` (directly, or anywhere below it when `recursive`).
pub fn in_scope(path: &str, dir: &str, recursive: bool) -> bool {
    let dir = dir.trim_end_matches('/');
    let Some(rest) = path.strip_prefix(dir).and_then(|r| r.strip_prefix('/')) else {
        return false;
    };
    !rest.is_empty() && (recursive || !rest.contains('/'))
}
