//! Path checks shared by archive reading and file serving.

use std::path::{Component, Path, PathBuf};

use crate::BundleError;

/// Accepts only non-empty relative paths made of normal components.
pub fn validate_entry_name(name: &str) -> Result<(), BundleError> {
    if name.is_empty() || name.contains('\\') || name.contains('\0') {
        return Err(BundleError::UnsafePath(name.to_string()));
    }
    let path = Path::new(name);
    if path.is_absolute()
        || !path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(BundleError::UnsafePath(name.to_string()));
    }
    Ok(())
}

/// Joins a request path under `root`, or `None` when the path could
/// escape it. Leading slashes are ignored; `.` segments are dropped.
pub fn safe_join(root: &Path, request_path: &str) -> Option<PathBuf> {
    let mut joined = root.to_path_buf();
    for segment in request_path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s if s.contains('\\') || s.contains('\0') || s.contains(':') => return None,
            s => joined.push(s),
        }
    }
    Some(joined)
}
