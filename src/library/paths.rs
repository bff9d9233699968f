//! Mapping between manifest paths and the local filesystem.
//!
//! Manifest paths come from the server and are never trusted: they are
//! normalized to `/`-separated relative form and rejected when they are
//! absolute or climb out of the library root.

use crate::error::{Result, SyncError};
use std::path::{Component, Path, PathBuf};

/// Normalize a manifest path to `a/b/c.epub` form.
pub fn normalize(raw: &str) -> Result<String> {
    let invalid = || SyncError::InvalidPath(raw.to_string());

    if raw.starts_with('/') || raw.starts_with('\\') {
        return Err(invalid());
    }

    let mut segments = Vec::new();
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(invalid()),
            // Windows drive prefixes such as `C:`
            s if s.len() == 2 && s.ends_with(':') && segments.is_empty() => return Err(invalid()),
            s if s.contains('\0') => return Err(invalid()),
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(invalid());
    }

    Ok(segments.join("/"))
}

/// Local path of a manifest entry under `root`.
pub fn resolve(root: &Path, raw: &str) -> Result<PathBuf> {
    let normalized = normalize(raw)?;
    let mut path = root.to_path_buf();
    for segment in normalized.split('/') {
        path.push(segment);
    }
    Ok(path)
}

/// Relative `/`-separated path of `path` under `root`, if it lies inside it.
pub fn relative_to(root: &Path, path: &Path) -> Option<String> {
    let rel = match path.strip_prefix(root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => {
            // Symlinked mounts: compare canonical forms
            let root = root.canonicalize().ok()?;
            let path = path.canonicalize().ok()?;
            path.strip_prefix(&root).ok()?.to_path_buf()
        }
    };

    let mut segments = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(s) => segments.push(s.to_string_lossy().to_string()),
            Component::CurDir => continue,
            _ => return None,
        }
    }

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Reading-state bundle directory of a book file: the file extension is
/// replaced by `extension` (`book.epub` -> `book.sdr`).
pub fn bundle_dir(book_file: &Path, extension: &str) -> PathBuf {
    book_file.with_extension(extension)
}
