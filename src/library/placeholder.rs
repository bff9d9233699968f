//! Placeholder files for books that are not downloaded yet.
//!
//! A placeholder is the small PDF the server renders for a book (cover plus
//! metadata) written at the book's library path. Whether a file is a
//! placeholder is decided by size and by the book index only; the PDF
//! marker written by the server is used to warn about orphans.

use crate::api::ApiClient;
use crate::error::{Result, SyncError};
use crate::library::book::Book;
use crate::library::index::BookIndex;
use crate::library::paths;
use lopdf::{Document, Object};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Marker prefix the server writes into the placeholder's PDF keywords.
const PLACEHOLDER_KEYWORDS: &str = "cloudreader,placeholder,";

/// Creates and replaces placeholders under one library root.
pub struct PlaceholderManager<'a> {
    api: &'a ApiClient,
    root: &'a Path,
}

impl<'a> PlaceholderManager<'a> {
    /// Create a manager for `root`.
    pub fn new(api: &'a ApiClient, root: &'a Path) -> Self {
        Self { api, root }
    }

    /// Local path of a book, rejecting manifest paths that escape the root.
    pub fn local_path(&self, book: &Book) -> Result<PathBuf> {
        paths::resolve(self.root, &book.path)
    }

    /// Fetch and write the placeholder for `book`.
    ///
    /// Returns `Ok(false)` without touching the filesystem when a non-empty
    /// file already sits at the book's path.
    pub async fn create_placeholder(&self, book: &Book) -> Result<bool> {
        let path = self.local_path(book)?;

        if file_len(&path)? > 0 {
            tracing::debug!(book_id = %book.id, path = %path.display(), "File present, skipping");
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("/books/{}/placeholder", ApiClient::segment(&book.id));
        let bytes = download_atomic(self.api, &url, &path).await?;

        tracing::info!(
            book_id = %book.id,
            title = %book.title,
            bytes,
            "Created placeholder"
        );
        Ok(true)
    }

    /// Replace the placeholder at `path` with the real book.
    /// Returns the number of bytes downloaded.
    pub async fn materialize(&self, path: &Path, book_id: &str) -> Result<u64> {
        let url = format!("/books/{}/download", ApiClient::segment(book_id));
        let bytes = download_atomic(self.api, &url, path).await?;

        tracing::info!(book_id, path = %path.display(), bytes, "Downloaded book");
        Ok(bytes)
    }
}

/// Book ID of the placeholder at `path`, or `None` if it is not one.
///
/// A placeholder is a small regular file whose library-relative path is in
/// the index. Needs no server.
pub fn recognize(root: &Path, path: &Path, index: &BookIndex, max_bytes: u64) -> Option<String> {
    let metadata = std::fs::metadata(path).ok()?;
    if !metadata.is_file() || metadata.len() > max_bytes {
        return None;
    }

    let relative = paths::relative_to(root, path)?;
    if let Some(book) = index.find_by_path(&relative) {
        return Some(book.id.clone());
    }

    if let Some(sniffed) = sniff(path) {
        tracing::warn!(
            path = %path.display(),
            embedded_id = sniffed.embedded_id.as_deref().unwrap_or("unknown"),
            "Small PDF not in book index, possibly an orphaned placeholder"
        );
    }

    None
}

/// Size of the file at `path`, 0 if it does not exist.
fn file_len(path: &Path) -> Result<u64> {
    match std::fs::metadata(path) {
        Ok(m) if m.is_file() => Ok(m.len()),
        Ok(_) => Err(SyncError::Filesystem(std::io::Error::other(format!(
            "Not a regular file: {}",
            path.display()
        )))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

/// Download `url` next to `dest` and rename it into place.
///
/// The temporary file lives in the destination directory so the rename is
/// atomic; it is removed on any failure and `dest` is left untouched.
pub(crate) async fn download_atomic(api: &ApiClient, url: &str, dest: &Path) -> Result<u64> {
    let dir = dest
        .parent()
        .ok_or_else(|| SyncError::InvalidPath(dest.display().to_string()))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".cloudreader-")
        .suffix(".part")
        .tempfile_in(dir)?;

    let written = api.download_to(url, tmp.as_file_mut()).await?;
    if written == 0 {
        return Err(SyncError::Decode(format!("Empty payload from {}", url)));
    }

    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| SyncError::Filesystem(e.error))?;

    Ok(written)
}

/// What content sniffing found in a small file.
struct Sniffed {
    embedded_id: Option<String>,
}

/// Check for a PDF header and read the placeholder marker if present.
fn sniff(path: &Path) -> Option<Sniffed> {
    let mut header = [0u8; 5];
    File::open(path).ok()?.read_exact(&mut header).ok()?;
    if &header != b"%PDF-" {
        return None;
    }

    let embedded_id = Document::load(path).ok().and_then(|doc| {
        let info_ref = doc.trailer.get(b"Info").ok()?.as_reference().ok()?;
        let info = doc.get_dictionary(info_ref).ok()?;
        match info.get(b"Keywords").ok()? {
            Object::String(bytes, _) => String::from_utf8_lossy(bytes)
                .strip_prefix(PLACEHOLDER_KEYWORDS)
                .map(str::to_string),
            _ => None,
        }
    });

    Some(Sniffed { embedded_id })
}
