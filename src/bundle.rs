//! Reading-state bundles (KOReader `.sdr` directories).

pub mod archive;
pub mod metadata;

pub use metadata::BundleMetadata;

use crate::error::Result;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Whether `name` is a canonical metadata entry (`metadata.<ext>.lua`).
///
/// Backup copies such as `metadata.epub.lua.old` never match.
pub fn is_metadata_entry(name: &str) -> bool {
    name.strip_prefix("metadata.")
        .and_then(|rest| rest.strip_suffix(".lua"))
        .is_some_and(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
}

/// A bundle found on disk with its effective entry.
#[derive(Debug, Clone)]
pub struct LocalBundle {
    /// Bundle directory.
    pub dir: PathBuf,
    /// Most recently modified metadata entry.
    pub entry: PathBuf,
    /// Modification time of the entry, unix seconds.
    pub timestamp: i64,
    /// Parsed metadata of the entry.
    pub metadata: BundleMetadata,
}

impl LocalBundle {
    /// Locate the bundle at `dir`. Returns `None` when the directory does
    /// not exist or holds no metadata entry.
    pub fn locate(dir: &Path) -> Result<Option<Self>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut effective: Option<(PathBuf, SystemTime)> = None;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if !is_metadata_entry(&name.to_string_lossy()) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified()?;
            if effective.as_ref().is_none_or(|(_, t)| modified > *t) {
                effective = Some((entry.path(), modified));
            }
        }

        let Some((entry, modified)) = effective else {
            return Ok(None);
        };

        let metadata = match std::fs::read_to_string(&entry)
            .map_err(crate::error::SyncError::from)
            .and_then(|content| BundleMetadata::parse(&content))
        {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(entry = %entry.display(), error = %e, "Unreadable bundle metadata, using defaults");
                BundleMetadata::default()
            }
        };

        Ok(Some(Self {
            dir: dir.to_path_buf(),
            entry,
            timestamp: unix_seconds(modified),
            metadata,
        }))
    }

    /// Set the effective entry's modification time to `timestamp`.
    ///
    /// Used after a transfer so that both sides compare equal on the next
    /// cycle.
    pub fn stamp(&self, timestamp: i64) -> Result<()> {
        let time = UNIX_EPOCH + Duration::from_secs(timestamp.max(0) as u64);
        File::options()
            .write(true)
            .open(&self.entry)?
            .set_modified(time)?;
        Ok(())
    }
}

/// Seconds since the epoch, 0 for times before it.
pub fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_entry_names() {
        assert!(is_metadata_entry("metadata.epub.lua"));
        assert!(is_metadata_entry("metadata.pdf.lua"));
        assert!(!is_metadata_entry("metadata.epub.lua.old"));
        assert!(!is_metadata_entry("metadata..lua"));
        assert!(!is_metadata_entry("metadata.lua"));
        assert!(!is_metadata_entry("cover.jpg"));
    }

    #[test]
    fn locate_picks_newest_entry() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("Dune.sdr");
        std::fs::create_dir(&bundle).unwrap();

        let older = bundle.join("metadata.pdf.lua");
        let newer = bundle.join("metadata.epub.lua");
        let backup = bundle.join("metadata.epub.lua.old");
        std::fs::write(&older, "return { last_page = 1 }").unwrap();
        std::fs::write(&newer, "return { last_page = 2 }").unwrap();
        std::fs::write(&backup, "return { last_page = 99 }").unwrap();

        let set = |p: &Path, secs: u64| {
            File::options()
                .write(true)
                .open(p)
                .unwrap()
                .set_modified(UNIX_EPOCH + Duration::from_secs(secs))
                .unwrap();
        };
        set(&older, 1_000);
        set(&newer, 2_000);
        set(&backup, 3_000);

        let found = LocalBundle::locate(&bundle).unwrap().unwrap();
        assert_eq!(found.entry, newer);
        assert_eq!(found.timestamp, 2_000);
        assert_eq!(found.metadata.last_page, 2);
    }

    #[test]
    fn locate_missing_or_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LocalBundle::locate(&dir.path().join("none.sdr")).unwrap().is_none());

        let empty = dir.path().join("empty.sdr");
        std::fs::create_dir(&empty).unwrap();
        std::fs::write(empty.join("cover.jpg"), b"x").unwrap();
        assert!(LocalBundle::locate(&empty).unwrap().is_none());
    }

    #[test]
    fn stamp_sets_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("a.sdr");
        std::fs::create_dir(&bundle).unwrap();
        std::fs::write(bundle.join("metadata.epub.lua"), "return {}").unwrap();

        let found = LocalBundle::locate(&bundle).unwrap().unwrap();
        found.stamp(1_700_000_000).unwrap();

        let again = LocalBundle::locate(&bundle).unwrap().unwrap();
        assert_eq!(again.timestamp, 1_700_000_000);
    }
}
