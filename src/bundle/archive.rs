//! tar.gz codec for bundle directories.
//!
//! Archives hold the bundle directory itself (`Dune.sdr/metadata.epub.lua`),
//! so extracting into the book's directory recreates it.

use crate::bundle::{LocalBundle, is_metadata_entry};
use crate::error::{Result, SyncError};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Content type sent with uploads.
pub const CONTENT_TYPE: &str = "application/gzip";

/// Prefix of every temporary file or directory the engine creates.
const TEMP_PREFIX: &str = ".cloudreader-";

fn codec_error(context: &str, e: impl std::fmt::Display) -> SyncError {
    SyncError::Codec(format!("{}: {}", context, e))
}

/// Pack the bundle directory into a tar.gz archive.
pub fn pack(dir: &Path) -> Result<Vec<u8>> {
    let name = dir
        .file_name()
        .ok_or_else(|| SyncError::InvalidPath(dir.display().to_string()))?;

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| codec_error("Failed to read bundle", e))?;
        if entry
            .file_name()
            .to_string_lossy()
            .starts_with(TEMP_PREFIX)
        {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| codec_error("Failed to read bundle", e))?;
        let archive_path = Path::new(name).join(relative);

        if entry.file_type().is_dir() {
            builder
                .append_dir(&archive_path, entry.path())
                .map_err(|e| codec_error("Failed to add directory", e))?;
        } else if entry.file_type().is_file() {
            builder
                .append_path_with_name(entry.path(), &archive_path)
                .map_err(|e| codec_error("Failed to add file", e))?;
        }
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| codec_error("Failed to finish archive", e))?;
    encoder
        .finish()
        .map_err(|e| codec_error("Failed to compress archive", e))
}

/// Extract `archive` and replace the bundle at `bundle_dir` with its contents.
///
/// The archive is unpacked into a staging directory next to the bundle
/// first. The existing bundle is only moved aside once the new one is
/// complete, and is restored if the final rename fails.
pub fn unpack_replace(archive: &Path, bundle_dir: &Path) -> Result<()> {
    let parent = bundle_dir
        .parent()
        .ok_or_else(|| SyncError::InvalidPath(bundle_dir.display().to_string()))?;
    let name = bundle_dir
        .file_name()
        .ok_or_else(|| SyncError::InvalidPath(bundle_dir.display().to_string()))?;
    std::fs::create_dir_all(parent)?;

    let staging = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempdir_in(parent)?;

    let file = File::open(archive)?;
    tar::Archive::new(GzDecoder::new(file))
        .unpack(staging.path())
        .map_err(|e| codec_error("Failed to extract archive", e))?;

    let extracted = extracted_root(staging.path())?;
    if LocalBundle::locate(&extracted)?.is_none() {
        return Err(SyncError::Codec(
            "Archive contains no metadata entry".to_string(),
        ));
    }

    let backup = parent.join(format!(
        "{}old-{}",
        TEMP_PREFIX,
        name.to_string_lossy()
    ));
    if backup.exists() {
        std::fs::remove_dir_all(&backup)?;
    }

    let had_previous = bundle_dir.exists();
    if had_previous {
        std::fs::rename(bundle_dir, &backup)?;
    }

    if let Err(e) = std::fs::rename(&extracted, bundle_dir) {
        if had_previous && let Err(restore) = std::fs::rename(&backup, bundle_dir) {
            tracing::error!(
                bundle = %bundle_dir.display(),
                error = %restore,
                "Failed to restore previous bundle"
            );
        }
        return Err(e.into());
    }

    if had_previous && let Err(e) = std::fs::remove_dir_all(&backup) {
        tracing::warn!(path = %backup.display(), error = %e, "Failed to remove old bundle");
    }

    Ok(())
}

/// Directory holding the bundle contents inside the staging area: the
/// single top-level directory if the archive has one, otherwise the
/// staging directory itself.
fn extracted_root(staging: &Path) -> Result<PathBuf> {
    let entries: Vec<_> = std::fs::read_dir(staging)?.collect::<std::io::Result<_>>()?;

    let has_top_level_metadata = entries
        .iter()
        .any(|e| is_metadata_entry(&e.file_name().to_string_lossy()));

    if !has_top_level_metadata
        && let [only] = entries.as_slice()
        && only.file_type()?.is_dir()
    {
        return Ok(only.path());
    }

    Ok(staging.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_bundle(dir: &Path, last_page: u64) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join("metadata.epub.lua"),
            format!("return {{ [\"last_page\"] = {} }}", last_page),
        )
        .unwrap();
        std::fs::write(dir.join("cover.jpg"), b"jpeg").unwrap();
    }

    #[test]
    fn pack_then_replace_existing_bundle() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();

        let source_bundle = src.path().join("Dune.sdr");
        write_bundle(&source_bundle, 120);
        let data = pack(&source_bundle).unwrap();

        let archive = dst.path().join("archive.tar.gz");
        std::fs::write(&archive, &data).unwrap();

        let target = dst.path().join("Books").join("Dune.sdr");
        write_bundle(&target, 5);
        std::fs::write(target.join("stale.txt"), b"old").unwrap();

        unpack_replace(&archive, &target).unwrap();

        let bundle = LocalBundle::locate(&target).unwrap().unwrap();
        assert_eq!(bundle.metadata.last_page, 120);
        assert!(target.join("cover.jpg").exists());
        assert!(!target.join("stale.txt").exists());

        // No staging or backup directories are left behind
        let leftovers: Vec<_> = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn corrupt_archive_leaves_bundle_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("Dune.sdr");
        write_bundle(&target, 42);

        let archive = dir.path().join("bad.tar.gz");
        std::fs::write(&archive, b"definitely not gzip").unwrap();

        assert!(matches!(
            unpack_replace(&archive, &target),
            Err(SyncError::Codec(_))
        ));
        let bundle = LocalBundle::locate(&target).unwrap().unwrap();
        assert_eq!(bundle.metadata.last_page, 42);
    }

    #[test]
    fn creates_missing_parent() {
        let src = tempfile::tempdir().unwrap();
        let source_bundle = src.path().join("Book.sdr");
        write_bundle(&source_bundle, 7);
        let archive = src.path().join("a.tar.gz");
        std::fs::write(&archive, pack(&source_bundle).unwrap()).unwrap();

        let dst = tempfile::tempdir().unwrap();
        let target = dst.path().join("new").join("dir").join("Book.sdr");
        unpack_replace(&archive, &target).unwrap();
        assert_eq!(
            LocalBundle::locate(&target).unwrap().unwrap().metadata.last_page,
            7
        );
    }
}
