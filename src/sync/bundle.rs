//! Reading-state bundle reconciliation.
//!
//! For every book the local bundle and the server record are compared by
//! existence and timestamp:
//!
//! | local | remote | timestamps       | action                |
//! |-------|--------|------------------|-----------------------|
//! | no    | no     |                  | nothing               |
//! | yes   | no     |                  | upload                |
//! | no    | yes    |                  | download              |
//! | yes   | yes    | local newer      | upload                |
//! | yes   | yes    | remote newer     | download-and-replace  |
//! | yes   | yes    | equal            | nothing               |
//!
//! Download-and-replace only downloads when the remote bundle is further
//! along (either `last_page` or `percent_finished` strictly greater);
//! otherwise the local bundle is uploaded over it. After every transfer the
//! server timestamp is stamped onto the local entry so that the next cycle
//! sees equal timestamps.

use crate::api::ApiClient;
use crate::bundle::{LocalBundle, archive};
use crate::error::{Result, SyncError};
use crate::library::{BookIndex, paths};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Server view of a bundle.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerBundleRecord {
    /// Book ID.
    pub book_id: String,
    /// Upload time on the server, unix seconds.
    #[serde(default)]
    pub updated_at: i64,
    /// Last page extracted by the server.
    #[serde(default)]
    pub last_page: Option<i64>,
    /// Fraction read extracted by the server.
    #[serde(default)]
    pub percent_finished: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerBundleList {
    #[serde(default)]
    sdrs: Vec<ServerBundleRecord>,
}

/// The fields the decision looks at, from either side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BundleState {
    /// Effective timestamp, unix seconds.
    pub timestamp: i64,
    /// Last page.
    pub last_page: u64,
    /// Fraction read.
    pub percent_finished: f64,
}

impl From<&LocalBundle> for BundleState {
    fn from(bundle: &LocalBundle) -> Self {
        Self {
            timestamp: bundle.timestamp,
            last_page: bundle.metadata.last_page,
            percent_finished: bundle.metadata.percent_finished,
        }
    }
}

impl From<&ServerBundleRecord> for BundleState {
    fn from(record: &ServerBundleRecord) -> Self {
        Self {
            timestamp: record.updated_at,
            last_page: record.last_page.unwrap_or(0).max(0) as u64,
            percent_finished: record
                .percent_finished
                .filter(|p| p.is_finite())
                .unwrap_or(0.0)
                .clamp(0.0, 1.0),
        }
    }
}

/// What to do with one book's bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleAction {
    /// Both sides agree, or neither exists.
    Nothing,
    /// Send the local bundle to the server.
    Upload,
    /// Replace the local bundle with the server's.
    Download,
}

/// Decide the action for one book.
pub fn decide(local: Option<&BundleState>, remote: Option<&BundleState>) -> BundleAction {
    use std::cmp::Ordering;

    match (local, remote) {
        (None, None) => BundleAction::Nothing,
        (Some(_), None) => BundleAction::Upload,
        (None, Some(_)) => BundleAction::Download,
        (Some(local), Some(remote)) => match local.timestamp.cmp(&remote.timestamp) {
            Ordering::Greater => BundleAction::Upload,
            Ordering::Equal => BundleAction::Nothing,
            Ordering::Less => {
                if remote.last_page > local.last_page
                    || remote.percent_finished > local.percent_finished
                {
                    BundleAction::Download
                } else {
                    BundleAction::Upload
                }
            }
        },
    }
}

/// Aggregate counts of a bundle sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BundleReport {
    /// Bundles sent to the server.
    pub uploaded: usize,
    /// Bundles replaced from the server.
    pub downloaded: usize,
    /// Books with nothing to do.
    pub unchanged: usize,
    /// Server records for books missing from the index.
    pub skipped: usize,
    /// Books whose transfer failed.
    pub errors: usize,
}

/// Reconciles bundles for every indexed book.
pub struct BundleSyncer<'a> {
    api: &'a ApiClient,
    root: &'a Path,
    index: &'a BookIndex,
    extension: &'a str,
}

impl<'a> BundleSyncer<'a> {
    /// Create a syncer over `index` rooted at `root`.
    pub fn new(api: &'a ApiClient, root: &'a Path, index: &'a BookIndex, extension: &'a str) -> Self {
        Self {
            api,
            root,
            index,
            extension,
        }
    }

    fn sdr_path(book_id: &str) -> String {
        format!("/api/sync/sdr/{}", ApiClient::segment(book_id))
    }

    /// Bundle directory of an indexed book.
    pub fn bundle_dir(&self, book_id: &str) -> Result<Option<PathBuf>> {
        let Some(book) = self.index.get(book_id) else {
            return Ok(None);
        };
        let book_file = paths::resolve(self.root, &book.path)?;
        Ok(Some(paths::bundle_dir(&book_file, self.extension)))
    }

    /// Fetch all server records.
    pub async fn fetch_records(&self) -> Result<BTreeMap<String, ServerBundleRecord>> {
        let response = self.api.call(Method::GET, "/api/sync/sdr", None).await?;
        let list: ServerBundleList = response.decode_or_default();
        Ok(list
            .sdrs
            .into_iter()
            .map(|r| (r.book_id.clone(), r))
            .collect())
    }

    /// Fetch the server record of a single book.
    pub async fn fetch_record(&self, book_id: &str) -> Result<Option<ServerBundleRecord>> {
        let path = format!("{}/info", Self::sdr_path(book_id));
        let response = self.api.call(Method::GET, &path, None).await?;
        response.decode()
    }

    /// Reconcile every indexed book and every server record.
    pub async fn run(&self) -> Result<BundleReport> {
        let remote = self.fetch_records().await?;
        let mut report = BundleReport::default();

        let book_ids: BTreeSet<&str> = self
            .index
            .iter()
            .map(|b| b.id.as_str())
            .chain(remote.keys().map(String::as_str))
            .collect();

        for book_id in book_ids {
            let record = remote.get(book_id);

            let dir = match self.bundle_dir(book_id) {
                Ok(Some(dir)) => dir,
                Ok(None) => {
                    tracing::debug!(book_id, "Server bundle for unindexed book, skipping");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(book_id, error = %e, "Cannot derive bundle path");
                    report.errors += 1;
                    continue;
                }
            };

            match self.sync_one(book_id, &dir, record).await {
                Ok(BundleAction::Nothing) => report.unchanged += 1,
                Ok(BundleAction::Upload) => report.uploaded += 1,
                Ok(BundleAction::Download) => report.downloaded += 1,
                Err(e) => {
                    tracing::warn!(book_id, bundle = %dir.display(), error = %e, "Bundle sync failed");
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            uploaded = report.uploaded,
            downloaded = report.downloaded,
            unchanged = report.unchanged,
            skipped = report.skipped,
            errors = report.errors,
            "Bundle sync complete"
        );

        Ok(report)
    }

    /// Reconcile one book and perform the chosen transfer.
    pub async fn sync_one(
        &self,
        book_id: &str,
        dir: &Path,
        record: Option<&ServerBundleRecord>,
    ) -> Result<BundleAction> {
        let local = LocalBundle::locate(dir)?;
        let action = decide(
            local.as_ref().map(BundleState::from).as_ref(),
            record.map(BundleState::from).as_ref(),
        );

        match (action, &local, record) {
            (BundleAction::Upload, Some(bundle), _) => self.upload(book_id, bundle).await?,
            (BundleAction::Download, _, Some(record)) => self.download(book_id, dir, record).await?,
            _ => {}
        }

        Ok(action)
    }

    async fn upload(&self, book_id: &str, bundle: &LocalBundle) -> Result<()> {
        let data = archive::pack(&bundle.dir)?;
        let bytes = data.len();
        self.api
            .upload(&Self::sdr_path(book_id), data, archive::CONTENT_TYPE)
            .await?;

        tracing::info!(book_id, bytes, last_page = bundle.metadata.last_page, "Uploaded bundle");

        match self.fetch_record(book_id).await {
            Ok(Some(record)) => {
                converge(book_id, bundle, record.updated_at);
            }
            Ok(None) => tracing::warn!(book_id, "Server has no record right after upload"),
            Err(e) => {
                tracing::warn!(book_id, error = %e, "Could not read back upload timestamp")
            }
        }
        Ok(())
    }

    async fn download(&self, book_id: &str, dir: &Path, record: &ServerBundleRecord) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new()?;
        let bytes = self
            .api
            .download_to(&Self::sdr_path(book_id), tmp.as_file_mut())
            .await?;
        if bytes == 0 {
            return Err(SyncError::Codec("Empty bundle archive".to_string()));
        }

        archive::unpack_replace(tmp.path(), dir)?;
        drop(tmp);

        if let Some(bundle) = LocalBundle::locate(dir)? {
            converge(book_id, &bundle, record.updated_at);
        }

        tracing::info!(book_id, bytes, "Downloaded bundle");
        Ok(())
    }
}

/// Stamp the server timestamp onto a transferred bundle. The transfer
/// itself already succeeded, so a failure only costs a repeat transfer on
/// the next cycle.
fn converge(book_id: &str, bundle: &LocalBundle, updated_at: i64) -> bool {
    match bundle.stamp(updated_at) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                book_id,
                entry = %bundle.entry.display(),
                error = %e,
                "Could not stamp bundle timestamp"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(timestamp: i64, last_page: u64, percent: f64) -> BundleState {
        BundleState {
            timestamp,
            last_page,
            percent_finished: percent,
        }
    }

    #[test]
    fn existence_cases() {
        let s = state(10, 1, 0.1);
        assert_eq!(decide(None, None), BundleAction::Nothing);
        assert_eq!(decide(Some(&s), None), BundleAction::Upload);
        assert_eq!(decide(None, Some(&s)), BundleAction::Download);
    }

    #[test]
    fn newer_local_uploads_equal_is_noop() {
        assert_eq!(
            decide(Some(&state(20, 120, 0.5)), Some(&state(10, 80, 0.3))),
            BundleAction::Upload
        );
        assert_eq!(
            decide(Some(&state(20, 1, 0.1)), Some(&state(20, 500, 0.9))),
            BundleAction::Nothing
        );
    }

    #[test]
    fn newer_remote_downloads_only_when_further() {
        assert_eq!(
            decide(Some(&state(10, 50, 0.2)), Some(&state(20, 80, 0.2))),
            BundleAction::Download
        );
        assert_eq!(
            decide(Some(&state(10, 50, 0.2)), Some(&state(20, 50, 0.4))),
            BundleAction::Download
        );
        // Tie and local superiority fall back to upload
        assert_eq!(
            decide(Some(&state(10, 50, 0.2)), Some(&state(20, 50, 0.2))),
            BundleAction::Upload
        );
        assert_eq!(
            decide(Some(&state(10, 90, 0.6)), Some(&state(20, 50, 0.2))),
            BundleAction::Upload
        );
    }

    #[test]
    fn server_record_nulls() {
        let record: ServerBundleRecord = serde_json::from_str(
            r#"{"book_id":"b","last_page":null,"percent_finished":null,"updated_at":5}"#,
        )
        .unwrap();
        let s = BundleState::from(&record);
        assert_eq!(s.last_page, 0);
        assert_eq!(s.percent_finished, 0.0);
        assert_eq!(s.timestamp, 5);
    }

    #[test]
    fn converge_stamps_entry_and_tolerates_failure() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("metadata.pdf.lua");
        std::fs::write(&entry, "return { last_page = 3 }").unwrap();
        let bundle = LocalBundle::locate(dir.path()).unwrap().unwrap();

        assert!(converge("b", &bundle, 1_234));
        assert_eq!(LocalBundle::locate(dir.path()).unwrap().unwrap().timestamp, 1_234);

        // Entry vanished after the transfer: warn and carry on
        std::fs::remove_file(&entry).unwrap();
        assert!(!converge("b", &bundle, 5_678));
    }
}
