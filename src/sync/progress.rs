//! Scalar reading progress push/pull.

use crate::api::ApiClient;
use crate::error::Result;
use reqwest::Method;
use serde::{Deserialize, Serialize};

/// Percentage at or above which a book counts as complete.
pub const COMPLETE_PERCENTAGE: f64 = 99.0;

/// Reading status derived from the percentage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingStatus {
    /// Still reading.
    #[default]
    Reading,
    /// Finished.
    Complete,
}

impl ReadingStatus {
    /// Status for a percentage in `[0, 100]`.
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= COMPLETE_PERCENTAGE {
            ReadingStatus::Complete
        } else {
            ReadingStatus::Reading
        }
    }
}

/// Progress record exchanged with the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressRecord {
    /// Current page.
    pub current_page: i64,
    /// Total pages.
    pub total_pages: i64,
    /// Percentage read, `[0, 100]`.
    pub percentage: f64,
    /// Reading status, always consistent with `percentage`.
    pub status: ReadingStatus,
    /// Device that produced the record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl ProgressRecord {
    /// Record for `current_page` of `total_pages`.
    pub fn from_pages(current_page: i64, total_pages: i64) -> Self {
        let percentage = if total_pages > 0 {
            current_page as f64 / total_pages as f64 * 100.0
        } else {
            0.0
        };
        Self::new(current_page, total_pages, percentage)
    }

    /// Record with an explicit percentage (clamped to `[0, 100]`).
    pub fn new(current_page: i64, total_pages: i64, percentage: f64) -> Self {
        let percentage = if percentage.is_finite() {
            percentage.clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            current_page: current_page.max(0),
            total_pages: total_pages.max(0),
            percentage,
            status: ReadingStatus::from_percentage(percentage),
            device_id: None,
        }
    }

    /// Attach the producing device.
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

/// Progress as the server returns it; every field may be null.
#[derive(Debug, Deserialize)]
struct StoredProgress {
    current_page: Option<i64>,
    total_pages: Option<i64>,
    percentage: Option<f64>,
    device_id: Option<String>,
}

impl From<StoredProgress> for ProgressRecord {
    fn from(p: StoredProgress) -> Self {
        let mut record = ProgressRecord::new(
            p.current_page.unwrap_or(0),
            p.total_pages.unwrap_or(0),
            p.percentage.unwrap_or(0.0),
        );
        record.device_id = p.device_id;
        record
    }
}

/// Outcome of comparing local and remote progress.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressDecision {
    /// Difference within the threshold, nothing to do.
    InSync,
    /// Positions differ enough to ask the user.
    Diverged {
        /// Absolute percentage difference.
        delta: f64,
    },
}

/// Compare two records. Prompts only when the difference is strictly
/// greater than `threshold` percentage points.
pub fn reconcile(local: &ProgressRecord, remote: &ProgressRecord, threshold: f64) -> ProgressDecision {
    let delta = (remote.percentage - local.percentage).abs();
    if delta > threshold {
        ProgressDecision::Diverged { delta }
    } else {
        ProgressDecision::InSync
    }
}

/// Pushes and pulls progress records.
pub struct ProgressSyncer<'a> {
    api: &'a ApiClient,
}

impl<'a> ProgressSyncer<'a> {
    /// Create a syncer on an authenticated client.
    pub fn new(api: &'a ApiClient) -> Self {
        Self { api }
    }

    fn path(book_id: &str) -> String {
        format!("/api/sync/progress/{}", ApiClient::segment(book_id))
    }

    /// Upload the record for `book_id`.
    pub async fn push(&self, book_id: &str, record: &ProgressRecord) -> Result<()> {
        let body = serde_json::to_value(record)
            .map_err(|e| crate::error::SyncError::Decode(e.to_string()))?;
        self.api
            .call(Method::PUT, &Self::path(book_id), Some(&body))
            .await?;

        tracing::debug!(book_id, percentage = record.percentage, "Pushed progress");
        Ok(())
    }

    /// Fetch the server's record for `book_id`; `None` if it has none.
    pub async fn pull(&self, book_id: &str) -> Result<Option<ProgressRecord>> {
        let response = self.api.call(Method::GET, &Self::path(book_id), None).await?;
        let stored: Option<StoredProgress> = response.decode()?;
        Ok(stored.map(ProgressRecord::from))
    }
}
