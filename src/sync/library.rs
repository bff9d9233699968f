//! Library manifest reconciliation.

use crate::api::ApiClient;
use crate::error::Result;
use crate::library::{BookIndex, Manifest, PlaceholderManager};
use reqwest::Method;
use serde::Serialize;

/// Aggregate counts of a library sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LibraryReport {
    /// Placeholders written.
    pub created: usize,
    /// Books whose file already existed.
    pub skipped: usize,
    /// Books that could not be handled.
    pub errors: usize,
}

/// Pulls the manifest and materializes missing placeholders.
pub struct LibrarySyncer<'a> {
    api: &'a ApiClient,
    placeholders: PlaceholderManager<'a>,
}

impl<'a> LibrarySyncer<'a> {
    /// Create a syncer writing placeholders through `placeholders`.
    pub fn new(api: &'a ApiClient, placeholders: PlaceholderManager<'a>) -> Self {
        Self { api, placeholders }
    }

    /// Fetch the manifest.
    pub async fn fetch_manifest(&self) -> Result<Manifest> {
        let response = self.api.call(Method::GET, "/api/library", None).await?;
        Ok(response.decode_or_default())
    }

    /// Reconcile the manifest against the filesystem.
    ///
    /// Returns the report and an index holding every book that was handled
    /// successfully. The caller decides whether that index replaces or is
    /// merged into the stored one. A manifest fetch failure returns an error
    /// before anything is touched.
    pub async fn run(&self) -> Result<(LibraryReport, BookIndex)> {
        let manifest = self.fetch_manifest().await?;
        tracing::info!(books = manifest.books.len(), "Fetched library manifest");

        let mut report = LibraryReport::default();
        let mut seen = BookIndex::new();

        for book in manifest.books {
            match self.placeholders.create_placeholder(&book).await {
                Ok(true) => {
                    report.created += 1;
                    seen.insert(book);
                }
                Ok(false) => {
                    report.skipped += 1;
                    seen.insert(book);
                }
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(
                        book_id = %book.id,
                        path = %book.path,
                        error = %e,
                        "Failed to create placeholder"
                    );
                }
            }
        }

        tracing::info!(
            created = report.created,
            skipped = report.skipped,
            errors = report.errors,
            "Library sync complete"
        );

        Ok((report, seen))
    }
}
