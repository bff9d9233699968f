//! Book manifest model.

use serde::{Deserialize, Serialize};

/// A book as listed in the server manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    /// Stable identifier, the join key everywhere.
    pub id: String,

    /// Book title.
    pub title: String,

    /// Relative path within the library (e.g., "Abara/Abara T01.cbz").
    pub path: String,

    /// Authors (may be empty).
    #[serde(default)]
    pub authors: Vec<String>,

    /// File format (epub, pdf, cbz, etc.).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// File size of the real book in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Whether the server has a cover for it.
    #[serde(default)]
    pub has_cover: bool,

    /// Series name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,

    /// Position in series.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_index: Option<f32>,

    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Book {
    /// Create a book with only the required manifest fields.
    pub fn new(id: impl Into<String>, title: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            path: path.into(),
            authors: Vec::new(),
            format: None,
            size: None,
            has_cover: false,
            series: None,
            series_index: None,
            description: None,
        }
    }

    /// Get display name for authors.
    pub fn authors_display(&self) -> String {
        if self.authors.is_empty() {
            "Unknown Author".to_string()
        } else {
            self.authors.join(", ")
        }
    }
}

/// Manifest returned by `GET /api/library`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    /// Books in server order.
    #[serde(default)]
    pub books: Vec<Book>,
}
