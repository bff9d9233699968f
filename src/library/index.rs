//! Persisted book index.

use crate::library::book::Book;
use crate::library::paths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping from book ID to manifest entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookIndex {
    books: BTreeMap<String, Book>,
}

impl BookIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of books.
    pub fn len(&self) -> usize {
        self.books.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// Get a book by ID.
    pub fn get(&self, id: &str) -> Option<&Book> {
        self.books.get(id)
    }

    /// Insert or overwrite a book.
    pub fn insert(&mut self, book: Book) -> Option<Book> {
        self.books.insert(book.id.clone(), book)
    }

    /// Find the book whose manifest path equals `relative` after normalization.
    pub fn find_by_path(&self, relative: &str) -> Option<&Book> {
        let wanted = paths::normalize(relative).ok()?;
        self.books
            .values()
            .find(|b| paths::normalize(&b.path).is_ok_and(|p| p == wanted))
    }

    /// Iterate over books in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &Book> {
        self.books.values()
    }

    /// Add or update every book of `other`, never removing entries.
    pub fn merge(&mut self, other: BookIndex) {
        self.books.extend(other.books);
    }
}

impl FromIterator<Book> for BookIndex {
    fn from_iter<I: IntoIterator<Item = Book>>(iter: I) -> Self {
        let mut index = BookIndex::new();
        for book in iter {
            index.insert(book);
        }
        index
    }
}
