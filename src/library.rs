/// Book manifest model.
pub mod book;
/// Persisted book index.
pub mod index;
/// Manifest path handling.
pub mod paths;
/// Placeholder files.
pub mod placeholder;

pub use book::{Book, Manifest};
pub use index::BookIndex;
pub use placeholder::PlaceholderManager;
