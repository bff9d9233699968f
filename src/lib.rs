//! cloudreader-sync: client-side sync engine for ebook-rs servers.
//!
//! This crate keeps an e-reader's local library and reading state in step
//! with a remote library server. The whole server library appears locally
//! as small placeholder files that are swapped for the real book on first
//! open.
//!
//! # Features
//!
//! - Library manifest sync with placeholder creation
//! - Placeholder recognition and on-demand download
//! - Reading-state bundle reconciliation (upload, download, replace)
//! - Scalar progress push/pull with conflict prompts
//! - Periodic auto-sync that skips while offline
//! - Session and settings persistence in SQLite

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// HTTP transport.
pub mod api;
/// Reading-state bundles on disk.
pub mod bundle;
/// Configuration and CLI.
pub mod config;
/// Error types.
pub mod error;
/// Local library model.
pub mod library;
/// Persisted settings.
pub mod settings;
/// Sync operations and engine.
pub mod sync;


pub use api::ApiClient;
pub use config::{Cli, Command, Config};
pub use error::{Result, SyncError};
pub use settings::{Session, Settings, SettingsStore};
pub use sync::SyncEngine;
