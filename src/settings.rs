mod store;

pub use store::SettingsStore;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings keys.
pub mod keys {
    /// Server base URL.
    pub const SERVER_URL: &str = "server_url";
    /// Username of the stored session.
    pub const USERNAME: &str = "username";
    /// Bearer token.
    pub const TOKEN: &str = "token";
    /// Server-side user ID.
    pub const USER_ID: &str = "user_id";
    /// Background auto-sync toggle.
    pub const AUTO_SYNC: &str = "auto_sync";
    /// Absolute path of the local library.
    pub const LIBRARY_DIR: &str = "library_dir";
    /// Serialized book index.
    pub const BOOK_INDEX: &str = "book_index";
    /// Device identifier sent with progress and login.
    pub const DEVICE_ID: &str = "device_id";
}

/// Credential issued by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token.
    pub token: String,
    /// User ID.
    pub user_id: String,
    /// Username.
    pub username: String,
}

/// Snapshot of the persisted settings (everything except the book index).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Server base URL.
    pub server_url: Option<String>,
    /// Username last used to log in (kept after logout).
    pub username: Option<String>,
    /// Bearer token.
    pub token: Option<String>,
    /// User ID.
    pub user_id: Option<String>,
    /// Whether the scheduler may run.
    pub auto_sync: bool,
    /// Local library root.
    pub library_dir: Option<PathBuf>,
    /// Stable device identifier.
    pub device_id: String,
}

impl Settings {
    /// Current session, if logged in.
    pub fn session(&self) -> Option<Session> {
        match (&self.token, &self.user_id, &self.username) {
            (Some(token), Some(user_id), Some(username)) => Some(Session {
                token: token.clone(),
                user_id: user_id.clone(),
                username: username.clone(),
            }),
            _ => None,
        }
    }

    /// Store a freshly issued session.
    pub fn set_session(&mut self, session: Session) {
        self.token = Some(session.token);
        self.user_id = Some(session.user_id);
        self.username = Some(session.username);
    }

    /// Drop the credential, keeping the username for the next login prompt.
    pub fn clear_session(&mut self) {
        self.token = None;
        self.user_id = None;
    }
}
