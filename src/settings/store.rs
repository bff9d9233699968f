use crate::error::{Result, SyncError};
use crate::library::BookIndex;
use crate::settings::{Settings, keys};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Durable key-value store backed by SQLite.
#[derive(Clone)]
pub struct SettingsStore {
    conn: Arc<Mutex<Connection>>,
}

impl SettingsStore {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| SyncError::Storage(format!("Failed to open settings: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.initialize_schema()?;
        Ok(store)
    }

    /// Open in-memory store (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SyncError::Storage(format!("Failed to open settings: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| SyncError::Storage(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== RAW KEY/VALUE ==========

    /// Get a value.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| SyncError::Storage(format!("Failed to read {}: {}", key, e)))
    }

    /// Set a value.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.write_all(&[(key, Some(value.to_string()))])
    }

    /// Apply several writes in one transaction; `None` deletes the key.
    fn write_all(&self, entries: &[(&str, Option<String>)]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| SyncError::Storage(format!("Failed to begin transaction: {}", e)))?;

        for (key, value) in entries {
            match value {
                Some(value) => tx.execute(
                    "INSERT INTO settings (key, value) VALUES (?1, ?2)
                     ON CONFLICT (key) DO UPDATE SET value = excluded.value",
                    params![key, value],
                ),
                None => tx.execute("DELETE FROM settings WHERE key = ?1", params![key]),
            }
            .map_err(|e| SyncError::Storage(format!("Failed to write {}: {}", key, e)))?;
        }

        tx.commit()
            .map_err(|e| SyncError::Storage(format!("Failed to commit settings: {}", e)))?;
        Ok(())
    }

    // ========== TYPED ACCESS ==========

    /// Load all settings, generating a device ID on first use.
    pub fn load_settings(&self) -> Result<Settings> {
        let device_id = match self.get(keys::DEVICE_ID)? {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                self.set(keys::DEVICE_ID, &id)?;
                id
            }
        };

        Ok(Settings {
            server_url: self.get(keys::SERVER_URL)?,
            username: self.get(keys::USERNAME)?,
            token: self.get(keys::TOKEN)?,
            user_id: self.get(keys::USER_ID)?,
            auto_sync: self
                .get(keys::AUTO_SYNC)?
                .map(|v| v == "true")
                .unwrap_or(false),
            library_dir: self.get(keys::LIBRARY_DIR)?.map(PathBuf::from),
            device_id,
        })
    }

    /// Persist all settings in one transaction.
    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.write_all(&[
            (keys::SERVER_URL, settings.server_url.clone()),
            (keys::USERNAME, settings.username.clone()),
            (keys::TOKEN, settings.token.clone()),
            (keys::USER_ID, settings.user_id.clone()),
            (keys::AUTO_SYNC, Some(settings.auto_sync.to_string())),
            (
                keys::LIBRARY_DIR,
                settings
                    .library_dir
                    .as_ref()
                    .map(|p| p.to_string_lossy().to_string()),
            ),
            (keys::DEVICE_ID, Some(settings.device_id.clone())),
        ])
    }

    /// Load the book index. A missing or unreadable index starts empty.
    pub fn load_index(&self) -> Result<BookIndex> {
        let Some(raw) = self.get(keys::BOOK_INDEX)? else {
            return Ok(BookIndex::default());
        };

        match serde_json::from_str(&raw) {
            Ok(index) => Ok(index),
            Err(e) => {
                tracing::warn!(error = %e, "Stored book index is corrupt, starting empty");
                Ok(BookIndex::default())
            }
        }
    }

    /// Persist the book index.
    pub fn save_index(&self, index: &BookIndex) -> Result<()> {
        let raw = serde_json::to_string(index)
            .map_err(|e| SyncError::Storage(format!("Failed to serialize index: {}", e)))?;
        self.set(keys::BOOK_INDEX, &raw)
    }
}
