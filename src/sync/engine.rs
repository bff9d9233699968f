//! Engine context: session, settings, index and clients in one place.
//!
//! Every operation borrows the engine mutably, so two operations (a
//! scheduled cycle and a manual action, or two cycles) can never run at the
//! same time. State is written to the settings store only when an operation
//! completes.

use crate::api::ApiClient;
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::library::{BookIndex, PlaceholderManager, placeholder};
use crate::settings::{Session, Settings, SettingsStore};
use crate::sync::bundle::{BundleReport, BundleSyncer};
use crate::sync::host::{AlwaysOnline, Connectivity, HeadlessHost, Host, ProgressChoice};
use crate::sync::library::{LibraryReport, LibrarySyncer};
use crate::sync::progress::{ProgressDecision, ProgressRecord, ProgressSyncer, reconcile};
use reqwest::Method;
use serde::Deserialize;
use std::path::Path;

/// Result of the before-open hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The file is real content (or unknown); open it as is.
    NotPlaceholder,
    /// The placeholder was replaced by the real book.
    Materialized {
        /// Book ID.
        book_id: String,
        /// Bytes downloaded.
        bytes: u64,
    },
    /// The file is a placeholder but the server cannot be reached.
    Offline {
        /// Book ID.
        book_id: String,
    },
}

/// Response of the login and register endpoints.
#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
    user_id: String,
    username: String,
}

/// The sync engine.
pub struct SyncEngine {
    config: Config,
    store: SettingsStore,
    settings: Settings,
    index: BookIndex,
    api: Option<ApiClient>,
    host: Box<dyn Host>,
    connectivity: Box<dyn Connectivity>,
}

impl SyncEngine {
    /// Load settings and index from `store`.
    pub fn open(config: Config, store: SettingsStore) -> Result<Self> {
        let settings = store.load_settings()?;
        let index = store.load_index()?;

        let mut engine = Self {
            config,
            store,
            settings,
            index,
            api: None,
            host: Box::new(HeadlessHost),
            connectivity: Box::new(AlwaysOnline),
        };
        engine.rebuild_client()?;

        tracing::debug!(
            server = engine.settings.server_url.as_deref().unwrap_or("-"),
            books = engine.index.len(),
            logged_in = engine.settings.session().is_some(),
            "Sync engine ready"
        );
        Ok(engine)
    }

    /// Register the host application callbacks.
    pub fn with_host(mut self, host: Box<dyn Host>) -> Self {
        self.host = host;
        self
    }

    /// Register the connectivity check.
    pub fn with_connectivity(mut self, connectivity: Box<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    fn rebuild_client(&mut self) -> Result<()> {
        self.api = match &self.settings.server_url {
            Some(url) => {
                let mut api = ApiClient::new(url, &self.config.timeouts)?;
                api.set_token(self.settings.token.clone());
                Some(api)
            }
            None => None,
        };
        Ok(())
    }

    // ========== ACCESSORS ==========

    /// Engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current book index.
    pub fn index(&self) -> &BookIndex {
        &self.index
    }

    /// Current session, if logged in.
    pub fn session(&self) -> Option<Session> {
        self.settings.session()
    }

    /// Whether the scheduler may run: logged in, server set, auto-sync on.
    pub fn can_auto_sync(&self) -> bool {
        self.settings.auto_sync && self.api.is_some() && self.settings.session().is_some()
    }

    /// Whether the configured server is reachable.
    pub async fn is_online(&self) -> bool {
        match &self.api {
            Some(api) => self.connectivity.is_online(api.base_url()).await,
            None => false,
        }
    }

    fn api(&self) -> Result<&ApiClient> {
        self.api
            .as_ref()
            .ok_or_else(|| SyncError::Config("No server configured".to_string()))
    }

    fn authenticated_api(&self) -> Result<&ApiClient> {
        let api = self.api()?;
        if !api.has_token() {
            return Err(SyncError::Auth("Not logged in".to_string()));
        }
        Ok(api)
    }

    fn library_root(&self) -> Result<&Path> {
        self.settings
            .library_dir
            .as_deref()
            .ok_or_else(|| SyncError::Config("No library directory configured".to_string()))
    }

    fn persist_settings(&self) -> Result<()> {
        self.store.save_settings(&self.settings)
    }

    // ========== SETTINGS ==========

    /// Change the server. The stored session belongs to the old server and
    /// is dropped.
    pub fn set_server(&mut self, url: &str) -> Result<()> {
        // Validate before storing anything
        ApiClient::new(url, &self.config.timeouts)?;

        let url = url.trim().trim_end_matches('/').to_string();
        if self.settings.server_url.as_deref() != Some(url.as_str()) {
            self.settings.clear_session();
        }
        self.settings.server_url = Some(url);
        self.rebuild_client()?;
        self.persist_settings()
    }

    /// Change the local library root.
    pub fn set_library_dir(&mut self, path: &Path) -> Result<()> {
        if !path.is_absolute() {
            return Err(SyncError::Config(format!(
                "Library directory must be absolute: {}",
                path.display()
            )));
        }
        std::fs::create_dir_all(path)?;
        self.settings.library_dir = Some(path.to_path_buf());
        self.persist_settings()
    }

    /// Enable or disable background auto-sync.
    pub fn set_auto_sync(&mut self, enabled: bool) -> Result<()> {
        self.settings.auto_sync = enabled;
        self.persist_settings()
    }

    // ========== SESSION ==========

    /// Log in and store the session.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<Session> {
        let body = serde_json::json!({
            "username": username,
            "password": password,
            "device_id": self.settings.device_id,
        });
        self.authenticate("/api/auth/login", body).await
    }

    /// Create an account, then store the session the server returns.
    pub async fn register(&mut self, username: &str, password: &str) -> Result<Session> {
        let body = serde_json::json!({
            "username": username,
            "password": password,
        });
        self.authenticate("/api/auth/register", body).await
    }

    async fn authenticate(&mut self, path: &str, body: serde_json::Value) -> Result<Session> {
        let response = match self.api()?.call(Method::POST, path, Some(&body)).await {
            Ok(response) => response,
            Err(SyncError::Http { message, .. }) => return Err(SyncError::Auth(message)),
            Err(e) => return Err(e),
        };
        let auth: AuthResponse = response.decode()?;

        let session = Session {
            token: auth.token,
            user_id: auth.user_id,
            username: auth.username,
        };
        self.settings.set_session(session.clone());
        if let Some(api) = self.api.as_mut() {
            api.set_token(Some(session.token.clone()));
        }
        self.persist_settings()?;

        tracing::info!(username = %session.username, "Logged in");
        Ok(session)
    }

    /// Drop the session. The server is told on a best-effort basis.
    pub async fn logout(&mut self) -> Result<()> {
        if let Some(api) = self.api.as_ref()
            && api.has_token()
            && let Err(e) = api.call(Method::POST, "/api/auth/logout", None).await
        {
            tracing::debug!(error = %e, "Server logout failed");
        }

        self.settings.clear_session();
        if let Some(api) = self.api.as_mut() {
            api.set_token(None);
        }
        self.persist_settings()?;

        tracing::info!("Logged out");
        Ok(())
    }

    // ========== LIBRARY ==========

    async fn run_library_sync(&self) -> Result<(LibraryReport, BookIndex)> {
        let api = self.api()?;
        let root = self.library_root()?;
        LibrarySyncer::new(api, PlaceholderManager::new(api, root))
            .run()
            .await
    }

    /// Full library sync: the index is rebuilt from this manifest alone.
    pub async fn sync_library(&mut self) -> Result<LibraryReport> {
        let (report, index) = self.run_library_sync().await?;
        self.index = index;
        self.store.save_index(&self.index)?;
        Ok(report)
    }

    /// Background library sync: skipped when offline, and only adds or
    /// updates index entries.
    pub async fn auto_sync(&mut self) -> Result<Option<LibraryReport>> {
        // Missing settings are errors, not an offline skip
        self.api()?;
        self.library_root()?;

        if !self.is_online().await {
            tracing::info!("Offline, skipping library sync");
            return Ok(None);
        }

        let (report, seen) = self.run_library_sync().await?;
        self.index.merge(seen);
        self.store.save_index(&self.index)?;
        Ok(Some(report))
    }

    // ========== PLACEHOLDERS ==========

    /// Book ID of the placeholder at `path`, if it is one.
    ///
    /// Works without a server, so placeholders are recognized offline.
    pub fn is_placeholder(&self, path: &Path) -> Result<Option<String>> {
        let root = self.library_root()?;
        Ok(placeholder::recognize(
            root,
            path,
            &self.index,
            self.config.sync.placeholder_max_bytes,
        ))
    }

    /// Download the real book over the placeholder at `path`.
    pub async fn materialize(&self, path: &Path, book_id: &str) -> Result<u64> {
        let api = self.api()?;
        let root = self.library_root()?;
        PlaceholderManager::new(api, root)
            .materialize(path, book_id)
            .await
    }

    /// Hook for the host to call before opening a document.
    pub async fn on_before_open(&self, path: &Path) -> Result<OpenOutcome> {
        let Some(book_id) = self.is_placeholder(path)? else {
            return Ok(OpenOutcome::NotPlaceholder);
        };

        if !self.is_online().await {
            self.host
                .notify("This book is not downloaded yet and the server is unreachable.");
            return Ok(OpenOutcome::Offline { book_id });
        }

        self.host.notify("Downloading book...");
        let bytes = self.materialize(path, &book_id).await?;
        Ok(OpenOutcome::Materialized { book_id, bytes })
    }

    // ========== BUNDLES ==========

    /// Reconcile reading-state bundles of every indexed book.
    pub async fn sync_all_bundles(&self) -> Result<BundleReport> {
        let api = self.authenticated_api()?;
        let root = self.library_root()?;
        BundleSyncer::new(api, root, &self.index, &self.config.sync.bundle_extension)
            .run()
            .await
    }

    // ========== PROGRESS ==========

    /// Push a progress record.
    pub async fn push_progress(&self, book_id: &str, record: &ProgressRecord) -> Result<()> {
        let record = record.clone().with_device(self.settings.device_id.clone());
        ProgressSyncer::new(self.authenticated_api()?)
            .push(book_id, &record)
            .await
    }

    /// Pull the server's progress record.
    pub async fn pull_progress(&self, book_id: &str) -> Result<Option<ProgressRecord>> {
        ProgressSyncer::new(self.authenticated_api()?)
            .pull(book_id)
            .await
    }

    /// Compare two records with the configured threshold.
    pub fn reconcile_progress(
        &self,
        local: &ProgressRecord,
        remote: &ProgressRecord,
    ) -> ProgressDecision {
        reconcile(local, remote, self.config.sync.progress_threshold)
    }

    /// Hook for the host when a document is opened.
    ///
    /// Returns the remote record when the user chose to jump to it.
    pub async fn on_document_open(
        &self,
        book_id: &str,
        local: &ProgressRecord,
    ) -> Result<Option<ProgressRecord>> {
        if !self.is_online().await {
            return Ok(None);
        }

        let Some(remote) = self.pull_progress(book_id).await? else {
            return Ok(None);
        };

        match self.reconcile_progress(local, &remote) {
            ProgressDecision::InSync => Ok(None),
            ProgressDecision::Diverged { delta } => {
                tracing::info!(book_id, delta, "Reading position differs from server");
                match self
                    .host
                    .resolve_progress_conflict(book_id, local, &remote)
                {
                    ProgressChoice::ApplyRemote => Ok(Some(remote)),
                    ProgressChoice::KeepLocal => Ok(None),
                }
            }
        }
    }

    /// Hook for the host when a document is closed. Returns whether the
    /// record was pushed.
    pub async fn on_document_close(&self, book_id: &str, record: &ProgressRecord) -> Result<bool> {
        if !self.is_online().await {
            return Ok(false);
        }
        self.push_progress(book_id, record).await?;
        Ok(true)
    }
}
