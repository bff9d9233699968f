use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Library and reading-state sync client for ebook-rs servers.
#[derive(Parser, Debug, Clone)]
#[command(name = "cloudreader-sync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "CLOUDREADER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Write a default config file.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },

    /// Log in to the server.
    Login {
        /// Username.
        username: String,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
        /// Server URL (stored for later commands).
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Create an account and log in.
    Register {
        /// Username.
        username: String,
        /// Password (will prompt if not provided).
        #[arg(short, long)]
        password: Option<String>,
        /// Server URL (stored for later commands).
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Forget the stored session.
    Logout,

    /// Show stored settings and index size.
    Status,

    /// Change stored settings.
    Set {
        /// Setting to change.
        #[command(subcommand)]
        setting: SetCommand,
    },

    /// Synchronize the library manifest.
    Sync {
        /// Rebuild the book index from scratch instead of merging.
        #[arg(long)]
        full: bool,
        /// Also reconcile reading-state bundles.
        #[arg(long)]
        bundles: bool,
    },

    /// Reconcile reading-state bundles only.
    SyncBundles,

    /// Download the real book if the path is a placeholder.
    Open {
        /// Path to the book file.
        path: PathBuf,
    },

    /// Reading progress commands.
    Progress {
        /// Progress subcommand action.
        #[command(subcommand)]
        action: ProgressCommand,
    },

    /// Run the periodic auto-sync scheduler in the foreground.
    Daemon,
}

/// Settings subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum SetCommand {
    /// Server base URL.
    Server {
        /// URL, e.g. http://nas:8080.
        url: String,
    },
    /// Local library directory.
    Library {
        /// Absolute path.
        path: PathBuf,
    },
    /// Enable or disable background auto-sync.
    AutoSync {
        /// true or false.
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

/// Progress subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum ProgressCommand {
    /// Upload a progress record.
    Push {
        /// Book ID.
        book_id: String,
        /// Current page.
        #[arg(long)]
        page: i64,
        /// Total pages.
        #[arg(long)]
        total: i64,
    },
    /// Fetch the server's progress record and compare with a local page.
    Pull {
        /// Book ID.
        book_id: String,
        /// Local current page to compare against.
        #[arg(long)]
        page: Option<i64>,
        /// Local total pages.
        #[arg(long)]
        total: Option<i64>,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Network timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Sync behaviour.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Local storage.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Reachability check before background work.
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
}

/// Block/total timeout pair for one class of request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPair {
    /// Maximum stall between two received blocks, in seconds.
    pub block_seconds: u64,
    /// Maximum wall-clock duration of the whole request, in seconds.
    pub total_seconds: u64,
}

impl TimeoutPair {
    /// Stall timeout.
    pub fn block(&self) -> Duration {
        Duration::from_secs(self.block_seconds)
    }

    /// Wall-clock timeout.
    pub fn total(&self) -> Duration {
        Duration::from_secs(self.total_seconds)
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// JSON calls (auth, manifest, record lists).
    #[serde(default = "default_metadata_timeouts")]
    pub metadata: TimeoutPair,

    /// Payload transfers (books, placeholders, bundle archives).
    #[serde(default = "default_transfer_timeouts")]
    pub transfer: TimeoutPair,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            metadata: default_metadata_timeouts(),
            transfer: default_transfer_timeouts(),
        }
    }
}

fn default_metadata_timeouts() -> TimeoutPair {
    TimeoutPair {
        block_seconds: 10,
        total_seconds: 30,
    }
}

fn default_transfer_timeouts() -> TimeoutPair {
    TimeoutPair {
        block_seconds: 15,
        total_seconds: 300,
    }
}

/// Sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Auto-sync period in seconds.
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,

    /// Percentage difference above which a progress conflict is reported.
    #[serde(default = "default_progress_threshold")]
    pub progress_threshold: f64,

    /// Files larger than this are never treated as placeholders.
    #[serde(default = "default_placeholder_max_bytes")]
    pub placeholder_max_bytes: u64,

    /// Extension of reading-state bundle directories.
    #[serde(default = "default_bundle_extension")]
    pub bundle_extension: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            progress_threshold: default_progress_threshold(),
            placeholder_max_bytes: default_placeholder_max_bytes(),
            bundle_extension: default_bundle_extension(),
        }
    }
}

impl SyncConfig {
    /// Scheduler period.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }
}

fn default_interval() -> u64 {
    900
}

fn default_progress_threshold() -> f64 {
    2.0
}

fn default_placeholder_max_bytes() -> u64 {
    500 * 1024
}

fn default_bundle_extension() -> String {
    "sdr".to_string()
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite settings database.
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            settings_path: default_settings_path(),
        }
    }
}

fn default_settings_path() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("cloudreader-sync").join("settings.db"))
        .unwrap_or_else(|| PathBuf::from("data/settings.db"))
}

/// Reachability check configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    /// TCP connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub timeout_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_connect_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    2000
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::SyncError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::SyncError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("cloudreader-sync.toml"),
            dirs::config_dir()
                .map(|p| p.join("cloudreader-sync").join("config.toml"))
                .unwrap_or_default(),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# cloudreader-sync configuration
# Server URL, credentials and library directory are stored in the settings
# database (see `cloudreader-sync login` and `cloudreader-sync set`).

[timeouts]
# JSON calls: stall timeout / total timeout in seconds
metadata = { block_seconds = 10, total_seconds = 30 }
# Book, placeholder and bundle transfers
transfer = { block_seconds = 15, total_seconds = 300 }

[sync]
# Auto-sync period in seconds
interval_seconds = 900
# Ask before jumping when devices differ by more than this many percent
progress_threshold = 2.0
# Files above this size are real books, never placeholders
placeholder_max_bytes = 512000
bundle_extension = "sdr"

[storage]
# settings_path = "/home/reader/.local/share/cloudreader-sync/settings.db"

[connectivity]
timeout_ms = 2000
"#
        .to_string()
    }
}
