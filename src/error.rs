use thiserror::Error;

/// Main error type for the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing or invalid configuration (e.g. no server configured).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication rejected by the server.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// No response from the server (connection failure, timeout).
    #[error("Network error: {0}")]
    Network(String),

    /// Server answered with a non-2xx status.
    #[error("{message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Message decoded from the body, or `HTTP <status>`.
        message: String,
    },

    /// Malformed payload on a successful response.
    #[error("Decode error: {0}")]
    Decode(String),

    /// I/O error.
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    /// Archive pack/unpack failure.
    #[error("Archive error: {0}")]
    Codec(String),

    /// Manifest path escapes the library root.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Settings database error.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl SyncError {
    /// Whether the error means the server could not be reached at all.
    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, SyncError>;
