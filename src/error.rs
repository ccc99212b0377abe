use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("request failed: {0}")]
    Transport(reqwest::Error),
    #[error("HTTP {status} from {endpoint}")]
    Status { endpoint: String, status: u16 },
    #[error("unexpected response from {endpoint}: {reason}")]
    Payload { endpoint: String, reason: String },
}

// Request urls carry the server password as a query parameter.
impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.without_url())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no data directory available")]
    NoDataDir,
    #[error("could not create cache directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt cached row for chat {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config directory available")]
    NoConfigDir,
    #[error("config i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid legacy json state: {0}")]
    Legacy(#[from] serde_json::Error),
}

/// Error returned by a [`crate::sync::scheduler::Syncer`]. The scheduler logs
/// it and keeps ticking.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Other(String),
}

impl SyncError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}
