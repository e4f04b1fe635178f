use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("a memory optimizer is already mounted in this process")]
    AlreadyMounted,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serde JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML: {0}")]
    Toml(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("no tokio runtime available for batch processing")]
    NoRuntime,

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

/// Failure reported by a [`crate::preload::ResourceFetcher`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PreloadError {
    #[error("preload of {url} failed: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("preload of {url} rejected with status {status}")]
    Rejected { url: String, status: u16 },
}

impl PreloadError {
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Unreachable { url, .. } | Self::Rejected { url, .. } => url,
        }
    }
}
