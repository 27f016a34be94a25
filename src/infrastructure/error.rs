use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Remote store error: {0}")]
    Store(String),
    #[error("Audio error: {0}")]
    Audio(String),
    #[error("Navigation error: {0}")]
    Navigation(String),
}

impl SyncError {
    pub fn poisoned(what: &str, error: impl std::fmt::Display) -> Self {
        Self::Store(format!("{what} lock poisoned: {error}"))
    }
}
