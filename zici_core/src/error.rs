//! Error types for the zici_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for zici_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The item catalog could not be loaded (missing, empty or malformed source).
    /// No session can start without a catalog.
    #[error("Character data unavailable: {0}")]
    DataUnavailable(String),

    /// A save or load against the user store failed. Recoverable: the
    /// in-memory copy stays authoritative and the next mutation retries.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for failures the engine survives by continuing in memory.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::PersistenceFailure(_) | Error::Io(_) | Error::Json(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::PersistenceFailure("disk full".into()).is_recoverable());
        assert!(Error::Io(io::Error::new(io::ErrorKind::NotFound, "gone")).is_recoverable());
        assert!(!Error::DataUnavailable("no rows".into()).is_recoverable());
        assert!(!Error::Config("bad".into()).is_recoverable());
    }
}
