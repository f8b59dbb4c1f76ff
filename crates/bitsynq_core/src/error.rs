//! Error type shared by the ledger, the distribution service and config loading.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The lexicon file could not be parsed or one of its patterns does not compile.
    #[error("Lexicon error: {0}")]
    Lexicon(String),

    /// Caller-level validation, rejected before any write happens.
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The external ledger refused or failed the transfer batch.
    #[error("Settlement failed: {0}")]
    Settlement(String),

    /// Allocation arithmetic produced a state that should be unreachable.
    #[error("Internal consistency error: {0}")]
    Inconsistent(String),
}
