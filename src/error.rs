use std::io;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CinderError>;

/// Errors surfaced by the storage engine.
///
/// A payload that has been reclaimed by the circular writer is *not* an
/// error; lookups report it as an absent stream.
#[derive(Debug, Error)]
pub enum CinderError {
    /// Underlying block device or file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A caller-supplied argument or configuration value is unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Persisted state failed validation and cannot be trusted.
    #[error("corruption detected: {0}")]
    Corruption(String),
}
