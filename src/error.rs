//! Error types for the semstore crate.

use thiserror::Error;

/// Top-level error type shared by all components.
#[derive(Error, Debug)]
pub enum Error {
    /// File missing or unreadable, disk full, permission denied.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid CLI flag values or invalid log level.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Embedding requested before a model was loaded.
    #[error("embedding model not loaded")]
    EngineNotLoaded,

    /// Tensor rank or dimension mismatch on a model boundary.
    #[error("unexpected model shape: {0}")]
    ModelShape(String),

    /// Underlying relational storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A user-supplied document id already exists.
    #[error("document id already exists: {0}")]
    IdConflict(String),

    /// Get/update/delete addressed an unknown document id.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Missing or malformed field in a request body.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Tokenizer or model execution failure, surfaced verbatim.
    #[error("inference error: {0}")]
    Inference(String),

    /// The coordinator has shut down and accepts no further operations.
    #[error("coordinator is closed")]
    Closed,

    /// Failure in the service plumbing itself (e.g. a worker task died).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

/// Result type for semstore operations.
pub type Result<T> = std::result::Result<T, Error>;
