use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] rusqlite::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Database is closed")]
    Closed,

    #[error("Remote error: {0}")]
    Remote(Box<dyn std::error::Error + Send + Sync>),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns a stable error code for this error variant.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "IO_ERROR",
            Error::Engine(_) => "ENGINE_ERROR",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::EncryptionError(_) => "ENCRYPTION_ERROR",
            Error::Closed => "CLOSED",
            Error::Remote(_) => "REMOTE_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if this error is potentially retryable.
    ///
    /// Busy/locked engine states and I/O hiccups are transient; malformed
    /// statements and configuration problems are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Engine(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Error::Remote(_) => true,
            Error::Engine(_)
            | Error::InvalidArgument(_)
            | Error::InvalidConfig(_)
            | Error::EncryptionError(_)
            | Error::Closed
            | Error::Internal(_) => false,
        }
    }

    /// Downcast the cause of a `Remote` error, e.g. to the client's error type.
    pub fn remote_cause<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Error::Remote(cause) => cause.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Wraps the error in an Internal error carrying operation context.
    pub fn with_context(self, context: &str) -> Error {
        Error::Internal(format!("{}: {}", context, self))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
