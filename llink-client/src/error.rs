/// Error types for the LedgerLink client
///
/// Network failures are split by cause so a setup screen can tell an
/// unreachable server apart from a wrong key.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Connection refused by {0} - is the server running?")]
    ConnectionRefused(String),

    #[error("Cannot resolve host {0}")]
    HostNotFound(String),

    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Returns true if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::ConnectionRefused(_)
            | ClientError::Timeout(_)
            | ClientError::Connection(_)
            | ClientError::RateLimited => true,
            ClientError::Server { status, .. } => *status >= 500,
            ClientError::InvalidApiKey
            | ClientError::HostNotFound(_)
            | ClientError::Protocol(_)
            | ClientError::Internal(_) => false,
        }
    }

    /// True for failures to reach the server at all, as opposed to the
    /// server answering with an error.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionRefused(_)
                | ClientError::HostNotFound(_)
                | ClientError::Timeout(_)
                | ClientError::Connection(_)
        )
    }
}

impl From<ClientError> for llink_core::Error {
    fn from(err: ClientError) -> Self {
        llink_core::Error::Remote(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
