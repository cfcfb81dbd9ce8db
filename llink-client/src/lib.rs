/// LedgerLink HTTP Client Library
///
/// This crate provides the client-mode database handle: every statement is
/// forwarded to a LedgerLink server over its `/query` endpoint.

pub mod error;
pub mod remote;

// Re-export key types
pub use error::{ClientError, Result};
pub use remote::{RemoteDatabaseHandle, DEFAULT_TIMEOUT};
pub use llink_core::{DatabaseHandle, ExecResult, Params, Row};
