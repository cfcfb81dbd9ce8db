pub mod error;
pub mod value;
pub mod handle;
pub mod local;
pub mod config;
pub mod crypto;
pub mod at_rest;

pub use error::{Error, Result};
pub use value::{Params, Row};
pub use handle::{DatabaseHandle, ExecResult, HandleKind, PreparedStatement, QueryMethod, QueryOutput};
pub use local::LocalDatabaseHandle;
pub use config::{DeploymentMode, NetworkConfig, Paths};
pub use crypto::{decrypt_file, encrypt_file, EncryptionKey};
pub use at_rest::{AtRestEncryptionManager, ShutdownOutcome, StartupOutcome};
