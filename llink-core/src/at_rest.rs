/// At-rest lifecycle for the server's database file
///
/// Startup runs before the engine opens the file; shutdown runs after it
/// closes. Both are best effort: a failed transform is logged and the
/// application keeps going.
///
/// Startup recovery rules:
/// ```text
/// plaintext  encrypted   action
/// ---------  ---------   ------------------------------------------------
/// no         no          nothing
/// yes        no          nothing
/// no         yes         decrypt, then delete encrypted
/// yes        yes         encrypted is authoritative: delete plaintext,
///                        decrypt, delete encrypted. If the plaintext
///                        cannot be deleted, delete encrypted and keep
///                        the plaintext as-is.
/// ```

use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Paths;
use crate::crypto::{decrypt_file, encrypt_file, EncryptionKey};

/// File removal hook, swappable so tests can simulate a locked file
pub type RemoveFn = fn(&Path) -> io::Result<()>;

/// What startup did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupOutcome {
    /// Neither file existed
    NoDatabase,
    /// Only plaintext existed; left alone
    PlaintextReady,
    /// Encrypted copy decrypted into a fresh plaintext
    Decrypted,
    /// Stale plaintext discarded and replaced from the encrypted copy
    ReplacedStalePlaintext,
    /// Stale plaintext could not be deleted; encrypted copy abandoned
    KeptPlaintext,
    /// Decryption failed; encrypted copy left in place
    DecryptFailed,
}

/// What shutdown did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// No plaintext to protect
    NoDatabase,
    /// Encrypted and plaintext removed
    Encrypted,
    /// Encrypted, but plaintext could not be removed (still open?)
    EncryptedPlaintextRetained,
    /// Encryption failed; plaintext left in place
    EncryptFailed,
}

/// Key management plus startup/shutdown transforms for one database file
pub struct AtRestEncryptionManager {
    plaintext: PathBuf,
    encrypted: PathBuf,
    key_path: PathBuf,
    key: Mutex<Option<EncryptionKey>>,
    remove: RemoveFn,
}

impl AtRestEncryptionManager {
    pub fn new(
        plaintext: impl Into<PathBuf>,
        encrypted: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            plaintext: plaintext.into(),
            encrypted: encrypted.into(),
            key_path: key_path.into(),
            key: Mutex::new(None),
            remove: remove_file,
        }
    }

    pub fn from_paths(paths: &Paths) -> Self {
        Self::new(paths.database(), paths.encrypted_database(), paths.key_file())
    }

    /// Replace the file removal function.
    pub fn with_remove_fn(mut self, remove: RemoveFn) -> Self {
        self.remove = remove;
        self
    }

    pub fn plaintext_path(&self) -> &Path {
        &self.plaintext
    }

    pub fn encrypted_path(&self) -> &Path {
        &self.encrypted
    }

    /// Installation key, loaded or generated on first need.
    pub fn key(&self) -> Option<EncryptionKey> {
        let mut slot = self.key.lock();
        if slot.is_none() {
            match EncryptionKey::load_or_create(&self.key_path) {
                Ok(key) => *slot = Some(key),
                Err(e) => {
                    warn!(path = %self.key_path.display(), error = %e, "Encryption key unavailable");
                    return None;
                }
            }
        }
        slot.clone()
    }

    /// Encrypt `src` into `dst` with the installation key.
    pub fn encrypt_file(&self, src: &Path, dst: &Path) -> bool {
        match self.key() {
            Some(key) => encrypt_file(&key, src, dst),
            None => false,
        }
    }

    /// Decrypt `src` into `dst` with the installation key.
    pub fn decrypt_file(&self, src: &Path, dst: &Path) -> bool {
        match self.key() {
            Some(key) => decrypt_file(&key, src, dst),
            None => false,
        }
    }

    /// Prepare the plaintext working copy before the engine opens it.
    pub fn startup(&self) -> StartupOutcome {
        let has_plain = self.plaintext.exists();
        let has_enc = self.encrypted.exists();

        let outcome = match (has_plain, has_enc) {
            (false, false) => StartupOutcome::NoDatabase,
            (true, false) => StartupOutcome::PlaintextReady,
            (false, true) => {
                if self.decrypt_file(&self.encrypted, &self.plaintext) {
                    self.discard(&self.encrypted, "encrypted copy");
                    StartupOutcome::Decrypted
                } else {
                    StartupOutcome::DecryptFailed
                }
            }
            (true, true) => {
                // Previous shutdown was interrupted after encrypting
                warn!(
                    path = %self.plaintext.display(),
                    "Both plaintext and encrypted database present; treating encrypted copy as authoritative"
                );
                match (self.remove)(&self.plaintext) {
                    Ok(()) => {
                        self.remove_sidecars();
                        if self.decrypt_file(&self.encrypted, &self.plaintext) {
                            self.discard(&self.encrypted, "encrypted copy");
                            StartupOutcome::ReplacedStalePlaintext
                        } else {
                            StartupOutcome::DecryptFailed
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Stale plaintext is locked; keeping it and abandoning encrypted copy");
                        self.discard(&self.encrypted, "encrypted copy");
                        StartupOutcome::KeptPlaintext
                    }
                }
            }
        };

        info!(outcome = ?outcome, "At-rest startup complete");
        outcome
    }

    /// Protect the database file after the engine has closed it.
    ///
    /// The plaintext is deleted without overwriting first, so pages the
    /// engine may still have mapped are never scribbled on.
    pub fn shutdown(&self) -> ShutdownOutcome {
        if !self.plaintext.exists() {
            return ShutdownOutcome::NoDatabase;
        }

        let outcome = if !self.encrypt_file(&self.plaintext, &self.encrypted) {
            ShutdownOutcome::EncryptFailed
        } else {
            match (self.remove)(&self.plaintext) {
                Ok(()) => ShutdownOutcome::Encrypted,
                Err(e) => {
                    // The encrypted copy wins on next startup
                    warn!(
                        path = %self.plaintext.display(),
                        error = %e,
                        "Could not remove plaintext database after encryption"
                    );
                    ShutdownOutcome::EncryptedPlaintextRetained
                }
            }
        };

        info!(outcome = ?outcome, "At-rest shutdown complete");
        outcome
    }

    fn discard(&self, path: &Path, what: &str) {
        if let Err(e) = (self.remove)(path) {
            warn!(path = %path.display(), error = %e, "Failed to delete {}", what);
        }
    }

    /// Journal files left next to a discarded plaintext belong to it, not
    /// to the copy about to be decrypted.
    fn remove_sidecars(&self) {
        for suffix in ["-journal", "-wal", "-shm"] {
            let mut name = self.plaintext.as_os_str().to_owned();
            name.push(suffix);
            let sidecar = PathBuf::from(name);
            if sidecar.exists() {
                self.discard(&sidecar, "stale journal");
            }
        }
    }
}

fn remove_file(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> AtRestEncryptionManager {
        AtRestEncryptionManager::from_paths(&Paths::new(dir.path()))
    }

    fn locked_plaintext(path: &Path) -> io::Result<()> {
        if path.extension().and_then(|e| e.to_str()) == Some("db") {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "file in use"))
        } else {
            fs::remove_file(path)
        }
    }

    #[test]
    fn test_startup_no_files() {
        let dir = TempDir::new().unwrap();
        assert_eq!(manager(&dir).startup(), StartupOutcome::NoDatabase);
    }

    #[test]
    fn test_startup_plaintext_only_untouched() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        fs::write(m.plaintext_path(), b"live").unwrap();
        assert_eq!(m.startup(), StartupOutcome::PlaintextReady);
        assert_eq!(fs::read(m.plaintext_path()).unwrap(), b"live");
    }

    #[test]
    fn test_shutdown_then_startup_restores() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        fs::write(m.plaintext_path(), b"original pages").unwrap();

        assert_eq!(m.shutdown(), ShutdownOutcome::Encrypted);
        assert!(!m.plaintext_path().exists());
        assert!(m.encrypted_path().exists());

        // Fresh manager: key must come from disk
        let m = manager(&dir);
        assert_eq!(m.startup(), StartupOutcome::Decrypted);
        assert_eq!(fs::read(m.plaintext_path()).unwrap(), b"original pages");
        assert!(!m.encrypted_path().exists());
    }

    #[test]
    fn test_startup_both_present_replaces_plaintext() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        fs::write(m.plaintext_path(), b"authoritative").unwrap();
        assert!(m.encrypt_file(m.plaintext_path(), m.encrypted_path()));
        fs::write(m.plaintext_path(), b"torn write").unwrap();

        let journal = dir.path().join("ledger.db-journal");
        fs::write(&journal, b"hot").unwrap();

        assert_eq!(m.startup(), StartupOutcome::ReplacedStalePlaintext);
        assert_eq!(fs::read(m.plaintext_path()).unwrap(), b"authoritative");
        assert!(!m.encrypted_path().exists());
        assert!(!journal.exists());
    }

    #[test]
    fn test_startup_both_present_plaintext_locked() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir).with_remove_fn(locked_plaintext);
        fs::write(m.plaintext_path(), b"old").unwrap();
        assert!(m.encrypt_file(m.plaintext_path(), m.encrypted_path()));
        fs::write(m.plaintext_path(), b"current").unwrap();

        assert_eq!(m.startup(), StartupOutcome::KeptPlaintext);
        assert_eq!(fs::read(m.plaintext_path()).unwrap(), b"current");
        assert!(!m.encrypted_path().exists());
    }

    #[test]
    fn test_startup_corrupt_encrypted_left_in_place() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        fs::write(m.encrypted_path(), [0u8; 8]).unwrap();

        assert_eq!(m.startup(), StartupOutcome::DecryptFailed);
        assert!(!m.plaintext_path().exists());
        assert!(m.encrypted_path().exists());
    }

    #[test]
    fn test_shutdown_plaintext_locked() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir).with_remove_fn(locked_plaintext);
        fs::write(m.plaintext_path(), b"open file").unwrap();

        assert_eq!(m.shutdown(), ShutdownOutcome::EncryptedPlaintextRetained);
        assert!(m.plaintext_path().exists());
        assert!(m.encrypted_path().exists());
    }

    #[test]
    fn test_shutdown_no_plaintext() {
        let dir = TempDir::new().unwrap();
        assert_eq!(manager(&dir).shutdown(), ShutdownOutcome::NoDatabase);
    }

    #[test]
    fn test_unreadable_key_fails_safely() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        fs::write(dir.path().join(".db-key"), "not-a-key").unwrap();
        fs::write(m.plaintext_path(), b"data").unwrap();

        assert_eq!(m.shutdown(), ShutdownOutcome::EncryptFailed);
        assert_eq!(fs::read(m.plaintext_path()).unwrap(), b"data");
        assert!(!m.encrypted_path().exists());
    }
}
