/// At-rest file encryption with AES-256-GCM
///
/// Envelope layout:
/// ```text
/// [iv(16)] [auth tag(16)] [ciphertext(n)]
/// ```
/// The 16-byte IV is random per encryption. File-level helpers never
/// return errors: they log the cause and report success as a bool.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::{Error, Result};

/// AES-256-GCM with a 128-bit nonce
type FileCipher = AesGcm<Aes256, U16>;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 16;
pub const TAG_LEN: usize = 16;
/// Smallest valid envelope: IV and tag around an empty ciphertext
pub const MIN_ENVELOPE_LEN: usize = IV_LEN + TAG_LEN;

/// 256-bit installation key
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

impl EncryptionKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(text: &str) -> Result<Self> {
        let raw = hex::decode(text.trim())
            .map_err(|e| Error::EncryptionError(format!("Key file is not hex: {}", e)))?;
        let bytes: [u8; KEY_LEN] = raw.try_into().map_err(|v: Vec<u8>| {
            Error::EncryptionError(format!("Key must be {} bytes, got {}", KEY_LEN, v.len()))
        })?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Read the key file, creating it with owner-only permissions on first use.
    ///
    /// The key is never rotated; losing it makes the encrypted copy unreadable.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let text = fs::read_to_string(path)?;
            return Self::from_hex(&text);
        }

        let key = Self::generate();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        write_private(path, key.to_hex().as_bytes())?;
        info!(path = %path.display(), "Generated database encryption key");
        Ok(key)
    }

    fn cipher(&self) -> FileCipher {
        FileCipher::new(GenericArray::from_slice(&self.0))
    }
}

/// Encrypt `plaintext` into an envelope.
pub fn seal(key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let mut buffer = plaintext.to_vec();
    let tag = key
        .cipher()
        .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
        .map_err(|e| Error::EncryptionError(format!("Encryption failed: {}", e)))?;

    let mut envelope = Vec::with_capacity(MIN_ENVELOPE_LEN + buffer.len());
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(&tag);
    envelope.extend_from_slice(&buffer);
    Ok(envelope)
}

/// Decrypt and authenticate an envelope.
pub fn open(key: &EncryptionKey, envelope: &[u8]) -> Result<Vec<u8>> {
    if envelope.len() < MIN_ENVELOPE_LEN {
        return Err(Error::EncryptionError(format!(
            "Envelope too short: {} bytes",
            envelope.len()
        )));
    }

    let (iv, rest) = envelope.split_at(IV_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let mut buffer = ciphertext.to_vec();
    key.cipher()
        .decrypt_in_place_detached(
            GenericArray::from_slice(iv),
            b"",
            &mut buffer,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| Error::EncryptionError("Authentication failed".into()))?;
    Ok(buffer)
}

/// Encrypt the file at `src` into an envelope at `dst`.
///
/// Returns false (after logging) on any failure.
pub fn encrypt_file(key: &EncryptionKey, src: &Path, dst: &Path) -> bool {
    let result = fs::read(src)
        .map_err(Error::from)
        .and_then(|plain| seal(key, &plain))
        .and_then(|envelope| write_replacing(dst, &envelope));

    match result {
        Ok(()) => {
            debug!(src = %src.display(), dst = %dst.display(), "Encrypted file");
            true
        }
        Err(e) => {
            error!(src = %src.display(), error = %e, "Failed to encrypt file");
            false
        }
    }
}

/// Decrypt the envelope at `src` into `dst`.
///
/// Missing, short or tampered input returns false and leaves `dst` untouched.
pub fn decrypt_file(key: &EncryptionKey, src: &Path, dst: &Path) -> bool {
    let result = fs::read(src)
        .map_err(Error::from)
        .and_then(|envelope| open(key, &envelope))
        .and_then(|plain| write_replacing(dst, &plain));

    match result {
        Ok(()) => {
            debug!(src = %src.display(), dst = %dst.display(), "Decrypted file");
            true
        }
        Err(e) => {
            error!(src = %src.display(), error = %e, "Failed to decrypt file");
            false
        }
    }
}

fn staging_path(dst: &Path) -> PathBuf {
    let mut name = dst.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write through a staging file and rename, so `dst` is never half written.
fn write_replacing(dst: &Path, data: &[u8]) -> Result<()> {
    let staging = staging_path(dst);
    if let Err(e) = write_private(&staging, data) {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }
    fs::rename(&staging, dst).map_err(|e| {
        let _ = fs::remove_file(&staging);
        Error::Io(e)
    })
}

fn write_private(path: &Path, data: &[u8]) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_envelope_layout() {
        let key = EncryptionKey::generate();
        let envelope = seal(&key, b"ledger").unwrap();
        assert_eq!(envelope.len(), MIN_ENVELOPE_LEN + 6);
        assert_eq!(open(&key, &envelope).unwrap(), b"ledger");
    }

    #[test]
    fn test_fresh_iv_per_encryption() {
        let key = EncryptionKey::generate();
        let a = seal(&key, b"same").unwrap();
        let b = seal(&key, b"same").unwrap();
        assert_ne!(a[..IV_LEN], b[..IV_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = seal(&EncryptionKey::generate(), b"secret").unwrap();
        assert!(open(&EncryptionKey::generate(), &envelope).is_err());
    }

    #[test]
    fn test_short_envelope_rejected() {
        let key = EncryptionKey::generate();
        let err = open(&key, &[0u8; MIN_ENVELOPE_LEN - 1]).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn test_key_hex_round_trip() {
        let key = EncryptionKey::from_bytes([7u8; KEY_LEN]);
        assert_eq!(EncryptionKey::from_hex(&key.to_hex()).unwrap(), key);
        assert!(EncryptionKey::from_hex("abcd").is_err());
        assert!(EncryptionKey::from_hex("zz").is_err());
        assert_eq!(format!("{:?}", key), "EncryptionKey(..)");
    }

    #[test]
    fn test_key_file_created_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".db-key");

        let first = EncryptionKey::load_or_create(&path).unwrap();
        let second = EncryptionKey::load_or_create(&path).unwrap();
        assert_eq!(first, second);

        let on_disk = fs::read_to_string(&path).unwrap();
        assert_eq!(on_disk.len(), KEY_LEN * 2);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let key = EncryptionKey::generate();
        let plain = dir.path().join("ledger.db");
        let enc = dir.path().join("ledger.db.enc");
        let out = dir.path().join("restored.db");
        fs::write(&plain, b"SQLite format 3\0pages").unwrap();

        assert!(encrypt_file(&key, &plain, &enc));
        assert!(decrypt_file(&key, &enc, &out));
        assert_eq!(fs::read(&out).unwrap(), fs::read(&plain).unwrap());
        assert!(!staging_path(&out).exists());
    }

    #[test]
    fn test_decrypt_failure_leaves_no_output() {
        let dir = TempDir::new().unwrap();
        let key = EncryptionKey::generate();
        let enc = dir.path().join("ledger.db.enc");
        let out = dir.path().join("ledger.db");

        // Missing input
        assert!(!decrypt_file(&key, &enc, &out));
        assert!(!out.exists());

        // Short input
        fs::write(&enc, [1u8; 10]).unwrap();
        assert!(!decrypt_file(&key, &enc, &out));
        assert!(!out.exists());

        // Corrupt tag
        let mut envelope = seal(&key, b"rows").unwrap();
        envelope[IV_LEN] ^= 0x01;
        fs::write(&enc, &envelope).unwrap();
        assert!(!decrypt_file(&key, &enc, &out));
        assert!(!out.exists());
        assert!(!staging_path(&out).exists());
    }

    #[test]
    fn test_encrypt_missing_source() {
        let dir = TempDir::new().unwrap();
        let key = EncryptionKey::generate();
        let enc = dir.path().join("x.enc");
        assert!(!encrypt_file(&key, &dir.path().join("absent"), &enc));
        assert!(!enc.exists());
    }

    proptest! {
        #[test]
        fn prop_round_trip(data in proptest::collection::vec(any::<u8>(), 1..2048)) {
            let key = EncryptionKey::from_bytes([42u8; KEY_LEN]);
            let envelope = seal(&key, &data).unwrap();
            prop_assert_eq!(open(&key, &envelope).unwrap(), data);
        }

        #[test]
        fn prop_any_flipped_byte_fails(
            data in proptest::collection::vec(any::<u8>(), 1..512),
            pos in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let key = EncryptionKey::from_bytes([9u8; KEY_LEN]);
            let mut envelope = seal(&key, &data).unwrap();
            let idx = pos.index(envelope.len());
            envelope[idx] ^= 1 << bit;
            prop_assert!(open(&key, &envelope).is_err());
        }
    }
}
