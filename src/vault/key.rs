//! Encryption key lifecycle: generation, persistence, retrieval.
//!
//! A single 256-bit symmetric key protects all secret fields. It is
//! generated once from the OS RNG, persisted base64-encoded in a
//! user-only file, and loaded on every subsequent start. The key is
//! never rotated automatically and never regenerated over an existing
//! but unreadable file.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

/// Symmetric key size in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// Errors that can occur while loading or creating the key.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The key file could not be read or written.
    #[error("key storage unavailable: {0}")]
    Unavailable(#[from] io::Error),

    /// The key file exists but does not hold a valid key.
    #[error("persisted key is malformed")]
    Malformed,
}

/// A 256-bit symmetric encryption key.
///
/// Read-only after construction. The `Debug` impl never prints key
/// material.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generates a fresh key from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// File-backed key storage.
#[derive(Debug, Clone)]
pub struct KeyFile {
    /// Path to the key file.
    path: PathBuf,
}

impl KeyFile {
    /// Creates a key file handle at the default path.
    ///
    /// Default path: `~/.sshvault/key`
    #[must_use]
    pub fn new() -> Self {
        Self {
            path: Self::default_path(),
        }
    }

    /// Creates a key file handle at a custom path.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        assert!(!path.as_os_str().is_empty(), "path must not be empty");

        Self { path }
    }

    /// Returns the default key file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sshvault")
            .join("key")
    }

    /// Returns the key file path.
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Loads the persisted key, generating and persisting one on first
    /// use.
    ///
    /// A missing file triggers generation; any other read failure is
    /// surfaced as [`KeyError::Unavailable`] so an existing key is
    /// never silently replaced.
    pub fn load_or_create(&self) -> Result<EncryptionKey, KeyError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Self::decode(text.trim()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let key = EncryptionKey::generate();
                self.persist(&key)?;
                tracing::info!("generated new encryption key at {}", self.path.display());
                Ok(key)
            }
            Err(e) => Err(KeyError::Unavailable(e)),
        }
    }

    fn decode(text: &str) -> Result<EncryptionKey, KeyError> {
        let raw = BASE64.decode(text).map_err(|_| KeyError::Malformed)?;
        let bytes: [u8; KEY_SIZE] = raw.try_into().map_err(|_| KeyError::Malformed)?;
        Ok(EncryptionKey::from_bytes(bytes))
    }

    /// Writes the key atomically (temp file + rename), user-only perms.
    fn persist(&self, key: &EncryptionKey) -> Result<(), KeyError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let encoded = BASE64.encode(key.as_bytes());
        let temp_path = self.path.with_extension("tmp");

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(encoded.as_bytes())?;
            file.write_all(b"\n")?;
            file.flush()?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}

impl Default for KeyFile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_create_then_load_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let keys = KeyFile::with_path(dir.path().join("key"));

        let first = keys.load_or_create().unwrap();
        let second = keys.load_or_create().unwrap();

        assert_eq!(first, second);
        assert!(keys.path().exists());
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(EncryptionKey::generate(), EncryptionKey::generate());
    }

    #[test]
    fn test_malformed_key_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        std::fs::write(&path, "not base64!!!").unwrap();

        let keys = KeyFile::with_path(path.clone());
        assert!(matches!(keys.load_or_create(), Err(KeyError::Malformed)));

        // The broken file must survive untouched.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not base64!!!");
    }

    #[test]
    fn test_wrong_length_key_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        std::fs::write(&path, BASE64.encode([0u8; 16])).unwrap();

        let keys = KeyFile::with_path(path);
        assert!(matches!(keys.load_or_create(), Err(KeyError::Malformed)));
    }

    #[test]
    fn test_debug_never_prints_key_material() {
        let key = EncryptionKey::from_bytes([0xAB; KEY_SIZE]);
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains("AB"));
        assert!(!rendered.contains("171"));
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_user_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let keys = KeyFile::with_path(dir.path().join("key"));
        keys.load_or_create().unwrap();

        let mode = std::fs::metadata(keys.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
