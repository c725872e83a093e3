//! Encrypted profile persistence.
//!
//! Profiles live in a single TOML document keyed by host alias, so the
//! store holds at most one committed row per host. Secret fields are
//! routed through the cipher before they touch disk and every mutation
//! rewrites the document atomically (temp file + rename), leaving
//! either the old or the new state after a crash, never a mix.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cipher::{CipherBox, CipherError, Generation};
use super::key::{KeyError, KeyFile};
use super::profile::{DynamicForwardSpec, Profile, Secret, SpecParseError, TunnelSpec};

/// Maximum profile document size (1MB).
const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Current document format version.
const STORE_VERSION: u32 = 1;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No profile exists for the host.
    #[error("no profile for host '{0}'")]
    NotFound(String),

    /// A profile already exists for the target host.
    #[error("a profile for host '{0}' already exists")]
    AlreadyExists(String),

    /// The host alias was empty.
    #[error("host must not be empty")]
    EmptyHost,

    /// A stored secret could not be decrypted.
    #[error("could not decrypt secret for host '{host}'")]
    DecryptionFailed {
        /// Host whose secret failed to open.
        host: String,
        /// Classified cipher failure.
        #[source]
        source: CipherError,
    },

    /// A secret could not be encrypted for storage.
    #[error("could not encrypt secret for host '{host}'")]
    EncryptionFailed {
        /// Host whose secret failed to seal.
        host: String,
        /// Underlying cipher failure.
        #[source]
        source: CipherError,
    },

    /// The encryption key could not be loaded or created.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The backing file could not be read or written.
    #[error("store unavailable: {0}")]
    Io(#[from] io::Error),

    /// The backing file is not a valid profile document.
    #[error("store file is corrupt: {0}")]
    Parse(#[from] toml::de::Error),

    /// The profile document could not be serialized.
    #[error("store serialization failed: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A stored forward spec is not parseable.
    #[error(transparent)]
    Spec(#[from] SpecParseError),

    /// The backing file exceeds the size limit.
    #[error("store file too large (max {MAX_FILE_SIZE} bytes)")]
    FileTooLarge,
}

/// One persisted profile row. Secrets are held only as base64
/// ciphertext envelopes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StoredProfile {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    hostname: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identity_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    proxy_jump: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    folder: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tunnels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dynamic_forwards: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    note: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    extras: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_passphrase: Option<String>,
}

/// Complete profile document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreFile {
    /// Document format version.
    #[serde(default = "store_version")]
    version: u32,
    /// Profile rows keyed by host alias, sorted by key.
    #[serde(default)]
    profiles: BTreeMap<String, StoredProfile>,
}

fn store_version() -> u32 {
    STORE_VERSION
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            profiles: BTreeMap::new(),
        }
    }
}

/// Encrypted profile store.
///
/// The encryption key is resolved lazily on the first secret
/// operation and then held read-only for the process lifetime, so
/// non-secret reads keep working even when the key file is broken.
#[derive(Debug)]
pub struct ProfileStore {
    /// Path to the profile document.
    path: PathBuf,
    /// Key storage handle.
    keys: KeyFile,
    /// Cipher, initialized on first secret use.
    cipher: OnceLock<CipherBox>,
}

impl ProfileStore {
    /// Creates a store at the default path.
    ///
    /// Default path: `~/.sshvault/profiles.toml`
    #[must_use]
    pub fn new(keys: KeyFile) -> Self {
        Self {
            path: Self::default_path(),
            keys,
            cipher: OnceLock::new(),
        }
    }

    /// Creates a store with a custom document path.
    #[must_use]
    pub fn with_path(path: PathBuf, keys: KeyFile) -> Self {
        assert!(!path.as_os_str().is_empty(), "path must not be empty");

        Self {
            path,
            keys,
            cipher: OnceLock::new(),
        }
    }

    /// Returns the default profile document path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sshvault")
            .join("profiles.toml")
    }

    /// Returns the profile document path.
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Inserts or wholesale-replaces the row for `profile.host`.
    ///
    /// Secret fields are sealed before persistence. `Secret::Sealed`
    /// fields preserve the envelope already on disk, so callers that
    /// only touched non-secret fields never clobber stored secrets.
    pub fn upsert(&self, profile: &Profile) -> Result<(), StoreError> {
        if profile.host.is_empty() {
            return Err(StoreError::EmptyHost);
        }

        let mut file = self.read_file()?;
        let existing = file.profiles.get(&profile.host);
        let stored = self.seal_profile(profile, existing)?;

        file.profiles.insert(profile.host.clone(), stored);
        self.write_file(&file)
    }

    /// Returns the profile for `host`.
    ///
    /// With `include_secrets`, secret fields are decrypted and come
    /// back as `Secret::Plain`; a cipher failure surfaces as
    /// [`StoreError::DecryptionFailed`], distinct from `NotFound`.
    /// Without, stored secrets are reported as `Secret::Sealed`.
    pub fn get(&self, host: &str, include_secrets: bool) -> Result<Profile, StoreError> {
        let file = self.read_file()?;
        let stored = file
            .profiles
            .get(host)
            .ok_or_else(|| StoreError::NotFound(host.to_string()))?;

        self.unseal_profile(host, stored, include_secrets)
    }

    /// Returns true if a profile exists for `host`.
    pub fn contains(&self, host: &str) -> Result<bool, StoreError> {
        Ok(self.read_file()?.profiles.contains_key(host))
    }

    /// Deletes the row for `host`. Removing an absent host is not an
    /// error.
    pub fn remove(&self, host: &str) -> Result<(), StoreError> {
        let mut file = self.read_file()?;
        if file.profiles.remove(host).is_none() {
            return Ok(());
        }

        tracing::info!(host, "removed profile");
        self.write_file(&file)
    }

    /// Returns all profiles ordered by host alias, secrets sealed.
    pub fn list(&self) -> Result<Vec<Profile>, StoreError> {
        let file = self.read_file()?;
        file.profiles
            .iter()
            .map(|(host, stored)| self.unseal_profile(host, stored, false))
            .collect()
    }

    /// Moves the row for `old` to `new`, envelopes included.
    pub fn rename(&self, old: &str, new: &str) -> Result<(), StoreError> {
        if new.is_empty() {
            return Err(StoreError::EmptyHost);
        }

        let mut file = self.read_file()?;
        if file.profiles.contains_key(new) {
            return Err(StoreError::AlreadyExists(new.to_string()));
        }
        let stored = file
            .profiles
            .remove(old)
            .ok_or_else(|| StoreError::NotFound(old.to_string()))?;

        file.profiles.insert(new.to_string(), stored);
        self.write_file(&file)
    }

    /// Copies the row for `src` to `new`, envelopes included.
    pub fn duplicate(&self, src: &str, new: &str) -> Result<(), StoreError> {
        if new.is_empty() {
            return Err(StoreError::EmptyHost);
        }

        let mut file = self.read_file()?;
        if file.profiles.contains_key(new) {
            return Err(StoreError::AlreadyExists(new.to_string()));
        }
        let stored = file
            .profiles
            .get(src)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(src.to_string()))?;

        file.profiles.insert(new.to_string(), stored);
        self.write_file(&file)
    }

    /// Sets or clears the login password for `host`.
    pub fn set_password(&self, host: &str, password: Option<&str>) -> Result<(), StoreError> {
        let envelope = self.seal_plain(host, password)?;
        self.update_row(host, |row| row.password = envelope)
    }

    /// Sets or clears the key passphrase for `host`.
    pub fn set_key_passphrase(
        &self,
        host: &str,
        passphrase: Option<&str>,
    ) -> Result<(), StoreError> {
        let envelope = self.seal_plain(host, passphrase)?;
        self.update_row(host, |row| row.key_passphrase = envelope)
    }

    /// Sets or clears the jump host for `host`.
    pub fn set_proxy(&self, host: &str, proxy: Option<&str>) -> Result<(), StoreError> {
        self.update_row(host, |row| row.proxy_jump = proxy.map(str::to_string))
    }

    /// Sets or clears the listing folder for `host`.
    pub fn set_folder(&self, host: &str, folder: Option<&str>) -> Result<(), StoreError> {
        self.update_row(host, |row| row.folder = folder.map(str::to_string))
    }

    /// Sets or clears the note for `host`.
    pub fn set_note(&self, host: &str, note: Option<&str>) -> Result<(), StoreError> {
        self.update_row(host, |row| row.note = note.map(str::to_string))
    }

    /// Replaces the local port forwards for `host`.
    pub fn set_tunnels(&self, host: &str, tunnels: &[TunnelSpec]) -> Result<(), StoreError> {
        let specs: Vec<String> = tunnels.iter().map(ToString::to_string).collect();
        self.update_row(host, |row| row.tunnels = specs)
    }

    /// Replaces the dynamic SOCKS forwards for `host`.
    pub fn set_dynamic_forwards(
        &self,
        host: &str,
        forwards: &[DynamicForwardSpec],
    ) -> Result<(), StoreError> {
        let specs: Vec<String> = forwards.iter().map(ToString::to_string).collect();
        self.update_row(host, |row| row.dynamic_forwards = specs)
    }

    /// Returns the cipher, loading or creating the key on first use.
    fn cipher(&self) -> Result<&CipherBox, StoreError> {
        if let Some(cipher) = self.cipher.get() {
            return Ok(cipher);
        }
        let key = self.keys.load_or_create()?;
        Ok(self.cipher.get_or_init(|| CipherBox::new(&key)))
    }

    /// Applies a single-field mutation to an existing row and rewrites
    /// the document. Every row write also normalizes legacy envelopes.
    fn update_row<F>(&self, host: &str, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut StoredProfile),
    {
        let mut file = self.read_file()?;
        let row = file
            .profiles
            .get_mut(host)
            .ok_or_else(|| StoreError::NotFound(host.to_string()))?;

        mutate(row);
        row.password = row.password.take().map(|env| self.upgraded_envelope(&env));
        row.key_passphrase = row
            .key_passphrase
            .take()
            .map(|env| self.upgraded_envelope(&env));

        self.write_file(&file)
    }

    /// Seals an optional plaintext secret for `host`.
    fn seal_plain(&self, host: &str, value: Option<&str>) -> Result<Option<String>, StoreError> {
        match value {
            None => Ok(None),
            Some(plaintext) => {
                let envelope = self.cipher()?.encrypt_field(plaintext).map_err(|source| {
                    StoreError::EncryptionFailed {
                        host: host.to_string(),
                        source,
                    }
                })?;
                Ok(Some(envelope))
            }
        }
    }

    fn seal_profile(
        &self,
        profile: &Profile,
        existing: Option<&StoredProfile>,
    ) -> Result<StoredProfile, StoreError> {
        let password = self.seal_secret(
            &profile.host,
            &profile.password,
            existing.and_then(|row| row.password.as_deref()),
        )?;
        let key_passphrase = self.seal_secret(
            &profile.host,
            &profile.key_passphrase,
            existing.and_then(|row| row.key_passphrase.as_deref()),
        )?;

        Ok(StoredProfile {
            hostname: profile.hostname.clone(),
            user: profile.user.clone(),
            port: profile.port,
            identity_file: profile.identity_file.clone(),
            proxy_jump: profile.proxy_jump.clone(),
            folder: profile.folder.clone(),
            tunnels: profile.tunnels.iter().map(ToString::to_string).collect(),
            dynamic_forwards: profile
                .dynamic_forwards
                .iter()
                .map(ToString::to_string)
                .collect(),
            note: profile.note.clone(),
            extras: profile.extras.clone(),
            password,
            key_passphrase,
        })
    }

    /// Seals one secret field, merging with the envelope already on
    /// disk for the `Sealed` state.
    fn seal_secret(
        &self,
        host: &str,
        secret: &Secret,
        existing: Option<&str>,
    ) -> Result<Option<String>, StoreError> {
        match secret {
            Secret::None => Ok(None),
            Secret::Sealed => Ok(existing.map(|env| self.upgraded_envelope(env))),
            Secret::Plain(value) => {
                let cipher = self.cipher()?;

                // Unchanged value keeps its envelope, so re-upserting an
                // identical profile leaves the document byte-identical.
                if let Some(envelope) = existing {
                    if let Ok((current, Generation::Current)) =
                        cipher.decrypt_field_classified(envelope)
                    {
                        if current == *value {
                            return Ok(Some(envelope.to_string()));
                        }
                    }
                }

                cipher
                    .encrypt_field(value)
                    .map(Some)
                    .map_err(|source| StoreError::EncryptionFailed {
                        host: host.to_string(),
                        source,
                    })
            }
        }
    }

    /// Write-time upgrade: re-seals a legacy envelope in the current
    /// format. An envelope that cannot be opened (key unavailable,
    /// tampered, malformed) is carried forward untouched so a write to
    /// an unrelated field never destroys stored ciphertext.
    fn upgraded_envelope(&self, envelope: &str) -> String {
        let Ok(cipher) = self.cipher() else {
            return envelope.to_string();
        };

        match cipher.decrypt_field_classified(envelope) {
            Ok((value, Generation::Legacy)) => {
                tracing::debug!("re-sealing legacy envelope in current format");
                cipher
                    .encrypt_field(&value)
                    .unwrap_or_else(|_| envelope.to_string())
            }
            _ => envelope.to_string(),
        }
    }

    fn unseal_profile(
        &self,
        host: &str,
        stored: &StoredProfile,
        include_secrets: bool,
    ) -> Result<Profile, StoreError> {
        let tunnels = stored
            .tunnels
            .iter()
            .map(|spec| spec.parse())
            .collect::<Result<Vec<TunnelSpec>, _>>()?;
        let dynamic_forwards = stored
            .dynamic_forwards
            .iter()
            .map(|spec| spec.parse())
            .collect::<Result<Vec<DynamicForwardSpec>, _>>()?;

        Ok(Profile {
            host: host.to_string(),
            hostname: stored.hostname.clone(),
            user: stored.user.clone(),
            port: stored.port,
            identity_file: stored.identity_file.clone(),
            proxy_jump: stored.proxy_jump.clone(),
            folder: stored.folder.clone(),
            tunnels,
            dynamic_forwards,
            note: stored.note.clone(),
            extras: stored.extras.clone(),
            password: self.unseal_secret(host, stored.password.as_deref(), include_secrets)?,
            key_passphrase: self.unseal_secret(
                host,
                stored.key_passphrase.as_deref(),
                include_secrets,
            )?,
        })
    }

    fn unseal_secret(
        &self,
        host: &str,
        envelope: Option<&str>,
        include_secrets: bool,
    ) -> Result<Secret, StoreError> {
        match envelope {
            None => Ok(Secret::None),
            Some(_) if !include_secrets => Ok(Secret::Sealed),
            Some(envelope) => {
                let (value, generation) = self
                    .cipher()?
                    .decrypt_field_classified(envelope)
                    .map_err(|source| StoreError::DecryptionFailed {
                        host: host.to_string(),
                        source,
                    })?;
                if generation == Generation::Legacy {
                    tracing::debug!(host, "secret still in legacy format");
                }
                Ok(Secret::Plain(value))
            }
        }
    }

    fn read_file(&self) -> Result<StoreFile, StoreError> {
        if !self.path.exists() {
            return Ok(StoreFile::default());
        }

        let metadata = fs::metadata(&self.path)?;
        if metadata.len() > MAX_FILE_SIZE {
            return Err(StoreError::FileTooLarge);
        }

        let content = fs::read_to_string(&self.path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Writes the document atomically: temp file, flush, rename.
    fn write_file(&self, file: &StoreFile) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(file)?;
        let temp_path = self.path.with_extension("tmp");

        {
            let mut out = fs::File::create(&temp_path)?;
            out.write_all(content.as_bytes())?;
            out.flush()?;
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
