//! Integration tests for the encrypted profile store.
//!
//! These tests verify that:
//! - Secrets round-trip through the store and survive process restarts
//! - Tampered envelopes are rejected instead of decrypting to garbage
//! - Values sealed in the retired CFB format still decrypt, and are
//!   re-sealed in the current format on the next write
//! - Partial updates never clobber fields the caller did not touch
//! - ssh_config import/export round-trips through the store

use std::fs;
use std::path::Path;

use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tempfile::TempDir;

use sshvault::sshconfig;
use sshvault::vault::{
    CipherError, KeyFile, Profile, ProfileStore, Secret, StoreError, TunnelSpec,
};

// ============================================================================
// Helpers
// ============================================================================

fn open_store(dir: &TempDir) -> ProfileStore {
    let keys = KeyFile::with_path(dir.path().join("key"));
    ProfileStore::with_path(dir.path().join("profiles.toml"), keys)
}

fn db_profile(host: &str, password: &str) -> Profile {
    let mut profile = Profile::new(host);
    profile.hostname = format!("{host}.example.com");
    profile.user = "admin".to_string();
    profile.port = Some(2222);
    profile.tunnels = vec![TunnelSpec::new(5432, "localhost".to_string(), 5432)];
    profile.note = Some("managed database".to_string());
    profile.password = Secret::Plain(password.to_string());
    profile
}

/// Rewrites one host's stored password envelope through generic TOML
/// editing, simulating on-disk corruption or pre-migration data.
fn rewrite_stored_password(path: &Path, host: &str, envelope: String) {
    let content = fs::read_to_string(path).expect("read store file");
    let mut doc: toml::Value = toml::from_str(&content).expect("parse store file");
    doc["profiles"][host]["password"] = toml::Value::String(envelope);
    fs::write(path, toml::to_string_pretty(&doc).expect("serialize")).expect("write store file");
}

fn stored_password_envelope(path: &Path, host: &str) -> String {
    let content = fs::read_to_string(path).expect("read store file");
    let doc: toml::Value = toml::from_str(&content).expect("parse store file");
    doc["profiles"][host]["password"]
        .as_str()
        .expect("password envelope")
        .to_string()
}

/// Seals a value the way the pre-migration code did: AES-256-CFB with
/// a 16-byte IV prepended, base64-encoded.
fn seal_legacy(key: &[u8; 32], plaintext: &str) -> String {
    type Aes256CfbEnc = cfb_mode::Encryptor<aes::Aes256>;

    let iv = [3u8; 16];
    let mut buf = plaintext.as_bytes().to_vec();
    Aes256CfbEnc::new_from_slices(key, &iv)
        .expect("fixed-size key and iv")
        .encrypt(&mut buf);

    let mut raw = iv.to_vec();
    raw.extend_from_slice(&buf);
    BASE64.encode(raw)
}

// ============================================================================
// Secret round-trip
// ============================================================================

#[test]
fn test_password_roundtrip_through_store() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);

    store.upsert(&db_profile("db1", "s3cret")).expect("upsert");

    let loaded = store.get("db1", true).expect("get with secrets");
    assert_eq!(loaded.password, Secret::Plain("s3cret".to_string()));
    assert_eq!(loaded.hostname, "db1.example.com");
}

#[test]
fn test_secret_survives_reopen() {
    let dir = TempDir::new().expect("tempdir");

    open_store(&dir)
        .upsert(&db_profile("db1", "s3cret"))
        .expect("upsert");

    // A second store instance stands in for a fresh process.
    let reopened = open_store(&dir);
    assert_eq!(
        reopened.get("db1", true).expect("get").password,
        Secret::Plain("s3cret".to_string())
    );
}

#[test]
fn test_plaintext_never_hits_disk() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);

    store
        .upsert(&db_profile("db1", "extremely-unique-password"))
        .expect("upsert");

    let raw = fs::read_to_string(store.path()).expect("read store file");
    assert!(!raw.contains("extremely-unique-password"));
}

// ============================================================================
// Tamper detection
// ============================================================================

#[test]
fn test_corrupted_envelope_reports_authentication_failure() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);

    store.upsert(&db_profile("db1", "s3cret")).expect("upsert");

    // Flip the last byte of the ciphertext portion.
    let envelope = stored_password_envelope(store.path(), "db1");
    let mut raw = BASE64.decode(&envelope).expect("decode envelope");
    let last = raw.len() - 1;
    raw[last] ^= 0x01;
    rewrite_stored_password(store.path(), "db1", BASE64.encode(&raw));

    match store.get("db1", true) {
        Err(StoreError::DecryptionFailed { host, source }) => {
            assert_eq!(host, "db1");
            assert!(matches!(source, CipherError::AuthenticationFailed));
        }
        other => panic!("expected DecryptionFailed, got {:?}", other.map(|p| p.host)),
    }

    // Non-secret access is unaffected.
    let probe = store.get("db1", false).expect("probe");
    assert_eq!(probe.password, Secret::Sealed);
}

#[test]
fn test_truncated_envelope_is_malformed() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);

    store.upsert(&db_profile("db1", "s3cret")).expect("upsert");
    rewrite_stored_password(store.path(), "db1", BASE64.encode([0u8; 4]));

    match store.get("db1", true) {
        Err(StoreError::DecryptionFailed { source, .. }) => {
            assert!(matches!(source, CipherError::Malformed(_)));
        }
        other => panic!("expected DecryptionFailed, got {:?}", other.map(|p| p.host)),
    }
}

// ============================================================================
// Legacy format compatibility
// ============================================================================

#[test]
fn test_legacy_envelope_decrypts_and_upgrades_on_write() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);

    store.upsert(&db_profile("db1", "placeholder")).expect("upsert");

    let key = KeyFile::with_path(dir.path().join("key"))
        .load_or_create()
        .expect("load key");
    let legacy = seal_legacy(key.as_bytes(), "pre-migration-pw");
    rewrite_stored_password(store.path(), "db1", legacy.clone());

    // The legacy value reads back bit-identical, without rewriting the
    // document.
    let before = fs::read_to_string(store.path()).expect("read");
    assert_eq!(
        store.get("db1", true).expect("get").password,
        Secret::Plain("pre-migration-pw".to_string())
    );
    assert_eq!(before, fs::read_to_string(store.path()).expect("read"));

    // Any write to the row re-seals it in the current format.
    store.set_note("db1", Some("touched")).expect("set note");
    let upgraded = stored_password_envelope(store.path(), "db1");
    assert_ne!(upgraded, legacy);
    assert_eq!(
        store.get("db1", true).expect("get").password,
        Secret::Plain("pre-migration-pw".to_string())
    );
}

// ============================================================================
// Upsert semantics
// ============================================================================

#[test]
fn test_upsert_is_idempotent() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);
    let profile = db_profile("db1", "s3cret");

    store.upsert(&profile).expect("first upsert");
    let first = fs::read_to_string(store.path()).expect("read");

    store.upsert(&profile).expect("second upsert");
    let second = fs::read_to_string(store.path()).expect("read");

    assert_eq!(first, second);
    assert_eq!(store.list().expect("list").len(), 1);
}

#[test]
fn test_uniqueness_after_repeated_upserts() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);

    for n in 0..4 {
        let mut profile = db_profile("db1", &format!("password-{n}"));
        profile.folder = Some(format!("generation-{n}"));
        store.upsert(&profile).expect("upsert");
    }

    let listed = store.list().expect("list");
    assert_eq!(listed.len(), 1);

    let latest = store.get("db1", true).expect("get");
    assert_eq!(latest.folder.as_deref(), Some("generation-3"));
    assert_eq!(latest.password, Secret::Plain("password-3".to_string()));
}

#[test]
fn test_partial_update_preserves_untouched_fields() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);

    store.upsert(&db_profile("db1", "s3cret")).expect("upsert");

    // Change only the proxy through the dedicated setter.
    store.set_proxy("db1", Some("bastion")).expect("set proxy");

    let loaded = store.get("db1", true).expect("get");
    assert_eq!(loaded.proxy_jump.as_deref(), Some("bastion"));
    assert_eq!(loaded.password, Secret::Plain("s3cret".to_string()));
    assert_eq!(loaded.note.as_deref(), Some("managed database"));
    assert_eq!(loaded.tunnels.len(), 1);
}

#[test]
fn test_read_modify_write_without_secrets_keeps_them() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);

    store.upsert(&db_profile("db1", "s3cret")).expect("upsert");

    // A caller that never saw the plaintext edits the profile.
    let mut edited = store.get("db1", false).expect("get without secrets");
    assert_eq!(edited.password, Secret::Sealed);
    edited.folder = Some("prod".to_string());
    store.upsert(&edited).expect("upsert edited");

    let loaded = store.get("db1", true).expect("get with secrets");
    assert_eq!(loaded.folder.as_deref(), Some("prod"));
    assert_eq!(loaded.password, Secret::Plain("s3cret".to_string()));
}

#[test]
fn test_remove_erases_row_and_ciphertext() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);

    store.upsert(&db_profile("db1", "s3cret")).expect("upsert");
    store.remove("db1").expect("remove");

    assert!(matches!(
        store.get("db1", false),
        Err(StoreError::NotFound(_))
    ));
    let raw = fs::read_to_string(store.path()).expect("read");
    assert!(!raw.contains("db1"));

    // Idempotent.
    store.remove("db1").expect("second remove");
}

#[test]
fn test_list_is_ordered_and_secret_free() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);

    for host in ["zeta", "alpha", "mike"] {
        store.upsert(&db_profile(host, "pw")).expect("upsert");
    }

    let hosts: Vec<String> = store
        .list()
        .expect("list")
        .into_iter()
        .map(|p| p.host)
        .collect();
    assert_eq!(hosts, vec!["alpha", "mike", "zeta"]);
}

// ============================================================================
// ssh_config bridge
// ============================================================================

#[test]
fn test_import_then_export_roundtrip() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);

    let text = "\
Host db1
    HostName db1.example.com
    User admin
    Port 2222
    LocalForward 5432 localhost:5432
    Compression yes

Host web1
    HostName web1.example.com
    User deploy
";
    let config_path = dir.path().join("ssh_config");
    fs::write(&config_path, text).expect("write ssh_config");

    for profile in sshconfig::load_path(&config_path).expect("load") {
        store.upsert(&profile).expect("upsert imported");
    }

    let exported = sshconfig::render_all(&store.list().expect("list"));
    assert_eq!(exported, text);
}

#[test]
fn test_import_preserves_existing_secret() {
    let dir = TempDir::new().expect("tempdir");
    let store = open_store(&dir);

    store.upsert(&db_profile("db1", "s3cret")).expect("upsert");

    // Re-importing the same host from config text (which carries no
    // secrets) must not clear the stored password.
    let imported = sshconfig::parse(
        "Host db1\n    HostName db1.example.com\n    User admin\n    Port 2222\n",
    );
    store.upsert(&imported[0]).expect("upsert imported");

    assert_eq!(
        store.get("db1", true).expect("get").password,
        Secret::Plain("s3cret".to_string())
    );
}
