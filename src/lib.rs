//! sshvault
//!
//! An encrypted store for per-host SSH connection profiles. Hostnames,
//! users, proxies, tunnels, folders, and notes are kept alongside
//! secret fields (password, key passphrase) that are sealed with
//! authenticated encryption before they ever touch disk.
//!
//! # Architecture
//!
//! - **Vault Module**: key lifecycle, field encryption, profile store
//! - **Sshconfig Module**: ssh_config text import/export bridge
//! - **Config Module**: application settings file
//! - **Logging Module**: file-based tracing with retention cleanup
//!
//! # Usage
//!
//! ```no_run
//! use sshvault::vault::{KeyFile, Profile, ProfileStore, Secret};
//!
//! let store = ProfileStore::new(KeyFile::new());
//! let mut profile = Profile::new("db1");
//! profile.hostname = "db1.internal".to_string();
//! profile.password = Secret::Plain("s3cret".to_string());
//! store.upsert(&profile).expect("upsert failed");
//! ```

// Clippy configuration - allow common patterns
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

pub mod config;
pub mod logging;
pub mod sshconfig;
pub mod vault;

// Re-export main types
pub use config::Settings;
pub use vault::{
    CipherBox, EncryptionKey, KeyFile, Profile, ProfileStore, Secret, StoreError, TunnelSpec,
};
