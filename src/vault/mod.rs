//! Encrypted SSH profile vault.
//!
//! Provides functionality for:
//! - Managing saved SSH connection profiles keyed by host alias
//! - Field-level authenticated encryption of passwords and passphrases
//! - Backward-compatible reads of the retired unauthenticated format
//!
//! # Layout
//!
//! - **key**: encryption key generation, persistence, retrieval
//! - **cipher**: per-field seal/open with legacy read fallback
//! - **profile**: profile record, forward specs, secret tri-state
//! - **store**: TOML-backed persistence with atomic writes

pub mod cipher;
pub mod key;
pub mod profile;
pub mod store;

pub use cipher::{CipherBox, CipherError, Generation};
pub use key::{EncryptionKey, KeyError, KeyFile, KEY_SIZE};
pub use profile::{DynamicForwardSpec, Profile, Secret, SpecParseError, TunnelSpec};
pub use store::{ProfileStore, StoreError};
