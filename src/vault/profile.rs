//! SSH profile data structures.
//!
//! This module defines the core types for representing saved SSH
//! destinations: the profile record itself, port-forwarding specs,
//! and the tri-state secret field used for password material.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Default SSH port, used when a profile does not pin one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Errors produced when parsing tunnel or dynamic-forward specs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecParseError {
    /// Tunnel spec did not have the `local:host:remote` shape.
    #[error("invalid tunnel spec '{0}', expected LOCAL:HOST:REMOTE")]
    InvalidTunnel(String),

    /// Port component was not a valid TCP port.
    #[error("invalid port '{0}'")]
    InvalidPort(String),
}

/// A secret profile field.
///
/// A secret is either absent, present at rest but not decrypted
/// (`Sealed`), or present as plaintext in memory (`Plain`). The two
/// present states are exclusive: a value is never carried in both
/// forms at once.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Secret {
    /// No value stored; writing this state clears the field.
    #[default]
    None,
    /// A value exists at rest; writing this state preserves it as-is.
    Sealed,
    /// Plaintext value held in memory only.
    Plain(String),
}

impl Secret {
    /// Returns true if a value exists (sealed or plaintext).
    #[must_use]
    pub fn is_present(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Returns the plaintext value, if this secret is decrypted.
    #[must_use]
    pub fn plaintext(&self) -> Option<&str> {
        match self {
            Self::Plain(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Wraps an optional plaintext value; `None` clears the field.
    #[must_use]
    pub fn from_plain(value: Option<String>) -> Self {
        match value {
            Some(v) => Self::Plain(v),
            None => Self::None,
        }
    }
}

/// A local port forward (`ssh -L`), e.g. `8080:db.internal:5432`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    /// Local listen port.
    pub local_port: u16,
    /// Remote host to forward to.
    pub remote_host: String,
    /// Remote port to forward to.
    pub remote_port: u16,
}

impl TunnelSpec {
    /// Creates a new tunnel spec.
    #[must_use]
    pub fn new(local_port: u16, remote_host: String, remote_port: u16) -> Self {
        assert!(!remote_host.is_empty(), "remote host must not be empty");

        Self {
            local_port,
            remote_host,
            remote_port,
        }
    }

    /// Returns the `LocalForward` directive value: `LOCAL HOST:REMOTE`.
    #[must_use]
    pub fn config_value(&self) -> String {
        format!(
            "{} {}:{}",
            self.local_port, self.remote_host, self.remote_port
        )
    }

    /// Parses a `LocalForward` directive value (`LOCAL HOST:REMOTE`).
    pub fn from_config_value(value: &str) -> Result<Self, SpecParseError> {
        let mut parts = value.split_whitespace();
        let (Some(local), Some(target), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(SpecParseError::InvalidTunnel(value.to_string()));
        };

        let local_port = parse_port(local)?;
        let (host, remote) = target
            .rsplit_once(':')
            .ok_or_else(|| SpecParseError::InvalidTunnel(value.to_string()))?;
        if host.is_empty() {
            return Err(SpecParseError::InvalidTunnel(value.to_string()));
        }

        Ok(Self {
            local_port,
            remote_host: host.to_string(),
            remote_port: parse_port(remote)?,
        })
    }
}

impl fmt::Display for TunnelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.local_port, self.remote_host, self.remote_port
        )
    }
}

impl FromStr for TunnelSpec {
    type Err = SpecParseError;

    /// Parses the compact `LOCAL:HOST:REMOTE` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(local), Some(host), Some(remote)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(SpecParseError::InvalidTunnel(s.to_string()));
        };
        if host.is_empty() {
            return Err(SpecParseError::InvalidTunnel(s.to_string()));
        }

        Ok(Self {
            local_port: parse_port(local)?,
            remote_host: host.to_string(),
            remote_port: parse_port(remote)?,
        })
    }
}

/// A dynamic SOCKS proxy (`ssh -D`), identified by its listen port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicForwardSpec {
    /// Local SOCKS listen port.
    pub local_port: u16,
}

impl DynamicForwardSpec {
    /// Creates a new dynamic forward spec.
    #[must_use]
    pub fn new(local_port: u16) -> Self {
        Self { local_port }
    }
}

impl fmt::Display for DynamicForwardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.local_port)
    }
}

impl FromStr for DynamicForwardSpec {
    type Err = SpecParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            local_port: parse_port(s)?,
        })
    }
}

fn parse_port(s: &str) -> Result<u16, SpecParseError> {
    let port: u16 = s
        .trim()
        .parse()
        .map_err(|_| SpecParseError::InvalidPort(s.to_string()))?;
    if port == 0 {
        return Err(SpecParseError::InvalidPort(s.to_string()));
    }
    Ok(port)
}

/// A saved SSH destination.
///
/// Identified by `host` (unique within the store). Non-secret fields
/// mirror the ssh_config directives the bridge models; `password` and
/// `key_passphrase` exist only here and in the encrypted store, never
/// in rendered config text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Profile {
    /// Unique host alias (the `Host` block name).
    pub host: String,
    /// Hostname or IP address to connect to.
    pub hostname: String,
    /// Login user.
    pub user: String,
    /// SSH port; `None` means the default (22).
    pub port: Option<u16>,
    /// Path to the private key file.
    pub identity_file: Option<String>,
    /// Jump host (`ProxyJump` value).
    pub proxy_jump: Option<String>,
    /// Folder used to group profiles in listings.
    pub folder: Option<String>,
    /// Local port forwards.
    pub tunnels: Vec<TunnelSpec>,
    /// Dynamic SOCKS forwards.
    pub dynamic_forwards: Vec<DynamicForwardSpec>,
    /// Free-form note.
    pub note: Option<String>,
    /// Unmodeled ssh_config directives, preserved verbatim for
    /// round-tripping.
    pub extras: Vec<(String, String)>,
    /// Login password.
    pub password: Secret,
    /// Passphrase for the identity file.
    pub key_passphrase: Secret,
}

impl Profile {
    /// Creates an empty profile for the given host alias.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        assert!(!host.is_empty(), "host must not be empty");

        Self {
            host,
            ..Self::default()
        }
    }

    /// Returns the port to connect to, defaulting to 22.
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SSH_PORT)
    }

    /// Returns the hostname to dial, falling back to the alias.
    #[must_use]
    pub fn effective_hostname(&self) -> &str {
        if self.hostname.is_empty() {
            &self.host
        } else {
            &self.hostname
        }
    }

    /// Returns the connection string (`user@host` or `user@host:port`).
    #[must_use]
    pub fn connection_string(&self) -> String {
        let target = if self.user.is_empty() {
            self.effective_hostname().to_string()
        } else {
            format!("{}@{}", self.user, self.effective_hostname())
        };

        match self.port {
            Some(port) if port != DEFAULT_SSH_PORT => format!("{}:{}", target, port),
            _ => target,
        }
    }

    /// Returns true if either secret field has a value.
    #[must_use]
    pub fn has_secrets(&self) -> bool {
        self.password.is_present() || self.key_passphrase.is_present()
    }
}
