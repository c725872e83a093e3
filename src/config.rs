//! Application settings.
//!
//! Handles loading and parsing the ~/.sshvault/config settings file.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::logging::LogConfig;

/// Default config file content with all settings documented.
const DEFAULT_CONFIG: &str = r#"# sshvault configuration file
# ===========================
# This file is read on application startup.
# Lines starting with '#' are comments.

# Storage Paths
# -------------
# Override where the profile document, the encryption key, and the
# ssh_config used for import/export live.
#
# store_path = ~/.sshvault/profiles.toml
# key_path = ~/.sshvault/key
# ssh_config_path = ~/.ssh/config

# Logging Configuration
# ---------------------
# Logs are stored in ~/.sshvault/logs/ with automatic cleanup.
#
# log_enabled = true       # Enable/disable file logging (true/false)
# log_level = info         # Log level: trace, debug, info, warn, error, off
# log_retention = 24       # Hours to keep log files (default: 24)
"#;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Path to the settings file itself.
    pub config_path: PathBuf,
    /// Override for the profile document path.
    pub store_path: Option<PathBuf>,
    /// Override for the encryption key path.
    pub key_path: Option<PathBuf>,
    /// Override for the ssh_config file used by import/export.
    pub ssh_config_path: Option<PathBuf>,
    /// Logging configuration.
    pub log_config: LogConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            store_path: None,
            key_path: None,
            ssh_config_path: None,
            log_config: LogConfig::default(),
        }
    }
}

impl Settings {
    /// Returns the default settings file path (~/.sshvault/config).
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sshvault")
            .join("config")
    }

    /// Returns the ssh_config path to import from / export to.
    #[must_use]
    pub fn effective_ssh_config_path(&self) -> PathBuf {
        self.ssh_config_path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".ssh")
                .join("config")
        })
    }

    /// Loads settings from the default path, creating the file if it
    /// doesn't exist.
    ///
    /// # Errors
    /// Returns error if the settings file cannot be read or created.
    pub fn load() -> io::Result<Self> {
        let path = Self::default_config_path();
        Self::load_from(&path)
    }

    /// Loads settings from a specific path.
    ///
    /// # Errors
    /// Returns error if the settings file cannot be read or created.
    pub fn load_from(path: &PathBuf) -> io::Result<Self> {
        if !path.exists() {
            Self::create_default_config(path)?;
        }

        let content = fs::read_to_string(path)?;
        let mut settings = Self {
            config_path: path.clone(),
            ..Self::default()
        };
        settings.parse(&content);

        Ok(settings)
    }

    /// Parses `key = value` settings from the file content.
    fn parse(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            // Strip inline comments.
            let value = value.trim();
            let value = value.split('#').next().unwrap_or(value).trim();
            if value.is_empty() {
                continue;
            }

            match key {
                "store_path" => self.store_path = Some(expand_home(value)),
                "key_path" => self.key_path = Some(expand_home(value)),
                "ssh_config_path" => self.ssh_config_path = Some(expand_home(value)),
                "log_enabled" => self.log_config.enabled = value.eq_ignore_ascii_case("true"),
                "log_level" => self.log_config.level = LogConfig::parse_level(value),
                "log_retention" => {
                    self.log_config.retention_hours = LogConfig::parse_retention(value);
                }
                _ => {}
            }
        }
    }

    fn create_default_config(path: &PathBuf) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_CONFIG.as_bytes())?;
        Ok(())
    }
}

/// Expands a leading `~/` to the home directory.
fn expand_home(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/") {
        return dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest);
    }
    PathBuf::from(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.store_path, None);
        assert_eq!(settings.key_path, None);
        assert_eq!(settings.log_config, LogConfig::default());
    }

    #[test]
    fn test_parse_settings() {
        let mut settings = Settings::default();
        settings.parse(
            "\
# comment
store_path = /tmp/profiles.toml
key_path = /tmp/key   # inline comment
log_level = debug
log_retention = 48
log_enabled = false
unknown_setting = whatever
",
        );

        assert_eq!(settings.store_path, Some(PathBuf::from("/tmp/profiles.toml")));
        assert_eq!(settings.key_path, Some(PathBuf::from("/tmp/key")));
        assert_eq!(settings.log_config.level, "debug");
        assert_eq!(settings.log_config.retention_hours, 48);
        assert!(!settings.log_config.enabled);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");

        let settings = Settings::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(settings.store_path, None);

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("log_level"));
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home("~/.ssh/config");
        assert!(!expanded.to_string_lossy().starts_with("~/"));
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
    }
}
