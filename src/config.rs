//! Configuration for Impact Control
//!
//! Handles loading and validating the YAML configuration file. Every field has
//! a default, so a missing file or an empty document is a valid config.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::backend::{BackendPreference, InputFilter};
use crate::midi::DATA_MAX;
use crate::session::SessionOptions;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiSettings,
    #[serde(default)]
    pub brightness: BrightnessConfig,
}

/// Controller input settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MidiSettings {
    #[serde(default)]
    pub backend: BackendPreference,
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default)]
    pub filter: InputFilter,
    /// Port names exposed by the loopback backend
    #[serde(default = "default_loopback_ports")]
    pub loopback_ports: Vec<String>,
}

impl Default for MidiSettings {
    fn default() -> Self {
        Self {
            backend: BackendPreference::default(),
            client_name: default_client_name(),
            poll_interval_ms: default_poll_interval_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            filter: InputFilter::default(),
            loopback_ports: default_loopback_ports(),
        }
    }
}

impl MidiSettings {
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            filter: self.filter,
        }
    }
}

/// Global brightness driven by one controller number
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrightnessConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_brightness_cc")]
    pub cc: u8,
}

impl Default for BrightnessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cc: default_brightness_cc(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file does not exist
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.brightness.cc > DATA_MAX {
            bail!(
                "brightness.cc must be between 0 and {}, got {}",
                DATA_MAX,
                self.brightness.cc
            );
        }
        if self.midi.poll_interval_ms == 0 {
            bail!("midi.poll_interval_ms must be at least 1");
        }
        if self.midi.client_name.trim().is_empty() {
            bail!("midi.client_name must not be empty");
        }
        Ok(())
    }
}

// Default value functions
fn default_client_name() -> String { "impact-control".to_string() }
fn default_poll_interval_ms() -> u64 { 1 }
fn default_shutdown_timeout_ms() -> u64 { 1000 }
fn default_loopback_ports() -> Vec<String> { vec!["Loopback A".to_string()] }
fn default_brightness_cc() -> u8 { 7 }
fn default_true() -> bool { true }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.midi.backend, BackendPreference::Auto);
        assert_eq!(config.midi.poll_interval_ms, 1);
        assert_eq!(config.midi.shutdown_timeout_ms, 1000);
        assert_eq!(config.midi.filter, InputFilter::default());
        assert!(config.brightness.enabled);
        assert_eq!(config.brightness.cc, 7);
    }

    #[tokio::test]
    async fn test_load_partial_file() {
        let file = write_config(
            "midi:\n  backend: loopback\n  filter:\n    timing: true\n  loopback_ports: [\"Pad\", \"Knobs\"]\nbrightness:\n  cc: 74\n",
        );

        let config = AppConfig::load(file.path()).await.unwrap();
        assert_eq!(config.midi.backend, BackendPreference::Loopback);
        assert!(config.midi.filter.timing);
        assert!(!config.midi.filter.sysex);
        assert_eq!(config.midi.loopback_ports, vec!["Pad", "Knobs"]);
        assert_eq!(config.midi.poll_interval_ms, 1);
        assert_eq!(config.brightness.cc, 74);
    }

    #[tokio::test]
    async fn test_empty_file_is_default() {
        let file = write_config("");
        let config = AppConfig::load(file.path()).await.unwrap();
        assert_eq!(config.brightness.cc, 7);
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(dir.path().join("absent.yaml"))
            .await
            .unwrap();
        assert_eq!(config.midi.client_name, "impact-control");
    }

    #[tokio::test]
    async fn test_invalid_values_are_rejected() {
        let file = write_config("brightness:\n  cc: 200\n");
        assert!(AppConfig::load(file.path()).await.is_err());

        let file = write_config("midi:\n  poll_interval_ms: 0\n");
        assert!(AppConfig::load(file.path()).await.is_err());

        let file = write_config("midi:\n  backend: carrier-pigeon\n");
        assert!(AppConfig::load(file.path()).await.is_err());
    }

    #[test]
    fn test_session_options() {
        let settings = MidiSettings {
            poll_interval_ms: 5,
            shutdown_timeout_ms: 250,
            ..MidiSettings::default()
        };
        let options = settings.session_options();
        assert_eq!(options.poll_interval, Duration::from_millis(5));
        assert_eq!(options.shutdown_timeout, Duration::from_millis(250));
    }
}
