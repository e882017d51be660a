//! Configuration file support for ttflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (TTFLASH_*)
//! 3. `--config <path>`, or else the local config file (./ttflash.toml)
//! 4. Global config file (~/.config/ttflash/config.toml)
//!
//! Configuration is only ever read.

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use ttflash::{DeviceConfig, FirmwarePreset, HandshakeConfig};

/// Local configuration file name.
pub const LOCAL_CONFIG: &str = "ttflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Serial port of the board (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
}

/// Handshake timing overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandshakeSettings {
    /// Time allowed for the first version answer, in milliseconds.
    pub version_wait_ms: Option<u64>,
    /// Step between version checks while the board boots, in milliseconds.
    pub poll_interval_ms: Option<u64>,
    /// Number of steps to wait for a booting board.
    pub boot_poll_attempts: Option<u32>,
}

/// Paths of the shell init payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptsConfig {
    /// Board setup script.
    pub init: Option<PathBuf>,
    /// Flash programming helpers.
    pub flash: Option<PathBuf>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Handshake timing.
    #[serde(default)]
    pub handshake: HandshakeSettings,
    /// Init payloads.
    #[serde(default)]
    pub scripts: ScriptsConfig,
    /// Extra presets, listed after the built-in ones.
    #[serde(default, rename = "preset")]
    pub presets: Vec<FirmwarePreset>,
}

impl Config {
    /// Load configuration from the global and local files.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse TOML config {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Parse a TOML document, dropping presets that fail validation.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        let mut config: Self = toml::from_str(content)?;
        config.presets.retain(|preset| match preset.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!("Ignoring preset from config: {e}");
                false
            },
        });
        Ok(config)
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ttflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        if other.handshake.version_wait_ms.is_some() {
            self.handshake.version_wait_ms = other.handshake.version_wait_ms;
        }
        if other.handshake.poll_interval_ms.is_some() {
            self.handshake.poll_interval_ms = other.handshake.poll_interval_ms;
        }
        if other.handshake.boot_poll_attempts.is_some() {
            self.handshake.boot_poll_attempts = other.handshake.boot_poll_attempts;
        }

        if other.scripts.init.is_some() {
            self.scripts.init = other.scripts.init;
        }
        if other.scripts.flash.is_some() {
            self.scripts.flash = other.scripts.flash;
        }

        self.presets.extend(other.presets);
    }

    /// Engine settings with the configured handshake overrides applied.
    pub fn device_config(&self) -> DeviceConfig {
        let defaults = HandshakeConfig::default();
        let handshake = HandshakeConfig {
            version_wait: self
                .handshake
                .version_wait_ms
                .map_or(defaults.version_wait, Duration::from_millis),
            poll_interval: self
                .handshake
                .poll_interval_ms
                .map_or(defaults.poll_interval, Duration::from_millis),
            boot_poll_attempts: self
                .handshake
                .boot_poll_attempts
                .unwrap_or(defaults.boot_poll_attempts),
        };
        DeviceConfig::default().with_handshake(handshake)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[connection]
serial = "/dev/ttyACM0"
baud = 115200

[handshake]
boot_poll_attempts = 20

[scripts]
init = "ttinit.py"
flash = "ttflash.py"

[[preset]]
name = "Local build"
base_url = "file:///home/me/fw/"
files = [{ offset = 0, name = "user.bin" }]
"#;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.serial.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.scripts.init.is_none());
        assert!(config.presets.is_empty());
        assert_eq!(config.device_config(), DeviceConfig::default());
    }

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.connection.baud, Some(115200));
        assert_eq!(config.scripts.flash, Some(PathBuf::from("ttflash.py")));
        assert_eq!(config.presets.len(), 1);
        assert_eq!(config.presets[0].files[0].name, "user.bin");
    }

    #[test]
    fn test_camel_case_preset_keys_are_accepted() {
        let config = Config::parse(
            r#"
[[preset]]
name = "Two files"
baseUrl = "https://example.com/fw/"
qspiAfter = 1
files = [{ offset = 0, name = "a.bin" }, { offset = 4096, name = "b.bin" }]
"#,
        )
        .unwrap();
        assert_eq!(config.presets[0].qspi_after, Some(1));
    }

    #[test]
    fn test_invalid_presets_are_dropped() {
        let config = Config::parse(
            r#"
[[preset]]
name = "No files"
base_url = "https://example.com/"
files = []

[[preset]]
name = "Bad index"
base_url = "https://example.com/"
qspi_after = 3
files = [{ offset = 0, name = "a.bin" }]
"#,
        )
        .unwrap();
        assert!(config.presets.is_empty());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(Config::parse("invalid toml [[[").is_err());
    }

    #[test]
    fn test_handshake_overrides() {
        let config = Config::parse(SAMPLE).unwrap();
        let device = config.device_config();
        assert_eq!(device.handshake.boot_poll_attempts, 20);
        assert_eq!(device.handshake.poll_interval, Duration::from_millis(100));
        assert_eq!(device.handshake.version_wait, Duration::from_millis(100));
    }

    #[test]
    fn test_merge_prefers_later_values() {
        let mut base = Config::parse(SAMPLE).unwrap();
        let mut other = Config::default();
        other.connection.serial = Some("COM3".to_string());
        other.handshake.version_wait_ms = Some(250);

        base.merge(other);

        assert_eq!(base.connection.serial.as_deref(), Some("COM3"));
        assert_eq!(base.connection.baud, Some(115200));
        assert_eq!(base.handshake.version_wait_ms, Some(250));
        assert_eq!(base.handshake.boot_poll_attempts, Some(20));
        assert_eq!(base.presets.len(), 1);
    }

    #[test]
    fn test_load_from_missing_path_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(&dir.path().join("missing.toml"));
        assert!(config.connection.serial.is_none());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, SAMPLE).unwrap();
        let config = Config::load_from_path(&path);
        assert_eq!(config.scripts.init, Some(PathBuf::from("ttinit.py")));
    }
}
