//! Configuration management for evdev-keyd
//!
//! Settings are read from a TOML file. Every section and field has a
//! default, so a missing file or a partial one is fine.
//!
//! ## Config File Location
//!
//! `~/.config/evdev-keyd/config.toml` (for root: `/root/.config/...`), or
//! whatever `--config` names.
//!
//! ## Example
//!
//! ```toml
//! [daemon]
//! socket_path = "/var/plover-evdevd"
//! startup_delay_ms = 500
//!
//! [policy]
//! reset_suppression_on_disconnect = true
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to determine config directory
    #[error("Could not determine config directory")]
    NoConfigDir,
    /// IO error reading or writing config file
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Failed to parse config file
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Failed to serialize config
    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Returns the default path of the config file
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(config_dir.join("evdev-keyd").join("config.toml"))
}

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Devices, socket, and timing
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Behaviour choices
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Devices, socket, and timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Where the rendezvous socket is created
    pub socket_path: PathBuf,
    /// Permission bits applied to the socket after binding
    pub socket_mode: u32,
    /// Grace period before grabbing the keyboard, in milliseconds
    pub startup_delay_ms: u64,
    /// Name given to the virtual keyboard
    pub virtual_device_name: String,
    /// Use this device instead of searching for one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/var/plover-evdevd"),
            socket_mode: 0o777,
            startup_delay_ms: 500,
            virtual_device_name: "Plover".to_string(),
            device_path: None,
        }
    }
}

/// Behaviour choices
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Start over when the keyboard disappears instead of exiting
    pub restart_on_device_loss: bool,
    /// While restarting, how often to look for a keyboard again
    pub rescan_interval_ms: u64,
    /// Empty the suppression set when the client disconnects
    pub reset_suppression_on_disconnect: bool,
    /// Let suppressed keys through while a modifier is held
    pub modifier_passthrough: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            restart_on_device_loss: true,
            rescan_interval_ms: 1000,
            reset_suppression_on_disconnect: false,
            modifier_passthrough: false,
        }
    }
}

impl Config {
    /// Load configuration from the default config file.
    ///
    /// Returns the default configuration if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Grace period before device acquisition
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.daemon.startup_delay_ms)
    }

    /// Pause between keyboard searches while restarting
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.policy.rescan_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn temp_config_path() -> PathBuf {
        env::temp_dir().join(format!("evdev-keyd-test-{}.toml", std::process::id()))
    }

    #[test]
    fn config_default_values() {
        let config = Config::default();
        assert_eq!(config.daemon.socket_path, PathBuf::from("/var/plover-evdevd"));
        assert_eq!(config.daemon.socket_mode, 0o777);
        assert_eq!(config.daemon.startup_delay_ms, 500);
        assert_eq!(config.daemon.virtual_device_name, "Plover");
        assert_eq!(config.daemon.device_path, None);
        assert!(config.policy.restart_on_device_loss);
        assert!(!config.policy.reset_suppression_on_disconnect);
        assert!(!config.policy.modifier_passthrough);
    }

    #[test]
    fn config_durations() {
        let config = Config::default();
        assert_eq!(config.startup_delay(), Duration::from_millis(500));
        assert_eq!(config.rescan_interval(), Duration::from_secs(1));
    }

    #[test]
    fn config_save_and_load_roundtrip() {
        let path = temp_config_path();

        let mut config = Config::default();
        config.daemon.socket_path = PathBuf::from("/run/evdev-keyd.sock");
        config.daemon.device_path = Some(PathBuf::from("/dev/input/event4"));
        config.policy.modifier_passthrough = true;

        config.save_to(&path).expect("Failed to save config");
        let loaded = Config::load_from(&path).expect("Failed to load config");
        assert_eq!(loaded, config);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn config_load_missing_file_fails() {
        let path = PathBuf::from("/nonexistent/path/config.toml");
        assert!(matches!(Config::load_from(&path), Err(ConfigError::Io(_))));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let toml_str = r#"
[daemon]
startup_delay_ms = 250

[policy]
reset_suppression_on_disconnect = true
"#;
        let config: Config = toml::from_str(toml_str).expect("Failed to deserialize");
        assert_eq!(config.daemon.startup_delay_ms, 250);
        assert_eq!(config.daemon.socket_path, PathBuf::from("/var/plover-evdevd"));
        assert!(config.policy.reset_suppression_on_disconnect);
        assert!(config.policy.restart_on_device_loss);
    }

    #[test]
    fn empty_file_is_default() {
        let config: Config = toml::from_str("").expect("Failed to deserialize");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn bad_type_is_parse_error() {
        let err = toml::from_str::<Config>("[daemon]\nstartup_delay_ms = \"soon\"\n")
            .map_err(ConfigError::from)
            .unwrap_err();
        assert!(err.to_string().starts_with("Parse error"));
    }

    #[test]
    fn config_serializes_to_toml() {
        let toml_str = Config::default().to_toml().expect("Failed to serialize");
        assert!(toml_str.contains("[daemon]"));
        assert!(toml_str.contains("[policy]"));
        assert!(toml_str.contains("startup_delay_ms = 500"));
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::NoConfigDir;
        assert_eq!(err.to_string(), "Could not determine config directory");

        let io_err = ConfigError::Io(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        assert!(io_err.to_string().contains("IO error"));
    }
}
