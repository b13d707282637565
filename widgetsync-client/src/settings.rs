use std::path::Path;
use std::time::Duration;
use std::{env, fs, io};

use serde::{Deserialize, Serialize};

/// Env var naming a TOML file that replaces the compiled-in defaults.
pub const CONFIG_ENV: &str = "WIDGETSYNC_CONFIG";

const DEFAULT_CONFIG: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../",
    "configs/default.toml"
));

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL every command path is joined onto
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Bearer credential attached to every command
    #[serde(default)]
    pub token: Option<String>,
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_string(),
            request_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorConfig {
    /// Ceiling on a single actuation command
    pub command_timeout_ms: u64,
    /// How long a stream-applied state blocks new toggles
    pub suppression_window_ms: u64,
}

impl ActuatorConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn suppression_window(&self) -> Duration {
        Duration::from_millis(self.suppression_window_ms)
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 8_000,
            suppression_window_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Frames buffered between the transport and the hub
    pub frame_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { frame_buffer: 256 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

impl Settings {
    /// Loads the compiled-in defaults, or the file named by `WIDGETSYNC_CONFIG`.
    pub fn new() -> Result<Self, SettingsError> {
        match env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_path(path),
            None => Self::from_toml_str(DEFAULT_CONFIG),
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(text)?)
    }

    /// Raw text of the compiled-in defaults.
    pub fn default_toml() -> &'static str {
        DEFAULT_CONFIG
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let settings = Settings::from_toml_str(Settings::default_toml()).unwrap();

        assert_eq!(settings.actuator.suppression_window_ms, 100);
        assert!(settings.api.base_url.starts_with("http"));
        assert!(settings.stream.frame_buffer > 0);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let settings = Settings::from_toml_str("[logger]\nlevel = \"info\"\n").unwrap();

        assert_eq!(settings.logger.level, "info");
        assert_eq!(settings.api, ApiConfig::default());
        assert_eq!(settings.actuator.suppression_window(), Duration::from_millis(100));
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let error = Settings::from_toml_str("[logger\nlevel=").unwrap_err();
        assert!(matches!(error, SettingsError::Parse(_)));
    }
}
