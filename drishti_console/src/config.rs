//! Console configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Get the configuration directory path
pub fn config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("drishti")
    }

    #[cfg(not(target_os = "windows"))]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".drishti")
    }
}

/// Get the config file path
pub fn config_file() -> PathBuf {
    config_dir().join("config.yml")
}

/// Ensure the config directory exists
pub fn ensure_dirs() -> Result<()> {
    fs::create_dir_all(config_dir()).context("Failed to create config directory")?;
    Ok(())
}

/// Main configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backend URL (default: http://localhost:3333)
    #[serde(default = "default_server_url")]
    pub server_url: String,
}

fn default_server_url() -> String {
    "http://localhost:3333".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load() -> Result<Self> {
        let path = config_file();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Config =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        ensure_dirs()?;
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        fs::write(config_file(), content).context("Failed to write config file")?;
        Ok(())
    }

    /// Get the push-notification WebSocket URL from the server URL
    pub fn websocket_url(&self) -> String {
        let ws_scheme = if self.server_url.starts_with("https://") {
            "wss"
        } else {
            "ws"
        };
        let host = self
            .server_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        format!("{}://{}/ws", ws_scheme, host)
    }
}
