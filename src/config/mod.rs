//! Configuration and credential storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::auth::{ApiCredentials, CredentialStore};
use crate::stream::StreamSettings;

/// Application configuration
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the Raven site, e.g. `https://chat.example.com`
    pub site_url: Option<String>,
    /// API key pair generated for the user on the site
    pub credentials: Option<ApiCredentials>,
    /// User id reported by the site at last login
    pub current_user: Option<String>,
    /// Message stream tunables
    #[serde(default)]
    pub stream: StreamSettings,
}

impl Config {
    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "raven-cli", "raven-cli")
            .context("Could not determine config directory")
    }

    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Directory for runtime files (logs).
    pub fn data_dir() -> Result<PathBuf> {
        let dir = Self::project_dirs()?.data_dir().to_path_buf();
        fs::create_dir_all(&dir).context("Failed to create data directory")?;
        Ok(dir)
    }

    /// Log file used while the terminal UI owns the screen.
    pub fn log_path() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("raven-cli.log"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::parse(&content)
    }

    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Config holds the API secret
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// Site URL without a trailing slash.
    pub fn site(&self) -> Option<&str> {
        self.site_url.as_deref().map(|s| s.trim_end_matches('/'))
    }
}

impl CredentialStore for Config {
    fn get_credentials(&self) -> Option<ApiCredentials> {
        self.credentials.clone()
    }

    fn set_credentials(&mut self, credentials: ApiCredentials) {
        self.credentials = Some(credentials);
    }

    fn clear_credentials(&mut self) {
        self.credentials = None;
        self.current_user = None;
    }
}
