//! Server configuration.

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path to the assistant CLI binary used for supervised captures.
    #[serde(default = "default_cli_path")]
    pub cli_path: PathBuf,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Directory where session transcripts are spooled.
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,
    /// Bearer token required on ingestion requests. None disables auth.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Origins allowed by CORS. Empty means same-origin only.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Remote gateway URL for forwarding finalized sessions. None keeps
    /// ingestion in-process.
    #[serde(default)]
    pub forward_url: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8484
}

fn default_cli_path() -> PathBuf {
    PathBuf::from("/usr/local/bin/claude")
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scribe")
        .join("scribe.db")
}

fn default_spool_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scribe")
        .join("transcripts")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cli_path: default_cli_path(),
            db_path: default_db_path(),
            spool_dir: default_spool_dir(),
            auth_token: None,
            allowed_origins: Vec::new(),
            forward_url: None,
        }
    }
}

impl Config {
    /// Load config from a specific file path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load config from the default location (config/default.toml) or fall
    /// back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from("config/default.toml");
        if config_path.exists() {
            return Self::load_from(&config_path);
        }
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8484);
        assert!(config.auth_token.is_none());
        assert!(config.forward_url.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            port = 9000
            auth_token = "secret"
            allowed_origins = ["http://localhost:5173"]
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.allowed_origins.len(), 1);
        assert_eq!(config.host, "127.0.0.1");
    }
}
