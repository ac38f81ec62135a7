//! Configuration management for klassgram
//!
//! Configuration lives in `<home>/config.toml`; the same home directory
//! also holds the delivery history, the run lock and the posts dump, so
//! a single `--home` flag relocates the whole state of the tool.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default browser-like User-Agent sent to the content source
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/107.0.0.0 Safari/537.36";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Content source credentials
    pub login: LoginConfig,

    /// Telegram delivery configuration
    pub telegram: TelegramConfig,

    /// Classes to synchronize
    pub classes: ClassesConfig,

    /// HTTP client configuration
    #[serde(default)]
    pub http: HttpConfig,

    /// Home directory this config was loaded from
    #[serde(skip)]
    pub home: PathBuf,
}

/// Content source credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginConfig {
    /// Account phone number
    pub user: String,

    /// Account password
    pub password: String,
}

/// Telegram delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token
    pub token: String,

    /// Target chat id
    pub chat_id: String,

    /// Minimum spacing between outbound requests, in milliseconds
    #[serde(default = "default_throttling_ms")]
    pub throttling_ms: u64,
}

/// Classes to synchronize, in delivery order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassesConfig {
    /// Class display names as shown on the content source
    pub names: Vec<String>,
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header sent to the content source
    #[serde(default = "default_user_agent")]
    pub agent: String,
}

fn default_throttling_ms() -> u64 {
    1200
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            agent: default_user_agent(),
        }
    }
}

impl Config {
    /// Load configuration from `<home>/config.toml`
    pub fn load(home: &Path) -> Result<Self> {
        let path = home.join("config.toml");
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.home = home.to_path_buf();
        config.validate().context("invalid configuration")?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.telegram.token.is_empty() {
            anyhow::bail!("telegram.token cannot be empty");
        }
        if self.telegram.chat_id.is_empty() {
            anyhow::bail!("telegram.chat_id cannot be empty");
        }
        if self.classes.names.is_empty() {
            anyhow::bail!("classes.names cannot be empty");
        }
        Ok(())
    }

    /// Path of the delivery history file
    pub fn history_path(&self) -> PathBuf {
        self.home.join("history.json")
    }

    /// Path of the run lock file
    pub fn lock_path(&self) -> PathBuf {
        self.home.join("sync.lock")
    }

    /// Path of the fetched-posts dump written each run
    pub fn posts_dump_path(&self) -> PathBuf {
        self.home.join("posts.json")
    }
}
