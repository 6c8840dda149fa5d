//! Pressdesk configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PressdeskError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PressdeskConfig {
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub templates: TemplatesConfig,
    #[serde(default)]
    pub site: SiteConfig,
}

impl PressdeskConfig {
    /// Load config from the default path (~/.pressdesk/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PressdeskError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| PressdeskError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| PressdeskError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Pressdesk home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pressdesk")
    }
}

/// Outbound mail configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Global switch. When off, messages are recorded as pending and never sent.
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    /// Use STARTTLS (or implicit TLS on port 465). Plain SMTP when false.
    #[serde(default = "bool_true")]
    pub tls: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn bool_true() -> bool { true }
fn default_from_address() -> String { "Pressdesk <noreply@localhost>".into() }
fn default_smtp_host() -> String { "localhost".into() }
fn default_smtp_port() -> u16 { 587 }
fn default_max_attempts() -> u32 { 3 }
fn default_retry_delay_secs() -> u64 { 60 }
fn default_workers() -> usize { 4 }
fn default_queue_capacity() -> usize { 256 }

impl MailConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            from_address: default_from_address(),
            reply_to: None,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            tls: true,
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// SQLite database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.pressdesk/pressdesk.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Email template directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesConfig {
    #[serde(default = "default_templates_dir")]
    pub dir: String,
}

fn default_templates_dir() -> String { "~/.pressdesk/templates".into() }

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self { dir: default_templates_dir() }
    }
}

/// Public site settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_site_host")]
    pub host: String,
    /// Lifetime of signup tokens, in minutes.
    #[serde(default = "default_token_age")]
    pub token_age_minutes: i64,
}

fn default_site_host() -> String { "http://localhost:8000".into() }
fn default_token_age() -> i64 { 60 * 48 }

impl SiteConfig {
    pub fn token_age(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.token_age_minutes)
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            host: default_site_host(),
            token_age_minutes: default_token_age(),
        }
    }
}
