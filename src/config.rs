//! Dashboard configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::session::Department;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub login: LoginConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from `path`, or fall back to defaults when the file does not exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Department whose dashboard this instance serves
    #[serde(default = "default_department")]
    pub department: Department,

    /// Collection override (defaults to the department's collection)
    #[serde(default)]
    pub collection: Option<String>,

    /// Ordering field override
    #[serde(default)]
    pub order_field: Option<String>,

    /// Records fetched by the one-shot seed query. The live subscription is unlimited.
    #[serde(default = "default_initial_limit")]
    pub initial_limit: usize,

    /// Recent activity entries (defaults to the department's own count)
    #[serde(default)]
    pub recent_limit: Option<usize>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            department: default_department(),
            collection: None,
            order_field: None,
            initial_limit: default_initial_limit(),
            recent_limit: None,
        }
    }
}

fn default_department() -> Department { Department::Health }
fn default_initial_limit() -> usize { 100 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_notification_collection")]
    pub collection: String,

    /// Notifications fetched by the seed query before the live list takes over
    #[serde(default = "default_notification_limit")]
    pub initial_limit: usize,

    /// Unread counts above this render as "{cap}+"
    #[serde(default = "default_badge_cap")]
    pub badge_cap: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            collection: default_notification_collection(),
            initial_limit: default_notification_limit(),
            badge_cap: default_badge_cap(),
        }
    }
}

fn default_notification_collection() -> String { "notifications".to_string() }
fn default_notification_limit() -> usize { 20 }
fn default_badge_cap() -> usize { 99 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginConfig {
    /// Sign-in attempts for transient failures, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before retry n is `backoff_base_ms * n`
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_access_check_timeout")]
    pub access_check_timeout_ms: u64,

    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    #[serde(default = "default_authorization_collection")]
    pub authorization_collection: String,

    /// Where unauthenticated sessions are sent
    #[serde(default = "default_login_entry")]
    pub login_entry: String,
}

impl LoginConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn access_check_timeout(&self) -> Duration {
        Duration::from_millis(self.access_check_timeout_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            access_check_timeout_ms: default_access_check_timeout(),
            session_ttl_secs: default_session_ttl(),
            authorization_collection: default_authorization_collection(),
            login_entry: default_login_entry(),
        }
    }
}

fn default_max_attempts() -> u32 { 3 }
fn default_backoff_base() -> u64 { 1000 }
fn default_access_check_timeout() -> u64 { 5000 }
fn default_session_ttl() -> u64 { 2 * 60 * 60 }
fn default_authorization_collection() -> String { "adminUsers".to_string() }
fn default_login_entry() -> String { "index.html".to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String { "campus_dashboards=info".to_string() }
