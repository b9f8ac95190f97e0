//! # Config Loader — Loads and validates TOML configuration
//!
//! Reads `warden.toml` (or a custom path) into typed config structs, then
//! applies `WARDEN_*` / `SMTP_*` environment overrides so deployments can be
//! configured without touching the file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Top-level warden configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory for store snapshots and the alert log.
    pub data_dir: String,
    pub log_level: String,
    /// Store snapshot cadence; 0 disables periodic snapshots.
    pub snapshot_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "./warden-data".into(),
            log_level: "info".into(),
            snapshot_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "127.0.0.1:8080".into(), cors_origins: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Secret for bearer-token signatures. Empty disables dashboard auth
    /// minting (verification then rejects everything).
    pub token_secret: String,
    pub admin_username: String,
    /// Plaintext, or `sha256:<hex>` of the password.
    pub admin_password: String,
    pub token_ttl_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
            admin_username: "admin".into(),
            admin_password: String::new(),
            token_ttl_secs: 12 * 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub api_base: String,
    /// Remote API token. Absent/empty disables the sync scheduler.
    pub token: String,
    pub sync_interval_min: u64,
    pub similarity_threshold: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".into(),
            token: String::new(),
            sync_interval_min: 5,
            similarity_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Outbound webhook URL; empty disables the channel.
    pub webhook_url: String,
    /// JSONL alert log filename, created under `data_dir`.
    pub log_file: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub email_from: String,
    /// Recipient for alert email; empty disables the channel.
    pub email_to: String,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            log_file: "alerts.jsonl".into(),
            smtp_host: "smtp.gmail.com".into(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            email_from: "warden@localhost".into(),
            email_to: String::new(),
        }
    }
}

impl WardenConfig {
    /// Load from a TOML file. Missing file is an error so callers can decide
    /// whether to fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read {}: {}", path.as_ref().display(), e))?;
        let mut config: WardenConfig =
            toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
        config.apply_env();
        config.validate();
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config.validate();
        config
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), String> {
        let raw = toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {}", e))?;
        std::fs::write(path.as_ref(), raw)
            .map_err(|e| format!("Failed to write {}: {}", path.as_ref().display(), e))
    }

    fn apply_env(&mut self) {
        env_override("WARDEN_DATA_DIR", &mut self.general.data_dir);
        env_override("WARDEN_LOG_LEVEL", &mut self.general.log_level);
        env_override("WARDEN_BIND", &mut self.server.bind);
        if let Ok(v) = std::env::var("WARDEN_CORS_ORIGINS") {
            self.server.cors_origins =
                v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
        }
        env_override("WARDEN_JWT_SECRET", &mut self.auth.token_secret);
        env_override("WARDEN_ADMIN_USER", &mut self.auth.admin_username);
        env_override("WARDEN_ADMIN_PASSWORD", &mut self.auth.admin_password);
        env_override("WARDEN_SOURCE_API_BASE", &mut self.source.api_base);
        env_override("WARDEN_SOURCE_TOKEN", &mut self.source.token);
        if let Ok(v) = std::env::var("WARDEN_SYNC_INTERVAL_MIN") {
            match v.parse() {
                Ok(n) => self.source.sync_interval_min = n,
                Err(_) => warn!(value = %v, "Ignoring non-numeric WARDEN_SYNC_INTERVAL_MIN"),
            }
        }
        if let Ok(v) = std::env::var("WARDEN_SIMILARITY_THRESHOLD") {
            match v.parse() {
                Ok(n) => self.source.similarity_threshold = n,
                Err(_) => warn!(value = %v, "Ignoring non-numeric WARDEN_SIMILARITY_THRESHOLD"),
            }
        }
        env_override("WARDEN_WEBHOOK_URL", &mut self.alerts.webhook_url);
        env_override("SMTP_HOST", &mut self.alerts.smtp_host);
        if let Ok(v) = std::env::var("SMTP_PORT") {
            self.alerts.smtp_port = v.parse().unwrap_or(self.alerts.smtp_port);
        }
        env_override("SMTP_USERNAME", &mut self.alerts.smtp_username);
        env_override("SMTP_PASSWORD", &mut self.alerts.smtp_password);
        env_override("WARDEN_ALERT_EMAIL_FROM", &mut self.alerts.email_from);
        env_override("WARDEN_ALERT_EMAIL_TO", &mut self.alerts.email_to);
    }

    fn validate(&mut self) {
        if !(1..=60).contains(&self.source.sync_interval_min) {
            warn!(
                configured = self.source.sync_interval_min,
                "sync_interval_min outside 1-60, clamping"
            );
            self.source.sync_interval_min = self.source.sync_interval_min.clamp(1, 60);
        }
        if !(0.0..=1.0).contains(&self.source.similarity_threshold) {
            warn!(
                configured = self.source.similarity_threshold,
                "similarity_threshold outside [0,1], resetting to 0.8"
            );
            self.source.similarity_threshold = 0.8;
        }
    }

    pub fn scheduler_enabled(&self) -> bool {
        !self.source.token.is_empty()
    }
}

fn env_override(key: &str, target: &mut String) {
    if let Ok(v) = std::env::var(key) {
        if !v.is_empty() {
            *target = v;
        }
    }
}
