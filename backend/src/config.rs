use anyhow::anyhow;
use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use crate::services::audit_watch::WatchConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub audit: AuditSettings,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/governance".to_string());

        let listen_addr_raw = env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let listen_addr: SocketAddr = listen_addr_raw
            .parse()
            .map_err(|_| anyhow!("Invalid LISTEN_ADDR value: {}", listen_addr_raw))?;

        Ok(Config {
            database_url,
            listen_addr,
            audit: AuditSettings::from_env(),
        })
    }
}

/// Audit subsystem settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditSettings {
    pub enabled: bool,
    /// Days to keep audit rows and rotated log files; `0` keeps them forever.
    pub retention_days: i64,
    pub log_path: Option<PathBuf>,
    pub watch: WatchConfig,
    /// Period of the background retention worker; `None` disables it.
    pub prune_interval: Option<Duration>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: 0,
            log_path: None,
            watch: WatchConfig::default(),
            prune_interval: None,
        }
    }
}

impl AuditSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads settings through `lookup`. Values that fail to parse fall back
    /// to their defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let enabled = lookup("AUDIT_LOG_ENABLED")
            .map(|raw| parse_bool("AUDIT_LOG_ENABLED", &raw, defaults.enabled))
            .unwrap_or(defaults.enabled);

        let retention_days = lookup("AUDIT_LOG_RETENTION_DAYS")
            .map(|raw| parse_number("AUDIT_LOG_RETENTION_DAYS", &raw, defaults.retention_days))
            .unwrap_or(defaults.retention_days);

        let log_path = lookup("AUDIT_LOG_PATH")
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(PathBuf::from);

        let watch = WatchConfig::from_setting(lookup("AUDIT_LOG_MODEL_EVENTS").as_deref());

        let prune_interval = lookup("AUDIT_LOG_PRUNE_INTERVAL_SECS")
            .map(|raw| parse_number("AUDIT_LOG_PRUNE_INTERVAL_SECS", &raw, 0_u64))
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Self {
            enabled,
            retention_days,
            log_path,
            watch,
            prune_interval,
        }
    }
}

fn parse_bool(key: &str, raw: &str, default: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        "" => default,
        _ => {
            tracing::warn!(key, value = raw, "Invalid boolean setting; using default");
            default
        }
    }
}

fn parse_number<T>(key: &str, raw: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return default;
    }
    trimmed.parse().unwrap_or_else(|_| {
        tracing::warn!(key, value = raw, "Invalid numeric setting; using default");
        default
    })
}
