use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub presence: PresenceSection,
    pub rate_limit: RateLimitConfig,
    pub progression: ProgressionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/clerva.db?mode=rwc".to_string(),
            max_connections: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret the external auth provider signs tokens with.
    pub jwt_secret: String,
    /// Optional bearer token the external sweep scheduler must present.
    pub sweep_token: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me".to_string(),
            sweep_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresenceSection {
    pub heartbeat_interval_secs: u64,
    pub stale_threshold_secs: i64,
    pub sweep_interval_secs: u64,
    pub sweep_batch_limit: i64,
    pub purge_after_days: i64,
    pub typing_ttl_secs: i64,
    /// Run the sweep from an in-process timer. Disable when an external
    /// cron calls the sweep endpoint instead.
    pub scheduler_enabled: bool,
}

impl Default for PresenceSection {
    fn default() -> Self {
        let defaults = clerva_core::PresenceConfig::default();
        Self {
            heartbeat_interval_secs: defaults.heartbeat_interval_secs,
            stale_threshold_secs: defaults.stale_threshold_secs,
            sweep_interval_secs: defaults.sweep_interval_secs,
            sweep_batch_limit: defaults.sweep_batch_limit,
            purge_after_days: defaults.purge_after_days,
            typing_ttl_secs: defaults.typing_ttl_secs,
            scheduler_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub heartbeats_per_minute: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            // 15s heartbeat interval plus visibility/reconnect bursts from
            // a handful of tabs fits comfortably under this.
            heartbeats_per_minute: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProgressionConfig {
    pub study_session_xp: i64,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self { study_session_xp: 10 }
    }
}

impl Config {
    /// Load config from a TOML file; a missing file yields the defaults.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            tracing::warn!("config file {path} not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config file {path}"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("could not parse config file {path}"))?;
        Ok(config)
    }

    pub fn to_app_config(&self) -> clerva_core::AppConfig {
        clerva_core::AppConfig {
            jwt_secret: self.auth.jwt_secret.clone(),
            sweep_token: self.auth.sweep_token.clone(),
            presence: clerva_core::PresenceConfig {
                heartbeat_interval_secs: self.presence.heartbeat_interval_secs,
                stale_threshold_secs: self.presence.stale_threshold_secs,
                sweep_interval_secs: self.presence.sweep_interval_secs,
                sweep_batch_limit: self.presence.sweep_batch_limit,
                purge_after_days: self.presence.purge_after_days,
                typing_ttl_secs: self.presence.typing_ttl_secs,
            },
            heartbeats_per_minute: self.rate_limit.heartbeats_per_minute,
            study_session_xp: self.progression.study_session_xp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load("/nonexistent/clerva.toml").expect("defaults");
        assert_eq!(config.server.bind_address, "127.0.0.1:8090");
        assert_eq!(config.presence.stale_threshold_secs, 150);
        assert!(config.presence.scheduler_enabled);
    }

    #[test]
    fn partial_file_keeps_unlisted_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [presence]
            sweep_interval_secs = 30

            [auth]
            jwt_secret = "s3cret"
            "#,
        )
        .expect("parse");
        assert_eq!(parsed.presence.sweep_interval_secs, 30);
        assert_eq!(parsed.presence.stale_threshold_secs, 150);
        assert_eq!(parsed.auth.jwt_secret, "s3cret");
        assert_eq!(parsed.rate_limit.heartbeats_per_minute, 60);
    }
}
