//! Runtime configuration.
//!
//! Tunables live in `ServerConfig.json` next to the binary; every field
//! has a default so a missing file or a partial file both work. Endpoint
//! secrets (database, redis, bind address) come from the environment and
//! are loaded through dotenvy in `main`.

use serde::Deserialize;
use std::env;
use tokio::fs;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub economy: EconomyConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub game_loop: GameLoopConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EconomyConfig {
    /// Starting balance for lazily created wallets. The database setting
    /// `Economy:InitialCoins` overrides this when present.
    pub initial_coins: i64,
    /// How long ledger idempotency keys are kept around.
    pub idempotency_key_retention_days: i64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            initial_coins: 100,
            idempotency_key_retention_days: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// How long a disconnected player keeps their seat.
    pub reconnection_grace_period_seconds: u64,
    pub max_connections_per_user: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnection_grace_period_seconds: 15,
            max_connections_per_user: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Per user command budget on the messaging channel.
    pub messages_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            messages_per_minute: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GameLoopConfig {
    /// Turn-timeout scheduler tick.
    pub tick_interval_ms: u64,
    /// Snapshot worker interval; `0` disables snapshotting.
    pub snapshot_interval_secs: u64,
}

impl Default for GameLoopConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5000,
            snapshot_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityConfig {
    pub require_https_in_production: bool,
    pub minimum_api_key_length: usize,
    pub enforce_api_key_validation: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            require_https_in_production: true,
            minimum_api_key_length: 16,
            enforce_api_key_validation: true,
        }
    }
}

impl ServerConfig {
    /// Loads the config file, falling back to defaults when it is absent.
    /// A present but unparsable file is an error; better to refuse than
    /// to run with half a config.
    pub async fn load(path: &str) -> Result<Self, String> {
        match fs::read_to_string(path).await {
            Ok(raw) => {
                serde_json::from_str(&raw).map_err(|e| format!("failed to parse {path}: {e}"))
            }
            Err(_) => {
                tracing::info!(path, "No config file, using defaults.");
                Ok(Self::default())
            }
        }
    }
}

/// Connection endpoints, read from the environment.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub database_url: String,
    pub redis_url: String,
    pub bind_addr: String,
}

impl Endpoints {
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| "DATABASE_URL is not set".to_string())?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.economy.initial_coins, 100);
        assert_eq!(cfg.economy.idempotency_key_retention_days, 7);
        assert_eq!(cfg.session.reconnection_grace_period_seconds, 15);
        assert_eq!(cfg.rate_limit.messages_per_minute, 60);
        assert_eq!(cfg.game_loop.tick_interval_ms, 5000);
    }

    #[test]
    fn partial_files_keep_defaults_for_the_rest() {
        let raw = r#"{ "session": { "reconnectionGracePeriodSeconds": 30 } }"#;
        let cfg: ServerConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.session.reconnection_grace_period_seconds, 30);
        assert_eq!(cfg.session.max_connections_per_user, 3);
        assert_eq!(cfg.economy.initial_coins, 100);
    }
}
