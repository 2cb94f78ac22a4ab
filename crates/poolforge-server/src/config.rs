//! Server configuration from `POOLFORGE_*` environment variables

use poolforge_core::attestation::DEFAULT_ROUNDS;
use std::env;
use thiserror::Error;
use tracing::Level;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is invalid: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Runtime settings of the server binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub log_level: Level,
    /// Concurrent deployment worker slots
    pub workers: usize,
    pub attestation_rounds: u32,
    pub cdn_url: Option<String>,
    pub database_url: Option<String>,
    /// `network=base64secret` entries for authorizing keys
    pub authorizer_keys: Option<String>,
    /// Bearer token required by the signer administration routes
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            log_level: Level::INFO,
            workers: 2,
            attestation_rounds: DEFAULT_ROUNDS,
            cdn_url: None,
            database_url: None,
            authorizer_keys: None,
            admin_token: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = parse_or(var("POOLFORGE_PORT"), "POOLFORGE_PORT", defaults.port)?;
        // Unknown levels fall back to info like the rest of the binary's logging setup
        let log_level = var("POOLFORGE_LOG_LEVEL")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.log_level);
        let workers = parse_or(var("POOLFORGE_WORKERS"), "POOLFORGE_WORKERS", defaults.workers)?;
        if workers == 0 {
            return Err(ConfigError::Invalid {
                name: "POOLFORGE_WORKERS",
                value: "0".into(),
            });
        }
        let attestation_rounds = parse_or(
            var("POOLFORGE_ATTESTATION_ROUNDS"),
            "POOLFORGE_ATTESTATION_ROUNDS",
            defaults.attestation_rounds,
        )?;

        Ok(Self {
            port,
            log_level,
            workers,
            attestation_rounds,
            cdn_url: var("POOLFORGE_CDN_URL"),
            database_url: var("POOLFORGE_DATABASE_URL"),
            authorizer_keys: var("POOLFORGE_AUTHORIZER_KEYS"),
            admin_token: var("POOLFORGE_ADMIN_TOKEN"),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}
