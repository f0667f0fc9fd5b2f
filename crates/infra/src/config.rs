//! Process configuration read from environment variables.

use std::net::SocketAddr;

use thiserror::Error;
use tracing::warn;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_AUDIT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Used when `JWT_SECRET` is unset. Never acceptable outside local development.
const INSECURE_DEV_SECRET: &str = "keystone-insecure-dev-secret";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub audit_queue_capacity: usize,
    pub database_max_connections: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup (the process env in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = parse("BIND_ADDR", var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()))?;

        let jwt_secret = match var("JWT_SECRET") {
            Some(secret) => secret,
            None => {
                warn!("JWT_SECRET is not set, using an insecure development secret");
                INSECURE_DEV_SECRET.to_string()
            }
        };

        let audit_queue_capacity = match var("AUDIT_QUEUE_CAPACITY") {
            Some(raw) => positive("AUDIT_QUEUE_CAPACITY", raw)?,
            None => DEFAULT_AUDIT_QUEUE_CAPACITY,
        };
        let database_max_connections = match var("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => positive("DATABASE_MAX_CONNECTIONS", raw)?,
            None => DEFAULT_DATABASE_MAX_CONNECTIONS,
        };

        Ok(Self {
            bind_addr,
            database_url: var("DATABASE_URL"),
            jwt_secret,
            audit_queue_capacity,
            database_max_connections,
        })
    }
}

fn parse<T>(key: &'static str, raw: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value: raw,
    })
}

fn positive<T>(key: &'static str, raw: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let value: T = parse(key, raw.clone())?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr, DEFAULT_BIND_ADDR.parse().unwrap());
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.jwt_secret, INSECURE_DEV_SECRET);
        assert_eq!(cfg.audit_queue_capacity, DEFAULT_AUDIT_QUEUE_CAPACITY);
        assert_eq!(cfg.database_max_connections, DEFAULT_DATABASE_MAX_CONNECTIONS);
    }

    #[test]
    fn explicit_values_are_used() {
        let cfg = config(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("DATABASE_URL", "postgres://localhost/keystone"),
            ("JWT_SECRET", "s3cret"),
            ("AUDIT_QUEUE_CAPACITY", "64"),
            ("DATABASE_MAX_CONNECTIONS", "4"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/keystone"));
        assert_eq!(cfg.jwt_secret, "s3cret");
        assert_eq!(cfg.audit_queue_capacity, 64);
        assert_eq!(cfg.database_max_connections, 4);
    }

    #[test]
    fn blank_database_url_means_in_memory() {
        assert_eq!(config(&[("DATABASE_URL", "  ")]).unwrap().database_url, None);
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(matches!(
            config(&[("AUDIT_QUEUE_CAPACITY", "lots")]),
            Err(ConfigError::Invalid { key: "AUDIT_QUEUE_CAPACITY", .. })
        ));
        assert!(matches!(
            config(&[("DATABASE_MAX_CONNECTIONS", "0")]),
            Err(ConfigError::Invalid { key: "DATABASE_MAX_CONNECTIONS", .. })
        ));
        assert!(matches!(
            config(&[("BIND_ADDR", "not-an-addr")]),
            Err(ConfigError::Invalid { key: "BIND_ADDR", .. })
        ));
    }
}
