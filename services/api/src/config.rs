//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use chrono::Duration;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::Level;
use visitor_insight_core::report::DEFAULT_UNIT_PRICE_CENTS;
use visitor_insight_core::session::SessionSettings;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which `VisitorStore` implementation the service runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("'{}' is not one of postgres, memory", other)),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub store_backend: StoreBackend,
    /// Required only for the postgres backend.
    pub database_url: Option<String>,
    pub log_level: Level,
    pub admin_token: String,
    pub session_ttl_days: i64,
    pub session_max_lifetime_days: i64,
    pub unit_price_cents: u64,
    /// Zero disables the scheduled rollup.
    pub rollup_interval_secs: u64,
    pub cors_origin: String,
}

fn parsed<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Server and Store ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let store_backend = parsed("STORE_BACKEND", StoreBackend::Postgres)?;
        let database_url = std::env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingVar("DATABASE_URL".to_string()));
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Admin Access ---
        let admin_token = std::env::var("ADMIN_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("ADMIN_TOKEN".to_string()))?;

        // --- Sessions, Reporting and Jobs ---
        let session_ttl_days = parsed("SESSION_TTL_DAYS", 30i64)?;
        let session_max_lifetime_days = parsed("SESSION_MAX_LIFETIME_DAYS", 90i64)?;
        if session_ttl_days <= 0 || session_max_lifetime_days < session_ttl_days {
            return Err(ConfigError::InvalidValue(
                "SESSION_MAX_LIFETIME_DAYS".to_string(),
                "session lifetimes must be positive and the maximum at least the TTL".to_string(),
            ));
        }
        let unit_price_cents = parsed("UNIT_PRICE_CENTS", DEFAULT_UNIT_PRICE_CENTS)?;
        let rollup_interval_secs = parsed("ROLLUP_INTERVAL_SECS", 300u64)?;
        let cors_origin = std::env::var("CORS_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        Ok(Self {
            bind_address,
            store_backend,
            database_url,
            log_level,
            admin_token,
            session_ttl_days,
            session_max_lifetime_days,
            unit_price_cents,
            rollup_interval_secs,
            cors_origin,
        })
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            ttl: Duration::days(self.session_ttl_days),
            max_lifetime: Duration::days(self.session_max_lifetime_days),
        }
    }

    /// A configuration for tests and local runs on the in-memory store.
    pub fn for_memory(admin_token: &str) -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 3000)),
            store_backend: StoreBackend::Memory,
            database_url: None,
            log_level: Level::INFO,
            admin_token: admin_token.to_string(),
            session_ttl_days: 30,
            session_max_lifetime_days: 90,
            unit_price_cents: DEFAULT_UNIT_PRICE_CENTS,
            rollup_interval_secs: 0,
            cors_origin: "http://localhost:3000".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_backend_parsing() {
        assert_eq!("memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert_eq!(" Postgres ".parse::<StoreBackend>(), Ok(StoreBackend::Postgres));
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn memory_config_matches_session_defaults() {
        let config = Config::for_memory("secret");
        let settings = config.session_settings();
        assert_eq!(settings.ttl, Duration::days(30));
        assert_eq!(settings.max_lifetime, Duration::days(90));
    }
}
