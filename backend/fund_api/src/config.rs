//! Application configuration loaded from environment variables.

use crate::errors::{FundError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Human-readable service title reported by `/health`
    pub app_title: String,
    /// Path to the SQLite database file
    pub database_url: String,
    /// Size of the SQLite connection pool
    pub max_connections: u32,
    /// Port for the REST API server
    pub api_port: u16,
    /// How many times an allocation transaction is attempted before giving up
    pub allocation_max_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            app_title: env_var("APP_TITLE").unwrap_or_else(|_| "QRKot".to_string()),
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./fund.db".to_string()),
            max_connections: parse_or("DB_MAX_CONNECTIONS", 5)?,
            api_port: parse_or("API_PORT", 3001)?,
            allocation_max_attempts: parse_or("ALLOCATION_MAX_ATTEMPTS", 5)?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| FundError::Config(format!("Missing env var: {key}")))
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env_var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| FundError::Config(format!("Invalid {key}"))),
        Err(_) => Ok(default),
    }
}
