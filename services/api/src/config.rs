//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development. Credit costs and allowances live here
//! rather than as constants in the core: they are policy, not invariants.

use revision_core::ledger::CreditPolicy;
use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub grading_model: String,
    pub chat_model: String,
    pub grading_cost: u32,
    pub chat_cost: u32,
    pub default_credit_balance: u32,
    pub chat_daily_cap: u32,
    pub grading_queue_capacity: usize,
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

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load API Keys (as optional) ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();

        // --- Load Adapter-specific Settings ---
        let grading_model =
            std::env::var("GRADING_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        // --- Load Metering Policy ---
        let grading_cost = parse_var("GRADING_COST", 5u32)?;
        let chat_cost = parse_var("CHAT_COST", 1u32)?;
        let default_credit_balance = parse_var("DEFAULT_CREDIT_BALANCE", 50u32)?;
        let chat_daily_cap = parse_var("CHAT_DAILY_CAP", 20u32)?;
        let grading_queue_capacity = parse_var("GRADING_QUEUE_CAPACITY", 64usize)?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            grading_model,
            chat_model,
            grading_cost,
            chat_cost,
            default_credit_balance,
            chat_daily_cap,
            grading_queue_capacity,
        })
    }

    /// The metering policy handed to the core's usage ledger.
    pub fn credit_policy(&self) -> CreditPolicy {
        CreditPolicy {
            grading_cost: self.grading_cost,
            chat_cost: self.chat_cost,
            default_balance: self.default_credit_balance,
            chat_daily_cap: self.chat_daily_cap,
        }
    }
}

/// Parses an optional numeric environment variable, falling back to `default`.
fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw)),
        Err(_) => Ok(default),
    }
}
