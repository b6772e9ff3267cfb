//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

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
    pub ocr_model: String,
    pub guidance_model: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_price_id: Option<String>,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
    pub cors_origin: String,
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

        // --- Load API Keys (as optional; required keys are enforced at startup) ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let stripe_secret_key = std::env::var("STRIPE_SECRET_KEY").ok();
        let stripe_price_id = std::env::var("STRIPE_PRICE_ID").ok();

        // --- Load Adapter-specific Settings ---
        let ocr_model = std::env::var("OCR_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let guidance_model =
            std::env::var("GUIDANCE_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let checkout_success_url = std::env::var("CHECKOUT_SUCCESS_URL")
            .unwrap_or_else(|_| "https://parentmath.com/success".to_string());
        let checkout_cancel_url = std::env::var("CHECKOUT_CANCEL_URL")
            .unwrap_or_else(|_| "https://parentmath.com".to_string());
        let cors_origin =
            std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:5173".to_string());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            ocr_model,
            guidance_model,
            stripe_secret_key,
            stripe_price_id,
            checkout_success_url,
            checkout_cancel_url,
            cors_origin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env vars are process-global, so the cases run in one test body.
    #[test]
    fn from_env_requires_database_url_and_applies_defaults() {
        std::env::remove_var("DATABASE_URL");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::MissingVar(var)) if var == "DATABASE_URL"
        ));

        std::env::set_var("DATABASE_URL", "postgres://localhost/parentmath");
        std::env::remove_var("BIND_ADDRESS");
        std::env::remove_var("RUST_LOG");
        std::env::remove_var("OCR_MODEL");
        let config = Config::from_env().expect("config should load");
        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.ocr_model, "gpt-4o");
        assert_eq!(config.checkout_cancel_url, "https://parentmath.com");

        std::env::set_var("BIND_ADDRESS", "not-an-address");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidValue(var, _)) if var == "BIND_ADDRESS"
        ));
        std::env::remove_var("BIND_ADDRESS");
        std::env::remove_var("DATABASE_URL");
    }
}
