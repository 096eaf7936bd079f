//! Application configuration

use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub public_url: String,

    // Database
    pub database_url: String,

    // Stripe
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,

    // Trials
    pub free_trial_days: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            public_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,

            // Stripe
            stripe_secret_key: env::var("STRIPE_SECRET_KEY")
                .map_err(|_| ConfigError::Missing("STRIPE_SECRET_KEY"))?,
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),

            // Trials
            free_trial_days: env::var("FREE_TRIAL_DAYS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()
                .unwrap_or(7),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn setup_minimal_config() {
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var("STRIPE_SECRET_KEY", "sk_test_123");
    }

    fn cleanup_config() {
        env::remove_var("DATABASE_URL");
        env::remove_var("STRIPE_SECRET_KEY");
        env::remove_var("FREE_TRIAL_DAYS");
    }

    #[test]
    #[serial]
    fn test_missing_database_url_fails() {
        cleanup_config();
        env::set_var("STRIPE_SECRET_KEY", "sk_test_123");

        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::Missing("DATABASE_URL"))));

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_defaults_applied() {
        setup_minimal_config();

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.free_trial_days, 7);

        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_trial_days_override() {
        setup_minimal_config();
        env::set_var("FREE_TRIAL_DAYS", "14");

        let config = Config::from_env().unwrap();
        assert_eq!(config.free_trial_days, 14);

        cleanup_config();
    }
}
