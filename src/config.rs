//! Application configuration loaded from environment variables.
//!
//! Secrets are injected as environment variables by the deployment and read
//! once at startup.

use chrono::{FixedOffset, Offset, Utc};
use std::env;
use std::time::Duration;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Firebase web API key (public, identifies the project to Identity Toolkit)
    pub firebase_api_key: String,
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// GCP project ID hosting Firestore
    pub gcp_project_id: String,
    /// Server port
    pub port: u16,
    /// Country calling code used to normalize domestic numbers
    pub country_code: String,
    /// Offset applied when formatting coupon timestamps for display
    pub display_utc_offset_minutes: i32,
    /// How long a row shows the "copied" indicator
    pub copied_indicator: Duration,
    /// Client sessions untouched for this long are dropped
    pub session_idle_timeout: Duration,
    /// Upper bound on client sessions held at once; the oldest is dropped past it
    pub session_max_clients: usize,
    /// Run against in-memory identity and document backends
    pub offline: bool,

    // --- Secrets ---
    /// JWT signing key for session cookies (raw bytes)
    pub session_signing_key: Vec<u8>,
}

impl Config {
    /// Config with fixed values for tests.
    pub fn test_default() -> Self {
        Self {
            firebase_api_key: "test_api_key".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            gcp_project_id: "test-project".to_string(),
            port: 8080,
            country_code: "82".to_string(),
            display_utc_offset_minutes: 540,
            copied_indicator: Duration::from_millis(1200),
            session_idle_timeout: Duration::from_secs(60 * 60),
            session_max_clients: 1_000,
            offline: true,
            session_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// For local development, a `.env` file is honored.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let country_code = env::var("COUNTRY_CODE").unwrap_or_else(|_| "82".to_string());
        if country_code.is_empty() || !country_code.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::Invalid("COUNTRY_CODE", country_code));
        }

        Ok(Self {
            firebase_api_key: env::var("FIREBASE_API_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("FIREBASE_API_KEY"))?,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            port: parse_or("PORT", 8080),
            country_code,
            display_utc_offset_minutes: parse_or("DISPLAY_UTC_OFFSET_MINUTES", 540),
            copied_indicator: Duration::from_millis(parse_or("COPIED_INDICATOR_MS", 1200)),
            session_idle_timeout: Duration::from_secs(60 * parse_or("SESSION_IDLE_MINUTES", 60)),
            session_max_clients: parse_or("SESSION_MAX_CLIENTS", 10_000).max(1),
            offline: parse_or("HIVE_OFFLINE", false),

            session_signing_key: env::var("SESSION_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("SESSION_SIGNING_KEY"))?
                .into_bytes(),
        })
    }
}

impl Config {
    /// Offset used when formatting coupon timestamps. Out-of-range values fall back to UTC.
    pub fn display_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.display_utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("FIREBASE_API_KEY", "test_key");
        env::set_var("SESSION_SIGNING_KEY", "test_jwt_key_32_bytes_minimum!!");
        env::set_var("COPIED_INDICATOR_MS", "800");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.firebase_api_key, "test_key");
        assert_eq!(config.country_code, "82");
        assert_eq!(config.copied_indicator, Duration::from_millis(800));
        assert_eq!(config.port, 8080);
        assert_eq!(config.display_offset().local_minus_utc(), 540 * 60);
        assert_eq!(config.session_max_clients, 10_000);
    }
}
