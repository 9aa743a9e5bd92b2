use std::env;

use crate::models::ProviderKind;
use crate::services::IptvError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,
    pub base_url: String,

    // Provider
    pub provider_type: String,
    pub provider_username: String,
    pub provider_password: String,
    pub provider_device_name: String,
    pub provider_pin: Option<String>,

    // EPG
    pub epg_days_back: i64,
    pub epg_days_forward: i64,
    pub epg_cache_ttl_seconds: u64,

    // Session
    pub session_file: String,

    // HTTP client
    pub fetch_timeout_ms: u64,
    pub user_agent: String,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            // Server
            port: env::var("PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .unwrap_or(3001),
            base_url: env::var("BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),

            // Provider
            provider_type: env::var("PROVIDER_TYPE").unwrap_or_default(),
            provider_username: env::var("PROVIDER_USERNAME").unwrap_or_default(),
            provider_password: env::var("PROVIDER_PASSWORD").unwrap_or_default(),
            provider_device_name: env::var("PROVIDER_DEVICE_NAME")
                .unwrap_or_else(|_| "o2iptv".to_string()),
            provider_pin: env::var("PROVIDER_PIN").ok().filter(|pin| !pin.is_empty()),

            // EPG
            epg_days_back: env::var("EPG_DAYS_BACK")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .unwrap_or(0),
            epg_days_forward: env::var("EPG_DAYS_FORWARD")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .unwrap_or(0),
            epg_cache_ttl_seconds: env::var("EPG_CACHE_TTL_SECONDS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .unwrap_or(86_400), // 24 hours

            // Session
            session_file: env::var("SESSION_FILE")
                .unwrap_or_else(|_| "./data/session.json".to_string()),

            // HTTP client
            fetch_timeout_ms: env::var("FETCH_TIMEOUT_MS")
                .unwrap_or_else(|_| "30000".to_string())
                .parse()
                .unwrap_or(30_000), // 30 seconds

            // Vendors reject unknown clients, so look like a desktop browser
            user_agent: env::var("USER_AGENT").unwrap_or_else(|_| {
                "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0".to_string()
            }),
        }
    }

    /// Provider selected by `PROVIDER_TYPE`; credentials must be present
    pub fn provider_kind(&self) -> Result<ProviderKind, IptvError> {
        let kind: ProviderKind = self.provider_type.parse().map_err(IptvError::Config)?;

        if self.provider_username.is_empty() {
            return Err(IptvError::Config("PROVIDER_USERNAME is not set".to_string()));
        }
        if self.provider_password.is_empty() {
            return Err(IptvError::Config("PROVIDER_PASSWORD is not set".to_string()));
        }
        if kind == ProviderKind::Oneplay && self.provider_device_name.is_empty() {
            return Err(IptvError::Config("PROVIDER_DEVICE_NAME is not set".to_string()));
        }

        Ok(kind)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
