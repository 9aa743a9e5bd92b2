//! Error taxonomy shared by every provider operation.

use thiserror::Error;

/// Convenience alias used throughout the services layer
pub type Result<T> = std::result::Result<T, IptvError>;

/// Kaltura error codes meaning the KS is no longer accepted
const KALTURA_EXPIRED_CODES: &[&str] = &["500016", "500015"];

#[derive(Debug, Error)]
pub enum IptvError {
    /// Bad credentials or a 401/403 from the vendor. Never retried.
    #[error("authentication failed (status {status:?}): {payload}")]
    Authentication { status: Option<u16>, payload: String },

    /// The bound service token was rejected or is past its expiry.
    #[error("session expired")]
    SessionExpired,

    #[error("account has no entitled services")]
    NoServicesFound,

    #[error("channel {0} not found")]
    ChannelNotFound(String),

    #[error("no EPG entry found for channel {0} at the requested time")]
    ChannelWithoutEpg(String),

    #[error("no playable stream found")]
    StreamNotFound,

    #[error("simultaneous stream limit reached: {payload}")]
    ConcurrencyLimitation { payload: String },

    /// Catch-all for anything the vendor answered that we could not use.
    #[error("vendor API error (status {status:?}): {payload}")]
    VendorApi { status: Option<u16>, payload: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("channel {0} requires a parental PIN but PROVIDER_PIN is not set")]
    MissingPin(String),

    #[error("session storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl IptvError {
    pub fn vendor(status: Option<u16>, payload: impl Into<String>) -> Self {
        IptvError::VendorApi {
            status,
            payload: payload.into(),
        }
    }

    pub fn authentication(status: Option<u16>, payload: impl Into<String>) -> Self {
        IptvError::Authentication {
            status,
            payload: payload.into(),
        }
    }

    /// Map a Kaltura `KalturaAPIException` object to the matching variant
    pub fn from_kaltura(error: &serde_json::Value) -> Self {
        let code = match error.get("code") {
            Some(serde_json::Value::String(code)) => code.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };

        if KALTURA_EXPIRED_CODES.contains(&code.as_str()) {
            return IptvError::SessionExpired;
        }

        IptvError::vendor(None, error.to_string())
    }

    /// Turn a vendor rejection into an authentication failure, keeping the payload
    pub fn into_authentication(self) -> Self {
        match self {
            IptvError::VendorApi { status, payload } => IptvError::Authentication { status, payload },
            other => other,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, IptvError::SessionExpired)
    }

    /// HTTP status reported by the vendor, when there was one
    pub fn vendor_status(&self) -> Option<u16> {
        match self {
            IptvError::Authentication { status, .. } | IptvError::VendorApi { status, .. } => *status,
            _ => None,
        }
    }
}
