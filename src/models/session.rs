use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported vendor backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "O2TV_CZ")]
    O2tvCz,
    #[serde(rename = "O2TV_SK")]
    O2tvSk,
    #[serde(rename = "ONEPLAY")]
    Oneplay,
}

impl ProviderKind {
    /// Key used in the session document and in M3U `provider=` attributes
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::O2tvCz => "O2TV_CZ",
            ProviderKind::O2tvSk => "O2TV_SK",
            ProviderKind::Oneplay => "ONEPLAY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "O2TV_CZ" => Ok(ProviderKind::O2tvCz),
            "O2TV_SK" => Ok(ProviderKind::O2tvSk),
            "ONEPLAY" => Ok(ProviderKind::Oneplay),
            other => Err(format!("unknown provider type '{}'", other)),
        }
    }
}

/// Active, service-bound vendor session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub provider: ProviderKind,
    pub device_id: String,
    pub service_id: Option<String>,
    pub service_token: String,
    /// Unix seconds
    pub expiry_epoch: i64,
    pub refresh_token: Option<String>,
}

impl Session {
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now().timestamp())
    }

    pub fn is_valid_at(&self, now_epoch: i64) -> bool {
        self.expiry_epoch > now_epoch
    }
}

// ============================================================================
// Persisted form
// ============================================================================

/// Service token as written to the session document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StoredService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "KS")]
    pub ks: String,
    pub expiry: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Kaltura vendors keep region, credentials, device and the bound service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StoredKalturaSession {
    pub region: String,
    pub username: String,
    pub password: String,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<StoredService>,
}

/// Bearer-token vendors keep the token, its expiry and the user it was issued to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StoredTokenSession {
    pub token: String,
    pub expiry: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredSession {
    Kaltura(StoredKalturaSession),
    Token(StoredTokenSession),
}

impl StoredSession {
    pub fn device_id(&self) -> Option<&str> {
        match self {
            StoredSession::Kaltura(stored) if !stored.device_id.is_empty() => Some(&stored.device_id),
            StoredSession::Token(stored) => stored.device_id.as_deref(),
            _ => None,
        }
    }

    /// Rebuild a session when the document is complete and belongs to `username`.
    /// Validity against the clock is checked by the caller.
    pub fn to_session(&self, provider: ProviderKind, username: &str) -> Option<Session> {
        match self {
            StoredSession::Kaltura(stored) => {
                let service = stored.service.as_ref()?;
                if stored.username != username || stored.device_id.is_empty() || service.ks.is_empty() {
                    return None;
                }
                Some(Session {
                    provider,
                    device_id: stored.device_id.clone(),
                    service_id: service.id.clone(),
                    service_token: service.ks.clone(),
                    expiry_epoch: service.expiry,
                    refresh_token: service.refresh_token.clone(),
                })
            }
            StoredSession::Token(stored) => {
                if stored.token.is_empty() || stored.username.as_deref() != Some(username) {
                    return None;
                }
                Some(Session {
                    provider,
                    device_id: stored.device_id.clone().unwrap_or_default(),
                    service_id: None,
                    service_token: stored.token.clone(),
                    expiry_epoch: stored.expiry,
                    refresh_token: None,
                })
            }
        }
    }
}

impl Session {
    /// Document written for this session; `region` is `None` for bearer-token vendors
    pub fn to_stored(&self, region: Option<&str>, username: &str, password: &str) -> StoredSession {
        match region {
            Some(region) => StoredSession::Kaltura(StoredKalturaSession {
                region: region.to_string(),
                username: username.to_string(),
                password: password.to_string(),
                device_id: self.device_id.clone(),
                service: Some(StoredService {
                    id: self.service_id.clone(),
                    ks: self.service_token.clone(),
                    expiry: self.expiry_epoch,
                    refresh_token: self.refresh_token.clone(),
                }),
            }),
            None => StoredSession::Token(StoredTokenSession {
                token: self.service_token.clone(),
                expiry: self.expiry_epoch,
                username: Some(username.to_string()),
                device_id: Some(self.device_id.clone()).filter(|id| !id.is_empty()),
            }),
        }
    }
}
