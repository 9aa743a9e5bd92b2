//! Kaltura OTT API payloads.
//!
//! The API is loose about numeric vs string values, so the meta/tag accessors
//! accept either.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KalturaSession {
    pub ks: String,
    #[serde(default)]
    pub expiry: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub login_session: KalturaSession,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default = "Vec::new")]
    pub objects: Vec<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KalturaImage {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub ratio: Option<String>,
    #[serde(default)]
    pub image_type_id: Option<i64>,
}

/// `KalturaStringValue` / `KalturaDoubleValue` / `KalturaLongValue` ...
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KalturaValue {
    #[serde(default)]
    pub value: Value,
}

impl KalturaValue {
    pub fn as_string(&self) -> Option<String> {
        match &self.value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match &self.value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_i64().and_then(|n| u32::try_from(n).ok())
    }
}

/// Tag holding either a single value or an array of multilingual values
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KalturaTag {
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub objects: Vec<KalturaValue>,
}

impl KalturaTag {
    pub fn values(&self) -> Vec<String> {
        self.objects.iter().filter_map(KalturaValue::as_string).collect()
    }

    /// Scalar `value`, falling back to the first array element
    pub fn first_value(&self) -> Option<String> {
        match &self.value {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => self.values().into_iter().next(),
        }
    }
}

/// Any asset returned by `asset/action/list` (channels, programmes, recordings)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KalturaAsset {
    #[serde(default)]
    pub object_type: String,
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub images: Vec<KalturaImage>,
    #[serde(default)]
    pub metas: HashMap<String, KalturaValue>,
    #[serde(default)]
    pub tags: HashMap<String, KalturaTag>,
    #[serde(default)]
    pub start_date: i64,
    #[serde(default)]
    pub end_date: i64,
    #[serde(default)]
    pub linear_asset_id: Option<i64>,
}

impl KalturaAsset {
    pub fn meta_string(&self, key: &str) -> Option<String> {
        self.metas.get(key).and_then(KalturaValue::as_string)
    }

    pub fn meta_u32(&self, key: &str) -> Option<u32> {
        self.metas.get(key).and_then(KalturaValue::as_u32)
    }

    pub fn tag_values(&self, key: &str) -> Vec<String> {
        self.tags.get(key).map(KalturaTag::values).unwrap_or_default()
    }
}

// ============================================================================
// Playback
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DrmInfo {
    #[serde(default)]
    pub scheme: String,
    #[serde(default, rename = "licenseURL")]
    pub license_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaybackSource {
    /// `DASH`, `DASH_WV`, `HLS`, `HLS_FP`
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub drm: Vec<DrmInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaybackMessage {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaybackContextResult {
    #[serde(default)]
    pub sources: Vec<PlaybackSource>,
    #[serde(default)]
    pub messages: Vec<PlaybackMessage>,
}
