//! Oneplay CMS payloads (only the fields we read).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Ids come back as strings on some screens and numbers on others
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Fill the `{WIDTH}`/`{HEIGHT}` placeholders of CMS image URLs
pub fn sized_image(template: &str) -> String {
    template.replace("{WIDTH}", "480").replace("{HEIGHT}", "320")
}

#[derive(Debug, Clone, Deserialize)]
pub struct OneplayDevice {
    pub id: Value,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OneplayChannel {
    pub id: Value,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub adult: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionParams {
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemAction {
    #[serde(default)]
    pub params: Option<ActionParams>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemLabel {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleItem {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub actions: Vec<ItemAction>,
    #[serde(default)]
    pub labels: Vec<ItemLabel>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSchedule {
    pub channel_id: Value,
    #[serde(default)]
    pub items: Vec<ScheduleItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EpgDisplay {
    #[serde(default)]
    pub schedule: Vec<ChannelSchedule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamAsset {
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub drm: Option<Value>,
}

impl StreamAsset {
    pub fn is_encrypted(&self) -> bool {
        match &self.drm {
            None | Some(Value::Null) => false,
            Some(Value::Array(list)) => !list.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
            Some(_) => true,
        }
    }
}
