use chrono::{DateTime, Utc};
use serde::Serialize;

use super::epg::EpgEntry;

/// Primary linear channel from the vendor catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub number: u32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    pub adult: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
}

/// Multi-dimension sub-stream attached to a host channel for the duration of one event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MosaicChannel {
    pub id: String,
    pub host_channel_id: String,
    pub number: u32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    pub adult: bool,
    pub active_from: DateTime<Utc>,
    pub active_to: DateTime<Utc>,
}

impl MosaicChannel {
    /// Build from the host channel and the resolved sub-stream programme
    pub fn new(host: &Channel, sub_stream: &EpgEntry) -> Self {
        Self {
            id: sub_stream.id.clone(),
            host_channel_id: host.id.clone(),
            number: host.number,
            name: format!("{} - {}", host.name, sub_stream.title),
            logo: host.logo.clone(),
            adult: host.adult,
            active_from: sub_stream.start_time,
            active_to: sub_stream.end_time,
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.active_from <= now && now < self.active_to
    }
}

/// Anything the playlist can point a player at
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PlayableChannel {
    Primary(Channel),
    Mosaic(MosaicChannel),
}

impl PlayableChannel {
    pub fn id(&self) -> &str {
        match self {
            PlayableChannel::Primary(c) => &c.id,
            PlayableChannel::Mosaic(m) => &m.id,
        }
    }

    pub fn number(&self) -> u32 {
        match self {
            PlayableChannel::Primary(c) => c.number,
            PlayableChannel::Mosaic(m) => m.number,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PlayableChannel::Primary(c) => &c.name,
            PlayableChannel::Mosaic(m) => &m.name,
        }
    }

    pub fn logo(&self) -> Option<&str> {
        match self {
            PlayableChannel::Primary(c) => c.logo.as_deref(),
            PlayableChannel::Mosaic(m) => m.logo.as_deref(),
        }
    }

    pub fn adult(&self) -> bool {
        match self {
            PlayableChannel::Primary(c) => c.adult,
            PlayableChannel::Mosaic(m) => m.adult,
        }
    }
}
