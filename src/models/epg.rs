use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CastMember {
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesInfo {
    pub series_name: Option<String>,
    pub season_name: Option<String>,
    pub episode_name: Option<String>,
    pub season_number: Option<u32>,
    pub episode_number: Option<u32>,
    pub episodes_in_season: Option<u32>,
}

impl SeriesInfo {
    pub fn is_empty(&self) -> bool {
        *self == SeriesInfo::default()
    }
}

/// One programme in the guide
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpgEntry {
    pub id: String,
    pub channel_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub poster: Option<String>,
    pub cast: Vec<CastMember>,
    pub directors: Vec<String>,
    pub genres: Vec<String>,
    pub series: Option<SeriesInfo>,
    pub year: Option<i32>,
    pub country: Option<String>,
    /// Set while the entry is an unresolved multi-dimension placeholder
    pub mosaic_external_id: Option<String>,
}

impl EpgEntry {
    pub fn new(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        title: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            channel_id: channel_id.into(),
            title: title.into(),
            description: None,
            start_time,
            end_time,
            poster: None,
            cast: Vec::new(),
            directors: Vec::new(),
            genres: Vec::new(),
            series: None,
            year: None,
            country: None,
            mosaic_external_id: None,
        }
    }

    /// Half-open `[start, end)` containment
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start_time <= at && at < self.end_time
    }

    pub fn has_valid_interval(&self) -> bool {
        self.start_time < self.end_time
    }
}
