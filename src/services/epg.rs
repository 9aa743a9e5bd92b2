//! EPG aggregation and caching.
//!
//! The aggregator owns the time window and the rendered XMLTV cache; the
//! Kaltura fetchers below turn `asset/action/list` programme assets into
//! [`EpgEntry`] values.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::error::Result;
use super::kaltura::types::{KalturaAsset, KalturaImage};
use super::kaltura::{search_filter, KalturaApi};
use super::metrics::EPG_CACHE;
use super::mosaic::MosaicResolver;
use super::xmltv;
use crate::models::{CastMember, Channel, EpgEntry, SeriesInfo};

/// Channels per EPG list query
pub const EPG_BATCH_SIZE: usize = 5;
pub const EPG_PAGE_SIZE: u32 = 500;

const MOSAIC_MARKER: &str = "MosaicProgramExternalId=";

/// Inclusive time window of a guide request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpgWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl EpgWindow {
    /// `[now - back days, now + 1 day - 1s + forward days]`
    pub fn around(now: DateTime<Utc>, days_back: i64, days_forward: i64) -> Self {
        Self {
            start: now - Duration::days(days_back),
            end: now + Duration::days(1 + days_forward) - Duration::seconds(1),
        }
    }
}

struct CachedGuide {
    fetched_at: DateTime<Utc>,
    entries: usize,
    xmltv: String,
}

pub struct EpgAggregator {
    ttl: Duration,
    days_back: i64,
    days_forward: i64,
    cache: Option<CachedGuide>,
}

impl EpgAggregator {
    pub fn new(ttl_seconds: u64, days_back: i64, days_forward: i64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_seconds as i64),
            days_back,
            days_forward,
            cache: None,
        }
    }

    pub fn window(&self, now: DateTime<Utc>) -> EpgWindow {
        EpgWindow::around(now, self.days_back, self.days_forward)
    }

    /// Cached XMLTV when it is younger than the TTL
    pub fn cached(&self, now: DateTime<Utc>) -> Option<&str> {
        let hit = self
            .cache
            .as_ref()
            .filter(|cache| now - cache.fetched_at < self.ttl)
            .map(|cache| cache.xmltv.as_str());

        EPG_CACHE
            .with_label_values(&[if hit.is_some() { "hit" } else { "miss" }])
            .inc();
        hit
    }

    /// Render and cache a freshly fetched guide
    pub fn store(&mut self, channels: &[Channel], entries: &[EpgEntry], now: DateTime<Utc>) -> &str {
        let xmltv = xmltv::render(channels, entries);
        info!(epg_channels = channels.len(), epg_entries = entries.len(), msg = "EPG cached");

        let cache = self.cache.insert(CachedGuide {
            fetched_at: now,
            entries: entries.len(),
            xmltv,
        });
        &cache.xmltv
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// `(fetched_at, entry count)` of the cached guide
    pub fn stats(&self) -> Option<(DateTime<Utc>, usize)> {
        self.cache.as_ref().map(|c| (c.fetched_at, c.entries))
    }
}

// ============================================================================
// Kaltura fetchers
// ============================================================================

/// Guide for `channels` over `window`, batched by [`EPG_BATCH_SIZE`]. Failed
/// batches are logged and skipped; mosaic placeholders are replaced by their
/// resolved sub-stream programmes.
pub async fn fetch_kaltura_epg(
    api: &KalturaApi,
    ks: &str,
    channels: &[Channel],
    window: EpgWindow,
) -> Result<Vec<EpgEntry>> {
    let known: HashSet<&str> = channels.iter().map(|c| c.id.as_str()).collect();
    let resolver = MosaicResolver::new(api, ks);
    let mut entries = Vec::new();

    for batch in channels.chunks(EPG_BATCH_SIZE) {
        let ids = batch
            .iter()
            .map(|c| format!("linear_media_id:'{}'", c.id))
            .collect::<Vec<_>>()
            .join(" ");
        let filter = search_filter(&format!(
            "(and (or {}) start_date >= '{}' end_date <= '{}' asset_type='epg' auto_fill=true)",
            ids,
            window.start.timestamp(),
            window.end.timestamp()
        ));

        let assets = match api.list_all(ks, &filter, EPG_PAGE_SIZE).await {
            Ok(assets) => assets,
            Err(e) if e.is_session_expired() => return Err(e),
            Err(e) => {
                warn!("EPG batch [{}] failed: {}", ids, e);
                continue;
            }
        };

        for entry in assets.iter().filter_map(entry_from_asset) {
            if !known.contains(entry.channel_id.as_str()) {
                continue;
            }
            entries.extend(resolve_placeholder(&resolver, entry).await);
        }
    }

    debug!("Fetched {} EPG entries for {} channels", entries.len(), channels.len());
    Ok(entries)
}

/// Programmes airing right now on any channel
pub async fn fetch_kaltura_live_epg(api: &KalturaApi, ks: &str, now: DateTime<Utc>) -> Result<Vec<EpgEntry>> {
    let ts = now.timestamp();
    let filter = search_filter(&format!(
        "(and start_date <= '{}' end_date >= '{}' asset_type='epg' auto_fill= true)",
        ts, ts
    ));

    let assets = api.list_all(ks, &filter, EPG_PAGE_SIZE).await?;
    Ok(assets.iter().filter_map(entry_from_asset).collect())
}

/// Programmes of one channel starting inside `[from, to]`
pub async fn fetch_kaltura_channel_epg(
    api: &KalturaApi,
    ks: &str,
    channel_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<EpgEntry>> {
    let filter = search_filter(&format!(
        "(and linear_media_id:'{}' start_date >= '{}' start_date <= '{}' asset_type='epg' auto_fill=true)",
        channel_id,
        from.timestamp(),
        to.timestamp()
    ));

    let assets = api.list_all(ks, &filter, EPG_PAGE_SIZE).await?;
    Ok(assets.iter().filter_map(entry_from_asset).collect())
}

/// A placeholder becomes its sub-stream programmes; without any it stays as a plain entry
async fn resolve_placeholder(resolver: &MosaicResolver<'_>, mut entry: EpgEntry) -> Vec<EpgEntry> {
    if entry.mosaic_external_id.is_none() {
        return vec![entry];
    }

    match resolver.resolve(&entry).await {
        Ok(resolved) if !resolved.is_empty() => resolved,
        Ok(_) => {
            entry.mosaic_external_id = None;
            vec![entry]
        }
        Err(e) => {
            warn!("Mosaic resolution for {} failed: {}", entry.title, e);
            entry.mosaic_external_id = None;
            vec![entry]
        }
    }
}

/// Map a programme/recording asset; anything else, or an empty interval, yields `None`
pub fn entry_from_asset(asset: &KalturaAsset) -> Option<EpgEntry> {
    if asset.object_type != "KalturaProgramAsset" && asset.object_type != "KalturaRecordingAsset" {
        return None;
    }
    let channel_id = asset.linear_asset_id?;

    let start = Utc.timestamp_opt(asset.start_date, 0).single()?;
    let end = Utc.timestamp_opt(asset.end_date, 0).single()?;

    let mut entry = EpgEntry::new(asset.id.to_string(), channel_id.to_string(), asset.name.clone(), start, end);
    if !entry.has_valid_interval() {
        debug!("Dropping EPG entry {} with empty interval", asset.id);
        return None;
    }

    entry.description = asset.description.clone().filter(|d| !d.is_empty());
    entry.poster = asset.images.first().map(poster_url);
    entry.year = asset
        .metas
        .get("Year")
        .and_then(|y| y.as_i64())
        .and_then(|y| i32::try_from(y).ok())
        .filter(|y| *y > 0);
    entry.genres = asset.tag_values("Genre");
    entry.directors = asset.tag_values("Director");
    entry.country = asset.tags.get("Country").and_then(|t| t.first_value());
    entry.cast = asset
        .tag_values("PersonReference")
        .iter()
        .filter_map(|reference| {
            let parts: Vec<&str> = reference.split('|').collect();
            let name = parts.get(1).map(|n| n.trim()).filter(|n| !n.is_empty())?;
            Some(CastMember {
                name: name.to_string(),
                role: parts.get(2).map(|r| r.trim().to_string()).unwrap_or_default(),
            })
        })
        .collect();

    let series = SeriesInfo {
        series_name: asset.meta_string("SeriesName"),
        season_name: asset.meta_string("SeasonName"),
        episode_name: asset.meta_string("EpisodeName"),
        season_number: asset.meta_u32("SeasonNumber"),
        episode_number: asset.meta_u32("EpisodeNumber"),
        episodes_in_season: asset.meta_u32("EpisodeInSeason"),
    };
    if let Some(episode) = series.episode_number.filter(|n| *n > 0) {
        entry.title = format!("{} ({})", entry.title, episode);
    }
    if !series.is_empty() {
        entry.series = Some(series);
    }

    entry.mosaic_external_id = asset
        .tag_values("MosaicInfo")
        .iter()
        .find_map(|info| info.split(MOSAIC_MARKER).nth(1))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    Some(entry)
}

fn poster_url(image: &KalturaImage) -> String {
    let suffix = match image.ratio.as_deref() {
        Some("2x3") => "/height/720/width/480",
        Some("3x2") => "/height/480/width/720",
        Some("16x9") => "/height/480/width/853",
        _ => "",
    };
    format!("{}{}", image.url, suffix)
}
