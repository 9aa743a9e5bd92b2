//! Live and catchup stream resolution for Kaltura vendors.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::epg::fetch_kaltura_channel_epg;
use super::error::{IptvError, Result};
use super::kaltura::types::PlaybackContextResult;
use super::kaltura::KalturaApi;
use super::manifest::fetch_dash;
use crate::models::{EpgEntry, Manifest, PlayableChannel, PlaybackContext, StreamDescriptor};

/// A catchup request ending this close to now is served live
pub const LIVE_SKEW_SECONDS: i64 = 10;
/// How far past the requested end the programme lookup reaches
pub const CATCHUP_LOOKAHEAD_HOURS: i64 = 12;

const WIDEVINE_SCHEME: &str = "WIDEVINE_CENC";

pub fn ends_within_live_skew(end: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    end > now - Duration::seconds(LIVE_SKEW_SECONDS)
}

/// Programme starting exactly at `start`, else the one airing at `start`
pub fn find_catchup_entry(entries: &[EpgEntry], start: DateTime<Utc>) -> Option<&EpgEntry> {
    entries
        .iter()
        .find(|e| e.start_time == start)
        .or_else(|| entries.iter().find(|e| e.contains(start)))
}

/// Plain DASH wins over Widevine DASH
pub fn select_dash_source(context: &PlaybackContextResult) -> Result<StreamDescriptor> {
    if let Some(message) = context
        .messages
        .iter()
        .find(|m| m.code == "ConcurrencyLimitation")
    {
        return Err(IptvError::ConcurrencyLimitation {
            payload: message.message.clone(),
        });
    }

    let source = ["DASH", "DASH_WV"]
        .iter()
        .find_map(|kind| context.sources.iter().find(|s| s.kind == *kind && !s.url.is_empty()))
        .ok_or(IptvError::StreamNotFound)?;

    Ok(StreamDescriptor {
        manifest_url: source.url.clone(),
        license_url: source
            .drm
            .iter()
            .find(|d| d.scheme == WIDEVINE_SCHEME)
            .and_then(|d| d.license_url.clone()),
    })
}

pub struct StreamResolver<'a> {
    api: &'a KalturaApi,
    ks: &'a str,
}

impl<'a> StreamResolver<'a> {
    pub fn new(api: &'a KalturaApi, ks: &'a str) -> Self {
        Self { api, ks }
    }

    pub async fn get_live(&self, channel: &PlayableChannel) -> Result<Manifest> {
        let context = match channel {
            PlayableChannel::Primary(_) => PlaybackContext::Playback,
            PlayableChannel::Mosaic(_) => PlaybackContext::StartOver,
        };
        self.resolve(channel.id(), context).await
    }

    pub async fn get_catchup(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        channel: &PlayableChannel,
    ) -> Result<Manifest> {
        let now = Utc::now();
        if ends_within_live_skew(end, now) {
            debug!("Catchup for {} ends within live skew, playing live", channel.name());
            return self.get_live(channel).await;
        }

        // Mosaic sub-streams only exist while live; start-over covers the rest
        let PlayableChannel::Primary(primary) = channel else {
            return self.get_live(channel).await;
        };

        let lookahead = end + Duration::hours(CATCHUP_LOOKAHEAD_HOURS);
        let entries = fetch_kaltura_channel_epg(self.api, self.ks, &primary.id, start, lookahead).await?;
        let entry = find_catchup_entry(&entries, start)
            .ok_or_else(|| IptvError::ChannelWithoutEpg(primary.id.clone()))?;

        if entry.end_time > now - Duration::seconds(LIVE_SKEW_SECONDS) {
            info!("Catchup programme {} on {} is still running, playing live", entry.title, primary.name);
            return self.get_live(channel).await;
        }

        self.resolve(&entry.id, PlaybackContext::Catchup).await
    }

    async fn resolve(&self, asset_id: &str, context: PlaybackContext) -> Result<Manifest> {
        let playback = self.api.playback_context(self.ks, asset_id, context).await?;
        let descriptor = select_dash_source(&playback)?;
        debug!(
            asset_id = asset_id,
            context = context.as_str(),
            drm = descriptor.license_url.is_some(),
            msg = "Playback source selected"
        );

        fetch_dash(
            self.api.transport().as_ref(),
            &descriptor,
            self.api.profile().normalizes_output,
        )
        .await
    }
}
