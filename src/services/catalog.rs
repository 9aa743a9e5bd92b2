//! Primary channel catalog.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::collections::HashSet;
use tracing::{info, warn};

use super::error::Result;
use super::kaltura::types::{KalturaAsset, KalturaImage};
use super::kaltura::KalturaApi;
use crate::models::Channel;

/// Image type id of the primary channel logo
const LOGO_IMAGE_TYPE: i64 = 18;
const LOGO_FALLBACK_SIZE: &str = "/height/320/width/480";

/// Immutable snapshot of the provider's channel list
#[derive(Debug, Default)]
pub struct ChannelCatalog {
    channels: Vec<Channel>,
    loaded_at: Option<DateTime<Utc>>,
}

impl ChannelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot wholesale. Later duplicates of a channel number are dropped.
    pub fn replace(&mut self, channels: Vec<Channel>) {
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(channels.len());

        for channel in channels {
            if seen.insert(channel.number) {
                unique.push(channel);
            } else {
                warn!(
                    "Dropping channel {} ({}): number {} already taken",
                    channel.name, channel.id, channel.number
                );
            }
        }

        info!(channels = unique.len(), msg = "Channel catalog loaded");
        self.channels = unique;
        self.loaded_at = Some(Utc::now());
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded_at.is_some()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn find(&self, id: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }
}

/// Fetch every page of the region's channel list
pub async fn fetch_kaltura_channels(api: &KalturaApi, ks: &str) -> Result<Vec<Channel>> {
    let query = api.profile().channel_query;

    let mut filter = json!({
        "objectType": query.object_type,
        "kSql": query.ksql,
    });
    if let Some(id) = query.id_equal {
        filter["idEqual"] = json!(id);
    }

    let assets = api.list_all(ks, &filter, query.page_size).await?;
    Ok(assets.iter().filter_map(channel_from_asset).collect())
}

pub fn channel_from_asset(asset: &KalturaAsset) -> Option<Channel> {
    let Some(number) = asset.meta_u32("ChannelNumber") else {
        warn!("Channel {} ({}) has no channel number, skipping", asset.name, asset.id);
        return None;
    };

    Some(Channel {
        id: asset.id.to_string(),
        number,
        name: asset.name.clone(),
        logo: logo_url(&asset.images),
        adult: false,
        valid_from: epoch(asset.start_date),
        valid_to: epoch(asset.end_date),
    })
}

fn logo_url(images: &[KalturaImage]) -> Option<String> {
    let primary = images
        .iter()
        .find(|i| i.image_type_id == Some(LOGO_IMAGE_TYPE) || i.ratio.as_deref() == Some("16x9"));

    match primary {
        Some(image) => Some(image.url.clone()),
        None => images
            .first()
            .filter(|i| !i.url.is_empty())
            .map(|i| format!("{}{}", i.url, LOGO_FALLBACK_SIZE)),
    }
}

fn epoch(seconds: i64) -> Option<DateTime<Utc>> {
    if seconds <= 0 {
        return None;
    }
    Utc.timestamp_opt(seconds, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::kaltura::profile::{O2TV_CZ, O2TV_SK};
    use crate::services::transport::testing::{ok_json, ScriptedTransport};
    use serde_json::Value;
    use std::sync::Arc;

    fn channel_json(id: u32) -> Value {
        json!({
            "objectType": "KalturaLinearMediaAsset",
            "id": id,
            "name": format!("Channel {}", id),
            "metas": { "ChannelNumber": { "value": id } },
            "images": [{ "url": format!("https://img/{}", id), "ratio": "4x3", "imageTypeId": 5 }]
        })
    }

    /// Serves `total` channels in pages of the requested size
    fn paged_transport(total: u32) -> Arc<ScriptedTransport> {
        Arc::new(ScriptedTransport::new(move |request| {
            let body = request.json().unwrap();
            let size = body["pager"]["pageSize"].as_u64().unwrap() as u32;
            let index = body["pager"]["pageIndex"].as_u64().unwrap() as u32;
            let first = (index - 1) * size + 1;
            let last = (index * size).min(total);
            let objects: Vec<Value> = (first..=last).map(channel_json).collect();
            ok_json(json!({ "result": { "totalCount": total, "objects": objects } }))
        }))
    }

    #[tokio::test]
    async fn test_load_uses_ceil_total_over_page_size_calls() {
        let transport = paged_transport(650);
        let api = KalturaApi::new(transport.clone(), &O2TV_CZ, "u", "p");

        let channels = fetch_kaltura_channels(&api, "ks").await.unwrap();
        assert_eq!(channels.len(), 650);
        assert_eq!(transport.calls().len(), 3);

        let first = transport.calls()[0].json().cloned().unwrap();
        assert_eq!(first["filter"]["idEqual"], 355960);
        assert_eq!(first["pager"]["pageIndex"], 1);
    }

    #[tokio::test]
    async fn test_load_exact_multiple_of_page_size() {
        let transport = paged_transport(1000);
        let api = KalturaApi::new(transport.clone(), &O2TV_SK, "u", "p");

        let channels = fetch_kaltura_channels(&api, "ks").await.unwrap();
        assert_eq!(channels.len(), 1000);
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_load_with_zero_total_makes_one_call() {
        let transport = paged_transport(0);
        let api = KalturaApi::new(transport.clone(), &O2TV_CZ, "u", "p");

        let channels = fetch_kaltura_channels(&api, "ks").await.unwrap();
        assert!(channels.is_empty());
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn test_logo_selection() {
        let primary = vec![
            KalturaImage { url: "https://a".into(), ratio: Some("2x3".into()), image_type_id: Some(3) },
            KalturaImage { url: "https://b".into(), ratio: Some("1x1".into()), image_type_id: Some(18) },
        ];
        assert_eq!(logo_url(&primary).as_deref(), Some("https://b"));

        let fallback = vec![KalturaImage { url: "https://a".into(), ratio: None, image_type_id: None }];
        assert_eq!(logo_url(&fallback).as_deref(), Some("https://a/height/320/width/480"));
        assert_eq!(logo_url(&[]), None);
    }

    #[test]
    fn test_replace_drops_duplicate_numbers() {
        let make = |id: &str, number| Channel {
            id: id.to_string(),
            number,
            name: id.to_string(),
            logo: None,
            adult: false,
            valid_from: None,
            valid_to: None,
        };

        let mut catalog = ChannelCatalog::new();
        catalog.replace(vec![make("a", 1), make("b", 2), make("c", 1)]);
        assert_eq!(catalog.channels().len(), 2);
        assert!(catalog.find("c").is_none());
        assert!(catalog.find("a").is_some());
        assert!(catalog.is_loaded());
    }

    #[test]
    fn test_channel_without_number_is_dropped() {
        let asset: KalturaAsset = serde_json::from_value(json!({ "id": 5, "name": "No number" })).unwrap();
        assert!(channel_from_asset(&asset).is_none());
    }
}
