//! Oneplay CMS client
//!
//! Calls are POSTed to the HTTP API and answered on the push channel; see
//! [`super::push`]. Login, channel list, guide and playback all go through
//! [`OneplayApi::call`].

use chrono::{DateTime, Duration, NaiveTime, SecondsFormat, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::push::{await_reply, handshake, within_push_timeout, PushChannel, PushConnector};
use super::types::*;
use crate::models::{Channel, EpgEntry, Manifest, MosaicChannel, PlayableChannel, StreamDescriptor};
use crate::services::epg::EpgWindow;
use crate::services::error::{IptvError, Result};
use crate::services::manifest::fetch_dash;
use crate::services::metrics::record_vendor_call;
use crate::services::mosaic::{mosaic_channel, ReservedNumbers};
use crate::services::stream::{ends_within_live_skew, find_catchup_entry, CATCHUP_LOOKAHEAD_HOURS, LIVE_SKEW_SECONDS};
use crate::services::transport::{HttpTransport, RequestBody};

pub const HTTP_API: &str = "https://http.cms.jyxo.cz/api/v3";

const PROVIDER: &str = "ONEPLAY";
const APP_VERSION: &str = "1.0.18";
const CHANNEL_SET: &str = "channel_list.1";
const MOSAIC_LABEL: &str = "content.plugin_mapper.collection_detail_plugin_mapper.action.multi_dimension";

const JSON_HEADERS: &[(&str, &str)] = &[
    ("accept", "*/*"),
    ("content-type", "application/json;charset=UTF-8"),
];

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value::<T>(value.clone())
        .map_err(|e| IptvError::vendor(None, format!("{}: {}", e, value)))
}

fn general_body() -> Map<String, Value> {
    let mut body = Map::new();
    body.insert(
        "deviceInfo".to_string(),
        json!({
            "deviceType": "web",
            "appVersion": APP_VERSION,
            "deviceManufacturer": "Unknown",
            "deviceOs": "Linux"
        }),
    );
    body.insert("capabilities".to_string(), json!({ "async": "websockets" }));
    body
}

/// A guide item, with the sub-stream programmes of a multi-dimension event
#[derive(Debug, Clone)]
pub struct ScheduledItem {
    pub entry: EpgEntry,
    pub sub_streams: Vec<EpgEntry>,
}

pub struct OneplayApi {
    transport: Arc<dyn HttpTransport>,
    push: Arc<dyn PushConnector>,
    username: String,
    password: String,
    device_name: String,
    pin: Option<String>,
}

impl OneplayApi {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        push: Arc<dyn PushConnector>,
        username: &str,
        password: &str,
        device_name: &str,
        pin: Option<String>,
    ) -> Self {
        Self {
            transport,
            push,
            username: username.to_string(),
            password: password.to_string(),
            device_name: device_name.to_string(),
            pin,
        }
    }

    /// One request/reply round trip over HTTP + push channel
    pub async fn call(&self, route: &str, body: Value, token: Option<&str>) -> Result<Value> {
        let request_id = Uuid::new_v4().to_string();
        let client_id = Uuid::new_v4().to_string();

        let mut channel = self.push.connect(&client_id).await?;
        let result = self
            .exchange(channel.as_mut(), route, body, token, &request_id, &client_id)
            .await;
        channel.close().await;

        record_vendor_call(PROVIDER, &result);
        result
    }

    async fn exchange(
        &self,
        channel: &mut dyn PushChannel,
        route: &str,
        body: Value,
        token: Option<&str>,
        request_id: &str,
        client_id: &str,
    ) -> Result<Value> {
        let (server_id, session_id) = within_push_timeout("greeting", handshake(channel)).await?;

        let mut request = general_body();
        if let Value::Object(extra) = body {
            request.extend(extra);
        }
        request.insert(
            "context".to_string(),
            json!({
                "requestId": request_id,
                "clientId": client_id,
                "sessionId": session_id,
                "serverId": server_id
            }),
        );

        let bearer = token.map(|t| format!("Bearer {}", t));
        let mut headers: Vec<(&str, &str)> = JSON_HEADERS.to_vec();
        if let Some(bearer) = &bearer {
            headers.push(("authorization", bearer.as_str()));
        }

        debug!(route = route, request_id = request_id, msg = "Calling Oneplay API");
        let url = format!("{}/{}", HTTP_API, route);
        let ack: Value = self
            .transport
            .post(&url, &headers, &RequestBody::Json(Value::Object(request)))
            .await?
            .error_for_status()?
            .json()?;

        if ack.pointer("/result/status").and_then(Value::as_str) != Some("OkAsync") {
            return Err(IptvError::vendor(None, ack.to_string()));
        }

        within_push_timeout(route, await_reply(channel, request_id)).await
    }

    // ========================================================================
    // Authentication and devices
    // ========================================================================

    /// Exchange credentials for a bearer token, then tidy up the device list
    pub async fn login(&self) -> Result<String> {
        let reply = self
            .call(
                "user.login.step",
                json!({ "payload": { "command": {
                    "schema": "LoginWithCredentialsCommand",
                    "email": self.username,
                    "password": self.password
                } } }),
                None,
            )
            .await
            .map_err(IptvError::into_authentication)?;

        let step = &reply["step"];
        let token = step["bearerToken"]
            .as_str()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| IptvError::authentication(None, reply.to_string()))?
            .to_string();
        let device_id = step
            .pointer("/currentUser/currentDevice/id")
            .and_then(id_string)
            .ok_or_else(|| IptvError::authentication(None, reply.to_string()))?;

        self.rename_device(&token, &device_id).await?;

        for device in self.devices(&token).await? {
            let Some(id) = id_string(&device.id) else { continue };
            if id == device_id || device.name != self.device_name {
                continue;
            }
            info!("Removing stale Oneplay device {} ({})", device.name, id);
            if let Err(e) = self.remove_device(&token, &id).await {
                warn!("Failed to remove device {}: {}", id, e);
            }
        }

        Ok(token)
    }

    async fn rename_device(&self, token: &str, device_id: &str) -> Result<()> {
        self.call(
            "user.device.change",
            json!({ "payload": { "id": device_id, "name": self.device_name } }),
            Some(token),
        )
        .await?;
        Ok(())
    }

    async fn devices(&self, token: &str) -> Result<Vec<OneplayDevice>> {
        let reply = self
            .call("setting.display", json!({ "payload": { "screen": "devices" } }), Some(token))
            .await?;
        let devices = reply
            .pointer("/screen/userDevices/devices")
            .cloned()
            .ok_or_else(|| IptvError::vendor(None, format!("invalid devices screen: {}", reply)))?;
        decode(devices)
    }

    async fn remove_device(&self, token: &str, device_id: &str) -> Result<()> {
        self.call(
            "user.device.remove",
            json!({ "payload": { "criteria": { "schema": "UserDeviceIdCriteria", "id": device_id } } }),
            Some(token),
        )
        .await?;
        Ok(())
    }

    // ========================================================================
    // Channels and guide
    // ========================================================================

    pub async fn channels(&self, token: &str) -> Result<Vec<Channel>> {
        let profiles = self.call("user.profiles.display", Value::Null, Some(token)).await?;
        let profile_id = profiles
            .pointer("/availableProfiles/profiles")
            .and_then(Value::as_array)
            .and_then(|list| {
                list.iter()
                    .find_map(|p| p.pointer("/profile/id").filter(|id| !id.is_null()).cloned())
            })
            .ok_or_else(|| IptvError::vendor(None, "no usable Oneplay profile"))?;

        let reply = self
            .call("epg.channels.display", json!({ "payload": { "profileId": profile_id } }), Some(token))
            .await?;
        let list = reply
            .get("channelList")
            .cloned()
            .ok_or_else(|| IptvError::vendor(None, format!("invalid channel list: {}", reply)))?;

        let channels: Vec<OneplayChannel> = decode(list)?;
        Ok(channels.iter().filter_map(channel_from_oneplay).collect())
    }

    async fn epg_display(&self, token: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<EpgDisplay> {
        let reply = self
            .call(
                "epg.display",
                json!({ "payload": {
                    "criteria": {
                        "channelSetId": CHANNEL_SET,
                        "viewport": {
                            "channelRange": { "from": 0, "to": 200 },
                            "timeRange": {
                                "from": from.to_rfc3339_opts(SecondsFormat::Millis, true),
                                "to": to.to_rfc3339_opts(SecondsFormat::Millis, true)
                            },
                            "schema": "EpgViewportAbsolute"
                        }
                    },
                    "requestedOutput": { "channelList": "none", "datePicker": false, "channelSets": false }
                } }),
                Some(token),
            )
            .await?;
        decode(reply)
    }

    /// Guide items in `[from, to]`; multi-dimension events accepted by `expand` get their sub-streams
    async fn schedule<F>(&self, token: &str, from: DateTime<Utc>, to: DateTime<Utc>, expand: F) -> Result<Vec<ScheduledItem>>
    where
        F: Fn(&EpgEntry) -> bool,
    {
        let display = self.epg_display(token, from, to).await?;
        let mut items = Vec::new();

        for schedule in &display.schedule {
            let Some(channel_id) = id_string(&schedule.channel_id) else { continue };

            for item in &schedule.items {
                let Some(entry) = entry_from_item(&channel_id, item) else { continue };

                let sub_streams = if entry.mosaic_external_id.is_some() && expand(&entry) {
                    match self.mosaic_members(token, &entry).await {
                        Ok(members) => members,
                        Err(e) => {
                            warn!("Multi-dimension lookup for {} failed: {}", entry.title, e);
                            Vec::new()
                        }
                    }
                } else {
                    Vec::new()
                };

                items.push(ScheduledItem { entry, sub_streams });
            }
        }

        Ok(items)
    }

    async fn mosaic_members(&self, token: &str, placeholder: &EpgEntry) -> Result<Vec<EpgEntry>> {
        let reply = self
            .call("page.content.display", json!({ "payload": { "contentId": placeholder.id } }), Some(token))
            .await?;
        Ok(mosaic_tiles(&reply, placeholder))
    }

    /// Guide for `channels` over `window`, one request per day. Sub-stream
    /// programmes come right before their multi-dimension event.
    pub async fn epg(&self, token: &str, channels: &[Channel], window: EpgWindow) -> Result<Vec<EpgEntry>> {
        let known: HashSet<&str> = channels.iter().map(|c| c.id.as_str()).collect();
        let mut entries = Vec::new();

        let mut from = window.start;
        while from <= window.end {
            let to = (from + Duration::days(1) - Duration::seconds(1)).min(window.end);
            debug!("Loading Oneplay EPG for {}", from.date_naive());

            match self.schedule(token, from, to, |_| true).await {
                Ok(items) => {
                    for item in items {
                        if !known.contains(item.entry.channel_id.as_str()) {
                            continue;
                        }
                        entries.extend(item.sub_streams);
                        let mut entry = item.entry;
                        entry.mosaic_external_id = None;
                        entries.push(entry);
                    }
                }
                Err(e) if e.is_session_expired() => return Err(e),
                Err(e) => warn!("EPG for {} failed: {}", from.date_naive(), e),
            }

            from = to + Duration::seconds(1);
        }

        debug!("Fetched {} Oneplay EPG entries", entries.len());
        Ok(entries)
    }

    /// Sub-streams of the multi-dimension events airing at `now`
    pub async fn live_mosaic_channels(&self, token: &str, catalog: &[Channel], now: DateTime<Utc>) -> Result<Vec<MosaicChannel>> {
        let day_start = Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN));
        let day_end = day_start + Duration::days(1) - Duration::seconds(1);

        let items = self.schedule(token, day_start, day_end, |entry| entry.contains(now)).await?;
        let mut numbers = ReservedNumbers::new(catalog);
        let mut mosaics = Vec::new();

        for item in items.iter().filter(|i| i.entry.contains(now)) {
            if !catalog.iter().any(|c| c.id == item.entry.channel_id) {
                warn!(
                    "Channel {} not in catalog for multi-dimension event {}, numbering its tiles from the reserved range",
                    item.entry.channel_id, item.entry.title
                );
            }

            for sub in &item.sub_streams {
                let mosaic = mosaic_channel(&item.entry.channel_id, sub, catalog, &mut numbers);
                debug!("Created mosaic channel {} ({})", mosaic.name, mosaic.number);
                mosaics.push(mosaic);
            }
        }

        Ok(mosaics)
    }

    /// Programmes of one channel in `[from, to]`
    pub async fn channel_epg(&self, token: &str, channel_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<EpgEntry>> {
        let display = self.epg_display(token, from, to).await?;
        let schedule = display
            .schedule
            .iter()
            .find(|s| id_string(&s.channel_id).as_deref() == Some(channel_id))
            .ok_or_else(|| IptvError::ChannelWithoutEpg(channel_id.to_string()))?;

        Ok(schedule
            .items
            .iter()
            .filter_map(|item| entry_from_item(channel_id, item))
            .collect())
    }

    // ========================================================================
    // Playback
    // ========================================================================

    pub async fn get_live(&self, token: &str, channel: &PlayableChannel) -> Result<Manifest> {
        self.resolve_stream(token, channel, None).await
    }

    pub async fn get_catchup(
        &self,
        token: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        channel: &PlayableChannel,
    ) -> Result<Manifest> {
        let now = Utc::now();
        if ends_within_live_skew(end, now) {
            return self.get_live(token, channel).await;
        }
        let PlayableChannel::Primary(primary) = channel else {
            return self.get_live(token, channel).await;
        };

        let lookahead = end + Duration::hours(CATCHUP_LOOKAHEAD_HOURS);
        let entries = self.channel_epg(token, &primary.id, start, lookahead).await?;
        let entry = find_catchup_entry(&entries, start)
            .ok_or_else(|| IptvError::ChannelWithoutEpg(primary.id.clone()))?;

        if entry.end_time > now - Duration::seconds(LIVE_SKEW_SECONDS) {
            info!("Catchup programme {} on {} is still running, playing live", entry.title, primary.name);
            return self.get_live(token, channel).await;
        }

        self.resolve_stream(token, channel, Some(entry)).await
    }

    async fn resolve_stream(&self, token: &str, channel: &PlayableChannel, catchup: Option<&EpgEntry>) -> Result<Manifest> {
        if channel.adult() {
            info!("{} is an adult channel, adding PIN", channel.name());
        }
        let request = play_request(channel, catchup.map(|e| e.id.as_str()), self.pin.as_deref())?;

        let reply = self.call("content.play", request, Some(token)).await?;
        let assets: Vec<StreamAsset> = decode(
            reply
                .pointer("/media/stream/assets")
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new())),
        )?;

        let asset = select_asset(&assets)?;
        debug!(protocol = %asset.protocol, channel = channel.name(), msg = "Oneplay asset selected");

        if asset.protocol.eq_ignore_ascii_case("dash") {
            let descriptor = StreamDescriptor {
                manifest_url: asset.src.clone(),
                license_url: None,
            };
            return fetch_dash(self.transport.as_ref(), &descriptor, false).await;
        }
        Ok(Manifest::Redirect(asset.src.clone()))
    }
}

// ============================================================================
// Mapping
// ============================================================================

pub fn channel_from_oneplay(channel: &OneplayChannel) -> Option<Channel> {
    let id = id_string(&channel.id)?;
    let Some(number) = channel.number else {
        warn!("Channel {} ({}) has no channel number, skipping", channel.name, id);
        return None;
    };

    Some(Channel {
        id,
        number,
        name: channel.name.clone(),
        logo: channel.logo.as_deref().map(sized_image),
        adult: channel.adult,
        valid_from: None,
        valid_to: None,
    })
}

/// Shows and movies are addressed by their EPG item, everything else by content id.
/// Multi-dimension events carry their own id as the mosaic marker.
pub fn entry_from_item(channel_id: &str, item: &ScheduleItem) -> Option<EpgEntry> {
    let params = item.actions.first()?.params.as_ref()?;
    let content_type = params.content_type.as_deref()?;
    let payload = params.payload.as_ref()?;

    let id = match content_type {
        "show" | "movie" => payload.pointer("/deeplink/epgItem"),
        _ => payload.get("contentId"),
    }
    .and_then(id_string)?;

    let mut entry = EpgEntry::new(id, channel_id, item.title.clone(), item.start_at, item.end_at);
    if !entry.has_valid_interval() {
        return None;
    }
    entry.description = item.description.clone();
    entry.poster = item.image.as_deref().map(sized_image);

    if item.labels.first().and_then(|l| l.name.as_deref()) == Some(MOSAIC_LABEL) {
        entry.mosaic_external_id = Some(entry.id.clone());
    }
    Some(entry)
}

/// Sub-stream tiles of a multi-dimension page; they share the event's slot and poster
pub fn mosaic_tiles(page: &Value, placeholder: &EpgEntry) -> Vec<EpgEntry> {
    let Some(blocks) = page.pointer("/layout/blocks").and_then(Value::as_array) else {
        return Vec::new();
    };

    blocks
        .iter()
        .filter(|block| block["schema"] == "TabBlock")
        .filter_map(|block| block.pointer("/layout/blocks/0/carousels/0/tiles").and_then(Value::as_array))
        .flatten()
        .filter_map(|tile| {
            let payload = tile.pointer("/action/params/payload")?;
            let id = payload
                .pointer("/criteria/contentId")
                .or_else(|| payload.get("contentId"))
                .and_then(id_string)?;

            let mut entry = EpgEntry::new(
                id,
                placeholder.channel_id.clone(),
                tile["title"].as_str().unwrap_or_default(),
                placeholder.start_time,
                placeholder.end_time,
            );
            entry.description = tile["description"].as_str().map(str::to_string);
            entry.poster = placeholder.poster.clone();
            Some(entry)
        })
        .collect()
}

/// `content.play` request body
pub fn play_request(channel: &PlayableChannel, catchup_id: Option<&str>, pin: Option<&str>) -> Result<Value> {
    let criteria = match (channel, catchup_id) {
        (_, Some(id)) => json!({ "schema": "ContentCriteria", "contentId": id }),
        (PlayableChannel::Mosaic(m), None) => json!({ "schema": "MDPlaybackCriteria", "contentId": m.id, "position": 0 }),
        (PlayableChannel::Primary(c), None) => json!({ "schema": "ContentCriteria", "contentId": format!("channel.{}", c.id) }),
    };

    let mut request = json!({
        "payload": { "criteria": criteria, "startMode": "live" },
        "playbackCapabilities": {
            "protocols": ["dash", "hls"],
            "drm": ["widevine", "fairplay"],
            "altTransfer": "Unicast",
            "subtitle": {
                "formats": ["vtt"],
                "locations": ["InstreamTrackLocation", "ExternalTrackLocation"]
            },
            "liveSpecificCapabilities": {
                "protocols": ["dash", "hls"],
                "drm": ["widevine", "fairplay"],
                "altTransfer": "Unicast",
                "multipleAudio": false
            }
        }
    });

    if channel.adult() {
        let pin = pin
            .filter(|p| !p.is_empty())
            .ok_or_else(|| IptvError::MissingPin(channel.name().to_string()))?;
        request["authorization"] = json!([{ "schema": "PinRequestAuthorization", "pin": pin, "type": "parental" }]);
    }

    Ok(request)
}

/// First clear asset, else the first HLS one
pub fn select_asset(assets: &[StreamAsset]) -> Result<&StreamAsset> {
    let usable = || assets.iter().filter(|a| !a.src.is_empty());

    usable()
        .find(|a| !a.is_encrypted())
        .or_else(|| usable().find(|a| a.protocol.eq_ignore_ascii_case("hls")))
        .ok_or(IptvError::StreamNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::oneplay::push::testing::ScriptedPush;
    use crate::services::transport::testing::{ok_json, ok_text, Method, ScriptedTransport};
    use chrono::TimeZone;

    fn item(content_type: &str, payload: Value, label: Option<&str>) -> ScheduleItem {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
        serde_json::from_value(json!({
            "startAt": start.to_rfc3339(),
            "endAt": (start + Duration::hours(2)).to_rfc3339(),
            "title": "Match night",
            "image": "https://img/{WIDTH}x{HEIGHT}.jpg",
            "actions": [{ "params": { "contentType": content_type, "payload": payload } }],
            "labels": label.map(|name| vec![json!({ "name": name })]).unwrap_or_default()
        }))
        .unwrap()
    }

    fn channel(adult: bool) -> Channel {
        Channel {
            id: "7".to_string(),
            number: 7,
            name: "Sport".to_string(),
            logo: None,
            adult,
            valid_from: None,
            valid_to: None,
        }
    }

    fn api(
        transport: Arc<ScriptedTransport>,
        replier: impl Fn(&str, &Value) -> Value + Send + Sync + 'static,
        pin: Option<&str>,
    ) -> OneplayApi {
        let push = ScriptedPush::new(transport.clone(), replier);
        OneplayApi::new(transport, Arc::new(push), "user@example.com", "secret", "o2iptv", pin.map(str::to_string))
    }

    fn acknowledging() -> Arc<ScriptedTransport> {
        Arc::new(ScriptedTransport::new(|request| match request.method {
            Method::Post => ok_json(json!({ "result": { "status": "OkAsync", "schema": "OkResultAsync" } })),
            Method::ResolveGet => ok_text("https://cdn.example/op/manifest.mpd"),
            Method::Get => ok_text("<MPD><Period/></MPD>"),
            Method::ResolvePost => panic!("unexpected"),
        }))
    }

    #[test]
    fn test_entry_ids_by_content_type() {
        let show = item("show", json!({ "deeplink": { "epgItem": "epg.1" }, "contentId": "c.1" }), None);
        assert_eq!(entry_from_item("7", &show).unwrap().id, "epg.1");

        let movie = item("movie", json!({ "deeplink": { "epgItem": 42 } }), None);
        assert_eq!(entry_from_item("7", &movie).unwrap().id, "42");

        let other = item("epgitem", json!({ "contentId": "c.9" }), None);
        let entry = entry_from_item("7", &other).unwrap();
        assert_eq!(entry.id, "c.9");
        assert_eq!(entry.poster.as_deref(), Some("https://img/480x320.jpg"));
        assert!(entry.mosaic_external_id.is_none());

        let mosaic = item("epgitem", json!({ "contentId": "md.1" }), Some(MOSAIC_LABEL));
        assert_eq!(entry_from_item("7", &mosaic).unwrap().mosaic_external_id.as_deref(), Some("md.1"));
    }

    #[test]
    fn test_item_without_payload_is_skipped() {
        let mut bare = item("show", json!({}), None);
        bare.actions[0].params.as_mut().unwrap().payload = None;
        assert!(entry_from_item("7", &bare).is_none());
    }

    #[test]
    fn test_mosaic_tiles() {
        let placeholder = entry_from_item("7", &item("epgitem", json!({ "contentId": "md.1" }), Some(MOSAIC_LABEL))).unwrap();
        let page = json!({ "layout": { "blocks": [
            { "schema": "HeaderBlock" },
            { "schema": "TabBlock", "layout": { "blocks": [{ "carousels": [{ "tiles": [
                { "title": "Court 1", "action": { "params": { "payload": { "criteria": { "contentId": "md.1.a" } } } } },
                { "title": "Court 2", "action": { "params": { "payload": { "contentId": "md.1.b" } } } },
                { "title": "Promo", "action": { "params": { "payload": {} } } }
            ] }] }] } }
        ] } });

        let tiles = mosaic_tiles(&page, &placeholder);
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].id, "md.1.a");
        assert_eq!(tiles[1].title, "Court 2");
        assert_eq!(tiles[1].start_time, placeholder.start_time);
        assert_eq!(tiles[1].poster, placeholder.poster);
    }

    #[test]
    fn test_play_request_shapes() {
        let primary = PlayableChannel::Primary(channel(false));
        let live = play_request(&primary, None, None).unwrap();
        assert_eq!(live["payload"]["criteria"]["contentId"], "channel.7");
        assert_eq!(live["payload"]["startMode"], "live");
        assert!(live.get("authorization").is_none());

        let catchup = play_request(&primary, Some("epg.5"), None).unwrap();
        assert_eq!(catchup["payload"]["criteria"]["contentId"], "epg.5");

        let start = Utc::now();
        let sub = EpgEntry::new("md.1.a", "7", "Court 1", start, start + Duration::hours(1));
        let mosaic = PlayableChannel::Mosaic(MosaicChannel::new(&channel(false), &sub));
        let md = play_request(&mosaic, None, None).unwrap();
        assert_eq!(md["payload"]["criteria"]["schema"], "MDPlaybackCriteria");
        assert_eq!(md["payload"]["criteria"]["position"], 0);
    }

    #[test]
    fn test_adult_channels_need_pin() {
        let adult = PlayableChannel::Primary(channel(true));
        assert!(matches!(play_request(&adult, None, None), Err(IptvError::MissingPin(_))));

        let request = play_request(&adult, None, Some("1234")).unwrap();
        assert_eq!(request["authorization"][0]["pin"], "1234");
        assert_eq!(request["authorization"][0]["type"], "parental");
    }

    #[test]
    fn test_select_asset() {
        let assets: Vec<StreamAsset> = serde_json::from_value(json!([
            { "protocol": "dash", "src": "https://dash-drm", "drm": [{ "type": "widevine" }] },
            { "protocol": "hls", "src": "https://hls-drm", "drm": [{ "type": "fairplay" }] },
            { "protocol": "dash", "src": "https://dash-clear" }
        ]))
        .unwrap();
        assert_eq!(select_asset(&assets).unwrap().src, "https://dash-clear");
        assert_eq!(select_asset(&assets[..2]).unwrap().src, "https://hls-drm");
        assert!(matches!(select_asset(&assets[..1]), Err(IptvError::StreamNotFound)));
    }

    #[tokio::test]
    async fn test_login_removes_stale_devices() {
        let transport = acknowledging();
        let api = api(
            transport.clone(),
            |route, _| match route {
                "user.login.step" => json!({ "step": { "bearerToken": "bearer-1", "currentUser": { "currentDevice": { "id": "dev-new" } } } }),
                "setting.display" => json!({ "screen": { "userDevices": { "devices": [
                    { "id": "dev-new", "name": "o2iptv" },
                    { "id": "dev-old", "name": "o2iptv" },
                    { "id": "dev-phone", "name": "Phone" }
                ] } } }),
                _ => json!({}),
            },
            None,
        );

        assert_eq!(api.login().await.unwrap(), "bearer-1");

        let calls = transport.calls();
        let removals: Vec<_> = calls.iter().filter(|c| c.url.ends_with("user.device.remove")).collect();
        assert_eq!(removals.len(), 1);
        assert_eq!(removals[0].json().unwrap()["payload"]["criteria"]["id"], "dev-old");

        let rename = calls.iter().find(|c| c.url.ends_with("user.device.change")).unwrap();
        let body = rename.json().unwrap();
        assert_eq!(body["payload"]["name"], "o2iptv");
        assert_eq!(body["context"]["serverId"], "srv");
        assert_eq!(body["deviceInfo"]["appVersion"], APP_VERSION);
    }

    #[tokio::test]
    async fn test_login_without_token_is_authentication_error() {
        let api = api(acknowledging(), |_, _| json!({ "step": { "schema": "ShowAccountChooserStep" } }), None);
        assert!(matches!(api.login().await, Err(IptvError::Authentication { .. })));
    }

    #[tokio::test]
    async fn test_channels_use_first_profile() {
        let transport = acknowledging();
        let api = api(
            transport.clone(),
            |route, _| match route {
                "user.profiles.display" => json!({ "availableProfiles": { "profiles": [
                    { "profile": { "id": null } },
                    { "profile": { "id": "p-1" } }
                ] } }),
                "epg.channels.display" => json!({ "channelList": [
                    { "id": 1, "name": "One", "number": 1, "logo": "https://logo/{WIDTH}/{HEIGHT}", "adult": false },
                    { "id": "2", "name": "No number" }
                ] }),
                _ => json!({}),
            },
            None,
        );

        let channels = api.channels("bearer").await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].id, "1");
        assert_eq!(channels[0].logo.as_deref(), Some("https://logo/480/320"));

        let list_call = transport
            .calls()
            .into_iter()
            .find(|c| c.url.ends_with("epg.channels.display"))
            .unwrap();
        assert_eq!(list_call.json().unwrap()["payload"]["profileId"], "p-1");
    }

    #[tokio::test]
    async fn test_epg_splits_window_by_day_and_expands_mosaics() {
        let transport = acknowledging();
        let api = api(
            transport.clone(),
            |route, _| match route {
                "epg.display" => json!({ "schedule": [
                    { "channelId": 7, "items": [
                        { "startAt": "2024-03-01T20:00:00Z", "endAt": "2024-03-01T22:00:00Z", "title": "Tennis",
                          "actions": [{ "params": { "contentType": "epgitem", "payload": { "contentId": "md.1" } } }],
                          "labels": [{ "name": MOSAIC_LABEL }] }
                    ] },
                    { "channelId": 99, "items": [
                        { "startAt": "2024-03-01T20:00:00Z", "endAt": "2024-03-01T21:00:00Z", "title": "Unknown",
                          "actions": [{ "params": { "contentType": "epgitem", "payload": { "contentId": "x" } } }] }
                    ] }
                ] }),
                "page.content.display" => json!({ "layout": { "blocks": [
                    { "schema": "TabBlock", "layout": { "blocks": [{ "carousels": [{ "tiles": [
                        { "title": "Court 1", "action": { "params": { "payload": { "contentId": "md.1.a" } } } }
                    ] }] }] } }
                ] } }),
                _ => json!({}),
            },
            None,
        );

        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let window = EpgWindow {
            start,
            end: start + Duration::days(2) - Duration::seconds(1),
        };
        let entries = api.epg("bearer", &[channel(false)], window).await.unwrap();

        assert_eq!(transport.count_matching("epg.display"), 2);
        // per day: sub-stream then its event
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].id, "md.1.a");
        assert_eq!(entries[1].id, "md.1");
        assert!(entries.iter().all(|e| e.mosaic_external_id.is_none()));
        assert!(entries.iter().all(|e| e.channel_id == "7"));
    }

    #[tokio::test]
    async fn test_live_mosaics_for_unknown_host_get_reserved_numbers() {
        let now = Utc::now();
        let started = (now - Duration::minutes(30)).to_rfc3339();
        let ends = (now + Duration::minutes(30)).to_rfc3339();
        let api = api(
            acknowledging(),
            move |route, _| match route {
                "epg.display" => json!({ "schedule": [
                    { "channelId": 7, "items": [
                        { "startAt": started, "endAt": ends, "title": "Tennis",
                          "actions": [{ "params": { "contentType": "epgitem", "payload": { "contentId": "md.1" } } }],
                          "labels": [{ "name": MOSAIC_LABEL }] }
                    ] },
                    { "channelId": 99, "items": [
                        { "startAt": started, "endAt": ends, "title": "Golf",
                          "actions": [{ "params": { "contentType": "epgitem", "payload": { "contentId": "md.2" } } }],
                          "labels": [{ "name": MOSAIC_LABEL }] }
                    ] }
                ] }),
                "page.content.display" => json!({ "layout": { "blocks": [
                    { "schema": "TabBlock", "layout": { "blocks": [{ "carousels": [{ "tiles": [
                        { "title": "Feed", "action": { "params": { "payload": { "contentId": "md.x" } } } }
                    ] }] }] } }
                ] } }),
                _ => json!({}),
            },
            None,
        );

        let mosaics = api.live_mosaic_channels("bearer", &[channel(false)], now).await.unwrap();
        assert_eq!(mosaics.len(), 2);
        assert_eq!(mosaics[0].number, 7);
        assert_eq!(mosaics[0].name, "Sport - Feed");
        assert_eq!(mosaics[1].host_channel_id, "99");
        assert_ne!(mosaics[1].number, 7);
        assert!(mosaics[1].name.ends_with(" - Feed"));
    }

    #[tokio::test]
    async fn test_live_dash_stream_is_rewritten() {
        let transport = acknowledging();
        let api = api(
            transport.clone(),
            |route, _| match route {
                "content.play" => json!({ "media": { "stream": { "assets": [
                    { "protocol": "dash", "src": "https://play.example/op" }
                ] } } }),
                _ => json!({}),
            },
            None,
        );

        let manifest = api.get_live("bearer", &PlayableChannel::Primary(channel(false))).await.unwrap();
        match manifest {
            Manifest::Dash { document, .. } => {
                assert!(document.contains("<BaseURL>https://cdn.example/op/</BaseURL>"))
            }
            other => panic!("unexpected manifest: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hls_stream_redirects() {
        let api = api(
            acknowledging(),
            |route, _| match route {
                "content.play" => json!({ "media": { "stream": { "assets": [
                    { "protocol": "hls", "src": "https://play.example/op.m3u8" }
                ] } } }),
                _ => json!({}),
            },
            None,
        );

        let manifest = api.get_live("bearer", &PlayableChannel::Primary(channel(false))).await.unwrap();
        assert_eq!(manifest, Manifest::Redirect("https://play.example/op.m3u8".to_string()));
    }

    #[tokio::test]
    async fn test_catchup_without_channel_schedule() {
        let api = api(acknowledging(), |_, _| json!({ "schedule": [] }), None);
        let start = Utc::now() - Duration::days(1);

        let err = api
            .get_catchup("bearer", start, start + Duration::hours(1), &PlayableChannel::Primary(channel(false)))
            .await
            .unwrap_err();
        assert!(matches!(err, IptvError::ChannelWithoutEpg(id) if id == "7"));
    }
}
