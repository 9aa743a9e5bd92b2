//! Vendor dispatch.
//!
//! # Overview
//!
//! [`Provider`] is chosen once from the configured [`ProviderKind`] and
//! exposes the same steps for every backend:
//!
//! - **Authentication steps** driven by [`super::auth::AuthStateMachine`]
//! - **Catalog, guide and mosaic discovery** for the controller
//! - **Playback** (live and catchup manifests)
//!
//! Kaltura regions share one implementation parameterised by
//! [`VendorProfile`]; Oneplay has its own client.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use super::catalog::fetch_kaltura_channels;
use super::epg::{fetch_kaltura_epg, fetch_kaltura_live_epg, EpgWindow};
use super::error::{IptvError, Result};
use super::kaltura::{KalturaApi, ServiceEntry, VendorProfile};
use super::mosaic::{mosaic_channel, MosaicResolver, ReservedNumbers};
use super::oneplay::{OneplayApi, PushConnector};
use super::stream::StreamResolver;
use super::transport::HttpTransport;
use crate::config::Config;
use crate::models::{Channel, EpgEntry, Manifest, MosaicChannel, PlayableChannel, ProviderKind, Session};

/// Bearer tokens issued by Oneplay are treated as valid for a day
pub const ONEPLAY_SESSION_HOURS: i64 = 24;

pub enum Provider {
    Kaltura(KalturaApi),
    Oneplay(OneplayApi),
}

impl Provider {
    pub fn from_config(
        config: &Config,
        kind: ProviderKind,
        transport: Arc<dyn HttpTransport>,
        push: Arc<dyn PushConnector>,
    ) -> Self {
        match VendorProfile::for_kind(kind) {
            Some(profile) => Provider::Kaltura(KalturaApi::new(
                transport,
                profile,
                &config.provider_username,
                &config.provider_password,
            )),
            None => Provider::Oneplay(OneplayApi::new(
                transport,
                push,
                &config.provider_username,
                &config.provider_password,
                &config.provider_device_name,
                config.provider_pin.clone(),
            )),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Provider::Kaltura(api) => api.profile().kind,
            Provider::Oneplay(_) => ProviderKind::Oneplay,
        }
    }

    /// Region written into the session document; bearer-token vendors have none
    pub fn region(&self) -> Option<&'static str> {
        match self {
            Provider::Kaltura(api) => Some(api.profile().region),
            Provider::Oneplay(_) => None,
        }
    }

    // ========================================================================
    // Authentication steps
    // ========================================================================

    /// Anonymous session token, for vendors that have one
    pub async fn anonymous_token(&self) -> Result<Option<String>> {
        match self {
            Provider::Kaltura(api) => Ok(Some(api.anonymous_login().await?.ks)),
            Provider::Oneplay(_) => Ok(None),
        }
    }

    pub async fn credential_token(&self, device_id: &str) -> Result<String> {
        match self {
            Provider::Kaltura(api) => api.credential_login(device_id).await,
            Provider::Oneplay(api) => api.login().await,
        }
    }

    pub async fn discover_services(&self, bearer: &str, anonymous: Option<&str>) -> Result<Vec<ServiceEntry>> {
        match self {
            Provider::Kaltura(api) => api.list_services(bearer, require_anonymous(anonymous)?).await,
            Provider::Oneplay(_) => Ok(vec![ServiceEntry {
                id: None,
                name: ProviderKind::Oneplay.to_string(),
            }]),
        }
    }

    pub async fn bind_service(
        &self,
        anonymous: Option<&str>,
        bearer: &str,
        device_id: &str,
        service: &ServiceEntry,
    ) -> Result<Session> {
        match self {
            Provider::Kaltura(api) => {
                let bound = api
                    .bind_service(require_anonymous(anonymous)?, bearer, device_id, service.id.as_deref())
                    .await?;
                Ok(Session {
                    provider: self.kind(),
                    device_id: device_id.to_string(),
                    service_id: service.id.clone(),
                    service_token: bound.ks,
                    expiry_epoch: bound.expiry,
                    refresh_token: bound.refresh_token,
                })
            }
            Provider::Oneplay(_) => Ok(Session {
                provider: ProviderKind::Oneplay,
                device_id: device_id.to_string(),
                service_id: None,
                service_token: bearer.to_string(),
                expiry_epoch: (Utc::now() + Duration::hours(ONEPLAY_SESSION_HOURS)).timestamp(),
                refresh_token: None,
            }),
        }
    }

    pub async fn register_device(&self, session: &Session) -> Result<()> {
        match self {
            Provider::Kaltura(api) => {
                api.ensure_household_device(&session.service_token, &session.device_id)
                    .await
            }
            Provider::Oneplay(_) => Ok(()),
        }
    }

    // ========================================================================
    // Catalog and guide
    // ========================================================================

    pub async fn load_channels(&self, session: &Session) -> Result<Vec<Channel>> {
        match self {
            Provider::Kaltura(api) => fetch_kaltura_channels(api, &session.service_token).await,
            Provider::Oneplay(api) => api.channels(&session.service_token).await,
        }
    }

    pub async fn fetch_epg(&self, session: &Session, channels: &[Channel], window: EpgWindow) -> Result<Vec<EpgEntry>> {
        match self {
            Provider::Kaltura(api) => fetch_kaltura_epg(api, &session.service_token, channels, window).await,
            Provider::Oneplay(api) => api.epg(&session.service_token, channels, window).await,
        }
    }

    /// Mosaic sub-streams airing at `now`
    pub async fn live_mosaic_channels(
        &self,
        session: &Session,
        catalog: &[Channel],
        now: DateTime<Utc>,
    ) -> Result<Vec<MosaicChannel>> {
        match self {
            Provider::Kaltura(api) => {
                let ks = session.service_token.as_str();
                let resolver = MosaicResolver::new(api, ks);
                let mut numbers = ReservedNumbers::new(catalog);
                let mut mosaics = Vec::new();

                let live = fetch_kaltura_live_epg(api, ks, now).await?;
                for placeholder in live.iter().filter(|e| e.mosaic_external_id.is_some() && e.contains(now)) {
                    let sub_streams = match resolver.resolve(placeholder).await {
                        Ok(sub_streams) => sub_streams,
                        Err(e) if e.is_session_expired() => return Err(e),
                        Err(e) => {
                            warn!("Mosaic event {} failed to resolve: {}", placeholder.title, e);
                            continue;
                        }
                    };

                    for sub in &sub_streams {
                        let mosaic = mosaic_channel(&placeholder.channel_id, sub, catalog, &mut numbers);
                        if mosaic.is_active_at(now) {
                            mosaics.push(mosaic);
                        }
                    }
                }

                debug!("{} live mosaic channels", mosaics.len());
                Ok(mosaics)
            }
            Provider::Oneplay(api) => {
                api.live_mosaic_channels(&session.service_token, catalog, now)
                    .await
            }
        }
    }

    // ========================================================================
    // Playback
    // ========================================================================

    pub async fn get_live(&self, session: &Session, channel: &PlayableChannel) -> Result<Manifest> {
        match self {
            Provider::Kaltura(api) => {
                StreamResolver::new(api, &session.service_token)
                    .get_live(channel)
                    .await
            }
            Provider::Oneplay(api) => api.get_live(&session.service_token, channel).await,
        }
    }

    pub async fn get_catchup(
        &self,
        session: &Session,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        channel: &PlayableChannel,
    ) -> Result<Manifest> {
        match self {
            Provider::Kaltura(api) => {
                StreamResolver::new(api, &session.service_token)
                    .get_catchup(start, end, channel)
                    .await
            }
            Provider::Oneplay(api) => {
                api.get_catchup(&session.service_token, start, end, channel)
                    .await
            }
        }
    }
}

fn require_anonymous(anonymous: Option<&str>) -> Result<&str> {
    anonymous.ok_or_else(|| IptvError::authentication(None, "anonymous session missing"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::kaltura::profile::O2TV_CZ;
    use crate::services::transport::testing::{ok_json, ScriptedTransport};
    use serde_json::json;

    fn host() -> Channel {
        Channel {
            id: "100".to_string(),
            number: 4,
            name: "Sport".to_string(),
            logo: None,
            adult: false,
            valid_from: None,
            valid_to: None,
        }
    }

    #[tokio::test]
    async fn test_kaltura_live_mosaic_channels() {
        let now = Utc::now().timestamp();
        let transport = Arc::new(ScriptedTransport::new(move |request| {
            let body = request.body_text();
            if body.contains("IsMosaicEvent") {
                ok_json(json!({ "result": { "totalCount": 1, "objects": [{
                    "objectType": "KalturaProgramAsset", "id": 1, "name": "Event",
                    "tags": { "MosaicChannelsInfo": { "objects": [
                        { "value": "ProgramExternalID=m1" },
                        { "value": "ProgramExternalID=m2" }
                    ] } }
                }] } }))
            } else if body.contains("externalId='m1'") {
                ok_json(json!({ "result": { "totalCount": 1, "objects": [{
                    "objectType": "KalturaProgramAsset", "id": 11, "linearAssetId": 100, "name": "Court 1",
                    "startDate": now - 600, "endDate": now + 600
                }] } }))
            } else if body.contains("externalId='m2'") {
                // already finished
                ok_json(json!({ "result": { "totalCount": 1, "objects": [{
                    "objectType": "KalturaProgramAsset", "id": 12, "linearAssetId": 100, "name": "Court 2",
                    "startDate": now - 7200, "endDate": now - 3600
                }] } }))
            } else {
                ok_json(json!({ "result": { "totalCount": 1, "objects": [{
                    "objectType": "KalturaProgramAsset", "id": 5, "linearAssetId": 100, "name": "Tennis",
                    "startDate": now - 1800, "endDate": now + 1800,
                    "tags": { "MosaicInfo": { "objects": [{ "value": "MosaicProgramExternalId=EV1" }] } }
                }] } }))
            }
        }));

        let provider = Provider::Kaltura(KalturaApi::new(transport, &O2TV_CZ, "u", "p"));
        let session = Session {
            provider: ProviderKind::O2tvCz,
            device_id: "DEV".to_string(),
            service_id: None,
            service_token: "ks".to_string(),
            expiry_epoch: now + 3600,
            refresh_token: None,
        };

        let mosaics = provider
            .live_mosaic_channels(&session, &[host()], Utc::now())
            .await
            .unwrap();
        assert_eq!(mosaics.len(), 1);
        assert_eq!(mosaics[0].id, "11");
        assert_eq!(mosaics[0].name, "Sport - Court 1");
        assert_eq!(mosaics[0].number, 4);
    }

    #[tokio::test]
    async fn test_oneplay_binds_single_implicit_service() {
        let transport = Arc::new(ScriptedTransport::new(|_| ok_json(json!({}))));
        let push = crate::services::oneplay::push::testing::ScriptedPush::new(transport.clone(), |_, _| json!({}));
        let provider = Provider::Oneplay(OneplayApi::new(transport, Arc::new(push), "u", "p", "o2iptv", None));

        let services = provider.discover_services("bearer", None).await.unwrap();
        assert_eq!(services.len(), 1);

        let session = provider.bind_service(None, "bearer", "DEV", &services[0]).await.unwrap();
        assert_eq!(session.service_token, "bearer");
        let expected = (Utc::now() + Duration::hours(ONEPLAY_SESSION_HOURS)).timestamp();
        assert!((session.expiry_epoch - expected).abs() <= 5);
        assert!(provider.region().is_none());
    }
}
