//! Kaltura OTT API client
//!
//! Raw protocol calls only. Orchestration (login order, pagination policy,
//! mosaic hops, catchup selection) lives in the role modules that use it.

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::profile::{CredentialFlow, VendorProfile};
use super::types::*;
use crate::models::PlaybackContext;
use crate::services::error::{IptvError, Result};
use crate::services::metrics::record_vendor_call;
use crate::services::pkce::PkcePair;
use crate::services::transport::{HttpTransport, RequestBody};

lazy_static! {
    static ref SESSION_DATA_KEY: Regex = Regex::new(r"(?i)[?&]sessionDataKey=([a-z0-9-]+)").unwrap();
    static ref OAUTH_CODE: Regex = Regex::new(r"(?i)[?&]code=([a-z0-9-]+)").unwrap();
}

const JSON_HEADERS: &[(&str, &str)] = &[
    ("accept", "*/*"),
    ("content-type", "application/json;charset=UTF-8"),
];

const FORM_HEADERS: &[(&str, &str)] = &[("content-type", "application/x-www-form-urlencoded")];

/// Entitled service as reported by service discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub id: Option<String>,
    pub name: String,
}

/// `{objectType: KalturaStringValue, value}`
fn string_value(value: &str) -> Value {
    json!({ "objectType": "KalturaStringValue", "value": value })
}

/// `KalturaSearchAssetFilter` ordered by start date
pub fn search_filter(ksql: &str) -> Value {
    json!({
        "objectType": "KalturaSearchAssetFilter",
        "orderBy": "START_DATE_ASC",
        "kSql": ksql,
    })
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value::<T>(value.clone())
        .map_err(|e| IptvError::vendor(None, format!("{}: {}", e, value)))
}

pub struct KalturaApi {
    transport: Arc<dyn HttpTransport>,
    profile: &'static VendorProfile,
    username: String,
    password: String,
}

impl KalturaApi {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        profile: &'static VendorProfile,
        username: &str,
        password: &str,
    ) -> Self {
        Self {
            transport,
            profile,
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn profile(&self) -> &'static VendorProfile {
        self.profile
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    // ========================================================================
    // Callers
    // ========================================================================

    /// Plain JSON POST, non-2xx mapped to errors
    async fn post_json(&self, url: &str, body: Value) -> Result<Value> {
        trace!("=> {} {}", url, body);
        let result = self
            .transport
            .post(url, JSON_HEADERS, &RequestBody::Json(body))
            .await
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.json::<Value>());
        record_vendor_call(self.profile.kind.as_str(), &result);
        result
    }

    /// POST with the general body merged in; returns `result` after checking `result.error`
    pub async fn call(&self, url: &str, body: Value) -> Result<Value> {
        let mut merged = Map::new();
        merged.insert("clientTag".into(), json!(self.profile.client_tag));
        merged.insert("apiVersion".into(), json!(self.profile.api_version));
        merged.insert("partnerId".into(), json!(self.profile.partner_id));
        if let Value::Object(fields) = body {
            merged.extend(fields);
        }

        let response = self.post_json(url, Value::Object(merged)).await?;
        let result = response.get("result").cloned().unwrap_or(Value::Null);

        if let Some(error) = result.get("error") {
            debug!("Kaltura error from {}: {}", url, error);
            return Err(IptvError::from_kaltura(error));
        }

        Ok(result)
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    pub async fn anonymous_login(&self) -> Result<KalturaSession> {
        let url = self.profile.service_url("ottuser", "anonymousLogin");
        let result = self.call(&url, json!({ "language": "*" })).await?;
        decode(result)
    }

    /// Exchange username/password for the vendor bearer token (JWT or OAuth access token)
    pub async fn credential_login(&self, device_id: &str) -> Result<String> {
        match self.profile.credential_flow {
            CredentialFlow::Cas { login_url, service } => {
                let response = self
                    .post_json(
                        login_url,
                        json!({
                            "service": service,
                            "username": self.username,
                            "password": self.password,
                            "udid": device_id,
                        }),
                    )
                    .await
                    .map_err(IptvError::into_authentication)?;

                response
                    .get("jwt")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| IptvError::authentication(None, response.to_string()))
            }
            CredentialFlow::Pkce {
                client_id,
                authorize_url,
                commonauth_url,
                token_url,
                redirect_uri,
                scope,
            } => {
                let pkce = PkcePair::generate();
                trace!("PKCE challenge: {}", pkce.challenge);

                let authorize = format!(
                    "{}?response_type=code&client_id={}&redirect_uri={}&code_challenge={}&code_challenge_method=S256&scope={}",
                    authorize_url,
                    client_id,
                    urlencoding::encode(redirect_uri),
                    pkce.challenge,
                    scope
                );
                let resolved = self.transport.get_resolved_url(&authorize, &[]).await?;
                let session_data_key = capture(&SESSION_DATA_KEY, &resolved)
                    .ok_or_else(|| IptvError::authentication(None, format!("no sessionDataKey in {}", resolved)))?;

                let credentials = RequestBody::form([
                    ("handler", "UIDAuthenticationHandler"),
                    ("sessionDataKey", session_data_key.as_str()),
                    ("username", self.username.as_str()),
                    ("password", self.password.as_str()),
                ]);
                let resolved = self
                    .transport
                    .post_resolved_url(commonauth_url, FORM_HEADERS, &credentials)
                    .await?;
                let code = capture(&OAUTH_CODE, &resolved)
                    .ok_or_else(|| IptvError::authentication(None, format!("no authorization code in {}", resolved)))?;

                let exchange = RequestBody::form([
                    ("grant_type", "authorization_code"),
                    ("client_id", client_id),
                    ("code", code.as_str()),
                    ("redirect_uri", redirect_uri),
                    ("code_verifier", pkce.verifier.as_str()),
                ]);
                let response = self
                    .transport
                    .post(token_url, FORM_HEADERS, &exchange)
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(IptvError::into_authentication)?;
                let token: Value = response.json()?;

                token
                    .get("access_token")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| IptvError::authentication(Some(response.status), response.body.clone()))
            }
        }
    }

    /// Services the account is entitled to. Vendors without discovery report one implicit service.
    pub async fn list_services(&self, bearer: &str, anonymous_ks: &str) -> Result<Vec<ServiceEntry>> {
        if !self.profile.discovers_services() {
            return Ok(vec![ServiceEntry {
                id: None,
                name: self.profile.region.to_string(),
            }]);
        }

        let result = self
            .call(
                &self.profile.account_services_url(),
                json!({
                    "ks": anonymous_ks,
                    "intent": "Service List",
                    "adapterData": [
                        { "key": "access_token", "value": bearer },
                        { "key": "pageIndex", "value": "0" },
                        { "key": "pageSize", "value": "100" }
                    ],
                }),
            )
            .await?;

        let raw = result
            .pointer("/adapterData/service_list/value")
            .and_then(Value::as_str)
            .ok_or_else(|| IptvError::vendor(None, result.to_string()))?;
        parse_service_list(raw)
    }

    /// `ottuser/login` with the bearer token, scoped to one service when given
    pub async fn bind_service(
        &self,
        anonymous_ks: &str,
        bearer: &str,
        device_id: &str,
        service_id: Option<&str>,
    ) -> Result<KalturaSession> {
        let placeholder = self.profile.login_placeholder;
        let mut extra = Map::new();

        match self.profile.credential_flow {
            CredentialFlow::Cas { .. } => {
                extra.insert("token".into(), string_value(bearer));
                extra.insert("loginType".into(), string_value("accessToken"));
                extra.insert("brandId".into(), string_value(self.profile.brand_id));
                if let Some(id) = service_id {
                    extra.insert("externalId".into(), string_value(id));
                }
            }
            CredentialFlow::Pkce { .. } => {
                extra.insert("loginType".into(), string_value("accessToken"));
                extra.insert("accessToken".into(), string_value(bearer));
            }
        }

        let result = self
            .call(
                &self.profile.service_url("ottuser", "login"),
                json!({
                    "language": self.profile.language,
                    "ks": anonymous_ks,
                    "udid": device_id,
                    "username": placeholder,
                    "password": placeholder,
                    "extraParams": extra,
                }),
            )
            .await
            .map_err(IptvError::into_authentication)?;

        decode::<LoginResponse>(result).map(|r| r.login_session)
    }

    /// Register the device with the household unless it is already known
    pub async fn ensure_household_device(&self, ks: &str, device_id: &str) -> Result<()> {
        if !self.profile.registers_device {
            return Ok(());
        }

        let lookup = self
            .call(
                &self.profile.service_url("householddevice", "get"),
                json!({ "language": self.profile.language, "ks": ks }),
            )
            .await;

        match lookup {
            Ok(device) if device.get("udid").and_then(Value::as_str) == Some(device_id) => {
                debug!("Household device {} already registered", device_id);
                Ok(())
            }
            Ok(_) | Err(IptvError::VendorApi { .. }) => {
                debug!("Registering household device {}", device_id);
                self.call(
                    &self.profile.service_url("householddevice", "add"),
                    json!({
                        "language": self.profile.language,
                        "ks": ks,
                        "device": {
                            "objectType": "KalturaHouseholdDevice",
                            "udid": device_id,
                            "name": "",
                            "brandId": self.profile.brand_id.parse::<u32>().unwrap_or(22),
                        },
                    }),
                )
                .await
                .map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    // ========================================================================
    // Asset queries
    // ========================================================================

    /// One page of `asset/action/list`. Page indices start at 1.
    pub async fn list_page(
        &self,
        ks: &str,
        filter: &Value,
        page_size: u32,
        page_index: u32,
    ) -> Result<ListResponse<KalturaAsset>> {
        let result = self
            .call(
                &self.profile.service_url("asset", "list"),
                json!({
                    "language": self.profile.language,
                    "ks": ks,
                    "filter": filter,
                    "pager": {
                        "objectType": "KalturaFilterPager",
                        "pageSize": page_size,
                        "pageIndex": page_index,
                    },
                }),
            )
            .await?;

        // Lenient per-object decoding; one odd asset must not sink the page
        let total_count = result.get("totalCount").and_then(Value::as_u64).unwrap_or(0);
        let objects = result
            .get("objects")
            .and_then(Value::as_array)
            .map(|objects| {
                objects
                    .iter()
                    .filter_map(|object| match serde_json::from_value::<KalturaAsset>(object.clone()) {
                        Ok(asset) => Some(asset),
                        Err(e) => {
                            warn!("Skipping undecodable asset: {}", e);
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ListResponse { total_count, objects })
    }

    /// Every page of a list query. Stops once the reported total is reached,
    /// a page comes back short, or the total is zero.
    pub async fn list_all(&self, ks: &str, filter: &Value, page_size: u32) -> Result<Vec<KalturaAsset>> {
        let mut assets = Vec::new();
        let mut page_index = 1;

        loop {
            let page = self.list_page(ks, filter, page_size, page_index).await?;
            let received = page.objects.len();
            assets.extend(page.objects);

            if page.total_count == 0
                || assets.len() as u64 >= page.total_count
                || received < page_size as usize
            {
                break;
            }
            page_index += 1;
        }

        Ok(assets)
    }

    /// `asset.get` + `asset.getPlaybackContext` in one multirequest
    pub async fn playback_context(
        &self,
        ks: &str,
        asset_id: &str,
        context: PlaybackContext,
    ) -> Result<PlaybackContextResult> {
        let (reference_type, asset_type) = match context {
            PlaybackContext::Playback => ("media", "media"),
            PlaybackContext::StartOver | PlaybackContext::Catchup => ("epg_internal", "epg"),
        };

        let result = self
            .call(
                &self.profile.multirequest_url(),
                json!({
                    "ks": ks,
                    "1": {
                        "service": "asset",
                        "action": "get",
                        "assetReferenceType": reference_type,
                        "id": asset_id,
                        "ks": ks,
                    },
                    "2": {
                        "service": "asset",
                        "action": "getPlaybackContext",
                        "assetType": asset_type,
                        "assetId": asset_id,
                        "contextDataParams": {
                            "objectType": "KalturaPlaybackContextOptions",
                            "context": context.as_str(),
                            "streamerType": "mpegdash",
                            "urlType": "DIRECT",
                            "adapterData": {
                                "codec": { "value": "AVC" },
                                "quality": { "value": "UHD" }
                            }
                        },
                        "ks": ks,
                    },
                }),
            )
            .await?;

        let playback = result.get(1).cloned().unwrap_or(Value::Null);
        if let Some(error) = playback.get("error") {
            return Err(IptvError::from_kaltura(error));
        }

        decode(playback)
    }
}

fn capture(pattern: &Regex, haystack: &str) -> Option<String> {
    pattern
        .captures(haystack)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// `{"ServicesList": [{"<name>": "<service id>"}, ...]}` in listed order
pub fn parse_service_list(raw: &str) -> Result<Vec<ServiceEntry>> {
    let document: Value = serde_json::from_str(raw).map_err(|e| IptvError::vendor(None, format!("{}: {}", e, raw)))?;

    let services = document
        .get("ServicesList")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_object)
                .flat_map(|entry| entry.iter())
                .map(|(name, id)| ServiceEntry {
                    id: Some(match id {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    }),
                    name: name.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(services)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::kaltura::profile::{O2TV_CZ, O2TV_SK};
    use crate::services::transport::testing::{ok_json, ok_text, Method, ScriptedTransport};

    fn api(transport: Arc<ScriptedTransport>, profile: &'static VendorProfile) -> KalturaApi {
        KalturaApi::new(transport, profile, "user@example.com", "secret")
    }

    #[test]
    fn test_parse_service_list() {
        let services =
            parse_service_list(r#"{"ServicesList":[{"O2 TV Basic":"1111"},{"O2 TV Sport":"2222"}]}"#).unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].id.as_deref(), Some("1111"));
        assert_eq!(services[1].name, "O2 TV Sport");
    }

    #[tokio::test]
    async fn test_call_merges_general_body_and_maps_errors() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            ok_json(json!({ "result": { "error": { "code": "500016", "message": "KS expired" } } }))
        }));
        let err = api(transport.clone(), &O2TV_CZ)
            .call("https://example/list", json!({ "ks": "abc" }))
            .await
            .unwrap_err();
        assert!(err.is_session_expired());

        let calls = transport.calls();
        let body = calls[0].json().unwrap();
        assert_eq!(body["clientTag"], "1.22.0-PC");
        assert_eq!(body["partnerId"], 3201);
        assert_eq!(body["ks"], "abc");
    }

    #[tokio::test]
    async fn test_pkce_credential_login() {
        let transport = Arc::new(ScriptedTransport::new(|request| match request.method {
            Method::ResolveGet => {
                assert!(request.url.contains("code_challenge_method=S256"));
                ok_text("https://api.o2.sk/authenticationendpoint/login.do?sessionDataKey=5f1e-aa09&type=oauth2")
            }
            Method::ResolvePost => {
                assert!(request.body_text().contains("sessionDataKey=5f1e-aa09"));
                ok_text("https://www.o2tv.sk/auth/?code=c0de-1234&session_state=x")
            }
            Method::Post => {
                let text = request.body_text();
                assert!(text.contains("code=c0de-1234"));
                assert!(text.contains("code_verifier="));
                ok_json(json!({ "access_token": "sk-access" }))
            }
            Method::Get => panic!("unexpected GET"),
        }));

        let token = api(transport.clone(), &O2TV_SK).credential_login("DEV").await.unwrap();
        assert_eq!(token, "sk-access");
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_pkce_login_without_code_is_authentication_error() {
        let transport = Arc::new(ScriptedTransport::new(|request| match request.method {
            Method::ResolveGet => ok_text("https://api.o2.sk/login.do?sessionDataKey=abc"),
            _ => ok_text("https://api.o2.sk/login.do?authFailure=true"),
        }));

        let err = api(transport, &O2TV_SK).credential_login("DEV").await.unwrap_err();
        assert!(matches!(err, IptvError::Authentication { .. }));
    }

    #[tokio::test]
    async fn test_playback_context_reads_second_result() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            ok_json(json!({
                "result": [
                    { "id": 1 },
                    { "sources": [{ "type": "DASH", "url": "https://cdn/manifest.mpd", "drm": [] }], "messages": [] }
                ]
            }))
        }));

        let context = api(transport.clone(), &O2TV_CZ)
            .playback_context("ks", "42", PlaybackContext::StartOver)
            .await
            .unwrap();
        assert_eq!(context.sources[0].kind, "DASH");

        let calls = transport.calls();
        let body = calls[0].json().unwrap();
        assert_eq!(body["1"]["assetReferenceType"], "epg_internal");
        assert_eq!(body["2"]["contextDataParams"]["context"], "START_OVER");
    }
}
