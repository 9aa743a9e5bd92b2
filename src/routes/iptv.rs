use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{Manifest, PlayableChannel};
use crate::services::IptvError;
use crate::AppState;

type ApiError = (StatusCode, Json<serde_json::Value>);

/// HTTP status for a failed controller operation
pub fn status_for(error: &IptvError) -> StatusCode {
    match error {
        IptvError::Authentication { .. } | IptvError::SessionExpired => StatusCode::UNAUTHORIZED,
        IptvError::NoServicesFound | IptvError::MissingPin(_) => StatusCode::FORBIDDEN,
        IptvError::ChannelNotFound(_) | IptvError::ChannelWithoutEpg(_) | IptvError::StreamNotFound => {
            StatusCode::NOT_FOUND
        }
        IptvError::ConcurrencyLimitation { .. } => StatusCode::CONFLICT,
        IptvError::VendorApi { .. } | IptvError::Network(_) => StatusCode::BAD_GATEWAY,
        IptvError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        IptvError::Storage(_) | IptvError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(error: IptvError) -> ApiError {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::error!(vendor_status = ?error.vendor_status(), "Request failed: {}", error);
    } else {
        tracing::warn!(vendor_status = ?error.vendor_status(), "Request failed: {}", error);
    }
    (status, Json(serde_json::json!({ "error": error.to_string() })))
}

/// `{id}.mpd` / `{id}.m3u8` / `{id}` → `{id}`
pub fn channel_id(segment: &str) -> &str {
    segment
        .strip_suffix(".mpd")
        .or_else(|| segment.strip_suffix(".m3u8"))
        .unwrap_or(segment)
}

/// Catchup bounds appended by players, unix seconds
#[derive(Debug, Deserialize)]
pub struct PlayQuery {
    #[serde(default)]
    pub start_ts: Option<i64>,
    #[serde(default)]
    pub end_ts: Option<i64>,
}

fn timestamp(seconds: i64) -> Result<DateTime<Utc>, ApiError> {
    Utc.timestamp_opt(seconds, 0).single().ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": format!("invalid timestamp {}", seconds) })),
        )
    })
}

/// GET /playlist - M3U of primary and live mosaic channels
pub async fn playlist(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let m3u = state.controller.lock().await.playlist().await.map_err(api_error)?;

    Ok(([(header::CONTENT_TYPE, "audio/x-mpegurl; charset=utf-8")], m3u))
}

/// GET /epg - XMLTV guide
pub async fn epg(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let xmltv = state.controller.lock().await.get_epg().await.map_err(api_error)?;

    Ok(([(header::CONTENT_TYPE, "application/xml; charset=utf-8")], xmltv))
}

/// GET /play/:channel - live stream, or catchup when `start_ts` is given
pub async fn play(
    State(state): State<Arc<AppState>>,
    Path(segment): Path<String>,
    Query(query): Query<PlayQuery>,
) -> Result<Response, ApiError> {
    let id = channel_id(&segment);

    let manifest = match query.start_ts {
        Some(start) => {
            let start = timestamp(start)?;
            let end = match query.end_ts {
                Some(end) => timestamp(end)?,
                None => Utc::now(),
            };
            state
                .controller
                .lock()
                .await
                .get_catchup_stream(id, start, end)
                .await
        }
        None => state.controller.lock().await.get_live_stream(id).await,
    }
    .map_err(api_error)?;

    Ok(match manifest {
        Manifest::Dash { document, .. } => {
            ([(header::CONTENT_TYPE, "application/dash+xml")], document).into_response()
        }
        Manifest::Redirect(url) => Redirect::temporary(&url).into_response(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    provider: String,
    device_id: String,
    expiry: i64,
}

/// POST /login - discard the stored session and authenticate again
pub async fn login(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let mut controller = state.controller.lock().await;
    let session = controller.login(true).await.map_err(api_error)?;
    tracing::info!(provider = %session.provider, msg = "Forced re-login completed");

    Ok(Json(LoginResponse {
        provider: session.provider.to_string(),
        device_id: session.device_id,
        expiry: session.expiry_epoch,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelSummary {
    id: String,
    number: u32,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    logo: Option<String>,
    adult: bool,
    mosaic: bool,
}

impl From<&PlayableChannel> for ChannelSummary {
    fn from(channel: &PlayableChannel) -> Self {
        Self {
            id: channel.id().to_string(),
            number: channel.number(),
            name: channel.name().to_string(),
            logo: channel.logo().map(str::to_string),
            adult: channel.adult(),
            mosaic: matches!(channel, PlayableChannel::Mosaic(_)),
        }
    }
}

/// GET /channels - playable channels as JSON
pub async fn channels(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let channels = state
        .controller
        .lock()
        .await
        .list_playable_channels()
        .await
        .map_err(api_error)?;

    Ok(Json(channels.iter().map(ChannelSummary::from).collect::<Vec<_>>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_strips_manifest_suffix() {
        assert_eq!(channel_id("100.mpd"), "100");
        assert_eq!(channel_id("100.m3u8"), "100");
        assert_eq!(channel_id("channel.100"), "channel.100");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&IptvError::SessionExpired), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&IptvError::ChannelNotFound("1".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&IptvError::MissingPin("1".into())), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&IptvError::vendor(Some(500), "boom")), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(&IptvError::Timeout("push".into())), StatusCode::GATEWAY_TIMEOUT);
    }
}
