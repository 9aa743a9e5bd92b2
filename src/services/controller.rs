//! IPTV controller.
//!
//! Owns the provider, the authentication state, the credential vault and
//! both caches. Every vendor-facing operation goes through
//! [`IptvController::with_session`], which retries once after a forced
//! re-login when the vendor reports the session as expired.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::auth::{AuthState, AuthStateMachine};
use super::catalog::ChannelCatalog;
use super::epg::EpgAggregator;
use super::error::{IptvError, Result};
use super::playlist;
use super::provider::Provider;
use super::vault::CredentialVault;
use crate::config::Config;
use crate::models::{Channel, Manifest, PlayableChannel, ProviderKind, Session};

/// Snapshot reported by the health endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatus {
    pub provider: ProviderKind,
    pub authenticated: bool,
    pub session_expiry: Option<i64>,
    pub channels: usize,
    pub epg_cached_at: Option<DateTime<Utc>>,
    pub epg_entries: usize,
}

pub struct IptvController {
    provider: Arc<Provider>,
    auth: AuthStateMachine,
    vault: CredentialVault,
    catalog: ChannelCatalog,
    epg: EpgAggregator,
    base_url: String,
}

impl IptvController {
    pub fn new(provider: Provider, config: &Config, vault: CredentialVault) -> Self {
        let auth = AuthStateMachine::new(&provider, &config.provider_username, &config.provider_password);

        Self {
            provider: Arc::new(provider),
            auth,
            vault,
            catalog: ChannelCatalog::new(),
            epg: EpgAggregator::new(
                config.epg_cache_ttl_seconds,
                config.epg_days_back,
                config.epg_days_forward,
            ),
            base_url: config.base_url.clone(),
        }
    }

    /// Login, channel list and guide warm-up. Failures are logged only; the
    /// next request retries lazily.
    pub async fn start(&mut self) {
        info!(provider = %self.provider.kind(), msg = "Starting IPTV controller");

        if let Err(e) = self.login(false).await {
            error!("Login failed: {}", e);
            return;
        }
        if let Err(e) = self.load_channels().await {
            error!("Loading channels failed: {}", e);
            return;
        }
        if let Err(e) = self.get_epg().await {
            error!("Loading EPG failed: {}", e);
        }
    }

    // ========================================================================
    // Session
    // ========================================================================

    /// Restore or create the session; `force_reset` also drops the cached guide
    pub async fn login(&mut self, force_reset: bool) -> Result<Session> {
        if force_reset {
            self.epg.invalidate();
        }

        let session = self
            .auth
            .login(&self.provider, &mut self.vault, force_reset)
            .await?;
        Ok(session.clone())
    }

    async fn ensure_session(&mut self) -> Result<Session> {
        match self.auth.active_session() {
            Ok(session) => Ok(session.clone()),
            Err(_) => self.login(false).await,
        }
    }

    /// Run `op` with a live session; an expired session gets one forced
    /// re-login and one retry.
    async fn with_session<T, F, Fut>(&mut self, op: F) -> Result<T>
    where
        F: Fn(Arc<Provider>, Session) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let session = self.ensure_session().await?;

        match op(self.provider.clone(), session).await {
            Err(e) if e.is_session_expired() => {
                warn!("Session rejected by vendor, logging in again");
                let session = self.login(true).await?;
                op(self.provider.clone(), session).await
            }
            result => result,
        }
    }

    // ========================================================================
    // Channels
    // ========================================================================

    pub async fn load_channels(&mut self) -> Result<()> {
        let channels = self
            .with_session(|provider, session| async move { provider.load_channels(&session).await })
            .await?;
        self.catalog.replace(channels);
        Ok(())
    }

    pub async fn list_channels(&mut self) -> Result<Vec<Channel>> {
        if !self.catalog.is_loaded() {
            self.load_channels().await?;
        }
        Ok(self.catalog.channels().to_vec())
    }

    /// Primary channels followed by the mosaic sub-streams airing now.
    /// A failed mosaic lookup leaves just the primaries.
    pub async fn list_playable_channels(&mut self) -> Result<Vec<PlayableChannel>> {
        let channels = self.list_channels().await?;
        let now = Utc::now();

        let catalog = channels.clone();
        let mosaics = self
            .with_session(move |provider, session| {
                let catalog = catalog.clone();
                async move { provider.live_mosaic_channels(&session, &catalog, now).await }
            })
            .await
            .unwrap_or_else(|e| {
                warn!("Mosaic channel lookup failed: {}", e);
                Vec::new()
            });

        let mut playable: Vec<PlayableChannel> = channels.into_iter().map(PlayableChannel::Primary).collect();
        playable.extend(mosaics.into_iter().map(PlayableChannel::Mosaic));
        Ok(playable)
    }

    async fn find_playable(&mut self, channel_id: &str) -> Result<PlayableChannel> {
        if !self.catalog.is_loaded() {
            self.load_channels().await?;
        }
        if let Some(channel) = self.catalog.find(channel_id) {
            return Ok(PlayableChannel::Primary(channel.clone()));
        }

        self.list_playable_channels()
            .await?
            .into_iter()
            .find(|c| c.id() == channel_id)
            .ok_or_else(|| IptvError::ChannelNotFound(channel_id.to_string()))
    }

    // ========================================================================
    // Playback
    // ========================================================================

    pub async fn get_live_stream(&mut self, channel_id: &str) -> Result<Manifest> {
        let channel = self.find_playable(channel_id).await?;
        info!(channel = %channel.name(), msg = "Live stream requested");

        self.with_session(move |provider, session| {
            let channel = channel.clone();
            async move { provider.get_live(&session, &channel).await }
        })
        .await
    }

    pub async fn get_catchup_stream(
        &mut self,
        channel_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Manifest> {
        let channel = self.find_playable(channel_id).await?;
        info!(channel = %channel.name(), start = %start, end = %end, msg = "Catchup stream requested");

        self.with_session(move |provider, session| {
            let channel = channel.clone();
            async move { provider.get_catchup(&session, start, end, &channel).await }
        })
        .await
    }

    // ========================================================================
    // Guide and playlist
    // ========================================================================

    /// XMLTV document, served from cache while it is younger than the TTL
    pub async fn get_epg(&mut self) -> Result<String> {
        let now = Utc::now();
        if let Some(cached) = self.epg.cached(now) {
            return Ok(cached.to_string());
        }

        let channels = self.list_channels().await?;
        let window = self.epg.window(now);

        let catalog = channels.clone();
        let entries = self
            .with_session(move |provider, session| {
                let catalog = catalog.clone();
                async move { provider.fetch_epg(&session, &catalog, window).await }
            })
            .await?;

        Ok(self.epg.store(&channels, &entries, now).to_string())
    }

    pub async fn playlist(&mut self) -> Result<String> {
        let channels = self.list_playable_channels().await?;
        Ok(playlist::render(&channels, self.provider.kind(), &self.base_url))
    }

    pub fn status(&self) -> ControllerStatus {
        let epg = self.epg.stats();

        ControllerStatus {
            provider: self.provider.kind(),
            authenticated: self.auth.state() == AuthState::ServiceBound && self.auth.active_session().is_ok(),
            session_expiry: self.auth.session().map(|s| s.expiry_epoch),
            channels: self.catalog.channels().len(),
            epg_cached_at: epg.map(|(at, _)| at),
            epg_entries: epg.map(|(_, entries)| entries).unwrap_or(0),
        }
    }
}
