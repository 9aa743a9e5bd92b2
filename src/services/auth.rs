//! Provider authentication state machine.
//!
//! # Overview
//!
//! A full login walks `Unauthenticated → AnonymousObtained →
//! CredentialVerified → ServicesDiscovered → ServiceBound`:
//!
//! 1. anonymous token (vendors without one skip straight to credentials)
//! 2. credential exchange for a bearer token
//! 3. entitled service discovery
//! 4. service-scoped token, previously active service first
//! 5. household device registration where the vendor wants it
//!
//! A still-valid session in the vault short-circuits all of it. Nothing is
//! written to the vault unless the whole sequence succeeds, and the device
//! id survives re-logins.

use rand::Rng;
use tracing::{info, warn};

use super::error::{IptvError, Result};
use super::kaltura::ServiceEntry;
use super::metrics::LOGINS;
use super::provider::Provider;
use super::vault::CredentialVault;
use crate::models::{ProviderKind, Session, StoredSession};

const DEVICE_ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const DEVICE_ID_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    AnonymousObtained,
    CredentialVerified,
    ServicesDiscovered,
    ServiceBound,
}

/// 16 upper-case alphanumerics
pub fn generate_device_id() -> String {
    let mut rng = rand::thread_rng();
    (0..DEVICE_ID_LEN)
        .map(|_| DEVICE_ID_CHARSET[rng.gen_range(0..DEVICE_ID_CHARSET.len())] as char)
        .collect()
}

/// Previously active service first, the rest in listed order
fn order_services(mut services: Vec<ServiceEntry>, preferred: Option<&str>) -> Vec<ServiceEntry> {
    if let Some(index) = preferred.and_then(|id| services.iter().position(|s| s.id.as_deref() == Some(id))) {
        let service = services.remove(index);
        services.insert(0, service);
    }
    services
}

pub struct AuthStateMachine {
    kind: ProviderKind,
    region: Option<&'static str>,
    username: String,
    password: String,
    state: AuthState,
    session: Option<Session>,
}

impl AuthStateMachine {
    pub fn new(provider: &Provider, username: &str, password: &str) -> Self {
        Self {
            kind: provider.kind(),
            region: provider.region(),
            username: username.to_string(),
            password: password.to_string(),
            state: AuthState::Unauthenticated,
            session: None,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// The bound session, or `SessionExpired` once it is past its expiry
    pub fn active_session(&self) -> Result<&Session> {
        match &self.session {
            Some(session) if session.is_valid() => Ok(session),
            _ => Err(IptvError::SessionExpired),
        }
    }

    pub fn reset(&mut self) {
        self.state = AuthState::Unauthenticated;
        self.session = None;
    }

    fn stored(&self, vault: &CredentialVault) -> Option<StoredSession> {
        let value = vault.get(self.kind.as_str())?.clone();
        match serde_json::from_value::<StoredSession>(value) {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!("Stored {} session is malformed: {}", self.kind, e);
                None
            }
        }
    }

    /// Restore or create a session. `force_reset` ignores whatever is stored.
    pub async fn login(
        &mut self,
        provider: &Provider,
        vault: &mut CredentialVault,
        force_reset: bool,
    ) -> Result<&Session> {
        let stored = self.stored(vault);

        let device_id = self
            .session
            .as_ref()
            .map(|s| s.device_id.clone())
            .or_else(|| stored.as_ref().and_then(|s| s.device_id()).map(str::to_string))
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_device_id);

        let previous_service = self
            .session
            .as_ref()
            .and_then(|s| s.service_id.clone())
            .or_else(|| match &stored {
                Some(StoredSession::Kaltura(k)) => k.service.as_ref().and_then(|s| s.id.clone()),
                _ => None,
            });

        if !force_reset {
            let restored = stored
                .as_ref()
                .and_then(|s| s.to_session(self.kind, &self.username))
                .filter(Session::is_valid);

            if let Some(session) = restored {
                info!(provider = %self.kind, expiry = session.expiry_epoch, msg = "Restored stored session");
                LOGINS.with_label_values(&["stored"]).inc();
                self.state = AuthState::ServiceBound;
                self.persist(vault, &session).await;
                return Ok(self.session.insert(session));
            }
        }

        self.reset();
        info!(provider = %self.kind, device_id = %device_id, msg = "Creating new session");

        match self.authenticate(provider, &device_id, previous_service.as_deref()).await {
            Ok(session) => {
                LOGINS.with_label_values(&["fresh"]).inc();
                self.persist(vault, &session).await;
                Ok(self.session.insert(session))
            }
            Err(e) => {
                LOGINS.with_label_values(&["failed"]).inc();
                self.reset();
                Err(e)
            }
        }
    }

    async fn authenticate(
        &mut self,
        provider: &Provider,
        device_id: &str,
        previous_service: Option<&str>,
    ) -> Result<Session> {
        let anonymous = provider.anonymous_token().await?;
        if anonymous.is_some() {
            self.state = AuthState::AnonymousObtained;
        }

        let bearer = provider.credential_token(device_id).await?;
        self.state = AuthState::CredentialVerified;

        let services = provider.discover_services(&bearer, anonymous.as_deref()).await?;
        if services.is_empty() {
            return Err(IptvError::NoServicesFound);
        }
        self.state = AuthState::ServicesDiscovered;

        let mut last_error = None;
        let mut bound = None;
        for service in order_services(services, previous_service) {
            match provider
                .bind_service(anonymous.as_deref(), &bearer, device_id, &service)
                .await
            {
                Ok(session) => {
                    info!(service = %service.name, msg = "Service bound");
                    bound = Some(session);
                    break;
                }
                Err(e) => {
                    warn!("Binding service {} failed: {}", service.name, e);
                    last_error = Some(e);
                }
            }
        }

        let session = match bound {
            Some(session) => session,
            None => return Err(last_error.unwrap_or(IptvError::NoServicesFound)),
        };

        provider.register_device(&session).await?;
        self.state = AuthState::ServiceBound;
        Ok(session)
    }

    /// Write the session document; a failed write keeps the in-memory session
    async fn persist(&self, vault: &mut CredentialVault, session: &Session) {
        let stored = session.to_stored(self.region, &self.username, &self.password);
        let value = match serde_json::to_value(&stored) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to serialize session: {}", e);
                return;
            }
        };

        if let Err(e) = vault.set(self.kind.as_str(), value).await {
            warn!("Failed to persist session to {}: {}", vault.path().display(), e);
        }
    }
}
