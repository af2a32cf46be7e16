//! OAuth session: sign-in, silent refresh, scope escalation and token
//! propagation.
//!
//! [`AuthSession`] owns the auth record inside the [`StateStore`]. Every
//! token it obtains is pushed to all registered [`TokenSink`]s before the
//! call that obtained it returns.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use wellsync_providers::{IdentityProvider, TokenGrant, TokenSink};

use crate::error::{CloudError, CloudResult};
use crate::state::StateStore;

/// OAuth scope for calendar access.
pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

/// OAuth scope for files the app created in Drive.
pub const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

/// A service the user connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceScope {
    Calendar,
    Storage,
    Both,
}

impl ServiceScope {
    /// Returns the OAuth scopes needed for this service.
    pub fn scopes(self) -> Vec<String> {
        match self {
            Self::Calendar => vec![CALENDAR_SCOPE.to_string()],
            Self::Storage => vec![STORAGE_SCOPE.to_string()],
            Self::Both => vec![CALENDAR_SCOPE.to_string(), STORAGE_SCOPE.to_string()],
        }
    }

    pub fn includes_calendar(self) -> bool {
        matches!(self, Self::Calendar | Self::Both)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Calendar => "calendar",
            Self::Storage => "storage",
            Self::Both => "both",
        }
    }
}

impl fmt::Display for ServiceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "calendar" => Ok(Self::Calendar),
            "storage" | "drive" => Ok(Self::Storage),
            "both" | "all" => Ok(Self::Both),
            other => Err(format!(
                "unknown service '{}' (expected calendar, storage or both)",
                other
            )),
        }
    }
}

/// The OAuth session of this device.
pub struct AuthSession {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<StateStore>,
    sinks: RwLock<Vec<Arc<dyn TokenSink>>>,
    /// Held for the whole duration of an interactive consent flow.
    sign_in_latch: Mutex<()>,
    /// Bumped whenever the access token changes.
    generation: AtomicU64,
    session_expired: AtomicBool,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("connected", &self.is_connected())
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .field("session_expired", &self.is_session_expired())
            .finish_non_exhaustive()
    }
}

impl AuthSession {
    pub fn new(identity: Arc<dyn IdentityProvider>, store: Arc<StateStore>) -> Self {
        Self {
            identity,
            store,
            sinks: RwLock::new(Vec::new()),
            sign_in_latch: Mutex::new(()),
            generation: AtomicU64::new(0),
            session_expired: AtomicBool::new(false),
        }
    }

    /// Registers a client that needs the access token.
    ///
    /// A token already held is installed right away.
    pub fn register_sink(&self, sink: Arc<dyn TokenSink>) {
        if let Some(token) = self.access_token() {
            sink.install_token(&token);
        }
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    /// Pushes the persisted token, if any, to every sink.
    pub fn install_stored_token(&self) {
        if let Some(token) = self.access_token() {
            self.propagate(Some(&token));
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.store.auth().access_token
    }

    pub fn granted_scopes(&self) -> BTreeSet<String> {
        self.store.auth().granted_scopes
    }

    /// Returns true if every scope of `scope` has been granted.
    pub fn has_scopes(&self, scope: ServiceScope) -> bool {
        self.store.auth().has_scopes(&scope.scopes())
    }

    pub fn is_connected(&self) -> bool {
        self.store.auth().is_connected()
    }

    pub fn last_validated(&self) -> Option<DateTime<Utc>> {
        self.store.auth().last_validated
    }

    /// Returns true if the token was validated less than `window` before
    /// `now`.
    pub fn last_validated_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.store.auth().validated_within(window, now)
    }

    pub fn is_session_expired(&self) -> bool {
        self.session_expired.load(Ordering::SeqCst)
    }

    pub fn mark_session_expired(&self) {
        if !self.session_expired.swap(true, Ordering::SeqCst) {
            warn!("session expired");
        }
    }

    /// Runs an interactive consent flow for exactly `scope`.
    pub async fn sign_in(&self, scope: ServiceScope) -> CloudResult<String> {
        self.authorize_scopes(scope.scopes()).await
    }

    /// Runs a consent flow for the granted scopes plus `scope`.
    ///
    /// The provider only grants what a request names, so previously held
    /// scopes are declared again.
    pub async fn request_additional_scopes(&self, scope: ServiceScope) -> CloudResult<String> {
        let mut scopes = self.granted_scopes();
        scopes.extend(scope.scopes());
        self.authorize_scopes(scopes.into_iter().collect()).await
    }

    /// Single-flight wrapper around the consent flow.
    ///
    /// A caller that waited for another flow returns that flow's token when
    /// it already covers `scopes`.
    async fn authorize_scopes(&self, scopes: Vec<String>) -> CloudResult<String> {
        let observed = self.generation.load(Ordering::SeqCst);
        let _latch = self.sign_in_latch.lock().await;

        if self.generation.load(Ordering::SeqCst) != observed {
            let auth = self.store.auth();
            if auth.has_scopes(&scopes)
                && let Some(token) = auth.access_token
            {
                debug!("reusing token from concurrent sign-in");
                return Ok(token);
            }
        }

        info!(scopes = scopes.len(), "starting interactive sign-in");
        let grant = self
            .identity
            .authorize(&scopes)
            .await
            .map_err(CloudError::from_sign_in)?;
        self.apply_grant(grant)
    }

    /// Returns a usable token without user interaction.
    ///
    /// `existing` is returned unchanged when it still validates. Otherwise a
    /// refresh grant is attempted; `Ok(None)` means the provider has no
    /// session for us and an interactive sign-in is needed.
    pub async fn silent_sign_in(&self, existing: Option<&str>) -> CloudResult<Option<String>> {
        if let Some(token) = existing
            && self.validate_token(token).await
        {
            return Ok(Some(token.to_string()));
        }
        self.refresh_silently().await
    }

    /// Asks the provider whether `token` is live.
    ///
    /// When it is the current token, the granted scopes are replaced by
    /// what the provider reports. Never fails: any problem yields false.
    pub async fn validate_token(&self, token: &str) -> bool {
        let info = match self.identity.introspect(token).await {
            Ok(info) => info,
            Err(e) => {
                debug!("token validation failed: {}", e);
                return false;
            }
        };
        if info.is_expired() {
            debug!("token reported as expired");
            return false;
        }

        let updated = self.store.update(|state| {
            if state.auth.access_token.as_deref() != Some(token) {
                return false;
            }
            if !info.scopes.is_empty() {
                state.auth.granted_scopes = info.scopes.iter().cloned().collect();
            }
            state.auth.last_validated = Some(Utc::now());
            if info.expires_at.is_some() {
                state.auth.expires_at = info.expires_at;
            }
            true
        });
        match updated {
            Ok(true) => self.session_expired.store(false, Ordering::SeqCst),
            Ok(false) => {}
            Err(e) => warn!("failed to persist validation: {}", e),
        }
        true
    }

    /// Returns the current token, revalidating it when it was last
    /// validated more than `freshness` ago.
    pub async fn ensure_valid(&self, freshness: Duration) -> CloudResult<String> {
        let auth = self.store.auth();
        let Some(token) = auth.access_token.clone() else {
            return Err(CloudError::not_configured("not connected"));
        };
        if !self.is_session_expired() && auth.validated_within(freshness, Utc::now()) {
            return Ok(token);
        }

        match self.silent_sign_in(Some(&token)).await? {
            Some(token) => Ok(token),
            None => {
                self.mark_session_expired();
                Err(CloudError::SessionExpired)
            }
        }
    }

    /// Recovers from a request rejected with `rejected`.
    ///
    /// Makes exactly one refresh attempt. If the token already changed
    /// since the request was sent, the new one is returned instead.
    pub async fn refresh_after_auth_failure(&self, rejected: &str) -> CloudResult<String> {
        if let Some(current) = self.access_token()
            && current != rejected
        {
            return Ok(current);
        }
        match self.refresh_silently().await? {
            Some(token) => Ok(token),
            None => {
                self.mark_session_expired();
                Err(CloudError::SessionExpired)
            }
        }
    }

    /// Background revalidation: validate, else refresh, else give up.
    ///
    /// Any failure marks the session expired.
    pub async fn revalidate(&self) -> CloudResult<()> {
        let Some(token) = self.access_token() else {
            return Err(CloudError::not_configured("not connected"));
        };
        match self.silent_sign_in(Some(&token)).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => {
                self.mark_session_expired();
                Err(CloudError::SessionExpired)
            }
            Err(e) => {
                warn!("revalidation failed: {}", e);
                self.mark_session_expired();
                Err(CloudError::SessionExpired)
            }
        }
    }

    /// Drops the token everywhere and forgets the auth record.
    pub fn clear(&self) -> CloudResult<()> {
        self.propagate(None);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.session_expired.store(false, Ordering::SeqCst);
        self.store.clear_auth()
    }

    async fn refresh_silently(&self) -> CloudResult<Option<String>> {
        let Some(refresh_token) = self.store.auth().refresh_token else {
            debug!("no refresh token, silent sign-in not possible");
            return Ok(None);
        };

        match self.identity.refresh(&refresh_token).await {
            Ok(Some(grant)) => self.apply_grant(grant).map(Some),
            Ok(None) => {
                debug!("provider refused silent sign-in");
                Ok(None)
            }
            Err(e) if e.is_auth_failure() => {
                debug!("refresh credential rejected: {}", e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Records a grant and propagates its token.
    fn apply_grant(&self, grant: TokenGrant) -> CloudResult<String> {
        let token = grant.access_token.clone();
        let now = Utc::now();
        let saved = self.store.update(|state| {
            let auth = &mut state.auth;
            auth.access_token = Some(grant.access_token);
            if grant.refresh_token.is_some() {
                auth.refresh_token = grant.refresh_token;
            }
            auth.granted_scopes.extend(grant.scopes);
            auth.connected_at.get_or_insert(now);
            auth.last_validated = Some(now);
            auth.expires_at = grant.expires_at;
        });

        self.propagate(Some(&token));
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.session_expired.store(false, Ordering::SeqCst);
        info!("access token updated");

        saved.map(|()| token)
    }

    fn propagate(&self, token: Option<&str>) {
        let sinks = self
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for sink in sinks {
            match token {
                Some(token) => sink.install_token(token),
                None => sink.clear_token(),
            }
        }
    }
}
