//! The collaborator interface the rest of the app talks to.
//!
//! [`CloudConnection`] wires the session, the lifecycle timer, the
//! projector, one sync engine per configured storage provider and the
//! auto-save coordinator together. Its lifecycle is explicit:
//!
//! ```text
//! CloudConnection::builder(config, local) ... .build()
//!     -> initialize()      install stored token, start timer, startup pulls
//!     -> operations        connect, fetch_calendar_window, sync_push, ...
//!     -> dispose()         stop timer, save pending mutations
//! ```
//!
//! Failures are converted to [`CloudError`] and reported through the
//! [`Notifier`] here, so callers only decide what to render.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use wellsync_providers::{
    BoxFuture, CalendarInfo, CalendarSource, IdentityProvider, ProviderError, ProviderResult,
    StorageBackend, TokenGrant, TokenIntrospection, TokenSink,
};

use crate::autosave::{AutoSaveCoordinator, MutationEvent, SnapshotFlush};
use crate::config::CloudConfig;
use crate::error::{CloudError, CloudResult};
use crate::lifecycle::{LifecycleConfig, TokenLifecycleManager};
use crate::local::{LocalSnapshotFile, LocalStore};
use crate::notify::{LogNotifier, Notifier, NotifyKind, report, report_failure};
use crate::projector::{CalendarProjector, CalendarWindow};
use crate::session::{AuthSession, ServiceScope};
use crate::state::{CalendarBinding, ProviderKind, StateStore, StorageBinding, SyncMode};
use crate::sync::{SnapshotSyncEngine, SyncResult};

const NO_OAUTH_CLIENT: &str = "Google OAuth client is not configured";

/// Stands in for the identity provider when no OAuth client is set up.
struct UnconfiguredIdentity;

impl IdentityProvider for UnconfiguredIdentity {
    fn authorize<'a>(&'a self, _scopes: &'a [String]) -> BoxFuture<'a, ProviderResult<TokenGrant>> {
        Box::pin(async { Err(ProviderError::configuration(NO_OAUTH_CLIENT)) })
    }

    fn refresh<'a>(
        &'a self,
        _refresh_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Option<TokenGrant>>> {
        Box::pin(async { Err(ProviderError::configuration(NO_OAUTH_CLIENT)) })
    }

    fn introspect<'a>(
        &'a self,
        _access_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<TokenIntrospection>> {
        Box::pin(async { Err(ProviderError::configuration(NO_OAUTH_CLIENT)) })
    }
}

/// Builder for [`CloudConnection`].
pub struct CloudConnectionBuilder {
    config: CloudConfig,
    local: Arc<dyn LocalStore>,
    identity: Option<Arc<dyn IdentityProvider>>,
    store: Option<Arc<StateStore>>,
    calendar: Option<Arc<dyn CalendarSource>>,
    drive: Option<Arc<dyn StorageBackend>>,
    webdav: Option<Arc<dyn StorageBackend>>,
    sinks: Vec<Arc<dyn TokenSink>>,
    local_file: Option<Arc<dyn LocalSnapshotFile>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl CloudConnectionBuilder {
    /// Sets the OAuth identity provider.
    ///
    /// Without one, the connection reports itself as not configured.
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Uses `store` instead of opening the state file from the config.
    pub fn with_store(mut self, store: Arc<StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_calendar<C>(mut self, calendar: Arc<C>) -> Self
    where
        C: CalendarSource + TokenSink + 'static,
    {
        self.sinks.push(calendar.clone());
        self.calendar = Some(calendar);
        self
    }

    /// Sets the storage backend sharing the Google session.
    pub fn with_drive<S>(mut self, drive: Arc<S>) -> Self
    where
        S: StorageBackend + TokenSink + 'static,
    {
        self.sinks.push(drive.clone());
        self.drive = Some(drive);
        self
    }

    /// Sets the storage backend with its own credentials.
    pub fn with_webdav(mut self, webdav: Arc<dyn StorageBackend>) -> Self {
        self.webdav = Some(webdav);
        self
    }

    /// Mirrors every auto-saved snapshot to `file`.
    pub fn with_local_file(mut self, file: Arc<dyn LocalSnapshotFile>) -> Self {
        self.local_file = Some(file);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Builds the connection and spawns its auto-save task.
    ///
    /// Must be called within a Tokio runtime.
    pub fn build(self) -> CloudResult<CloudConnection> {
        let config = self.config;
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(StateStore::open(
                &config.state_path,
                &config.snapshot_file_name,
            )?),
        };
        let configured = self.identity.is_some();
        let identity = self
            .identity
            .unwrap_or_else(|| Arc::new(UnconfiguredIdentity) as Arc<dyn IdentityProvider>);
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(LogNotifier) as Arc<dyn Notifier>);

        let session = Arc::new(AuthSession::new(identity, store.clone()));
        for sink in self.sinks {
            session.register_sink(sink);
        }

        let backends = [
            (ProviderKind::GoogleDrive, self.drive),
            (ProviderKind::Webdav, self.webdav),
        ];
        let engines: Vec<Arc<SnapshotSyncEngine>> = backends
            .into_iter()
            .filter_map(|(kind, backend)| backend.map(|backend| (kind, backend)))
            .map(|(kind, backend)| {
                Arc::new(SnapshotSyncEngine::new(
                    kind,
                    backend,
                    session.clone(),
                    store.clone(),
                    self.local.clone(),
                    config.on_demand_freshness,
                ))
            })
            .collect();

        let projector = self.calendar.clone().map(|source| {
            CalendarProjector::new(
                session.clone(),
                source,
                store.clone(),
                notifier.clone(),
                config.utc_offset,
                config.on_demand_freshness,
            )
        });

        let lifecycle = TokenLifecycleManager::new(
            session.clone(),
            notifier.clone(),
            LifecycleConfig {
                interval: config.refresh_interval,
                visibility_freshness: config.visibility_freshness,
            },
        );

        let flush = SnapshotFlush::new(
            self.local.clone(),
            self.local_file,
            engines.clone(),
            notifier.clone(),
        );
        let autosave = AutoSaveCoordinator::spawn(Arc::new(flush), config.autosave_debounce);

        debug!(
            configured,
            calendar = self.calendar.is_some(),
            providers = engines.len(),
            "cloud connection built"
        );

        Ok(CloudConnection {
            configured,
            session,
            store,
            calendar: self.calendar,
            projector,
            engines,
            local: self.local,
            lifecycle,
            autosave,
            notifier,
            freshness: config.on_demand_freshness,
        })
    }
}

/// Per-provider part of [`ConnectionStatus`].
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub provider: ProviderKind,
    /// True if a backend for this provider was configured.
    pub available: bool,
    pub binding: StorageBinding,
}

/// Serializable snapshot of the connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub configured: bool,
    pub connected: bool,
    pub session_expired: bool,
    pub granted_scopes: Vec<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_validated: Option<DateTime<Utc>>,
    pub calendar: Option<CalendarBinding>,
    pub providers: Vec<ProviderStatus>,
}

/// Cloud connection of one device.
pub struct CloudConnection {
    configured: bool,
    session: Arc<AuthSession>,
    store: Arc<StateStore>,
    calendar: Option<Arc<dyn CalendarSource>>,
    projector: Option<CalendarProjector>,
    engines: Vec<Arc<SnapshotSyncEngine>>,
    local: Arc<dyn LocalStore>,
    lifecycle: TokenLifecycleManager,
    autosave: AutoSaveCoordinator,
    notifier: Arc<dyn Notifier>,
    /// How long on-demand operations trust a validated token.
    freshness: Duration,
}

impl CloudConnection {
    /// Starts building a connection around the journal's record store.
    pub fn builder(config: CloudConfig, local: Arc<dyn LocalStore>) -> CloudConnectionBuilder {
        CloudConnectionBuilder {
            config,
            local,
            identity: None,
            store: None,
            calendar: None,
            drive: None,
            webdav: None,
            sinks: Vec::new(),
            local_file: None,
            notifier: None,
        }
    }

    /// Brings a freshly built connection up.
    ///
    /// Installs the persisted token into the clients, starts the token
    /// timer when connected, then pulls from every provider that syncs on
    /// startup and holds a newer snapshot. Returns the pulls that ran.
    pub async fn initialize(&self) -> Vec<(ProviderKind, SyncResult)> {
        self.session.install_stored_token();
        if self.session.is_connected() {
            self.lifecycle.start();
        }

        let mut results = Vec::new();
        for engine in &self.engines {
            let kind = engine.kind();
            if !self.store.storage(kind).sync_on_startup {
                continue;
            }
            if engine.requires_session() && !self.session.is_connected() {
                debug!(provider = %kind, "not connected, skipping startup sync");
                continue;
            }

            match engine.check_remote_newer().await {
                Ok(true) => {
                    info!(provider = %kind, "remote snapshot is newer, pulling");
                    let result = engine.pull().await;
                    self.report_sync(kind, "Startup sync", &result);
                    results.push((kind, result));
                }
                Ok(false) => debug!(provider = %kind, "local snapshot is current"),
                Err(e) => {
                    report(self.notifier.as_ref(), &e);
                    results.push((kind, SyncResult::failed(&e)));
                }
            }
        }
        self.halt_if_expired();
        results
    }

    /// Returns true if an OAuth client is available.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn has_calendar_access(&self) -> bool {
        self.session.has_scopes(ServiceScope::Calendar)
    }

    pub fn has_drive_access(&self) -> bool {
        self.session.has_scopes(ServiceScope::Storage)
    }

    /// Connects `scope`, keeping every scope already granted.
    ///
    /// A held token that still covers `scope` is reused without a consent
    /// flow. Connecting the calendar binds the primary calendar when none
    /// is bound yet.
    pub async fn connect(&self, scope: ServiceScope) -> CloudResult<()> {
        if !self.configured {
            return Err(CloudError::not_configured(NO_OAUTH_CLIENT));
        }

        if let Err(e) = self.acquire(scope).await {
            self.halt_if_expired();
            report(self.notifier.as_ref(), &e);
            return Err(e);
        }

        if scope.includes_calendar() && self.store.calendar().is_none() {
            match self.bind_default_calendar().await {
                Ok(Some(binding)) => info!(calendar = %binding.calendar_name, "calendar bound"),
                Ok(None) => debug!("no calendar to bind"),
                Err(e) => {
                    warn!("failed to bind calendar: {}", e);
                    report(self.notifier.as_ref(), &e);
                }
            }
        }

        self.lifecycle.start();
        info!(%scope, "connected");
        self.notifier.notify(
            NotifyKind::Success,
            &format!("Connected to Google ({})", scope),
        );
        Ok(())
    }

    async fn acquire(&self, scope: ServiceScope) -> CloudResult<String> {
        if self.session.has_scopes(scope) {
            let existing = self.session.access_token();
            if let Some(token) = self.session.silent_sign_in(existing.as_deref()).await? {
                debug!("existing session covers requested scopes");
                return Ok(token);
            }
        }
        if self.session.granted_scopes().is_empty() {
            self.session.sign_in(scope).await
        } else {
            self.session.request_additional_scopes(scope).await
        }
    }

    async fn bind_default_calendar(&self) -> CloudResult<Option<CalendarBinding>> {
        let calendars = self.list_calendars().await?;
        let Some(chosen) = calendars
            .iter()
            .find(|c| c.is_primary)
            .or_else(|| calendars.first())
        else {
            return Ok(None);
        };
        let binding = CalendarBinding::new(&chosen.id, &chosen.name);
        self.store
            .update(|state| state.calendar = Some(binding.clone()))?;
        Ok(Some(binding))
    }

    /// Drops the session and the calendar binding.
    ///
    /// Storage preferences survive; the Drive binding forgets its file.
    pub fn disconnect(&self) -> CloudResult<()> {
        self.lifecycle.stop();
        self.autosave.cancel();
        self.session.clear()?;
        self.store.update(|state| {
            state.calendar = None;
            state.storage.google_drive.reset_remote();
        })?;
        info!("disconnected");
        self.notifier
            .notify(NotifyKind::Info, "Disconnected from Google");
        Ok(())
    }

    /// Returns calendar projections for the local days `start..=end`.
    pub async fn fetch_calendar_window(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CloudResult<CalendarWindow> {
        let Some(projector) = &self.projector else {
            return Err(CloudError::not_configured("no calendar source configured"));
        };
        let window = projector
            .fetch_window(start, end)
            .await
            .inspect_err(|e| report(self.notifier.as_ref(), e));
        self.halt_if_expired();
        window
    }

    /// Lists calendars of the connected account.
    pub async fn list_calendars(&self) -> CloudResult<Vec<CalendarInfo>> {
        let Some(calendar) = &self.calendar else {
            return Err(CloudError::not_configured("no calendar source configured"));
        };
        if let Err(e) = self.session.ensure_valid(self.freshness).await {
            self.halt_if_expired();
            return Err(e);
        }
        match calendar.list_calendars().await {
            Ok(calendars) => Ok(calendars),
            Err(e) if e.is_auth_failure() => {
                self.session.mark_session_expired();
                self.halt_if_expired();
                Err(CloudError::SessionExpired)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Binds the calendar with `calendar_id`.
    pub async fn select_calendar(&self, calendar_id: &str) -> CloudResult<CalendarBinding> {
        let calendars = self.list_calendars().await?;
        let Some(chosen) = calendars.into_iter().find(|c| c.id == calendar_id) else {
            return Err(CloudError::not_configured(format!(
                "calendar '{}' not found",
                calendar_id
            )));
        };
        let binding = CalendarBinding::new(chosen.id, chosen.name);
        self.store
            .update(|state| state.calendar = Some(binding.clone()))?;
        info!(calendar = %binding.calendar_name, "calendar selected");
        Ok(binding)
    }

    /// Exports the local snapshot and pushes it to `kind`.
    pub async fn sync_push(&self, kind: ProviderKind) -> SyncResult {
        let engine = match self.engine(kind) {
            Ok(engine) => engine,
            Err(e) => return SyncResult::failed(&e),
        };
        let snapshot = match self.local.export_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let err = CloudError::from(e);
                report(self.notifier.as_ref(), &err);
                return SyncResult::failed(&err);
            }
        };
        let result = engine.push(&snapshot).await;
        self.halt_if_expired();
        self.report_sync(kind, "Backup", &result);
        result
    }

    /// Replaces local data with the snapshot held by `kind`.
    pub async fn sync_pull(&self, kind: ProviderKind) -> SyncResult {
        let engine = match self.engine(kind) {
            Ok(engine) => engine,
            Err(e) => return SyncResult::failed(&e),
        };
        let result = engine.pull().await;
        self.halt_if_expired();
        self.report_sync(kind, "Restore", &result);
        result
    }

    /// Returns true if `kind` holds a snapshot newer than the last sync.
    pub async fn check_remote_newer(&self, kind: ProviderKind) -> CloudResult<bool> {
        let newer = self
            .engine(kind)?
            .check_remote_newer()
            .await
            .inspect_err(|e| report(self.notifier.as_ref(), e));
        self.halt_if_expired();
        newer
    }

    /// Schedules a debounced save after a local mutation.
    pub fn on_auto_save_trigger(&self, event: MutationEvent) {
        self.autosave.schedule(event);
    }

    /// Runs a pending auto-save now.
    pub async fn flush_auto_save(&self) {
        self.autosave.flush().await;
    }

    /// Reacts to the app becoming visible or hidden.
    ///
    /// Returns true if the token was checked.
    pub async fn on_visibility_change(&self, visible: bool) -> bool {
        self.lifecycle.on_visibility_change(visible).await
    }

    /// Returns true while the background token check is scheduled.
    pub fn is_token_timer_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn set_sync_mode(&self, kind: ProviderKind, mode: SyncMode) -> CloudResult<()> {
        self.store
            .update(|state| state.storage.get_mut(kind).sync_mode = mode)?;
        info!(provider = %kind, %mode, "sync mode changed");
        Ok(())
    }

    pub fn set_sync_on_startup(&self, kind: ProviderKind, enabled: bool) -> CloudResult<()> {
        self.store
            .update(|state| state.storage.get_mut(kind).sync_on_startup = enabled)?;
        info!(provider = %kind, enabled, "startup sync changed");
        Ok(())
    }

    pub fn status(&self) -> ConnectionStatus {
        let state = self.store.snapshot();
        let providers = ProviderKind::ALL
            .into_iter()
            .map(|kind| ProviderStatus {
                provider: kind,
                available: self.engine(kind).is_ok(),
                binding: state.storage.get(kind).clone(),
            })
            .collect();
        ConnectionStatus {
            configured: self.configured,
            connected: state.auth.is_connected(),
            session_expired: self.session.is_session_expired(),
            granted_scopes: state.auth.granted_scopes.into_iter().collect(),
            connected_at: state.auth.connected_at,
            last_validated: state.auth.last_validated,
            calendar: state.calendar,
            providers,
        }
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Stops the token timer and saves pending mutations.
    pub async fn dispose(self) {
        self.lifecycle.stop();
        self.autosave.shutdown().await;
        debug!("cloud connection disposed");
    }

    fn engine(&self, kind: ProviderKind) -> CloudResult<&Arc<SnapshotSyncEngine>> {
        self.engines
            .iter()
            .find(|e| e.kind() == kind)
            .ok_or_else(|| {
                CloudError::not_configured(format!("{} is not configured", kind.display_name()))
            })
    }

    /// An expired session stays expired until the next connect, so the
    /// token timer has nothing left to check.
    fn halt_if_expired(&self) {
        if self.session.is_session_expired() {
            self.lifecycle.stop();
        }
    }

    fn report_sync(&self, kind: ProviderKind, action: &str, result: &SyncResult) {
        match (result.success, result.error_kind) {
            (true, _) => self.notifier.notify(
                NotifyKind::Success,
                &format!("{} with {} complete", action, kind.display_name()),
            ),
            (false, Some(error_kind)) => report_failure(
                self.notifier.as_ref(),
                error_kind,
                &format!(
                    "{} with {} failed: {}",
                    action,
                    kind.display_name(),
                    result.error.as_deref().unwrap_or("unknown error")
                ),
            ),
            (false, None) => {}
        }
    }
}
