//! In-memory fakes for the provider traits and local collaborators.
//!
//! Enabled for unit tests and, through the `testing` feature, for
//! integration tests and downstream crates.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use wellsync_core::TimeWindow;
use wellsync_providers::{
    BearerToken, BoxFuture, CalendarInfo, CalendarSource, IdentityProvider, ProviderError,
    ProviderResult, RawEvent, RemoteFile, StorageBackend, TokenGrant, TokenIntrospection,
    TokenSink,
};

use crate::local::{LocalSnapshotFile, LocalStore, LocalStoreError};
use crate::notify::{Notifier, NotifyKind};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn copy_error(err: &ProviderError) -> ProviderError {
    ProviderError::new(err.code(), err.message())
}

#[derive(Debug, Default)]
struct IdentityState {
    issued: u64,
    /// Live access tokens and their scopes.
    live: HashMap<String, Vec<String>>,
    /// Union of every scope consented to.
    granted: Vec<String>,
    cancel_next: bool,
    refuse_refresh: bool,
    omit_refresh_token: bool,
    introspection_error: Option<ProviderError>,
    consent_delay: Option<Duration>,
    last_authorize_scopes: Vec<String>,
    authorize_count: usize,
    refresh_count: usize,
    introspect_count: usize,
}

impl IdentityState {
    fn issue(&mut self, scopes: Vec<String>, refresh_token: Option<String>) -> TokenGrant {
        self.issued += 1;
        let access_token = format!("token-{}", self.issued);
        self.live.insert(access_token.clone(), scopes.clone());
        TokenGrant {
            access_token,
            refresh_token,
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            scopes,
        }
    }
}

/// Identity provider issuing `token-N` access tokens.
#[derive(Debug, Default)]
pub struct FakeIdentity {
    state: Mutex<IdentityState>,
}

impl FakeIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next consent flow is dismissed by the user.
    pub fn cancel_next_consent(&self) {
        lock(&self.state).cancel_next = true;
    }

    /// Every introspection fails with `err` from now on.
    pub fn fail_introspection(&self, err: ProviderError) {
        lock(&self.state).introspection_error = Some(err);
    }

    /// Changes the scopes reported for `token`.
    pub fn set_token_scopes(&self, token: &str, scopes: &[&str]) {
        lock(&self.state).live.insert(
            token.to_string(),
            scopes.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Makes `token` unknown to the provider.
    pub fn revoke(&self, token: &str) {
        lock(&self.state).live.remove(token);
    }

    /// Every refresh grant is refused from now on.
    pub fn refuse_refresh(&self) {
        lock(&self.state).refuse_refresh = true;
    }

    /// Refresh grants no longer carry a refresh token.
    pub fn omit_refresh_token_on_refresh(&self) {
        lock(&self.state).omit_refresh_token = true;
    }

    /// Consent flows take `delay` to complete.
    pub fn delay_consent(&self, delay: Duration) {
        lock(&self.state).consent_delay = Some(delay);
    }

    pub fn last_authorize_scopes(&self) -> Vec<String> {
        lock(&self.state).last_authorize_scopes.clone()
    }

    pub fn authorize_count(&self) -> usize {
        lock(&self.state).authorize_count
    }

    pub fn refresh_count(&self) -> usize {
        lock(&self.state).refresh_count
    }

    pub fn introspect_count(&self) -> usize {
        lock(&self.state).introspect_count
    }

    async fn consent(&self, scopes: &[String]) -> ProviderResult<TokenGrant> {
        let delay = {
            let mut state = lock(&self.state);
            state.authorize_count += 1;
            state.last_authorize_scopes = scopes.to_vec();
            state.consent_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        if std::mem::take(&mut state.cancel_next) {
            return Err(ProviderError::cancelled("consent dismissed"));
        }
        for scope in scopes {
            if !state.granted.contains(scope) {
                state.granted.push(scope.clone());
            }
        }
        Ok(state.issue(scopes.to_vec(), Some("refresh-token".to_string())))
    }
}

impl IdentityProvider for FakeIdentity {
    fn authorize<'a>(&'a self, scopes: &'a [String]) -> BoxFuture<'a, ProviderResult<TokenGrant>> {
        Box::pin(self.consent(scopes))
    }

    fn refresh<'a>(
        &'a self,
        _refresh_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Option<TokenGrant>>> {
        let mut state = lock(&self.state);
        state.refresh_count += 1;
        let result = if state.refuse_refresh {
            None
        } else {
            let refresh_token = (!state.omit_refresh_token).then(|| "refresh-token".to_string());
            let scopes = state.granted.clone();
            Some(state.issue(scopes, refresh_token))
        };
        Box::pin(async move { Ok(result) })
    }

    fn introspect<'a>(
        &'a self,
        access_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<TokenIntrospection>> {
        let mut state = lock(&self.state);
        state.introspect_count += 1;
        let result = match (&state.introspection_error, state.live.get(access_token)) {
            (Some(err), _) => Err(copy_error(err)),
            (None, Some(scopes)) => Ok(TokenIntrospection {
                scopes: scopes.clone(),
                expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            }),
            (None, None) => Err(ProviderError::authentication("invalid token")),
        };
        Box::pin(async move { result })
    }
}

/// Token sink remembering the installed token.
#[derive(Debug, Default)]
pub struct RecordingSink {
    token: BearerToken,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<String> {
        self.token.get()
    }
}

impl TokenSink for RecordingSink {
    fn install_token(&self, token: &str) {
        self.token.set(token);
    }

    fn clear_token(&self) {
        self.token.clear();
    }
}

#[derive(Debug, Default)]
struct CalendarState {
    events: Vec<RawEvent>,
    calendars: Vec<CalendarInfo>,
    queried: Vec<TimeWindow>,
    failures: VecDeque<ProviderError>,
}

/// Calendar source serving events from memory.
///
/// Starts with one primary calendar whose id is `primary`. Requests fail
/// with an authentication error while no token is installed.
#[derive(Debug)]
pub struct FakeCalendar {
    token: BearerToken,
    state: Mutex<CalendarState>,
}

impl Default for FakeCalendar {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCalendar {
    pub fn new() -> Self {
        Self {
            token: BearerToken::new(),
            state: Mutex::new(CalendarState {
                calendars: vec![CalendarInfo::new("primary", "Me").with_primary(true)],
                ..Default::default()
            }),
        }
    }

    pub fn add_event(&self, event: RawEvent) {
        lock(&self.state).events.push(event);
    }

    pub fn set_calendars(&self, calendars: Vec<CalendarInfo>) {
        lock(&self.state).calendars = calendars;
    }

    /// The next request fails with `err`.
    pub fn fail_next(&self, err: ProviderError) {
        lock(&self.state).failures.push_back(err);
    }

    pub fn queried_windows(&self) -> Vec<TimeWindow> {
        lock(&self.state).queried.clone()
    }

    pub fn token(&self) -> Option<String> {
        self.token.get()
    }

    fn begin(&self) -> ProviderResult<()> {
        if let Some(err) = lock(&self.state).failures.pop_front() {
            return Err(err);
        }
        self.token.require().map(|_| ())
    }
}

impl TokenSink for FakeCalendar {
    fn install_token(&self, token: &str) {
        self.token.set(token);
    }

    fn clear_token(&self) {
        self.token.clear();
    }
}

impl CalendarSource for FakeCalendar {
    fn name(&self) -> &str {
        "fake-calendar"
    }

    fn list_events<'a>(
        &'a self,
        calendar_id: &'a str,
        window: &'a TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>> {
        lock(&self.state).queried.push(window.clone());
        let result: ProviderResult<Vec<RawEvent>> = self.begin().map(|()| {
            lock(&self.state)
                .events
                .iter()
                .filter(|e| e.calendar_id == calendar_id)
                .cloned()
                .collect()
        });
        Box::pin(async move { result })
    }

    fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarInfo>>> {
        let result = self
            .begin()
            .map(|()| lock(&self.state).calendars.clone());
        Box::pin(async move { result })
    }
}

#[derive(Debug, Clone)]
struct StoredFile {
    name: String,
    content: String,
    modified_at: DateTime<Utc>,
}

impl StoredFile {
    fn remote(&self, id: &str) -> RemoteFile {
        RemoteFile {
            id: id.to_string(),
            name: self.name.clone(),
            modified_at: Some(self.modified_at),
        }
    }
}

#[derive(Debug, Default)]
struct StorageState {
    files: BTreeMap<String, StoredFile>,
    next_id: u64,
    failures: VecDeque<ProviderError>,
    find_count: usize,
    create_count: usize,
    metadata_count: usize,
    download_count: usize,
    latency: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

impl StorageState {
    fn insert(&mut self, file: StoredFile) -> String {
        self.next_id += 1;
        let id = format!("file-{}", self.next_id);
        self.files.insert(id.clone(), file);
        id
    }
}

/// Storage backend keeping files in memory.
///
/// Queued failures are returned by the next calls in order, whatever the
/// operation.
#[derive(Debug)]
pub struct FakeStorage {
    requires_session: bool,
    token: BearerToken,
    state: Mutex<StorageState>,
}

impl FakeStorage {
    /// A backend authenticating with the session token, like Drive.
    pub fn session_backed() -> Self {
        Self {
            requires_session: true,
            token: BearerToken::new(),
            state: Mutex::new(StorageState::default()),
        }
    }

    /// A backend with its own credentials, like WebDAV.
    pub fn with_own_credentials() -> Self {
        Self {
            requires_session: false,
            ..Self::session_backed()
        }
    }

    /// Stores a file and returns its id.
    pub fn seed_file(&self, name: &str, content: &str, modified_at: DateTime<Utc>) -> String {
        lock(&self.state).insert(StoredFile {
            name: name.to_string(),
            content: content.to_string(),
            modified_at,
        })
    }

    pub fn delete(&self, id: &str) {
        lock(&self.state).files.remove(id);
    }

    pub fn content(&self, id: &str) -> Option<String> {
        lock(&self.state).files.get(id).map(|f| f.content.clone())
    }

    pub fn fail_next(&self, err: ProviderError) {
        lock(&self.state).failures.push_back(err);
    }

    pub fn find_count(&self) -> usize {
        lock(&self.state).find_count
    }

    pub fn create_count(&self) -> usize {
        lock(&self.state).create_count
    }

    pub fn metadata_count(&self) -> usize {
        lock(&self.state).metadata_count
    }

    pub fn download_count(&self) -> usize {
        lock(&self.state).download_count
    }

    /// Every call takes `latency` before it touches the files.
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = Some(latency);
    }

    /// Most calls that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        lock(&self.state).max_in_flight
    }

    fn call<'a, T: Send + 'a>(
        &'a self,
        op: impl FnOnce() -> ProviderResult<T> + Send + 'a,
    ) -> BoxFuture<'a, ProviderResult<T>> {
        Box::pin(async move {
            let latency = {
                let mut state = lock(&self.state);
                state.in_flight += 1;
                state.max_in_flight = state.max_in_flight.max(state.in_flight);
                state.latency
            };
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            let result = op();
            lock(&self.state).in_flight -= 1;
            result
        })
    }

    /// Pops a queued failure and checks the token, returning the locked
    /// state for the operation itself.
    fn begin(&self) -> ProviderResult<MutexGuard<'_, StorageState>> {
        let mut state = lock(&self.state);
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        if self.requires_session {
            self.token.require()?;
        }
        Ok(state)
    }

    fn find(&self, name: &str) -> ProviderResult<Option<RemoteFile>> {
        lock(&self.state).find_count += 1;
        let state = self.begin()?;
        Ok(state
            .files
            .iter()
            .filter(|(_, f)| f.name == name)
            .max_by_key(|(_, f)| f.modified_at)
            .map(|(id, f)| f.remote(id)))
    }

    fn create(&self, name: &str, content: &str) -> ProviderResult<RemoteFile> {
        lock(&self.state).create_count += 1;
        let mut state = self.begin()?;
        let file = StoredFile {
            name: name.to_string(),
            content: content.to_string(),
            modified_at: Utc::now(),
        };
        let id = state.insert(file.clone());
        Ok(file.remote(&id))
    }

    fn update(&self, id: &str, content: &str) -> ProviderResult<RemoteFile> {
        let mut state = self.begin()?;
        let Some(file) = state.files.get_mut(id) else {
            return Err(ProviderError::not_found(format!("no file {}", id)));
        };
        file.content = content.to_string();
        file.modified_at = Utc::now();
        Ok(file.remote(id))
    }

    fn download(&self, id: &str) -> ProviderResult<Option<String>> {
        lock(&self.state).download_count += 1;
        let state = self.begin()?;
        Ok(state.files.get(id).map(|f| f.content.clone()))
    }

    fn metadata(&self, id: &str) -> ProviderResult<Option<RemoteFile>> {
        lock(&self.state).metadata_count += 1;
        let state = self.begin()?;
        Ok(state.files.get(id).map(|f| f.remote(id)))
    }
}

impl TokenSink for FakeStorage {
    fn install_token(&self, token: &str) {
        self.token.set(token);
    }

    fn clear_token(&self) {
        self.token.clear();
    }
}

impl StorageBackend for FakeStorage {
    fn name(&self) -> &str {
        "fake-storage"
    }

    fn requires_session(&self) -> bool {
        self.requires_session
    }

    fn find_file<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ProviderResult<Option<RemoteFile>>> {
        self.call(move || self.find(name))
    }

    fn create_file<'a>(
        &'a self,
        name: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, ProviderResult<RemoteFile>> {
        self.call(move || self.create(name, content))
    }

    fn update_file<'a>(
        &'a self,
        id: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, ProviderResult<RemoteFile>> {
        self.call(move || self.update(id, content))
    }

    fn download_file<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<Option<String>>> {
        self.call(move || self.download(id))
    }

    fn file_metadata<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Option<RemoteFile>>> {
        self.call(move || self.metadata(id))
    }
}

#[derive(Debug, Default)]
struct MemoryStoreState {
    snapshot: String,
    mutations: u64,
    imports: usize,
    exports: usize,
}

/// Record store holding the snapshot as a string.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryStoreState>,
}

impl MemoryStore {
    pub fn new(snapshot: &str) -> Self {
        Self {
            state: Mutex::new(MemoryStoreState {
                snapshot: snapshot.to_string(),
                ..Default::default()
            }),
        }
    }

    /// Replaces the snapshot as a local edit would.
    pub fn mutate(&self, snapshot: &str) {
        let mut state = lock(&self.state);
        state.snapshot = snapshot.to_string();
        state.mutations += 1;
    }

    pub fn snapshot(&self) -> String {
        lock(&self.state).snapshot.clone()
    }

    pub fn import_count(&self) -> usize {
        lock(&self.state).imports
    }

    pub fn export_count(&self) -> usize {
        lock(&self.state).exports
    }
}

impl LocalStore for MemoryStore {
    fn export_snapshot(&self) -> BoxFuture<'_, Result<String, LocalStoreError>> {
        let mut state = lock(&self.state);
        state.exports += 1;
        let snapshot = state.snapshot.clone();
        Box::pin(async move { Ok(snapshot) })
    }

    fn import_snapshot<'a>(
        &'a self,
        snapshot: &'a str,
    ) -> BoxFuture<'a, Result<(), LocalStoreError>> {
        let mut state = lock(&self.state);
        state.imports += 1;
        state.snapshot = snapshot.to_string();
        Box::pin(async { Ok(()) })
    }

    fn mutation_count(&self) -> u64 {
        lock(&self.state).mutations
    }
}

#[derive(Debug)]
struct SnapshotFileState {
    permitted: bool,
    resolves: bool,
    fail_writes: bool,
    reresolves: usize,
    writes: Vec<String>,
}

/// Local backup file recording every write.
#[derive(Debug)]
pub struct MemorySnapshotFile {
    state: Mutex<SnapshotFileState>,
}

impl Default for MemorySnapshotFile {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySnapshotFile {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SnapshotFileState {
                permitted: true,
                resolves: true,
                fail_writes: false,
                reresolves: 0,
                writes: Vec::new(),
            }),
        }
    }

    /// Drops write permission. `resolves` decides whether resolving the
    /// file again restores it.
    pub fn revoke_permission(&self, resolves: bool) {
        let mut state = lock(&self.state);
        state.permitted = false;
        state.resolves = resolves;
    }

    pub fn fail_writes(&self) {
        lock(&self.state).fail_writes = true;
    }

    pub fn writes(&self) -> Vec<String> {
        lock(&self.state).writes.clone()
    }

    pub fn reresolve_count(&self) -> usize {
        lock(&self.state).reresolves
    }
}

impl LocalSnapshotFile for MemorySnapshotFile {
    fn has_permission(&self) -> BoxFuture<'_, bool> {
        let permitted = lock(&self.state).permitted;
        Box::pin(async move { permitted })
    }

    fn reresolve(&self) -> BoxFuture<'_, bool> {
        let mut state = lock(&self.state);
        state.reresolves += 1;
        if state.resolves {
            state.permitted = true;
        }
        let resolved = state.resolves;
        Box::pin(async move { resolved })
    }

    fn write<'a>(&'a self, snapshot: &'a str) -> BoxFuture<'a, Result<(), LocalStoreError>> {
        let mut state = lock(&self.state);
        let result = if state.fail_writes {
            Err(LocalStoreError::new("disk full"))
        } else {
            state.writes.push(snapshot.to_string());
            Ok(())
        };
        Box::pin(async move { result })
    }
}

/// Notifier remembering every message.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(NotifyKind, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(NotifyKind, String)> {
        lock(&self.messages).clone()
    }

    pub fn kinds(&self) -> Vec<NotifyKind> {
        lock(&self.messages).iter().map(|(kind, _)| *kind).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: NotifyKind, message: &str) {
        lock(&self.messages).push((kind, message.to_string()));
    }
}
