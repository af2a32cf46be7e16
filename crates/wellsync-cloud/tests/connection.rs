//! End-to-end behaviour of the cloud connection against in-memory fakes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};
use wellsync_cloud::testing::{
    FakeCalendar, FakeIdentity, FakeStorage, MemoryStore, RecordingNotifier,
};
use wellsync_cloud::{
    CALENDAR_SCOPE, CloudConfig, CloudConnection, CloudError, MutationEvent, NotifyKind,
    ProviderKind, STORAGE_SCOPE, ServiceScope, StateStore, SyncMode,
};
use wellsync_core::EventTime;
use wellsync_providers::{CalendarInfo, ProviderError, RawEvent};

const FILE: &str = "backup.json";

struct Harness {
    identity: Arc<FakeIdentity>,
    calendar: Arc<FakeCalendar>,
    drive: Arc<FakeStorage>,
    webdav: Arc<FakeStorage>,
    local: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
    connection: CloudConnection,
}

fn config() -> CloudConfig {
    CloudConfig::new("unused/connection.json")
        .with_snapshot_file_name(FILE)
        .with_utc_offset(FixedOffset::east_opt(0).unwrap())
}

fn harness_with(drive: FakeStorage) -> Harness {
    let identity = Arc::new(FakeIdentity::new());
    let calendar = Arc::new(FakeCalendar::new());
    let drive = Arc::new(drive);
    let webdav = Arc::new(FakeStorage::with_own_credentials());
    let local = Arc::new(MemoryStore::new(r#"{"entries":["local"]}"#));
    let notifier = Arc::new(RecordingNotifier::new());

    let connection = CloudConnection::builder(config(), local.clone())
        .with_store(Arc::new(StateStore::in_memory(FILE)))
        .with_identity(identity.clone())
        .with_calendar(calendar.clone())
        .with_drive(drive.clone())
        .with_webdav(webdav.clone())
        .with_notifier(notifier.clone())
        .build()
        .unwrap();

    Harness {
        identity,
        calendar,
        drive,
        webdav,
        local,
        notifier,
        connection,
    }
}

fn harness() -> Harness {
    harness_with(FakeStorage::session_backed())
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn connecting_calendar_without_session_binds_primary_calendar() {
    let h = harness();
    h.calendar.set_calendars(vec![
        CalendarInfo::new("work", "Work"),
        CalendarInfo::new("me@example.com", "Me").with_primary(true),
    ]);

    h.connection.connect(ServiceScope::Calendar).await.unwrap();

    assert!(h.connection.is_connected());
    assert!(h.connection.has_calendar_access());
    assert!(!h.connection.has_drive_access());
    assert_eq!(h.identity.last_authorize_scopes(), vec![CALENDAR_SCOPE.to_string()]);
    let binding = h.connection.store().calendar().unwrap();
    assert_eq!(binding.calendar_id, "me@example.com");
    assert_eq!(h.notifier.kinds(), vec![NotifyKind::Success]);
}

#[tokio::test]
async fn first_calendar_is_bound_without_primary() {
    let h = harness();
    h.calendar.set_calendars(vec![
        CalendarInfo::new("a", "First"),
        CalendarInfo::new("b", "Second"),
    ]);

    h.connection.connect(ServiceScope::Both).await.unwrap();

    assert_eq!(h.connection.store().calendar().unwrap().calendar_id, "a");
}

#[tokio::test]
async fn connecting_storage_later_keeps_calendar_scope() {
    let h = harness();
    h.connection.connect(ServiceScope::Calendar).await.unwrap();
    h.connection.connect(ServiceScope::Storage).await.unwrap();

    let requested = h.identity.last_authorize_scopes();
    assert!(requested.contains(&CALENDAR_SCOPE.to_string()));
    assert!(requested.contains(&STORAGE_SCOPE.to_string()));
    assert!(h.connection.has_calendar_access());
    assert!(h.connection.has_drive_access());
    assert_eq!(h.identity.authorize_count(), 2);
}

#[tokio::test]
async fn reconnecting_a_granted_service_needs_no_consent() {
    let h = harness();
    h.connection.connect(ServiceScope::Calendar).await.unwrap();
    h.connection.connect(ServiceScope::Calendar).await.unwrap();

    assert_eq!(h.identity.authorize_count(), 1);
}

#[tokio::test]
async fn dismissed_consent_is_silent() {
    let h = harness();
    h.identity.cancel_next_consent();

    let err = h.connection.connect(ServiceScope::Calendar).await.unwrap_err();

    assert_eq!(err, CloudError::AuthCancelled);
    assert!(!h.connection.is_connected());
    assert!(h.notifier.messages().is_empty());
}

#[tokio::test]
async fn missing_oauth_client_is_not_configured() {
    let notifier = Arc::new(RecordingNotifier::new());
    let connection = CloudConnection::builder(config(), Arc::new(MemoryStore::new("{}")))
        .with_store(Arc::new(StateStore::in_memory(FILE)))
        .with_notifier(notifier.clone())
        .build()
        .unwrap();

    assert!(!connection.is_configured());
    let err = connection.connect(ServiceScope::Storage).await.unwrap_err();
    assert!(matches!(err, CloudError::NotConfigured { .. }));

    let result = connection.sync_push(ProviderKind::GoogleDrive).await;
    assert!(!result.success);
    assert!(notifier.messages().is_empty());
}

#[tokio::test]
async fn multi_day_event_yields_one_projection_per_day() {
    let h = harness();
    h.calendar.add_event(
        RawEvent::new(
            "retreat",
            EventTime::from_date(date(2025, 3, 10)),
            EventTime::from_date(date(2025, 3, 14)),
            "primary",
        )
        .with_summary("Retreat"),
    );
    h.connection.connect(ServiceScope::Calendar).await.unwrap();

    let window = h
        .connection
        .fetch_calendar_window(date(2025, 3, 1), date(2025, 3, 31))
        .await
        .unwrap();

    assert!(!window.session_expired);
    let labels: Vec<_> = window
        .projections
        .iter()
        .filter_map(|p| p.day_label())
        .collect();
    assert_eq!(labels, vec!["Day 1 of 4", "Day 2 of 4", "Day 3 of 4", "Day 4 of 4"]);
    let ids: HashSet<_> = window.projections.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids.len(), 4);
    assert!(window.projections.iter().all(|p| p.source_event_id == "retreat"));
}

#[tokio::test]
async fn rejected_calendar_token_flags_expired_window() {
    let h = harness();
    h.connection.connect(ServiceScope::Calendar).await.unwrap();
    let token = h.connection.session().access_token().unwrap();
    h.identity.revoke(&token);
    h.identity.refuse_refresh();
    h.calendar.fail_next(ProviderError::authentication("401"));

    let window = h
        .connection
        .fetch_calendar_window(date(2025, 3, 1), date(2025, 3, 2))
        .await
        .unwrap();

    assert!(window.session_expired);
    assert!(window.projections.is_empty());
    assert!(h.connection.status().session_expired);
    assert_eq!(
        h.notifier.kinds(),
        vec![NotifyKind::Success, NotifyKind::SessionExpired]
    );
}

#[tokio::test]
async fn newer_remote_snapshot_is_pulled() {
    let h = harness();
    let modified = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    h.drive.seed_file(FILE, r#"{"entries":["remote"]}"#, modified);
    h.connection.connect(ServiceScope::Storage).await.unwrap();
    h.connection
        .store()
        .update(|s| {
            s.storage.google_drive.last_sync_at =
                Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        })
        .unwrap();

    assert!(
        h.connection
            .check_remote_newer(ProviderKind::GoogleDrive)
            .await
            .unwrap()
    );
    let result = h.connection.sync_pull(ProviderKind::GoogleDrive).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(h.local.snapshot(), r#"{"entries":["remote"]}"#);
    let last = h
        .connection
        .store()
        .storage(ProviderKind::GoogleDrive)
        .last_sync_at
        .unwrap();
    assert!(last > modified);
}

#[tokio::test]
async fn own_push_is_never_newer() {
    let h = harness();
    h.connection.connect(ServiceScope::Storage).await.unwrap();

    assert!(h.connection.check_remote_newer(ProviderKind::Webdav).await.unwrap());
    assert!(h.connection.sync_push(ProviderKind::Webdav).await.success);
    assert!(!h.connection.check_remote_newer(ProviderKind::Webdav).await.unwrap());

    assert!(h.connection.sync_push(ProviderKind::GoogleDrive).await.success);
    assert!(
        !h.connection
            .check_remote_newer(ProviderKind::GoogleDrive)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn rejected_push_refreshes_exactly_once() {
    let h = harness();
    h.connection.connect(ServiceScope::Storage).await.unwrap();
    h.drive.fail_next(ProviderError::authentication("401"));

    let result = h.connection.sync_push(ProviderKind::GoogleDrive).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(h.identity.refresh_count(), 1);
    assert_eq!(h.drive.create_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn expired_session_during_push_stops_token_timer() {
    let h = harness();
    h.connection.connect(ServiceScope::Storage).await.unwrap();
    assert!(h.connection.is_token_timer_running());
    h.identity.refuse_refresh();
    h.drive.fail_next(ProviderError::authentication("401"));

    let result = h.connection.sync_push(ProviderKind::GoogleDrive).await;

    assert_eq!(result.error_kind, Some(wellsync_cloud::ErrorKind::SessionExpired));
    assert!(h.connection.status().session_expired);
    assert!(!h.connection.is_token_timer_running());

    let introspections = h.identity.introspect_count();
    let refreshes = h.identity.refresh_count();
    tokio::time::sleep(Duration::from_secs(45 * 60)).await;
    assert_eq!(h.identity.introspect_count(), introspections);
    assert_eq!(h.identity.refresh_count(), refreshes);
    let expired_notices = h
        .notifier
        .kinds()
        .into_iter()
        .filter(|k| *k == NotifyKind::SessionExpired)
        .count();
    assert_eq!(expired_notices, 1);
}

#[tokio::test(start_paused = true)]
async fn expired_session_while_listing_calendars_stops_token_timer() {
    let h = harness();
    h.connection.connect(ServiceScope::Calendar).await.unwrap();
    h.calendar.fail_next(ProviderError::authentication("401"));

    let err = h.connection.list_calendars().await.unwrap_err();

    assert!(matches!(err, CloudError::SessionExpired));
    assert!(!h.connection.is_token_timer_running());
}

#[tokio::test]
async fn network_failure_is_reported() {
    let h = harness();
    h.connection.connect(ServiceScope::Storage).await.unwrap();
    h.drive.fail_next(ProviderError::network("connection reset"));

    let result = h.connection.sync_push(ProviderKind::GoogleDrive).await;

    assert!(!result.success);
    assert_eq!(
        h.notifier.kinds(),
        vec![NotifyKind::Success, NotifyKind::Error]
    );
}

#[tokio::test(start_paused = true)]
async fn burst_of_mutations_is_saved_once() {
    let h = harness();
    h.connection
        .set_sync_mode(ProviderKind::Webdav, SyncMode::Auto)
        .unwrap();

    for i in 0..5 {
        h.local.mutate(&format!(r#"{{"entries":[{}]}}"#, i));
        h.connection
            .on_auto_save_trigger(MutationEvent::new(format!("entry-{}", i)));
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(h.local.export_count(), 1);
    assert_eq!(h.webdav.create_count(), 1);
    assert_eq!(h.drive.create_count(), 0);
}

#[tokio::test]
async fn dispose_saves_pending_mutation() {
    let h = harness();
    h.connection
        .set_sync_mode(ProviderKind::Webdav, SyncMode::Auto)
        .unwrap();
    h.local.mutate("{}");
    h.connection.on_auto_save_trigger(MutationEvent::new("entry"));

    h.connection.dispose().await;

    assert_eq!(h.webdav.create_count(), 1);
}

#[tokio::test]
async fn initialize_pulls_when_startup_sync_finds_newer_data() {
    let h = harness();
    h.connection.connect(ServiceScope::Storage).await.unwrap();
    h.connection
        .set_sync_on_startup(ProviderKind::GoogleDrive, true)
        .unwrap();
    h.drive.seed_file(FILE, r#"{"entries":["other device"]}"#, Utc::now());

    let results = h.connection.initialize().await;

    assert_eq!(results.len(), 1);
    let (kind, result) = &results[0];
    assert_eq!(*kind, ProviderKind::GoogleDrive);
    assert!(result.success);
    assert_eq!(h.local.snapshot(), r#"{"entries":["other device"]}"#);

    // Nothing changed remotely since: no second pull.
    assert!(h.connection.initialize().await.is_empty());
    assert_eq!(h.local.import_count(), 1);
}

#[tokio::test]
async fn initialize_installs_persisted_token() {
    let store = Arc::new(StateStore::in_memory(FILE));
    store
        .update(|s| {
            s.auth.access_token = Some("persisted".to_string());
            s.auth.granted_scopes.insert(CALENDAR_SCOPE.to_string());
        })
        .unwrap();
    let calendar = Arc::new(FakeCalendar::new());
    let connection = CloudConnection::builder(config(), Arc::new(MemoryStore::new("{}")))
        .with_store(store)
        .with_identity(Arc::new(FakeIdentity::new()))
        .with_calendar(calendar.clone())
        .with_notifier(Arc::new(RecordingNotifier::new()))
        .build()
        .unwrap();

    assert!(connection.initialize().await.is_empty());
    assert_eq!(calendar.token().as_deref(), Some("persisted"));
    assert!(connection.is_connected());
}

#[tokio::test]
async fn disconnect_keeps_preferences_but_forgets_session() {
    let h = harness();
    h.connection.connect(ServiceScope::Both).await.unwrap();
    assert!(h.connection.sync_push(ProviderKind::GoogleDrive).await.success);
    h.connection
        .set_sync_mode(ProviderKind::GoogleDrive, SyncMode::Auto)
        .unwrap();

    h.connection.disconnect().unwrap();

    assert!(!h.connection.is_connected());
    assert!(h.calendar.token().is_none());
    let store = h.connection.store();
    assert!(store.calendar().is_none());
    let binding = store.storage(ProviderKind::GoogleDrive);
    assert_eq!(binding.remote_file_id, None);
    assert_eq!(binding.last_sync_at, None);
    assert_eq!(binding.sync_mode, SyncMode::Auto);
}

#[tokio::test]
async fn select_calendar_rebinds() {
    let h = harness();
    h.calendar.set_calendars(vec![
        CalendarInfo::new("primary", "Me").with_primary(true),
        CalendarInfo::new("family", "Family"),
    ]);
    h.connection.connect(ServiceScope::Calendar).await.unwrap();

    let binding = h.connection.select_calendar("family").await.unwrap();
    assert_eq!(binding.calendar_name, "Family");
    assert_eq!(h.connection.store().calendar(), Some(binding));

    let err = h.connection.select_calendar("nope").await.unwrap_err();
    assert!(matches!(err, CloudError::NotConfigured { .. }));
}

#[tokio::test]
async fn status_is_serializable() {
    let h = harness();
    h.connection.connect(ServiceScope::Calendar).await.unwrap();

    let status = serde_json::to_value(h.connection.status()).unwrap();

    assert_eq!(status["connected"], true);
    assert_eq!(status["configured"], true);
    assert_eq!(status["calendar"]["calendar_id"], "primary");
    assert_eq!(status["providers"][0]["provider"], "google_drive");
    assert_eq!(status["providers"][1]["available"], true);
}

#[tokio::test]
async fn visibility_check_revalidates_stale_token() {
    let identity = Arc::new(FakeIdentity::new());
    let connection = CloudConnection::builder(
        config().with_freshness(Duration::from_secs(300), Duration::ZERO),
        Arc::new(MemoryStore::new("{}")),
    )
    .with_store(Arc::new(StateStore::in_memory(FILE)))
    .with_identity(identity.clone())
    .with_notifier(Arc::new(RecordingNotifier::new()))
    .build()
    .unwrap();
    connection.connect(ServiceScope::Storage).await.unwrap();

    assert!(!connection.on_visibility_change(false).await);
    assert!(connection.on_visibility_change(true).await);
    assert_eq!(identity.introspect_count(), 1);
}
