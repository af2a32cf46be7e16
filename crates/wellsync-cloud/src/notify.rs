//! User notifications.
//!
//! The sync core reports outcomes through the [`Notifier`] trait. Two
//! implementations ship here:
//! - [`LogNotifier`] writes to the tracing log only
//! - [`DesktopNotifier`] shows desktop notifications, suppressing repeats
//!   of the same message within a short window

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify_rust::Notification;
#[cfg(target_os = "linux")]
use notify_rust::Urgency;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::error::{CloudError, ErrorKind};

/// What a notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKind {
    Info,
    Success,
    Error,
    /// The session needs a reconnect.
    SessionExpired,
}

impl NotifyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Error => "error",
            Self::SessionExpired => "session_expired",
        }
    }
}

/// Receives user-facing messages from the sync core.
pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NotifyKind, message: &str);
}

/// Notifies about `err` if its kind is user visible.
pub(crate) fn report(notifier: &dyn Notifier, err: &CloudError) {
    report_failure(notifier, err.kind(), &err.to_string());
}

/// Notifies about a failure of `kind` if that kind is user visible.
pub(crate) fn report_failure(notifier: &dyn Notifier, kind: ErrorKind, message: &str) {
    if !kind.is_user_visible() {
        debug!(kind = kind.as_str(), "not notifying: {}", message);
        return;
    }
    let notify_kind = match kind {
        ErrorKind::SessionExpired => NotifyKind::SessionExpired,
        _ => NotifyKind::Error,
    };
    notifier.notify(notify_kind, message);
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, kind: NotifyKind, message: &str) {
        match kind {
            NotifyKind::Error | NotifyKind::SessionExpired => {
                warn!(kind = kind.as_str(), "{}", message)
            }
            NotifyKind::Info | NotifyKind::Success => info!(kind = kind.as_str(), "{}", message),
        }
    }
}

/// Configuration for desktop notifications.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Application name for notifications.
    pub app_name: String,
    /// Notification timeout in seconds.
    pub timeout_secs: u32,
    /// Whether notifications are shown at all.
    pub enabled: bool,
    /// Custom notification icon path.
    pub icon_path: Option<String>,
    /// Identical messages inside this window are shown once.
    pub repeat_window: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            app_name: "wellsync".to_string(),
            timeout_secs: 10,
            enabled: true,
            icon_path: None,
            repeat_window: Duration::from_secs(60),
        }
    }
}

impl NotifyConfig {
    /// Builder: set app name.
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Builder: set timeout.
    pub fn with_timeout(mut self, secs: u32) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Builder: enable or disable.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Builder: set icon path.
    pub fn with_icon_path(mut self, path: impl Into<String>) -> Self {
        self.icon_path = Some(path.into());
        self
    }
}

/// Tracks recently shown notifications.
#[derive(Debug, Default)]
pub struct NotifyState {
    /// SHA-256 hash of kind and message, with the time it was shown.
    recent: HashMap<String, DateTime<Utc>>,
}

impl NotifyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `hash` was shown within `window` of `now`.
    pub fn shown_within(&self, hash: &str, window: Duration, now: DateTime<Utc>) -> bool {
        let Ok(window) = chrono::Duration::from_std(window) else {
            return false;
        };
        self.recent
            .get(hash)
            .is_some_and(|shown| now - *shown < window)
    }

    pub fn mark_shown(&mut self, hash: String, now: DateTime<Utc>) {
        self.recent.insert(hash, now);
    }

    /// Drops entries older than `window`.
    pub fn cleanup(&mut self, window: Duration, now: DateTime<Utc>) {
        let Ok(window) = chrono::Duration::from_std(window) else {
            return;
        };
        self.recent.retain(|_, shown| now - *shown < window);
    }
}

/// Hashes a notification for repeat suppression.
pub fn notification_hash(kind: NotifyKind, message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(message.as_bytes());
    hex::encode(hasher.finalize())
}

/// Shows desktop notifications through the platform notification service.
#[derive(Debug)]
pub struct DesktopNotifier {
    config: NotifyConfig,
    state: Mutex<NotifyState>,
}

impl DesktopNotifier {
    pub fn new(config: NotifyConfig) -> Self {
        Self {
            config,
            state: Mutex::new(NotifyState::new()),
        }
    }

    /// Records the notification and returns false if it is a repeat.
    fn should_show(&self, kind: NotifyKind, message: &str) -> bool {
        let hash = notification_hash(kind, message);
        let now = Utc::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.cleanup(self.config.repeat_window, now);
        if state.shown_within(&hash, self.config.repeat_window, now) {
            return false;
        }
        state.mark_shown(hash, now);
        true
    }

    fn summary(kind: NotifyKind) -> &'static str {
        match kind {
            NotifyKind::Info => "Wellness journal",
            NotifyKind::Success => "Sync complete",
            NotifyKind::Error => "Sync problem",
            NotifyKind::SessionExpired => "Reconnect required",
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, kind: NotifyKind, message: &str) {
        LogNotifier.notify(kind, message);

        if !self.config.enabled {
            return;
        }
        if !self.should_show(kind, message) {
            debug!(kind = kind.as_str(), "suppressing repeated notification");
            return;
        }

        let mut notification = Notification::new();
        notification
            .appname(&self.config.app_name)
            .summary(Self::summary(kind))
            .body(message)
            .timeout(Duration::from_secs(u64::from(self.config.timeout_secs)));

        if let Some(ref icon) = self.config.icon_path {
            notification.icon(icon);
        }

        #[cfg(target_os = "linux")]
        notification.urgency(match kind {
            NotifyKind::SessionExpired => Urgency::Critical,
            NotifyKind::Error => Urgency::Normal,
            NotifyKind::Info | NotifyKind::Success => Urgency::Low,
        });

        if let Err(e) = notification.show() {
            error!(error = %e, "failed to show notification");
        }
    }
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes
            .as_ref()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingNotifier;

    #[test]
    fn hash_depends_on_kind_and_message() {
        let a = notification_hash(NotifyKind::Error, "Upload failed");
        let b = notification_hash(NotifyKind::Error, "Upload failed");
        let c = notification_hash(NotifyKind::SessionExpired, "Upload failed");
        let d = notification_hash(NotifyKind::Error, "Download failed");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn state_suppresses_within_window() {
        let mut state = NotifyState::new();
        let now = Utc::now();
        let window = Duration::from_secs(60);

        assert!(!state.shown_within("h", window, now));
        state.mark_shown("h".to_string(), now);
        assert!(state.shown_within("h", window, now + chrono::Duration::seconds(30)));
        assert!(!state.shown_within("h", window, now + chrono::Duration::seconds(61)));

        state.cleanup(window, now + chrono::Duration::seconds(61));
        assert!(state.recent.is_empty());
    }

    #[test]
    fn desktop_notifier_dedupes_repeats() {
        let notifier = DesktopNotifier::new(NotifyConfig::default().with_enabled(false));
        assert!(notifier.should_show(NotifyKind::Error, "offline"));
        assert!(!notifier.should_show(NotifyKind::Error, "offline"));
        assert!(notifier.should_show(NotifyKind::Error, "still offline"));
    }

    #[test]
    fn report_skips_silent_kinds() {
        let notifier = RecordingNotifier::new();
        report(&notifier, &CloudError::AuthCancelled);
        report(&notifier, &CloudError::not_configured("no calendar"));
        assert!(notifier.messages().is_empty());

        report(&notifier, &CloudError::SessionExpired);
        report(&notifier, &CloudError::network("timeout"));
        let kinds: Vec<_> = notifier.messages().into_iter().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![NotifyKind::SessionExpired, NotifyKind::Error]);
    }
}
