//! Background token revalidation.
//!
//! The manager runs a periodic check on a spawned task and reacts to the
//! app becoming visible again. A failed check is terminal: the user is told
//! the session expired and the timer stays stopped until the next connect.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::notify::{Notifier, NotifyKind};
use crate::session::AuthSession;

const EXPIRED_MESSAGE: &str = "Your Google session expired. Reconnect to keep syncing.";

/// Token lifecycle configuration.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Interval between background checks.
    pub interval: Duration,
    /// Visibility checks are skipped when the token was validated more
    /// recently than this.
    pub visibility_freshness: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            visibility_freshness: Duration::from_secs(5 * 60),
        }
    }
}

/// Keeps the access token fresh without user interaction.
pub struct TokenLifecycleManager {
    session: Arc<AuthSession>,
    notifier: Arc<dyn Notifier>,
    config: LifecycleConfig,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TokenLifecycleManager {
    pub fn new(
        session: Arc<AuthSession>,
        notifier: Arc<dyn Notifier>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            session,
            notifier,
            config,
            task: Mutex::new(None),
        }
    }

    /// Starts the periodic check, replacing a running one.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(&self) {
        let session = self.session.clone();
        let notifier = self.notifier.clone();
        let interval = self.config.interval;

        let handle = tokio::spawn(run_checks(session, notifier, interval));
        let previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            debug!("replacing running token check");
            previous.abort();
        }
        info!(interval_secs = interval.as_secs(), "token lifecycle started");
    }

    /// Stops the periodic check.
    pub fn stop(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            info!("token lifecycle stopped");
        }
    }

    /// Returns true while the periodic check is scheduled.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Reacts to the app becoming visible or hidden.
    ///
    /// Returns true if a check ran.
    pub async fn on_visibility_change(&self, visible: bool) -> bool {
        if !visible || !self.session.is_connected() || self.session.is_session_expired() {
            return false;
        }
        let auth_fresh = self.session_validated_within(self.config.visibility_freshness);
        if auth_fresh {
            debug!("token validated recently, skipping visibility check");
            return false;
        }

        debug!("app visible again, revalidating token");
        if self.session.revalidate().await.is_err() {
            self.stop();
            self.notifier
                .notify(NotifyKind::SessionExpired, EXPIRED_MESSAGE);
        }
        true
    }

    fn session_validated_within(&self, window: Duration) -> bool {
        self.session.last_validated_within(window, Utc::now())
    }
}

impl Drop for TokenLifecycleManager {
    fn drop(&mut self) {
        if let Some(handle) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

async fn run_checks(session: Arc<AuthSession>, notifier: Arc<dyn Notifier>, interval: Duration) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !session.is_connected() {
            debug!("no token held, stopping background checks");
            break;
        }

        debug!("background token check");
        if let Err(e) = session.revalidate().await {
            warn!("background token check failed: {}", e);
            notifier.notify(NotifyKind::SessionExpired, EXPIRED_MESSAGE);
            break;
        }
    }
}
