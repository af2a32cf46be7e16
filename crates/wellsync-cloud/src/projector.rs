//! Calendar projection.
//!
//! Fetches provider events for a range of local days and turns them into
//! [`CalendarEventProjection`]s. A multi-day all-day event is expanded into
//! one projection per covered day.

use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use wellsync_core::{CalendarEventProjection, DaySpan, DayWindow};
use wellsync_providers::{CalendarSource, RawEvent};

use crate::error::{CloudError, CloudResult};
use crate::notify::{Notifier, NotifyKind};
use crate::session::AuthSession;
use crate::state::StateStore;

/// Result of a calendar fetch.
///
/// An empty list with `session_expired` set is different from a range with
/// no events: the caller should offer a reconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarWindow {
    pub projections: Vec<CalendarEventProjection>,
    pub session_expired: bool,
}

impl CalendarWindow {
    fn expired() -> Self {
        Self {
            projections: Vec::new(),
            session_expired: true,
        }
    }
}

/// Fetches and projects events of the bound calendar.
pub struct CalendarProjector {
    session: Arc<AuthSession>,
    source: Arc<dyn CalendarSource>,
    store: Arc<StateStore>,
    notifier: Arc<dyn Notifier>,
    offset: FixedOffset,
    freshness: Duration,
}

impl CalendarProjector {
    pub fn new(
        session: Arc<AuthSession>,
        source: Arc<dyn CalendarSource>,
        store: Arc<StateStore>,
        notifier: Arc<dyn Notifier>,
        offset: FixedOffset,
        freshness: Duration,
    ) -> Self {
        Self {
            session,
            source,
            store,
            notifier,
            offset,
            freshness,
        }
    }

    /// Returns projections for the local days `start..=end`.
    pub async fn fetch_window(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CloudResult<CalendarWindow> {
        let Some(binding) = self.store.calendar() else {
            return Err(CloudError::not_configured("no calendar selected"));
        };
        let Some(window) = DayWindow::new(start, end) else {
            debug!(%start, %end, "inverted day window, nothing to fetch");
            return Ok(CalendarWindow::default());
        };

        match self.session.ensure_valid(self.freshness).await {
            Ok(_) => {}
            Err(CloudError::SessionExpired) => return Ok(self.session_expired()),
            Err(e) => return Err(e),
        }

        let bounds = window.to_time_window(&self.offset);
        let events = match self.source.list_events(&binding.calendar_id, &bounds).await {
            Ok(events) => events,
            Err(e) if e.is_auth_failure() => {
                warn!(provider = self.source.name(), "calendar rejected token: {}", e);
                self.session.mark_session_expired();
                return Ok(self.session_expired());
            }
            Err(e) => return Err(e.into()),
        };

        let projections = project_events(&events, &window, &self.offset);
        debug!(
            provider = self.source.name(),
            events = events.len(),
            projections = projections.len(),
            "projected calendar window"
        );

        if let Err(e) = self.store.update(|state| {
            if let Some(calendar) = state.calendar.as_mut() {
                calendar.last_sync_at = Some(Utc::now());
            }
        }) {
            warn!("failed to record calendar sync time: {}", e);
        }

        Ok(CalendarWindow {
            projections,
            session_expired: false,
        })
    }

    fn session_expired(&self) -> CalendarWindow {
        self.notifier.notify(
            NotifyKind::SessionExpired,
            "Your Google session expired. Reconnect to see calendar events.",
        );
        CalendarWindow::expired()
    }
}

/// Projects raw events onto the days of `window`.
///
/// An all-day event whose exclusive end lies more than one day after its
/// start yields one projection per covered day inside the window, labelled
/// against the full length of the event. Every other event yields exactly
/// one projection on its local start day.
pub fn project_events(
    events: &[RawEvent],
    window: &DayWindow,
    offset: &FixedOffset,
) -> Vec<CalendarEventProjection> {
    let mut projections = Vec::new();

    for event in events.iter().filter(|e| !e.is_cancelled()) {
        let title = event.effective_title();
        let first_day = event.start.local_date(offset);

        if event.is_all_day() {
            let next_day = first_day.succ_opt().unwrap_or(first_day);
            let end_exclusive = event.end.local_date(offset).max(next_day);
            let total = (end_exclusive - first_day).num_days();

            if total <= 1 {
                projections.push(with_link(
                    CalendarEventProjection::all_day(&event.id, title, first_day),
                    event,
                ));
                continue;
            }

            let last_day = end_exclusive.pred_opt().unwrap_or(first_day);
            let Some((from, to)) = window.clip(first_day, last_day) else {
                continue;
            };
            for day in from.iter_days().take_while(|d| *d <= to) {
                let span = DaySpan {
                    index: (day - first_day).num_days() as u32 + 1,
                    total: total as u32,
                };
                projections.push(with_link(
                    CalendarEventProjection::all_day(&event.id, title, day).with_span(span),
                    event,
                ));
            }
            continue;
        }

        let projection = match (event.start.local_time(offset), event.end.local_time(offset)) {
            (Some(start), Some(end)) => {
                CalendarEventProjection::timed(&event.id, title, first_day, start, end)
            }
            _ => CalendarEventProjection::all_day(&event.id, title, first_day),
        };
        projections.push(with_link(projection, event));
    }

    projections.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| b.is_all_day.cmp(&a.is_all_day))
            .then_with(|| a.start_time.cmp(&b.start_time))
            .then_with(|| a.id.cmp(&b.id))
    });
    projections
}

fn with_link(projection: CalendarEventProjection, event: &RawEvent) -> CalendarEventProjection {
    match &event.html_link {
        Some(link) => projection.with_html_link(link),
        None => projection,
    }
}
