//! Provider-agnostic raw event data.
//!
//! Calendar sources convert their API payloads into [`RawEvent`] before the
//! projector turns them into per-day views.

use serde::{Deserialize, Serialize};
use wellsync_core::EventTime;

/// An event as returned by a calendar source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Provider event id. Recurring instances carry their instance id.
    pub id: String,

    /// Calendar the event belongs to.
    pub calendar_id: String,

    pub summary: Option<String>,

    pub start: EventTime,

    /// End of the event. For all-day events this date is exclusive.
    pub end: EventTime,

    /// Event status (e.g. "confirmed", "tentative", "cancelled").
    pub status: Option<String>,

    /// Link to the event in the provider's web UI.
    pub html_link: Option<String>,
}

impl RawEvent {
    /// Creates a new raw event with the minimum required fields.
    pub fn new(
        id: impl Into<String>,
        start: EventTime,
        end: EventTime,
        calendar_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            calendar_id: calendar_id.into(),
            summary: None,
            start,
            end,
            status: None,
            html_link: None,
        }
    }

    /// Returns the effective title, falling back to "(No title)" if empty.
    pub fn effective_title(&self) -> &str {
        self.summary
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("(No title)")
    }

    /// Returns true if the event is cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.eq_ignore_ascii_case("cancelled"))
    }

    /// Returns true if this is an all-day event.
    pub fn is_all_day(&self) -> bool {
        self.start.is_all_day()
    }

    /// Builder method to set the summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Builder method to set the status.
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Builder method to set the HTML link.
    pub fn with_html_link(mut self, html_link: impl Into<String>) -> Self {
        self.html_link = Some(html_link.into());
        self
    }
}
