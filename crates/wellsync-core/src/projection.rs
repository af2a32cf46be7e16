//! Calendar event projections.
//!
//! A [`CalendarEventProjection`] is the read-only, per-day view of a
//! provider event that the journal renders next to its own entries. A
//! multi-day all-day event becomes one projection per covered day, each
//! carrying a [`DaySpan`] so the UI can label it "Day 2 of 3".

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Position of a projection inside a multi-day event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySpan {
    /// 1-based index of this day within the event.
    pub index: u32,
    /// Total number of days the event covers.
    pub total: u32,
}

impl DaySpan {
    /// Returns the human-readable label, e.g. `"Day 2 of 3"`.
    pub fn label(&self) -> String {
        format!("Day {} of {}", self.index, self.total)
    }
}

/// A calendar event projected onto a single local day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEventProjection {
    /// Unique per projection. Single-day projections reuse the provider
    /// event id; multi-day expansions use `"{source_event_id}_{date}"`.
    pub id: String,
    /// Id of the provider event this projection came from.
    pub source_event_id: String,
    /// Event title, already defaulted when the provider had none.
    pub title: String,
    /// Local day this projection is shown on.
    pub date: NaiveDate,
    /// Local start time, absent for all-day events.
    pub start_time: Option<NaiveTime>,
    /// Local end time, absent for all-day events.
    pub end_time: Option<NaiveTime>,
    pub is_all_day: bool,
    pub is_multi_day: bool,
    /// Set only for multi-day expansions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<DaySpan>,
    /// Link back to the event in the provider's web UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,
}

impl CalendarEventProjection {
    /// Creates an all-day projection for a single day.
    pub fn all_day(
        source_event_id: impl Into<String>,
        title: impl Into<String>,
        date: NaiveDate,
    ) -> Self {
        let source_event_id = source_event_id.into();
        Self {
            id: source_event_id.clone(),
            source_event_id,
            title: title.into(),
            date,
            start_time: None,
            end_time: None,
            is_all_day: true,
            is_multi_day: false,
            span: None,
            html_link: None,
        }
    }

    /// Creates a timed projection.
    pub fn timed(
        source_event_id: impl Into<String>,
        title: impl Into<String>,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Self {
        let source_event_id = source_event_id.into();
        Self {
            id: source_event_id.clone(),
            source_event_id,
            title: title.into(),
            date,
            start_time: Some(start_time),
            end_time: Some(end_time),
            is_all_day: false,
            is_multi_day: false,
            span: None,
            html_link: None,
        }
    }

    /// Marks this projection as one day of a multi-day event.
    ///
    /// The id is rewritten to stay unique across the expanded days.
    pub fn with_span(mut self, span: DaySpan) -> Self {
        self.id = format!("{}_{}", self.source_event_id, self.date);
        self.is_multi_day = true;
        self.span = Some(span);
        self
    }

    /// Builder method to set the HTML link.
    pub fn with_html_link(mut self, html_link: impl Into<String>) -> Self {
        self.html_link = Some(html_link.into());
        self
    }

    /// Returns the "Day K of N" label for multi-day projections.
    pub fn day_label(&self) -> Option<String> {
        self.span.map(|span| span.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn single_day_keeps_source_id() {
        let p = CalendarEventProjection::all_day("evt-1", "Retreat", date(2025, 3, 1));
        assert_eq!(p.id, "evt-1");
        assert!(!p.is_multi_day);
        assert_eq!(p.day_label(), None);
    }

    #[test]
    fn span_rewrites_id_and_label() {
        let p = CalendarEventProjection::all_day("evt-1", "Retreat", date(2025, 3, 2))
            .with_span(DaySpan { index: 2, total: 3 });
        assert_eq!(p.id, "evt-1_2025-03-02");
        assert_eq!(p.source_event_id, "evt-1");
        assert!(p.is_multi_day);
        assert_eq!(p.day_label().as_deref(), Some("Day 2 of 3"));
    }

    #[test]
    fn serializes_camel_case() {
        let p = CalendarEventProjection::timed(
            "evt-2",
            "Therapy",
            date(2025, 3, 1),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        );
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["sourceEventId"], "evt-2");
        assert_eq!(json["isAllDay"], false);
        assert_eq!(json["startTime"], "09:00:00");
        assert!(json.get("span").is_none());
    }
}
