//! Google Calendar API client.
//!
//! Lists calendars and events for a time window. The bearer token is pushed
//! in by the session through [`TokenSink`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, warn};
use wellsync_core::{EventTime, TimeWindow};

use crate::error::ProviderResult;
use crate::provider::{BoxFuture, CalendarInfo, CalendarSource, TokenSink};
use crate::raw_event::RawEvent;
use crate::token::BearerToken;

use super::api::{check_status, read_json, request_error};
use super::config::GoogleConfig;

/// Base URL for Google Calendar API v3.
const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

const PROVIDER: &str = "google-calendar";

/// Upper bound on events per page; Google caps this at 2500.
const PAGE_SIZE: usize = 250;

/// Google Calendar API client.
#[derive(Debug)]
pub struct GoogleCalendarClient {
    http_client: reqwest::Client,
    token: BearerToken,
    base_url: String,
}

impl GoogleCalendarClient {
    pub fn new(config: &GoogleConfig) -> ProviderResult<Self> {
        Ok(Self {
            http_client: config.http_client()?,
            token: BearerToken::new(),
            base_url: CALENDAR_API_BASE.to_string(),
        })
    }

    /// Overrides the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Lists events from a calendar, following pagination.
    ///
    /// Recurring events are expanded server-side (`singleEvents=true`).
    pub async fn list_events(
        &self,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> ProviderResult<Vec<RawEvent>> {
        let mut all_events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .list_events_page(calendar_id, time_min, time_max, page_token.as_deref())
                .await?;

            all_events.extend(
                page.items
                    .into_iter()
                    .filter_map(|event| convert_event(event, calendar_id)),
            );

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(
            "fetched {} events from calendar {}",
            all_events.len(),
            calendar_id
        );
        Ok(all_events)
    }

    async fn list_events_page(
        &self,
        calendar_id: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> ProviderResult<EventListResponse> {
        let url = format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id)
        );

        let mut request = self
            .http_client
            .get(&url)
            .bearer_auth(self.token.require()?)
            .query(&[
                ("timeMin", time_min.to_rfc3339()),
                ("timeMax", time_max.to_rfc3339()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
                ("maxResults", PAGE_SIZE.to_string()),
            ]);

        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| request_error(PROVIDER, e))?;
        let response = check_status(PROVIDER, response).await?;
        read_json(PROVIDER, response).await
    }

    /// Lists calendars on the user's calendar list.
    pub async fn list_calendars(&self) -> ProviderResult<Vec<CalendarInfo>> {
        let url = format!("{}/users/me/calendarList", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(self.token.require()?)
            .send()
            .await
            .map_err(|e| request_error(PROVIDER, e))?;
        let response = check_status(PROVIDER, response).await?;
        let list: CalendarListResponse = read_json(PROVIDER, response).await?;

        Ok(list
            .items
            .into_iter()
            .map(|entry| {
                let mut info = CalendarInfo::new(entry.id, entry.summary).with_primary(entry.primary);
                if let Some(tz) = entry.time_zone {
                    info = info.with_timezone(tz);
                }
                info
            })
            .collect())
    }
}

impl TokenSink for GoogleCalendarClient {
    fn install_token(&self, token: &str) {
        self.token.set(token);
    }

    fn clear_token(&self) {
        self.token.clear();
    }
}

impl CalendarSource for GoogleCalendarClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn list_events<'a>(
        &'a self,
        calendar_id: &'a str,
        window: &'a TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>> {
        Box::pin(async move {
            GoogleCalendarClient::list_events(self, calendar_id, window.start, window.end).await
        })
    }

    fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarInfo>>> {
        Box::pin(GoogleCalendarClient::list_calendars(self))
    }
}

/// Converts a Google Calendar API event to a [`RawEvent`].
///
/// Cancelled events and events with unparseable times are dropped.
fn convert_event(event: ApiEvent, calendar_id: &str) -> Option<RawEvent> {
    if event.status.as_deref() == Some("cancelled") {
        return None;
    }

    let id = event.id?;
    let start = parse_event_time(&event.start, &id, "start")?;
    let end = parse_event_time(&event.end, &id, "end")?;

    let mut raw_event = RawEvent::new(id, start, end, calendar_id);
    raw_event.summary = event.summary;
    raw_event.status = event.status;
    raw_event.html_link = event.html_link;
    Some(raw_event)
}

fn parse_event_time(time: &ApiEventTime, id: &str, which: &str) -> Option<EventTime> {
    match (&time.date_time, &time.date) {
        (Some(dt), _) => DateTime::parse_from_rfc3339(dt)
            .map(|parsed| EventTime::from_utc(parsed.with_timezone(&Utc)))
            .map_err(|e| warn!("event {}: failed to parse {} time: {}", id, which, e))
            .ok(),
        (None, Some(date)) => NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map(EventTime::from_date)
            .map_err(|e| warn!("event {}: failed to parse {} date: {}", id, which, e))
            .ok(),
        (None, None) => {
            warn!("event {} has no {} time", id, which);
            None
        }
    }
}

/// Response from the events.list endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<ApiEvent>,
    next_page_token: Option<String>,
}

/// A single event from the Google Calendar API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: Option<String>,
    summary: Option<String>,
    start: ApiEventTime,
    end: ApiEventTime,
    html_link: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    date: Option<String>,
    date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListEntry {
    id: String,
    summary: String,
    #[serde(default)]
    primary: bool,
    time_zone: Option<String>,
}
