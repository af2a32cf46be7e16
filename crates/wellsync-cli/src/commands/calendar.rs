//! Calendar day projections.

use chrono::{Local, NaiveDate};
use wellsync_cloud::CloudError;
use wellsync_core::CalendarEventProjection;

use super::Workspace;
use crate::config::DisplaySettings;
use crate::error::{ClientError, ClientResult};

/// Prints the projections for the days `from..=to`.
pub async fn events(
    workspace: &Workspace,
    display: &DisplaySettings,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    json: bool,
) -> ClientResult<()> {
    let start = from.unwrap_or_else(|| Local::now().date_naive());
    let end = to.unwrap_or(start);
    if end < start {
        return Err(ClientError::Config(format!(
            "--to {} is before --from {}",
            end, start
        )));
    }

    let window = workspace
        .connection
        .fetch_calendar_window(start, end)
        .await?;
    if window.session_expired {
        return Err(CloudError::SessionExpired.into());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&window.projections)?);
    } else {
        print!("{}", render_days(&window.projections, display));
    }
    Ok(())
}

/// Groups projections under a header per day.
fn render_days(projections: &[CalendarEventProjection], display: &DisplaySettings) -> String {
    if projections.is_empty() {
        return format!("{}\n", display.no_events_text);
    }

    let mut sorted: Vec<&CalendarEventProjection> = projections.iter().collect();
    sorted.sort_by_key(|p| (p.date, !p.is_all_day, p.start_time));

    let mut out = String::new();
    let mut current: Option<NaiveDate> = None;
    for projection in sorted {
        if current != Some(projection.date) {
            if current.is_some() {
                out.push('\n');
            }
            out.push_str(&format!("{}\n", projection.date.format("%a %Y-%m-%d")));
            current = Some(projection.date);
        }
        out.push_str(&format!(
            "  {:<12} {}\n",
            time_label(projection),
            title_label(projection, display.max_title_length)
        ));
    }
    out
}

fn time_label(projection: &CalendarEventProjection) -> String {
    match (projection.start_time, projection.end_time) {
        (Some(start), Some(end)) => format!("{}-{}", start.format("%H:%M"), end.format("%H:%M")),
        (Some(start), None) => start.format("%H:%M").to_string(),
        _ => "all day".to_string(),
    }
}

fn title_label(projection: &CalendarEventProjection, max_len: Option<usize>) -> String {
    let title = truncate(&projection.title, max_len);
    match projection.span {
        Some(span) => format!("{} ({})", title, span.label()),
        None => title,
    }
}

fn truncate(title: &str, max_len: Option<usize>) -> String {
    match max_len {
        Some(max) if title.chars().count() > max => {
            let kept: String = title.chars().take(max.saturating_sub(1)).collect();
            format!("{}…", kept)
        }
        _ => title.to_string(),
    }
}
