//! Core types: day windows, event times, calendar projections, tracing

pub mod projection;
pub mod time;
pub mod tracing;

pub use projection::{CalendarEventProjection, DaySpan};
pub use time::{DayWindow, EventTime, TimeWindow, local_offset};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
