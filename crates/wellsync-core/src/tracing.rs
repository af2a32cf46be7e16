//! Log subscriber setup for the wellsync binaries.
//!
//! The CLI prints compact lines without timestamps and stays at `warn`
//! unless asked for more. A host process that embeds the sync core usually
//! wants JSON. `RUST_LOG` always wins over the configured level.

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Crates whose events pass the default filter.
const OWN_TARGETS: [&str; 4] = [
    "wellsync_core",
    "wellsync_providers",
    "wellsync_cloud",
    "wellsync",
];

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("a global tracing subscriber is already installed: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("invalid log filter: {0}")]
    EnvFilter(#[from] tracing_subscriber::filter::ParseError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingOutputFormat {
    /// Multi-line, for reading by eye.
    #[default]
    Pretty,
    Compact,
    /// One JSON object per event.
    Json,
}

/// How [`init_tracing`] builds the subscriber.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level for our own crates when no filter is given.
    pub level: Level,
    pub format: TracingOutputFormat,
    /// Source file and line on each event.
    pub location: bool,
    /// Module path on each event.
    pub target: bool,
    pub timestamps: bool,
    /// Also log span creation and close.
    pub span_events: bool,
    /// Explicit filter directive; replaces both `RUST_LOG` and `level`.
    pub filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: TracingOutputFormat::default(),
            location: false,
            target: true,
            timestamps: true,
            span_events: false,
            filter: None,
        }
    }
}

impl TracingConfig {
    /// Preset for the `wellsync` command. `verbose` switches to debug with
    /// source locations.
    #[must_use]
    pub fn cli(verbose: bool) -> Self {
        Self {
            level: if verbose { Level::DEBUG } else { Level::WARN },
            format: TracingOutputFormat::Compact,
            location: verbose,
            target: verbose,
            timestamps: false,
            ..Self::default()
        }
    }

    /// Preset for a host application running the sync core for hours.
    #[must_use]
    pub fn embedded() -> Self {
        Self {
            format: TracingOutputFormat::Json,
            location: true,
            span_events: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_level(self, level: Level) -> Self {
        Self { level, ..self }
    }

    #[must_use]
    pub fn with_format(self, format: TracingOutputFormat) -> Self {
        Self { format, ..self }
    }

    #[must_use]
    pub fn with_env_filter(self, filter: impl Into<String>) -> Self {
        Self {
            filter: Some(filter.into()),
            ..self
        }
    }

    fn env_filter(&self) -> Result<EnvFilter, TracingError> {
        if let Some(directive) = &self.filter {
            return Ok(EnvFilter::try_new(directive)?);
        }
        Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(self.level))))
    }

    fn output_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let spans = if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = fmt::layer()
            .with_file(self.location)
            .with_line_number(self.location)
            .with_target(self.target)
            .with_span_events(spans);

        match (self.format, self.timestamps) {
            (TracingOutputFormat::Json, _) => layer.json().boxed(),
            (TracingOutputFormat::Pretty, _) => layer.pretty().boxed(),
            (TracingOutputFormat::Compact, true) => layer.compact().boxed(),
            (TracingOutputFormat::Compact, false) => layer.compact().without_time().boxed(),
        }
    }
}

/// `wellsync_core=<level>,...` for every crate in [`OWN_TARGETS`].
fn default_directive(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    OWN_TARGETS
        .map(|target| format!("{target}={level}"))
        .join(",")
}

/// Installs the global subscriber. Call once, early in `main`.
///
/// # Errors
///
/// Fails when a subscriber is already installed or the filter directive
/// does not parse.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let filter = config.env_filter()?;
    let subscriber = tracing_subscriber::registry().with(config.output_layer().with_filter(filter));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_preset_is_quiet_by_default() {
        let quiet = TracingConfig::cli(false);
        assert_eq!(quiet.level, Level::WARN);
        assert_eq!(quiet.format, TracingOutputFormat::Compact);
        assert!(!quiet.timestamps);
        assert!(!quiet.location);

        let verbose = TracingConfig::cli(true);
        assert_eq!(verbose.level, Level::DEBUG);
        assert!(verbose.location && verbose.target);
    }

    #[test]
    fn embedded_preset_logs_json_with_spans() {
        let config = TracingConfig::embedded();
        assert_eq!(config.format, TracingOutputFormat::Json);
        assert_eq!(config.level, Level::INFO);
        assert!(config.span_events);
        assert!(config.timestamps);
    }

    #[test]
    fn default_directive_lists_our_crates() {
        let directive = default_directive(Level::DEBUG);
        assert_eq!(
            directive,
            "wellsync_core=debug,wellsync_providers=debug,wellsync_cloud=debug,wellsync=debug"
        );
        assert!(EnvFilter::try_new(&directive).is_ok());
    }

    #[test]
    fn explicit_filter_must_parse() {
        let config = TracingConfig::default().with_env_filter("wellsync_cloud=loud");
        assert!(matches!(config.env_filter(), Err(TracingError::EnvFilter(_))));

        let config = TracingConfig::default()
            .with_level(Level::WARN)
            .with_format(TracingOutputFormat::Pretty)
            .with_env_filter("wellsync_cloud=trace");
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.filter.as_deref(), Some("wellsync_cloud=trace"));
        assert!(config.env_filter().is_ok());
    }
}
