//! # fleetpulse-logging
//!
//! Installs the global `tracing` subscriber.
//!
//! `RUST_LOG` always wins. Otherwise the filter comes from
//! [`LoggingSettings::level`], with an optional override from the CLI. Output
//! goes to stdout, either compact (development) or one JSON object per line.

#![deny(unsafe_code)]

use fleetpulse_settings::{LogFormat, LoggingSettings, ServerSettings};
use tracing_subscriber::EnvFilter;

/// Service name attached to the startup log line.
pub const SERVICE_NAME: &str = "fleetpulse-api";

/// Build the filter directive string, preferring an explicit override.
pub fn filter_directive(settings: &LoggingSettings, override_level: Option<&str>) -> String {
    override_level
        .filter(|l| !l.trim().is_empty())
        .unwrap_or(settings.level.as_str())
        .trim()
        .to_lowercase()
}

/// Resolve the [`EnvFilter`]: `RUST_LOG` if set and valid, else the directive,
/// else `info`.
pub fn build_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(
    logging: &LoggingSettings,
    server: &ServerSettings,
    override_level: Option<&str>,
) {
    let directive = filter_directive(logging, override_level);
    let filter = build_filter(&directive);
    let format = logging.effective_format(server);

    let result = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .compact()
            .try_init(),
    };

    if result.is_ok() {
        tracing::info!(
            service = SERVICE_NAME,
            version = env!("CARGO_PKG_VERSION"),
            environment = %server.environment,
            ?format,
            filter = %directive,
            "logging initialized"
        );
    }
}
