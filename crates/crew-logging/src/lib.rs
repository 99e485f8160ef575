//! # crew-logging
//!
//! Structured logging with `tracing`.
//!
//! One call to [`init`] installs the global subscriber: env-filter
//! (honoring `RUST_LOG`, falling back to the configured level) with
//! either human-readable or JSON-lines output. Conversation and
//! subagent tasks attach `info_span!`s so every line carries its
//! conversation/agent ids.

#![deny(unsafe_code)]

use tracing_subscriber::{fmt, EnvFilter};

use crew_settings::types::LoggingSettings;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Safe to call
/// once per process; a second call returns `Err` from the underlying
/// `try_init` and is ignored here so tests can race.
pub fn init(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.clone()));

    if settings.json {
        let _ = fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }
}
