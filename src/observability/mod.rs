use std::sync::atomic::{AtomicU64, Ordering};

use tracing_subscriber::EnvFilter;

static DROPPED_EVENTS: AtomicU64 = AtomicU64::new(0);

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let tracing_level = match level.as_str() {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };

    let filter = EnvFilter::try_new(tracing_level).unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Count and log one stream event that could not be decoded.
pub fn record_dropped_event(reason: &dyn std::fmt::Display) {
    let total = DROPPED_EVENTS.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::debug!(dropped_total = total, "dropping undecodable stream event: {reason}");
}

/// Total undecodable stream events dropped since process start.
#[must_use]
pub fn dropped_events() -> u64 {
    DROPPED_EVENTS.load(Ordering::Relaxed)
}
