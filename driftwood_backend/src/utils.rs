//! Shared helpers and constants.

use chrono::{DateTime, SecondsFormat, Utc};

pub const APP_NAME: &str = "driftwood_backend";

/// Formats a timestamp the way every table stores it. Fixed width, so string
/// order matches time order.
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_utc_iso() -> String {
    format_timestamp(Utc::now())
}

pub fn print_banner() {
    eprintln!("{APP_NAME} v{}", env!("CARGO_PKG_VERSION"));
}
