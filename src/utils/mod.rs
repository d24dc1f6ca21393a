//! Utility functions and helpers

use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

pub mod net;

/// Initialize logging based on configuration
pub fn init_logging(level: &str, format: &str) {
    let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
    }
}

/// Get current timestamp in seconds
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}

/// Format hashrate for display
pub fn format_hashrate(hashrate: f64) -> String {
    if hashrate >= 1e12 {
        format!("{:.2} TH/s", hashrate / 1e12)
    } else if hashrate >= 1e9 {
        format!("{:.2} GH/s", hashrate / 1e9)
    } else if hashrate >= 1e6 {
        format!("{:.2} MH/s", hashrate / 1e6)
    } else if hashrate >= 1e3 {
        format!("{:.2} KH/s", hashrate / 1e3)
    } else {
        format!("{:.0} H/s", hashrate)
    }
}

/// Format a share difficulty compactly for logs
pub fn format_difficulty(diff: f64) -> String {
    if diff >= 1e12 {
        format!("{:.2}T", diff / 1e12)
    } else if diff >= 1e9 {
        format!("{:.2}G", diff / 1e9)
    } else if diff >= 1e6 {
        format!("{:.2}M", diff / 1e6)
    } else if diff >= 1e3 {
        format!("{:.2}k", diff / 1e3)
    } else {
        format!("{:.3}", diff)
    }
}
