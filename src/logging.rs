//! Tracing subscriber setup for binaries and tests.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! application's choice. This helper covers the common case.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Env var consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "GENAI_LOG";

/// Resolve the filter directive: `GENAI_LOG`, then `RUST_LOG`, then `default_filter`.
pub fn filter_directive(default_filter: &str) -> String {
    std::env::var(LOG_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default_filter.to_string())
}

/// Install a global fmt subscriber. Returns `false` if one was already set,
/// which is not an error (tests and embedding hosts often install their own).
pub fn init_tracing(default_filter: &str) -> bool {
    let directive = filter_directive(default_filter);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_filter(filter),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(filter = %directive, "tracing initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        let _ = init_tracing("warn");
        assert!(!init_tracing("debug"));
    }
}
