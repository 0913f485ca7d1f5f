//! Logging bootstrap for the sandbox server.
//!
//! Pipeline events are emitted on three targets: `sandbox::request` for
//! incoming work and launches, `sandbox::result` for classified outcomes, and
//! `sandbox::error` for host-side failures and script diagnostics.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::sandbox::config::LoggingConfig;

/// Library modules clamped to `warn` unless `RUST_LOG` says otherwise.
pub const NOISY_MODULES: &[&str] = &["hyper", "hyper_util", "h2", "tower", "tower_http", "axum"];

fn filter_directives(level: &str) -> String {
    let mut directives = String::from(level);
    for module in NOISY_MODULES {
        directives.push_str(&format!(",{module}=warn"));
    }
    directives
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directives(level)))
}

/// Install the global subscriber described by `config`.
///
/// `format` is `json` for structured output; anything else is treated as
/// `pretty`. Calling this twice is harmless; the second call is ignored.
pub fn init_logging(config: &LoggingConfig) {
    let subscriber = tracing_subscriber::registry().with(build_filter(&config.level));

    if config.format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::info!(
        level = %config.level,
        format = %config.format,
        "logging initialized"
    );
}
