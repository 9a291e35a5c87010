//! # Structured Logging
//!
//! Initializes the `tracing` subscriber with a pretty or JSON formatter and
//! `RUST_LOG`-driven filtering. Output goes to stderr.
//!
//! Core events carry identifiers, certificate serials and fingerprints, and
//! internal auth failure reasons. Passphrases, key blobs, and session tokens
//! are never logged.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVES: &str = "firma_server=info,firma_core=info,tower_http=info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable output for local development.
    Pretty,
    /// JSON lines for log aggregation.
    Json,
}

impl LogFormat {
    /// Accepts "json" or "pretty" (case-insensitive). Anything else is `Pretty`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Install the global subscriber. Call once, early in `main()`.
///
/// `RUST_LOG` overrides `default_directives` when set:
///
/// ```text
/// RUST_LOG=firma_core=debug,tower_http=debug
/// ```
pub fn init_logging(default_directives: &str, format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(true),
                )
                .init();
        }
    }

    tracing::info!("logging initialized (format={:?})", format);
}
