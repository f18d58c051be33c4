//! # Structured Logging
//!
//! Initializes the `tracing` subscriber with configurable format (JSON or
//! pretty-printed) and environment-based filtering via `RUST_LOG`.
//!
//! `--log-level` applies to Custodia's own targets only; dependencies stay
//! at `warn`. The targets worth filtering on:
//!
//! | Target                          | Emits                                   |
//! |---------------------------------|-----------------------------------------|
//! | `custodia`                      | key files, bundle writes, CLI warnings  |
//! | `custodia_protocol::backup`     | backup creation, revocation, deletion   |
//! | `custodia_protocol::guardian`   | enrollment and votes                    |
//! | `custodia_protocol::recovery`   | request lifecycle, approvals, failures  |
//! | `custodia_protocol::offline`    | bundle builds (info), verification (debug) |
//! | `custodia_protocol::msg`        | accepted and rejected transactions      |
//!
//! All log output goes to stderr; stdout carries bundles, signatures, and
//! verification results so they can be piped.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored output.
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Accepts "json" or "pretty" (case-insensitive). Anything else is
    /// `Pretty`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: &str) -> String {
    format!("warn,custodia={level},custodia_protocol={level}")
}

/// Initialize the global tracing subscriber. Call once, early in `main()`.
///
/// `RUST_LOG` overrides `default_level` when set, e.g.
///
/// ```text
/// RUST_LOG=custodia=debug,custodia_protocol=trace
/// ```
pub fn init_logging(default_level: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(default_level)));

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
                .with(fmt::layer().json().with_writer(std::io::stderr).with_target(true))
                .init();
        }
    }

    tracing::debug!(?format, "logging initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing_is_lenient() {
        assert_eq!(LogFormat::from_str_lossy("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_str_lossy("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str_lossy("yaml"), LogFormat::Pretty);
    }

    #[test]
    fn default_filter_scopes_level_to_custodia() {
        let directives = default_directives("debug");
        assert_eq!(directives, "warn,custodia=debug,custodia_protocol=debug");
        assert!(directives.parse::<EnvFilter>().is_ok());
    }
}
