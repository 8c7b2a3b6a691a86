//! Logging and observability
//!
//! Structured logging via tracing-subscriber, either human-readable text or
//! JSON, selected at runtime by CLI flag or environment variable.
//!
//! All logging output is directed to stderr. stdout carries usage text,
//! CI-variable lines and process listings only.

use anyhow::Result;
use std::{io, sync::Once};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize the logging system with an optional format specification
///
/// Safe to call more than once; only the first call installs a subscriber.
///
/// ## Arguments
///
/// * `format` - `None` or `"text"` for text output, `"json"` for JSON
///
/// ## Environment Variables
///
/// * `BUILDCTL_LOG_FORMAT` - Format used when `format` is `None`
/// * `BUILDCTL_LOG` - Filter directives
/// * `RUST_LOG` - Fallback filter directives
///
/// ## Example
///
/// ```rust
/// use buildctl_core::logging;
///
/// logging::init(None).expect("Failed to initialize logging");
/// ```
pub fn init(format: Option<&str>) -> Result<()> {
    INIT.call_once(|| {
        let filter = create_env_filter();

        let env_format = std::env::var("BUILDCTL_LOG_FORMAT").ok();
        let effective_format = format.or(env_format.as_deref()).unwrap_or("text");
        let span_events = span_events_for_format(effective_format);

        match effective_format {
            "json" => {
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_span_events(span_events)
                            .with_writer(io::stderr),
                    )
                    .with(filter)
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .with_target(false)
                            .with_span_events(span_events)
                            .with_writer(io::stderr),
                    )
                    .with(filter)
                    .init();
            }
        }

        tracing::debug!("Logging initialized with format: {}", effective_format);
    });

    Ok(())
}

/// Create an EnvFilter based on environment variables
fn create_env_filter() -> EnvFilter {
    if let Ok(spec) = std::env::var("BUILDCTL_LOG") {
        EnvFilter::try_new(&spec).unwrap_or_else(|_| {
            eprintln!("Invalid BUILDCTL_LOG specification '{}', using 'info'", spec);
            EnvFilter::new("info")
        })
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Span lifecycle events: phase spans close with their duration in JSON mode
fn span_events_for_format(format: &str) -> fmt::format::FmtSpan {
    use fmt::format::FmtSpan;

    match format {
        "json" => FmtSpan::CLOSE,
        _ => FmtSpan::NONE,
    }
}

/// Check if logging has been initialized
pub fn is_initialized() -> bool {
    INIT.is_completed()
}
