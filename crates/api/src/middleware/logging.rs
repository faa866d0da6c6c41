//! Logging initialization and configuration.
//!
//! Dispatch events are correlated by structured fields rather than message
//! text: lifecycle and matcher logs carry `ride_id`, `offer_id`, and
//! `driver_id`, socket logs carry `party_id`, and HTTP logs carry
//! `request_id` (see `trace_id`). Filter on those fields when chasing a
//! single ride through the chain.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Build the default filter directive for a configured level.
///
/// sqlx logs every statement at INFO; the offer chain issues several per
/// transition, so statement logging is capped at WARN unless RUST_LOG
/// explicitly asks for it.
fn default_directives(level: &str) -> String {
    format!("{level},sqlx::query=warn")
}

/// Initializes the logging subsystem based on configuration.
pub fn init_logging(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level)));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            let json_layer = fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_target(true);
            subscriber.with(json_layer).init();
        }
        _ => {
            let pretty_layer = fmt::layer()
                .pretty()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true);
            subscriber.with(pretty_layer).init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_cap_statement_logging() {
        let directives = default_directives("info");
        assert_eq!(directives, "info,sqlx::query=warn");
        // The directive string must parse as a filter.
        assert!(directives.parse::<EnvFilter>().is_ok());
    }

    #[test]
    fn test_default_directives_keep_configured_level() {
        assert!(default_directives("debug").starts_with("debug,"));
    }
}
