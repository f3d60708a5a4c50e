// Logging setup for the demo host
//
// Design Decision: Console-only fmt layer; filter comes from RUST_LOG, then
// LOG_LEVEL, then "methodpool=info,methodpool_cli=info".

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Default filter when neither RUST_LOG nor LOG_LEVEL is set
const DEFAULT_FILTER: &str = "methodpool=info,methodpool_cli=info";

pub struct TelemetryConfig {
    /// Log filter directive
    pub log_filter: Option<String>,
    /// Include event targets in console output
    pub with_target: bool,
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// - `RUST_LOG`: Full filter directive
    /// - `LOG_LEVEL`: Level applied to methodpool crates
    pub fn from_env() -> Self {
        let log_filter = std::env::var("RUST_LOG").ok().or_else(|| {
            std::env::var("LOG_LEVEL")
                .ok()
                .map(|level| format!("methodpool={level},methodpool_cli={level}"))
        });
        Self {
            log_filter,
            with_target: true,
        }
    }

    /// Configured filter when it parses, otherwise the default
    fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    }
}

pub fn init_telemetry(config: TelemetryConfig) {
    let filter = config.filter();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(config.with_target)
        .with_thread_names(true)
        .with_filter(filter);

    tracing_subscriber::registry().with(console_layer).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(log_filter: Option<&str>) -> TelemetryConfig {
        TelemetryConfig {
            log_filter: log_filter.map(str::to_string),
            with_target: true,
        }
    }

    #[test]
    fn test_default_filter_covers_both_crates() {
        let filter = config(None).filter().to_string();
        assert!(filter.contains("methodpool=info"), "filter was {filter}");
        assert!(filter.contains("methodpool_cli=info"), "filter was {filter}");
    }

    #[test]
    fn test_invalid_filter_falls_back_to_default() {
        let filter = config(Some("methodpool=loud")).filter().to_string();
        assert!(filter.contains("methodpool_cli=info"), "filter was {filter}");
    }

    #[test]
    fn test_configured_filter_is_used() {
        let filter = config(Some("methodpool=debug")).filter().to_string();
        assert!(filter.contains("methodpool=debug"), "filter was {filter}");
        assert!(!filter.contains("methodpool_cli"), "filter was {filter}");
    }
}
