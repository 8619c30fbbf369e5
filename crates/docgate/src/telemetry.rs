// Logging setup
//
// Decision: Logs go to stderr; a worker's stdout carries its handshake
// Decision: RUST_LOG wins over LOG_LEVEL; a bare LOG_LEVEL scopes to docgate crates

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "docgate=info,docgate_engine=info";

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Recorded as `service` on the root span; see [`TelemetryConfig::root_span`]
    pub service_name: String,
    /// Log filter (e.g. "info", "docgate=debug")
    pub log_filter: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "docgate".to_string(),
            log_filter: None,
        }
    }
}

impl TelemetryConfig {
    /// Environment variables:
    /// - `DOCGATE_SERVICE_NAME`: Service name (default: "docgate")
    /// - `RUST_LOG`: Full filter directive
    /// - `LOG_LEVEL`: Level for docgate crates when `RUST_LOG` is unset
    pub fn from_env() -> Self {
        let log_filter = std::env::var("RUST_LOG").ok().or_else(|| {
            std::env::var("LOG_LEVEL")
                .ok()
                .map(|level| format!("docgate={0},docgate_engine={0}", level))
        });
        Self {
            service_name: std::env::var("DOCGATE_SERVICE_NAME")
                .unwrap_or_else(|_| "docgate".to_string()),
            log_filter,
        }
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Span a binary runs its main future in, so its events carry `service`.
    pub fn root_span(&self) -> tracing::Span {
        tracing::info_span!("service", service = %self.service_name)
    }

    fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TryInitError> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(config.filter());

    tracing_subscriber::registry().with(console_layer).try_init()?;
    tracing::debug!(service = %config.service_name, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "docgate");
        assert!(config.log_filter.is_none());
    }

    #[test]
    fn test_invalid_filter_falls_back() {
        let config = TelemetryConfig {
            log_filter: Some("docgate=[".to_string()),
            ..TelemetryConfig::default()
        };
        assert_eq!(config.filter().to_string(), EnvFilter::new(DEFAULT_FILTER).to_string());
    }

    #[test]
    fn test_root_span_records_service() {
        let config = TelemetryConfig::default().with_service_name("docgate-worker");
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let span = config.root_span();
            let metadata = span.metadata().unwrap();
            assert_eq!(metadata.name(), "service");
            assert!(metadata.fields().field("service").is_some());
        });
    }
}
