//! Tracing subscriber setup.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingSection};

/// `RUST_LOG` wins; otherwise the configured level applies.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Later calls are ignored so tests and the
/// binary can both call this.
pub fn init(logging: &LoggingSection) {
    let filter = env_filter(&logging.level);
    let result = match logging.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_falls_back() {
        // Never panics on junk input.
        let _ = env_filter("definitely[not a filter");
        let _ = env_filter("hospital_admin=debug,tower_http=info");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let logging = LoggingSection::default();
        init(&logging);
        init(&logging);
    }
}
