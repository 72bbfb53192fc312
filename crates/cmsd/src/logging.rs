use cms_core::config::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// `RUST_LOG` when set and valid, otherwise the configured level.
pub fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Installs the global subscriber. Returns false when one was already set,
/// which leaves the existing subscriber in place.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let registry = tracing_subscriber::registry().with(build_env_filter(config));
    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    installed.is_ok()
}
