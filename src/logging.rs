use crate::config::AppConfig;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

/// Install the global tracing subscriber. JSON output by default, pretty
/// output when `log_format` is anything else.
pub fn init_subscriber(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        let subscriber = Registry::default().with(filter).with(fmt::layer().json());
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set global default subscriber");
    } else {
        let subscriber = Registry::default().with(filter).with(fmt::layer());
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set global default subscriber");
    }
}
