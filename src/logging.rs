//! Logging initialization

use crate::{NodeError, NodeResult};
use appchain_config::LoggingSettings;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `settings.filter`. Calling this again
/// after a subscriber is installed leaves the first one in place and returns
/// `Ok(false)`.
pub fn init(settings: &LoggingSettings) -> NodeResult<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.filter)
            .map_err(|e| NodeError::LoggingInit(e.to_string()))?,
    };

    let installed = if settings.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::info!(filter = %settings.filter, json = settings.json, "logging initialized");
    }
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let settings = LoggingSettings::default();
        let _ = init(&settings).unwrap();
        assert!(!init(&settings).unwrap());
    }

    #[test]
    fn test_bad_filter_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let settings = LoggingSettings {
            filter: "appchain_node=loud".to_string(),
            json: false,
        };
        assert!(matches!(init(&settings), Err(NodeError::LoggingInit(_))));
    }
}
