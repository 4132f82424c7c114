//! Tracing / logging initialisation.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging settings.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is unset: "trace" | "debug" | "info" | "warn" | "error"
    pub level: String,
    /// Emit JSON structured logs (true) or human-readable text (false)
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Initialise tracing. Call once at startup.
///
/// `RUST_LOG` takes precedence over `config.level`.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
