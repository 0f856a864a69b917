use crate::config::ObservabilityConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the configured level applies to this
/// crate and dependencies are kept at warn.
pub fn init_tracing(config: &ObservabilityConfig) {
    let default_directives = format!("warn,workspace_api={}", config.log_level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let json = config.log_format.eq_ignore_ascii_case("json");
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().flatten_event(true))
            .init();
    } else {
        // Compact single-line output for development
        registry
            .with(fmt::layer().compact().with_target(false))
            .init();
    }

    tracing::info!(
        level = %config.log_level,
        json = json,
        "Tracing initialized"
    );
}
