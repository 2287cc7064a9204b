use std::env;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{BotError, BotResult};

const DEFAULT_FILTER: &str = "mc_bot=info,serenity=warn";

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_level`; `LOG_FORMAT=json` switches to
/// one JSON object per line.
pub fn init_tracing(default_level: Option<&str>) -> BotResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        default_level.map_or_else(|| EnvFilter::new(DEFAULT_FILTER), EnvFilter::new)
    });

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = if env::var("LOG_FORMAT").unwrap_or_default() == "json" {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        subscriber.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| BotError::Configuration(format!("Failed to initialize tracing: {e}")))
}
