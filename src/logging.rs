use std::{env, io};

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    fn from_env() -> Self {
        match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => Self::Json,
            Ok("compact") => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Installs the global tracing subscriber. `RUST_LOG` wins over the default `info` level;
/// noisy dependency targets are capped regardless.
pub fn init() {
    let base = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let mut filter = EnvFilter::new(base);
    for directive in ["hyper=warn", "reqwest=warn", "sqlx=warn", "tower_http=info"] {
        if let Ok(parsed) = directive.parse() {
            filter = filter.add_directive(parsed);
        }
    }

    let registry = tracing_subscriber::registry().with(filter);
    let format = LogFormat::from_env();
    let result = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_writer(io::stdout))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(false).with_writer(io::stdout))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_writer(io::stdout))
            .try_init(),
    };
    if result.is_ok() {
        info!(
            service.version = env!("CARGO_PKG_VERSION"),
            log.format = ?format,
            "agentdesk server logging initialised"
        );
    }
}
