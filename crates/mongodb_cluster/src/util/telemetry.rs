use tracing_subscriber::{prelude::*, EnvFilter, Registry};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Initialize tracing
pub fn init(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let collector = Registry::default().with(env_filter);
    let result = match format {
        LogFormat::Compact => collector
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
        LogFormat::Json => collector
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };

    if let Err(e) = result {
        tracing::warn!("tracing already initialized: {}", e);
    }
}
