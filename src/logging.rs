use crate::config::LogLevel;
use tracing::metadata::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber.
///
/// `level` is the default taken from the config file; the `RUST_LOG`
/// environment variable still overrides it.
pub fn init(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level_filter(level).into())
                .from_env_lossy(),
        )
        .init();
}

fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Error => LevelFilter::ERROR,
    }
}
