//! Utilities for logging.
use tracing::subscriber;
use tracing::Level;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::SubscriberBuilder;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingMode {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Initialize a global trace subscriber.
///
/// Verbosity maps to `INFO` (0), `DEBUG` (1), and `TRACE` (2+). `RUST_LOG`
/// takes precedence when set.
pub fn init(verbosity: impl Into<Verbosity>, mode: LoggingMode) {
    let level: Level = verbosity.into().into();
    let filter = env_filter(level);

    let builder = SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_thread_names(true);

    // Ignore the error, it only happens if a global subscriber was already
    // set (tests).
    let _ = match mode {
        LoggingMode::Json => subscriber::set_global_default(builder.json().finish()),
        LoggingMode::Pretty => subscriber::set_global_default(builder.pretty().finish()),
        LoggingMode::Compact => subscriber::set_global_default(builder.compact().finish()),
    };
}

/// Initialize a subscriber suitable for tests. Output is captured by the test
/// harness.
pub fn init_test() {
    let _ = SubscriberBuilder::default()
        .with_env_filter(env_filter(Level::DEBUG))
        .with_test_writer()
        .try_init();
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},tokio_util=info",
            level.as_str().to_ascii_lowercase()
        ))
    })
}

#[derive(Debug, Clone, Copy)]
pub struct Verbosity(u8);

impl From<u8> for Verbosity {
    fn from(v: u8) -> Self {
        Verbosity(v)
    }
}

impl From<Verbosity> for Level {
    fn from(v: Verbosity) -> Self {
        match v.0 {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}
