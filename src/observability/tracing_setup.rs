/// Logging setup for the s3lite binary
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// How log lines are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines for a terminal
    Pretty,
    /// One JSON object per line, with the active span stack
    Json,
}

impl LogFormat {
    /// Anything other than "json" (any case) renders pretty lines.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Filter used when `RUST_LOG` is unset: the crate at `level`, dependencies
/// kept quiet.
fn default_filter(level: &str) -> String {
    format!("s3lite={},tower=warn,axum=info,hyper=warn", level)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(default_filter(&level))
    })
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `LOG_LEVEL` (default "info")
/// sets the level for this crate.
///
/// ```no_run
/// use s3lite::observability::tracing_setup::{init_tracing, LogFormat};
///
/// init_tracing(LogFormat::Json);
/// ```
pub fn init_tracing(format: LogFormat) {
    let fmt_layer = match format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter())
        .init();

    tracing::debug!(?format, "logging initialized");
}

/// Install the global subscriber, reading the format from `LOG_FORMAT`.
pub fn init_tracing_from_env() {
    let setting = std::env::var("LOG_FORMAT").ok();
    init_tracing(LogFormat::from_setting(setting.as_deref()));
}
