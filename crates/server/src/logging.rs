//! File and stderr logging setup, one JSON log file per run.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,tower_http=warn,hyper=warn";

pub struct LoggingHandle {
    pub run_id: String,
    pub guard: WorkerGuard,
}

pub fn init_logging(log_dir: &Path) -> anyhow::Result<LoggingHandle> {
    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join("server.log");

    let filter = std::env::var("DONEBELL_LOG_FILTER")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));

    let file_appender = tracing_appender::rolling::never(log_dir, "server.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let format = std::env::var("DONEBELL_LOG_FORMAT").unwrap_or_else(|_| "json".into());

    let registry = tracing_subscriber::registry().with(filter);
    if format.eq_ignore_ascii_case("pretty") {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_current_span(true),
            )
            .try_init()?;
    }

    let run_id = std::env::var("DONEBELL_RUN_ID").unwrap_or_else(|_| {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("pid-{}-{}", std::process::id(), now)
    });

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        log_path = %log_path.display(),
        format = %format,
        run_id = %run_id,
        filter = %std::env::var("DONEBELL_LOG_FILTER")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
    );

    Ok(LoggingHandle { run_id, guard })
}
