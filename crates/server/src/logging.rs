//! Server log setup: one file under the data dir, JSON unless asked for
//! pretty output.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,tower_http=warn,hyper=warn";
const LOG_FILE: &str = "server.log";

pub const LOG_FILTER_ENV: &str = "PARLEY_SERVER_LOG_FILTER";
pub const LOG_FORMAT_ENV: &str = "PARLEY_SERVER_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// Anything other than `pretty` (any case) means JSON.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Filter directives in priority order: `PARLEY_SERVER_LOG_FILTER`,
/// `RUST_LOG`, then the built-in default. Invalid directives fall through.
fn filter_from(primary: Option<String>, rust_log: Option<String>) -> (EnvFilter, String) {
    [primary, rust_log]
        .into_iter()
        .flatten()
        .find_map(|directives| EnvFilter::try_new(&directives).ok().map(|f| (f, directives)))
        .unwrap_or_else(|| (EnvFilter::new(DEFAULT_FILTER), DEFAULT_FILTER.to_string()))
}

/// Keeps the background log writer alive; drop it last.
pub struct LoggingHandle {
    pub log_path: PathBuf,
    pub guard: WorkerGuard,
}

pub fn init_logging(log_dir: &Path) -> anyhow::Result<LoggingHandle> {
    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(LOG_FILE);

    let (filter, directives) = filter_from(
        std::env::var(LOG_FILTER_ENV).ok(),
        std::env::var("RUST_LOG").ok(),
    );
    let format = LogFormat::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref());
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, LOG_FILE));

    let base = fmt::layer()
        .with_writer(writer)
        .with_file(true)
        .with_line_number(true)
        .with_target(true);
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(base.with_ansi(false).pretty()).init(),
        LogFormat::Json => registry
            .with(base.json().flatten_event(true).with_current_span(true))
            .init(),
    }

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        pid = std::process::id(),
        log_path = %log_path.display(),
        format = ?format,
        filter = %directives,
    );

    Ok(LoggingHandle { log_path, guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_defaults_to_json() {
        assert_eq!(LogFormat::parse(None), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("text")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some(" Pretty ")), LogFormat::Pretty);
    }

    #[test]
    fn filter_falls_through_invalid_directives() {
        let (_, used) = filter_from(Some("=[bad".into()), Some("debug".into()));
        assert_eq!(used, "debug");
        let (_, used) = filter_from(None, None);
        assert_eq!(used, DEFAULT_FILTER);
    }
}
