//! Tracing setup: compact console output plus a daily-rotated `app.log`.
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const APP_LOG_PREFIX: &str = "app.log";

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub logs_dir: PathBuf,
}

/// `RUST_LOG` wins when set; otherwise the configured level applies to this crate.
pub fn env_filter(level: &str) -> EnvFilter {
    env_filter_with(level, &[])
}

/// Like [`env_filter`], also enabling `level` for each of `targets`
/// (e.g. a helper binary's own crate name).
pub fn env_filter_with(level: &str, targets: &[&str]) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(directives(level, targets))
            .unwrap_or_else(|_| EnvFilter::new(directives("info", targets)))
    })
}

fn directives(level: &str, targets: &[&str]) -> String {
    let level = match level.trim().to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" => "error".to_string(),
        "" => "info".to_string(),
        other => other.to_string(),
    };
    std::iter::once("warn".to_string())
        .chain(
            std::iter::once("dm_outreach")
                .chain(targets.iter().copied())
                .map(|t| format!("{}={}", t, level)),
        )
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. Keep the returned guard alive for the whole
/// process so buffered file output is flushed on exit.
pub fn init(settings: &LoggingSettings) -> anyhow::Result<WorkerGuard> {
    fs::create_dir_all(&settings.logs_dir)?;
    let file_appender = tracing_appender::rolling::daily(&settings.logs_dir, APP_LOG_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter(&settings.level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .compact(),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .try_init()?;
    Ok(guard)
}

/// Application log files (`app.log*`) in `logs_dir`.
pub fn app_log_files(logs_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !logs_dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(logs_dir)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(APP_LOG_PREFIX))
        })
        .collect();
    files.sort();
    Ok(files)
}
