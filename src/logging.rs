//! Structured logging setup (console + daily rolling file).

use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

const LOG_FILE_PREFIX: &str = "backend";

/// Install the global subscriber.
///
/// The returned guard flushes the file writer when dropped; the host keeps it
/// alive for as long as it wants file logging.
pub fn init(log_dir: &Path) -> anyhow::Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,retail_backend_adapter=debug"));

    fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    prune_old_logs(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "retail backend adapter logging initialised"
    );
    Ok(guard)
}

/// Prune old log files in `log_dir`, keeping only the most recent
/// `MAX_LOG_FILES`.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|name| name.starts_with(LOG_FILE_PREFIX))
                .unwrap_or(false);
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_keeps_newest_files_and_ignores_others() {
        let dir = tempfile::tempdir().expect("temp dir");
        for day in 0..(MAX_LOG_FILES + 3) {
            let path = dir.path().join(format!("{LOG_FILE_PREFIX}.2026-01-{:02}", day + 1));
            fs::write(&path, "line\n").expect("write log");
            let mtime = std::time::UNIX_EPOCH + std::time::Duration::from_secs(86_400 * day as u64);
            fs::File::options()
                .write(true)
                .open(&path)
                .and_then(|f| f.set_modified(mtime))
                .expect("set mtime");
        }
        fs::write(dir.path().join("notes.txt"), "keep").expect("write other file");

        prune_old_logs(dir.path());

        let mut remaining: Vec<String> = fs::read_dir(dir.path())
            .expect("read dir")
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        remaining.sort();

        assert!(remaining.contains(&"notes.txt".to_string()));
        let logs: Vec<&String> = remaining
            .iter()
            .filter(|n| n.starts_with(LOG_FILE_PREFIX))
            .collect();
        assert_eq!(logs.len(), MAX_LOG_FILES);
        // The three oldest days are gone.
        assert!(!remaining.contains(&format!("{LOG_FILE_PREFIX}.2026-01-01")));
        assert!(!remaining.contains(&format!("{LOG_FILE_PREFIX}.2026-01-03")));
        assert!(remaining.contains(&format!("{LOG_FILE_PREFIX}.2026-01-04")));
    }

    #[test]
    fn prune_on_missing_directory_is_noop() {
        let dir = tempfile::tempdir().expect("temp dir");
        prune_old_logs(&dir.path().join("does-not-exist"));
    }
}
