use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use super::config;

/// Initialize the tracing pipeline from `LOG_LEVEL` / `LOG_FILE_PATH`.
///
/// `RUST_LOG` takes precedence over `LOG_LEVEL` when set. The returned guard
/// must stay alive for the process duration or buffered file output is lost.
pub fn init() -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config::log_level()));

    match config::log_file_path() {
        Some(path) => {
            let target = Path::new(&path);
            let dir = target.parent().filter(|p| !p.as_os_str().is_empty());
            let file_name = target
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "floodgate.log".to_string());
            let appender = tracing_appender::rolling::never(
                dir.unwrap_or_else(|| Path::new(".")),
                file_name,
            );
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_ansi(false)
                .with_writer(std::io::stdout.and(file_writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .init();
            None
        }
    }
}
