use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::Level;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level filter (trace, debug, info, warn, error).
    #[serde(default = "default_level")]
    pub level: String,

    /// File to log to instead of stderr. `-` means stderr.
    pub log_file: Option<PathBuf>,

    /// Prefix each line with a timestamp. Always on when logging to a file.
    #[serde(default)]
    pub show_timestamps: bool,

    /// Whether to output JSON format.
    #[serde(default)]
    pub json_format: bool,
}

fn default_level() -> String {
    "error".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_level(),
            log_file: None,
            show_timestamps: false,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// The file to write to, or `None` for stderr.
    pub fn file(&self) -> Option<&Path> {
        self.log_file
            .as_deref()
            .filter(|path| path.as_os_str() != "-" && !path.as_os_str().is_empty())
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid log file path: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("failed to open log file {}: {source}", path.display())]
    Appender {
        path: PathBuf,
        #[source]
        source: tracing_appender::rolling::InitError,
    },

    #[error("failed to install subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Threshold derived from a base level and `-v`/`-q` counts.
///
/// Dry runs start at INFO, everything else at ERROR. Each `-v` moves one step
/// towards DEBUG, each `-q` one step towards ERROR.
pub fn verbosity_level(dry_run: bool, verbose: u8, quiet: u8) -> Level {
    const LEVELS: [Level; 4] = [Level::DEBUG, Level::INFO, Level::WARN, Level::ERROR];
    let base: i32 = if dry_run { 1 } else { 3 };
    let index = (base - i32::from(verbose) + i32::from(quiet)).clamp(0, LEVELS.len() as i32 - 1);
    LEVELS[index as usize]
}

/// Initialize the logging system. Should be called once at program startup.
/// Returns a guard that must be held alive for the duration of the program
/// (for the non-blocking file writer).
pub fn init_logging(
    config: &LogConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, LogError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);

    let (layer, guard): (
        Box<dyn tracing_subscriber::Layer<_> + Send + Sync>,
        Option<tracing_appender::non_blocking::WorkerGuard>,
    ) = match config.file() {
        Some(path) => {
            let (dir, name) = split_log_path(path)?;
            let file_appender = rolling::RollingFileAppender::builder()
                .rotation(rolling::Rotation::NEVER)
                .filename_prefix(name)
                .build(dir)
                .map_err(|source| LogError::Appender {
                    path: path.to_path_buf(),
                    source,
                })?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json_format {
                Box::new(layer.json())
            } else {
                Box::new(layer)
            };
            (layer, Some(guard))
        }
        None => {
            let layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
            let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> =
                match (config.json_format, config.show_timestamps) {
                    (true, _) => Box::new(layer.json()),
                    (false, true) => Box::new(layer),
                    (false, false) => Box::new(layer.without_time()),
                };
            (layer, None)
        }
    };

    registry.with(layer).try_init()?;

    Ok(guard)
}

fn split_log_path(path: &Path) -> Result<(&Path, &str), LogError> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| LogError::InvalidPath(path.to_path_buf()))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    Ok((dir, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_verbosity() {
        assert_eq!(verbosity_level(false, 0, 0), Level::ERROR);
        assert_eq!(verbosity_level(true, 0, 0), Level::INFO);
    }

    #[test]
    fn test_verbosity_steps_and_clamps() {
        assert_eq!(verbosity_level(false, 1, 0), Level::WARN);
        assert_eq!(verbosity_level(false, 2, 0), Level::INFO);
        assert_eq!(verbosity_level(false, 3, 0), Level::DEBUG);
        assert_eq!(verbosity_level(false, 9, 0), Level::DEBUG);
        assert_eq!(verbosity_level(true, 0, 1), Level::WARN);
        assert_eq!(verbosity_level(true, 0, 5), Level::ERROR);
        assert_eq!(verbosity_level(true, 2, 2), Level::INFO);
    }

    #[test]
    fn test_dash_means_stderr() {
        let config = LogConfig {
            log_file: Some(PathBuf::from("-")),
            ..Default::default()
        };
        assert_eq!(config.file(), None);

        let config = LogConfig {
            log_file: Some(PathBuf::from("/var/log/shm-cleanup.log")),
            ..Default::default()
        };
        assert_eq!(config.file(), Some(Path::new("/var/log/shm-cleanup.log")));
    }

    #[test]
    fn test_split_log_path() {
        let (dir, name) = split_log_path(Path::new("/var/log/shm-cleanup.log")).unwrap();
        assert_eq!(dir, Path::new("/var/log"));
        assert_eq!(name, "shm-cleanup.log");

        let (dir, name) = split_log_path(Path::new("cleanup.log")).unwrap();
        assert_eq!(dir, Path::new("."));
        assert_eq!(name, "cleanup.log");

        assert!(split_log_path(Path::new("/")).is_err());
    }

    #[test]
    fn test_init_logging_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cleanup.log");
        let config = LogConfig {
            level: "info".into(),
            log_file: Some(path.clone()),
            ..Default::default()
        };

        let guard = init_logging(&config).unwrap();
        assert!(guard.is_some());
        info!("hello from the test");
        drop(guard);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("hello from the test"));
    }
}
