//! Configuration for the shared-memory cleaner.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CleanupError, Result};
use crate::inuse::DEFAULT_LSOF;

/// Configuration for one cleaner instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanerConfig {
    /// Shared-memory mount whose first-level entries are managed.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Only entries older than this many seconds are removed.
    #[serde(default = "default_age_threshold_secs")]
    pub age_threshold_secs: f64,

    /// Whether PSM2 and vader segments get the fixed one-hour window.
    #[serde(default = "default_true")]
    pub special_treatment: bool,

    /// Log what would be removed without removing anything.
    #[serde(default)]
    pub dry_run: bool,

    /// Open-file enumeration utility.
    #[serde(default = "default_lsof")]
    pub lsof_path: PathBuf,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Periodic re-check settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Seconds between the end of one cycle and the start of the next.
    #[serde(default = "default_period_secs")]
    pub period_secs: f64,

    /// Lifecycle marker holding our pid. An empty path disables it.
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
}

fn default_root() -> PathBuf {
    PathBuf::from("/dev/shm")
}

fn default_age_threshold_secs() -> f64 {
    86400.0
}

fn default_true() -> bool {
    true
}

fn default_lsof() -> PathBuf {
    PathBuf::from(DEFAULT_LSOF)
}

fn default_period_secs() -> f64 {
    86400.0
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/var/run/shm-cleanup.pid")
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            age_threshold_secs: default_age_threshold_secs(),
            special_treatment: true,
            dry_run: false,
            lsof_path: default_lsof(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period_secs: default_period_secs(),
            pid_file: default_pid_file(),
        }
    }
}

impl CleanerConfig {
    /// The age threshold as a duration.
    pub fn age_threshold(&self) -> Result<Duration> {
        secs_to_duration(self.age_threshold_secs, "age threshold")
    }

    /// Check everything that would otherwise fail after scanning has begun.
    pub fn validate(&self) -> Result<()> {
        self.age_threshold()?;
        if self.daemon.enabled {
            self.daemon.period()?;
            if let Some(pid_file) = self.daemon.pid_file() {
                if !pid_file.is_absolute() {
                    return Err(CleanupError::PidFileNotAbsolute(pid_file.to_path_buf()));
                }
            }
        }
        Ok(())
    }
}

impl DaemonConfig {
    /// The configured period, before the minimum is applied.
    pub fn period(&self) -> Result<Duration> {
        secs_to_duration(self.period_secs, "daemon period")
    }

    /// The pid file location, or `None` when disabled.
    pub fn pid_file(&self) -> Option<&Path> {
        if self.pid_file.as_os_str().is_empty() {
            None
        } else {
            Some(&self.pid_file)
        }
    }
}

fn secs_to_duration(secs: f64, what: &'static str) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| CleanupError::InvalidTimeSpec {
        what,
        value: secs.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CleanerConfig::default();
        assert_eq!(config.root, PathBuf::from("/dev/shm"));
        assert_eq!(config.age_threshold().unwrap(), Duration::from_secs(86400));
        assert!(config.special_treatment);
        assert!(!config.dry_run);
        assert_eq!(config.lsof_path, PathBuf::from("/usr/bin/lsof"));
        assert!(!config.daemon.enabled);
        assert_eq!(config.daemon.period().unwrap(), Duration::from_secs(86400));
        assert_eq!(
            config.daemon.pid_file(),
            Some(Path::new("/var/run/shm-cleanup.pid"))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_relative_pid_file() {
        let mut config = CleanerConfig::default();
        config.daemon.enabled = true;
        config.daemon.pid_file = PathBuf::from("run/shm-cleanup.pid");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CleanupError::PidFileNotAbsolute(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_relative_pid_file_ignored_outside_daemon_mode() {
        let mut config = CleanerConfig::default();
        config.daemon.pid_file = PathBuf::from("relative.pid");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_negative_age() {
        let config = CleanerConfig {
            age_threshold_secs: -5.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CleanupError::InvalidTimeSpec { what: "age threshold", .. })
        ));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: CleanerConfig = toml::from_str(
            r#"
            dry_run = true

            [daemon]
            enabled = true
            period_secs = 600.0
            "#,
        )
        .unwrap();
        assert!(config.dry_run);
        assert!(config.special_treatment);
        assert_eq!(config.root, PathBuf::from("/dev/shm"));
        assert_eq!(config.daemon.period().unwrap(), Duration::from_secs(600));
        assert!(config.daemon.pid_file().is_some());
    }

    #[test]
    fn test_empty_pid_file_disables_marker() {
        let mut config = CleanerConfig::default();
        config.daemon.enabled = true;
        config.daemon.pid_file = PathBuf::new();
        assert_eq!(config.daemon.pid_file(), None);
        assert!(config.validate().is_ok());
    }
}
