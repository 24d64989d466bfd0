//! Periodic reconciliation with pid-file lifecycle and signal-driven shutdown.

use std::fmt;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::error::{CleanupError, Result};

/// Shortest allowed pause between cycles.
pub const MIN_PERIOD: Duration = Duration::from_secs(30);

/// Raise `period` to [`MIN_PERIOD`] if it is shorter, with a warning.
pub fn clamp_period(period: Duration) -> Duration {
    if period < MIN_PERIOD {
        tracing::warn!(
            "daemon wake period limited to {}s (instead of {}s)",
            MIN_PERIOD.as_secs(),
            period.as_secs_f64()
        );
        MIN_PERIOD
    } else {
        period
    }
}

/// Pid file that exists for as long as this guard lives.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Create `path` holding our pid. Refuses to take over an existing file.
    pub fn create(path: &Path) -> Result<Self> {
        if !path.is_absolute() {
            return Err(CleanupError::PidFileNotAbsolute(path.to_path_buf()));
        }

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| match source.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    CleanupError::PidFileExists(path.to_path_buf())
                }
                _ => CleanupError::PidFileWrite {
                    path: path.to_path_buf(),
                    source,
                },
            })?;

        // Past this point the guard owns the file and removes it on failure.
        let guard = Self {
            path: path.to_path_buf(),
        };
        write!(file, "{}", std::process::id()).map_err(|source| CleanupError::PidFileWrite {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!("pid written to {}", path.display());
        Ok(guard)
    }

    /// Location of the pid file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::info!("removed pid file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::error!(
                path = %self.path.display(),
                error = %e,
                "could not remove pid file"
            ),
        }
    }
}

/// Signal that ended the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    /// The raw signal number.
    pub fn number(self) -> i32 {
        match self {
            ShutdownSignal::Interrupt => libc::SIGINT,
            ShutdownSignal::Terminate => libc::SIGTERM,
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// SIGINT/SIGTERM listener that swallows SIGHUP.
///
/// Installing the handlers replaces the default dispositions, so a hangup no
/// longer kills the process even while a cycle is running.
pub struct SignalListener {
    hangup: Signal,
    interrupt: Signal,
    terminate: Signal,
}

impl SignalListener {
    /// Install handlers for SIGHUP, SIGINT and SIGTERM.
    pub fn new() -> Result<Self> {
        let register = |kind| signal(kind).map_err(CleanupError::SignalSetup);
        Ok(Self {
            hangup: register(SignalKind::hangup())?,
            interrupt: register(SignalKind::interrupt())?,
            terminate: register(SignalKind::terminate())?,
        })
    }

    /// Wait for the next shutdown signal.
    pub async fn recv(&mut self) -> ShutdownSignal {
        loop {
            tokio::select! {
                _ = self.hangup.recv() => {
                    tracing::debug!("ignoring SIGHUP");
                }
                _ = self.interrupt.recv() => return ShutdownSignal::Interrupt,
                _ = self.terminate.recv() => return ShutdownSignal::Terminate,
            }
        }
    }
}

/// Runs a cycle, sleeps for the period, and repeats until told to stop.
#[derive(Debug, Clone)]
pub struct DaemonScheduler {
    period: Duration,
    pid_file: Option<PathBuf>,
}

impl DaemonScheduler {
    /// `period` is clamped to [`MIN_PERIOD`].
    pub fn new(period: Duration, pid_file: Option<PathBuf>) -> Self {
        let period = clamp_period(period);
        tracing::info!("daemonizing on a period of {} second(s)", period.as_secs_f64());
        Self { period, pid_file }
    }

    /// Pause between the end of one cycle and the start of the next.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run until SIGINT or SIGTERM arrives.
    pub async fn run_until_signal<F, T>(&self, cycle: F) -> Result<ShutdownSignal>
    where
        F: FnMut() -> Result<T>,
    {
        let _pid_file = self.acquire_pid_file()?;
        let mut signals = SignalListener::new()?;
        self.run_cycles(cycle, signals.recv()).await
    }

    /// Run until `shutdown` resolves.
    ///
    /// The pid file is created before the first cycle and removed on return,
    /// whether the loop ends by signal or by a fatal cycle error.
    pub async fn run<F, T, S>(&self, cycle: F, shutdown: S) -> Result<ShutdownSignal>
    where
        F: FnMut() -> Result<T>,
        S: Future<Output = ShutdownSignal>,
    {
        let _pid_file = self.acquire_pid_file()?;
        self.run_cycles(cycle, shutdown).await
    }

    fn acquire_pid_file(&self) -> Result<Option<PidFile>> {
        self.pid_file.as_deref().map(PidFile::create).transpose()
    }

    async fn run_cycles<F, T, S>(&self, mut cycle: F, shutdown: S) -> Result<ShutdownSignal>
    where
        F: FnMut() -> Result<T>,
        S: Future<Output = ShutdownSignal>,
    {
        tokio::pin!(shutdown);
        loop {
            // A cycle always runs to completion; signals are observed between cycles.
            cycle()?;

            tokio::select! {
                _ = tokio::time::sleep(self.period) => {}
                received = &mut shutdown => {
                    tracing::info!("exiting on signal {} ({})", received.number(), received);
                    return Ok(received);
                }
            }
        }
    }
}
