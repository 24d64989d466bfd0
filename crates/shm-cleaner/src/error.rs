//! Fatal error taxonomy for the cleaner.
//!
//! Only conditions that must stop a run (or the whole daemon) are errors here.
//! Per-entity problems are logged and recorded in the cycle report instead.

use std::path::PathBuf;

use thiserror::Error;

/// Exit status for a completed run or a clean daemon shutdown.
pub const EXIT_OK: u8 = 0;
/// Exit status when the in-use check cannot be performed.
pub const EXIT_IN_USE_CHECK: u8 = 1;
/// Exit status for invalid configuration.
pub const EXIT_CONFIG: u8 = 2;

/// Broad category of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed time specification or unusable pid-file path.
    Configuration,
    /// The in-use enumeration needs privileges this process lacks.
    Privilege,
    /// The enumeration utility is missing or failed to run.
    ExternalTool,
    /// Process-level setup failed (signal registration).
    Runtime,
}

/// Errors that terminate a reconciliation run.
#[derive(Debug, Error)]
pub enum CleanupError {
    /// A time specification could not be parsed.
    #[error("invalid {what} specified: {value}")]
    InvalidTimeSpec { what: &'static str, value: String },

    /// The pid file must be given as an absolute path.
    #[error("pid file not an absolute path: {}", .0.display())]
    PidFileNotAbsolute(PathBuf),

    /// Another instance may be running.
    #[error("pid file already exists: {}", .0.display())]
    PidFileExists(PathBuf),

    /// The pid file could not be written.
    #[error("could not write to pid file {}: {source}", path.display())]
    PidFileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Enumerating other users' open files requires root.
    #[error("scanning for active files under {} requires root privileges", .0.display())]
    PrivilegeRequired(PathBuf),

    /// The enumeration utility could not be started.
    #[error("failed to run {}: {source}", program.display())]
    ToolSpawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The enumeration utility ran but exited in a way that means it could not work.
    #[error("{} exited abnormally ({status})", program.display())]
    ToolFailed { program: PathBuf, status: String },

    /// Signal handlers could not be installed.
    #[error("failed to register signal handlers: {0}")]
    SignalSetup(#[source] std::io::Error),
}

impl CleanupError {
    /// Category of this error, which decides the exit status.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CleanupError::InvalidTimeSpec { .. }
            | CleanupError::PidFileNotAbsolute(_)
            | CleanupError::PidFileExists(_)
            | CleanupError::PidFileWrite { .. } => ErrorKind::Configuration,
            CleanupError::PrivilegeRequired(_) => ErrorKind::Privilege,
            CleanupError::ToolSpawn { .. } | CleanupError::ToolFailed { .. } => {
                ErrorKind::ExternalTool
            }
            CleanupError::SignalSetup(_) => ErrorKind::Runtime,
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Configuration => EXIT_CONFIG,
            ErrorKind::Privilege | ErrorKind::ExternalTool | ErrorKind::Runtime => {
                EXIT_IN_USE_CHECK
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, CleanupError>;
