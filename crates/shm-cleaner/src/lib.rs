//! Reclaims orphaned entries from the shared-memory filesystem.
//!
//! Jobs that are killed or cancelled leave files behind under `/dev/shm`, and
//! those files keep consuming RAM. Each reconciliation cycle builds the set of
//! first-level entries whose timestamps are all older than a cutoff, subtracts
//! the entries some process still holds open (as reported by `lsof`), and
//! removes what is left.
//!
//! PSM2 (`psm2_shm`) and Open MPI vader (`vader_segment`) segments get special
//! treatment: their cutoff is always one hour ago, regardless of the configured
//! age threshold. Special treatment can be turned off.

pub mod classifier;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod entity;
pub mod error;
pub mod inuse;
pub mod summary;
pub mod time_spec;

#[cfg(test)]
mod testing;

pub use classifier::{classify, ClassificationStrategy, Verdict};
pub use config::{CleanerConfig, DaemonConfig};
pub use daemon::{DaemonScheduler, PidFile, ShutdownSignal, MIN_PERIOD};
pub use engine::{CycleReport, ReconciliationEngine, RemovalAction, RemovalOutcome};
pub use entity::{Category, CutoffPair, EntityTimes, SpecialKind};
pub use error::{CleanupError, ErrorKind, Result};
pub use inuse::{InUseResolver, LsofResolver};
pub use time_spec::{parse_time_spec, TimeUnit};
