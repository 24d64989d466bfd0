//! First-level entities under the shared-memory root.
//!
//! An entity is a direct child of the root (file or directory). Anything found
//! deeper in the tree is attributed to the entity it lives under.

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Fixed staleness window for special-treatment segments.
pub const SPECIAL_WINDOW: Duration = Duration::from_secs(3600);

/// Segment families that get special treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialKind {
    /// PSM2 shared-memory segments (`psm2_shm`).
    Psm2,
    /// Open MPI vader segments (`vader_segment`).
    Vader,
}

impl SpecialKind {
    pub const ALL: [SpecialKind; 2] = [SpecialKind::Psm2, SpecialKind::Vader];

    /// Substring identifying this family in a path name.
    pub fn marker(self) -> &'static str {
        match self {
            SpecialKind::Psm2 => "psm2_shm",
            SpecialKind::Vader => "vader_segment",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SpecialKind::Psm2 => "PSM2 segments",
            SpecialKind::Vader => "Open MPI vader segments",
        }
    }
}

/// Naming category of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Ordinary,
    Special(SpecialKind),
}

impl Category {
    /// Categorize by substring match on a path name. PSM2 wins over vader.
    pub fn of(name: &Path) -> Self {
        let name = name.to_string_lossy();
        SpecialKind::ALL
            .into_iter()
            .find(|kind| name.contains(kind.marker()))
            .map_or(Category::Ordinary, Category::Special)
    }

    pub fn is_special(self) -> bool {
        matches!(self, Category::Special(_))
    }
}

/// The three filesystem timestamps considered by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityTimes {
    pub mtime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
    pub atime: DateTime<Utc>,
}

impl EntityTimes {
    /// Times given explicitly, mostly for tests.
    pub fn new(mtime: DateTime<Utc>, ctime: DateTime<Utc>, atime: DateTime<Utc>) -> Self {
        Self { mtime, ctime, atime }
    }

    /// All three timestamps set to the same instant.
    pub fn uniform(at: DateTime<Utc>) -> Self {
        Self::new(at, at, at)
    }

    /// Times from `lstat` metadata, at nanosecond precision.
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            mtime: unix_instant(meta.mtime(), meta.mtime_nsec()),
            ctime: unix_instant(meta.ctime(), meta.ctime_nsec()),
            atime: unix_instant(meta.atime(), meta.atime_nsec()),
        }
    }

    /// True when any one timestamp is strictly newer than `cutoff`.
    pub fn any_newer_than(&self, cutoff: DateTime<Utc>) -> bool {
        self.mtime > cutoff || self.ctime > cutoff || self.atime > cutoff
    }
}

fn unix_instant(secs: i64, nsecs: i64) -> DateTime<Utc> {
    let nsecs = u32::try_from(nsecs).unwrap_or(0);
    DateTime::from_timestamp(secs, nsecs).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// The two cutoff instants used for one reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutoffPair {
    /// `now - age_threshold`.
    pub standard: DateTime<Utc>,
    /// `now - SPECIAL_WINDOW`.
    pub special: DateTime<Utc>,
}

impl CutoffPair {
    /// Compute both cutoffs relative to `now`.
    pub fn at(now: DateTime<Utc>, age_threshold: Duration) -> Self {
        Self {
            standard: saturating_before(now, age_threshold),
            special: saturating_before(now, SPECIAL_WINDOW),
        }
    }

    /// Compute both cutoffs relative to the current wall-clock time.
    pub fn now(age_threshold: Duration) -> Self {
        Self::at(Utc::now(), age_threshold)
    }
}

fn saturating_before(now: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(span)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Reduce `path` to its first-level component under `root`.
///
/// Returns `None` if `path` is not strictly below `root`.
pub fn first_level_path(root: &Path, path: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix(root).ok()?;
    match relative.components().next()? {
        Component::Normal(name) => Some(root.join(name)),
        _ => None,
    }
}
