//! Reconciliation of the shared-memory root.
//!
//! One cycle walks the root, classifies every observation, folds the results
//! to first-level entities, subtracts whatever is still open and removes the
//! rest (or reports what it would remove in dry-run mode).

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use walkdir::WalkDir;

use crate::classifier::{ClassificationStrategy, Verdict};
use crate::config::CleanerConfig;
use crate::entity::{first_level_path, Category, CutoffPair, EntityTimes};
use crate::error::Result;
use crate::inuse::{InUseResolver, LsofResolver};
use crate::summary::EntitySummary;

/// What happened to one entity of the remove set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalAction {
    Removed,
    /// Dry run: logged only.
    WouldRemove,
    /// Gone before we got to it.
    Vanished,
    Failed(String),
}

/// Result of processing one member of the remove set.
#[derive(Debug, Clone)]
pub struct RemovalOutcome {
    pub path: PathBuf,
    pub action: RemovalAction,
}

/// Everything one cycle computed and did.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Included entities, already stripped of excluded ones.
    pub include: BTreeSet<PathBuf>,
    pub exclude: BTreeSet<PathBuf>,
    pub in_use: BTreeSet<PathBuf>,
    pub remove: BTreeSet<PathBuf>,
    pub outcomes: Vec<RemovalOutcome>,
}

impl CycleReport {
    /// Number of outcomes equal to `action`.
    pub fn count(&self, action: &RemovalAction) -> usize {
        self.outcomes.iter().filter(|o| &o.action == action).count()
    }

    /// Number of removals that failed, whatever the reason.
    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.action, RemovalAction::Failed(_)))
            .count()
    }
}

/// First-level entities one walk observed.
#[derive(Debug, Default)]
struct Scan {
    include: BTreeSet<PathBuf>,
    exclude: BTreeSet<PathBuf>,
    seen: BTreeSet<PathBuf>,
}

/// Runs reconciliation cycles against one shared-memory root.
pub struct ReconciliationEngine<R> {
    root: PathBuf,
    age_threshold: Duration,
    strategy: ClassificationStrategy,
    dry_run: bool,
    resolver: R,
}

impl ReconciliationEngine<LsofResolver> {
    /// Build an engine backed by `lsof` from validated configuration.
    pub fn from_config(config: &CleanerConfig) -> Result<Self> {
        let resolver = LsofResolver::new(&config.lsof_path, &config.root);
        Ok(Self::new(
            &config.root,
            config.age_threshold()?,
            ClassificationStrategy::from_config(config.special_treatment),
            config.dry_run,
            resolver,
        ))
    }
}

impl<R: InUseResolver> ReconciliationEngine<R> {
    /// Build an engine over `root` with an explicit resolver.
    pub fn new(
        root: impl Into<PathBuf>,
        age_threshold: Duration,
        strategy: ClassificationStrategy,
        dry_run: bool,
        resolver: R,
    ) -> Self {
        Self {
            root: root.into(),
            age_threshold,
            strategy,
            dry_run,
            resolver,
        }
    }

    /// The directory whose first-level entries are reconciled.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run one cycle with cutoffs taken from the current wall-clock time.
    pub fn run_once(&self) -> Result<CycleReport> {
        let cutoffs = CutoffPair::now(self.age_threshold);
        tracing::info!(
            standard = %cutoffs.standard,
            special = %cutoffs.special,
            "Computed cutoff timestamps"
        );
        self.run(&cutoffs)
    }

    /// Run one cycle against fixed cutoffs.
    ///
    /// Fails only when the in-use set cannot be obtained; in that case nothing
    /// has been removed.
    pub fn run(&self, cutoffs: &CutoffPair) -> Result<CycleReport> {
        let root = self.root.display();
        let Scan {
            mut include,
            exclude,
            seen,
        } = self.scan(cutoffs);
        include.retain(|path| !exclude.contains(path));

        EntitySummary::tally(&include)
            .log(&format!("removable first-level entities under {root}"));

        self.resolver.check_privileges()?;
        let in_use = self.resolver.resolve()?;
        for path in in_use.difference(&seen) {
            tracing::warn!(
                path = %path.display(),
                "In-use path matches nothing found under the root"
            );
        }
        EntitySummary::tally(&in_use).log(&format!("in-use first-level entities under {root}"));

        let remove: BTreeSet<PathBuf> = include.difference(&in_use).cloned().collect();
        if remove.len() < include.len() {
            EntitySummary::tally(&remove)
                .log(&format!("first-level entities under {root} to be removed"));
        }

        let mut report = CycleReport {
            include,
            exclude,
            in_use,
            remove,
            outcomes: Vec::new(),
        };

        if report.remove.is_empty() {
            tracing::warn!("nothing to be removed from {}", root);
            return Ok(report);
        }

        if self.dry_run {
            tracing::info!("dry-run summary of actions that would be performed");
        } else {
            tracing::info!("processing removal list");
        }
        report.outcomes = report
            .remove
            .iter()
            .map(|path| RemovalOutcome {
                path: path.clone(),
                action: self.remove_entity(path),
            })
            .collect();

        tracing::info!(
            removed = report.count(&RemovalAction::Removed),
            would_remove = report.count(&RemovalAction::WouldRemove),
            vanished = report.count(&RemovalAction::Vanished),
            failed = report.failed(),
            "Reconciliation cycle completed"
        );
        Ok(report)
    }

    /// Walk the root bottom-up and build the include and exclude sets.
    fn scan(&self, cutoffs: &CutoffPair) -> Scan {
        let mut scan = Scan::default();

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(false)
            .contents_first(true);

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(
                        path = ?e.path().map(Path::display),
                        error = %e,
                        "Failed to read entry, skipping"
                    );
                    continue;
                }
            };

            let is_dir = entry.file_type().is_dir();
            // Only first-level directories are judged on their own timestamps.
            if is_dir && entry.depth() != 1 {
                continue;
            }

            let Some(entity) = first_level_path(&self.root, entry.path()) else {
                continue;
            };
            scan.seen.insert(entity.clone());

            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(
                        path = %entry.path().display(),
                        error = %e,
                        "Failed to stat entry, skipping"
                    );
                    continue;
                }
            };

            let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            let verdict = self.strategy.classify(
                &EntityTimes::from_metadata(&meta),
                Category::of(relative),
                cutoffs,
            );

            match verdict {
                Verdict::Include => {
                    scan.include.insert(entity);
                }
                // A directory's own timestamps never protect it.
                Verdict::Exclude if is_dir => {}
                Verdict::Exclude => {
                    scan.exclude.insert(entity);
                }
            }
        }

        scan
    }

    fn remove_entity(&self, path: &Path) -> RemovalAction {
        if self.dry_run {
            tracing::info!("  rm -rf {}", path.display());
            return RemovalAction::WouldRemove;
        }

        let result = fs::symlink_metadata(path).and_then(|meta| {
            if meta.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            }
        });

        match result {
            Ok(()) => {
                tracing::info!("  OK   rm -rf {}", path.display());
                RemovalAction::Removed
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Entity vanished before removal");
                RemovalAction::Vanished
            }
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "  FAIL rm -rf {}",
                    path.display()
                );
                RemovalAction::Failed(format!("failed to remove {}: {}", path.display(), e))
            }
        }
    }
}
