//! Categorized counts of a set of first-level entities.

use std::path::{Path, PathBuf};

use crate::entity::{Category, SpecialKind};

/// Counts of a set of first-level entities by segment family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitySummary {
    pub total: usize,
    pub psm2: usize,
    pub vader: usize,
    /// Entities matching no known segment family.
    pub unidentified: Vec<PathBuf>,
}

impl EntitySummary {
    /// Count `paths` by the family named in their file names.
    pub fn tally<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> Self {
        let mut summary = Self::default();
        for path in paths {
            summary.total += 1;
            let name = path.file_name().map(Path::new).unwrap_or(path.as_path());
            match Category::of(name) {
                Category::Special(SpecialKind::Psm2) => summary.psm2 += 1,
                Category::Special(SpecialKind::Vader) => summary.vader += 1,
                Category::Ordinary => summary.unidentified.push(path.clone()),
            }
        }
        summary
    }

    /// Log the summary. Unidentified entities raise the severity to warning
    /// and are listed one per line.
    pub fn log(&self, what: &str) {
        if !self.unidentified.is_empty() {
            tracing::warn!("found {} {}", self.total, what);
            tracing::warn!("  {:<24} {:>8}", SpecialKind::Psm2.label(), self.psm2);
            tracing::warn!("  {:<24} {:>8}", SpecialKind::Vader.label(), self.vader);
            tracing::warn!("  {:<24} {:>8}", "Unidentified items", self.unidentified.len());
            for path in &self.unidentified {
                tracing::warn!("      {}", path.display());
            }
        } else {
            tracing::info!("found {} {}", self.total, what);
            if self.psm2 + self.vader > 0 {
                tracing::info!("  {:<24} {:>8}", SpecialKind::Psm2.label(), self.psm2);
                tracing::info!("  {:<24} {:>8}", SpecialKind::Vader.label(), self.vader);
            }
        }
    }
}
