//! Age-based include/exclude decision for a single filesystem observation.

use crate::entity::{Category, CutoffPair, EntityTimes};

/// Outcome of classifying one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Candidate for removal.
    Include,
    /// Protected from removal.
    Exclude,
}

/// How categories map onto cutoffs. Chosen once from configuration and passed
/// to every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationStrategy {
    /// Every entity is judged against the standard cutoff.
    Strict,
    /// Special-category entities are judged against the one-hour cutoff.
    SpecialTreatment,
}

impl ClassificationStrategy {
    /// Pick the strategy once from the special-treatment setting.
    pub fn from_config(special_treatment: bool) -> Self {
        if special_treatment {
            ClassificationStrategy::SpecialTreatment
        } else {
            ClassificationStrategy::Strict
        }
    }

    /// Classify with this strategy applied to `category`.
    pub fn classify(self, times: &EntityTimes, category: Category, cutoffs: &CutoffPair) -> Verdict {
        let category = match self {
            ClassificationStrategy::Strict => Category::Ordinary,
            ClassificationStrategy::SpecialTreatment => category,
        };
        classify(times, category, cutoffs)
    }
}

/// Any timestamp newer than the applicable cutoff excludes the observation.
pub fn classify(times: &EntityTimes, category: Category, cutoffs: &CutoffPair) -> Verdict {
    let cutoff = match category {
        Category::Special(_) => cutoffs.special,
        Category::Ordinary => cutoffs.standard,
    };
    if times.any_newer_than(cutoff) {
        Verdict::Exclude
    } else {
        Verdict::Include
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, TimeDelta, Utc};

    use super::*;
    use crate::entity::SpecialKind;

    const WEEK: Duration = Duration::from_secs(7 * 86400);
    const VADER: Category = Category::Special(SpecialKind::Vader);

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn aged(age: TimeDelta) -> EntityTimes {
        EntityTimes::uniform(now() - age)
    }

    #[test]
    fn test_ordinary_all_older_is_included() {
        let cutoffs = CutoffPair::at(now(), Duration::from_secs(86400));
        let verdict = classify(&aged(TimeDelta::days(2)), Category::Ordinary, &cutoffs);
        assert_eq!(verdict, Verdict::Include);
    }

    #[test]
    fn test_ordinary_any_newer_is_excluded() {
        let cutoffs = CutoffPair::at(now(), Duration::from_secs(86400));
        let old = now() - TimeDelta::days(2);
        let fresh = now() - TimeDelta::minutes(5);
        for times in [
            EntityTimes::new(fresh, old, old),
            EntityTimes::new(old, fresh, old),
            EntityTimes::new(old, old, fresh),
        ] {
            assert_eq!(classify(&times, Category::Ordinary, &cutoffs), Verdict::Exclude);
        }
    }

    #[test]
    fn test_special_recently_touched_is_excluded_despite_lenient_threshold() {
        let cutoffs = CutoffPair::at(now(), WEEK);
        let times = aged(TimeDelta::minutes(10));
        assert_eq!(classify(&times, VADER, &cutoffs), Verdict::Exclude);
    }

    #[test]
    fn test_special_older_than_an_hour_is_included() {
        let cutoffs = CutoffPair::at(now(), WEEK);
        let times = aged(TimeDelta::hours(2));
        assert_eq!(classify(&times, VADER, &cutoffs), Verdict::Include);
        // The same entity would be protected under the ordinary path.
        assert_eq!(classify(&times, Category::Ordinary, &cutoffs), Verdict::Exclude);
    }

    #[test]
    fn test_strict_strategy_treats_special_as_ordinary() {
        let cutoffs = CutoffPair::at(now(), WEEK);
        let psm2 = Category::Special(SpecialKind::Psm2);
        for age in [TimeDelta::minutes(10), TimeDelta::hours(2), TimeDelta::days(8)] {
            let times = aged(age);
            assert_eq!(
                ClassificationStrategy::Strict.classify(&times, psm2, &cutoffs),
                classify(&times, Category::Ordinary, &cutoffs),
            );
        }
    }

    #[test]
    fn test_special_treatment_strategy_uses_category() {
        let cutoffs = CutoffPair::at(now(), WEEK);
        let times = aged(TimeDelta::hours(2));
        let strategy = ClassificationStrategy::from_config(true);
        assert_eq!(strategy, ClassificationStrategy::SpecialTreatment);
        assert_eq!(strategy.classify(&times, VADER, &cutoffs), Verdict::Include);
        assert_eq!(
            strategy.classify(&times, Category::Ordinary, &cutoffs),
            Verdict::Exclude
        );
    }

    #[test]
    fn test_timestamp_equal_to_cutoff_is_not_newer() {
        let cutoffs = CutoffPair::at(now(), Duration::from_secs(86400));
        let times = EntityTimes::uniform(cutoffs.standard);
        assert_eq!(classify(&times, Category::Ordinary, &cutoffs), Verdict::Include);
    }
}
