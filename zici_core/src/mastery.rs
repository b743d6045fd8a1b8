//! Mastery tracking: per-item learning records and the derived mastery tier.

use crate::{Catalog, LearningRecord, Mastery, ReviewCounts};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// Most recent error kinds kept per record
const MAX_ERROR_KINDS: usize = 20;

/// Classify retention from raw counts
///
/// - mastered: accuracy >= 0.9 and streak >= 3
/// - familiar: accuracy >= 0.7 and streak >= 2
/// - needs review: everything else, including no test attempts yet
///
/// The accuracy gate is checked first, so a long final streak cannot lift
/// a poor overall record.
pub fn classify(correct: u32, tested: u32, streak: u32) -> Mastery {
    if tested == 0 {
        return Mastery::NeedsReview;
    }

    let accuracy = correct as f64 / tested as f64;
    if accuracy >= 0.9 && streak >= 3 {
        Mastery::Mastered
    } else if accuracy >= 0.7 && streak >= 2 {
        Mastery::Familiar
    } else {
        Mastery::NeedsReview
    }
}

/// One exposure to an item
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attempt<'a> {
    /// Seen on a learning card; never affects correctness statistics
    Study,
    /// Answered in a quiz
    Test {
        correct: bool,
        answer: Option<&'a str>,
    },
}

/// Owns every learning record for the active learner
#[derive(Clone, Debug, Default)]
pub struct MasteryTracker {
    records: HashMap<String, LearningRecord>,
    untested_is_unstudied: bool,
}

impl MasteryTracker {
    /// `untested_is_unstudied` reports records with zero test attempts as
    /// unstudied instead of needs-review.
    pub fn new(untested_is_unstudied: bool) -> Self {
        Self {
            records: HashMap::new(),
            untested_is_unstudied,
        }
    }

    /// Replace all records with persisted ones
    ///
    /// Records whose glyph is not in the catalog are dropped. Mastery is
    /// recomputed rather than trusted. Returns the number of records skipped.
    pub fn hydrate<I>(&mut self, records: I, catalog: &Catalog) -> usize
    where
        I: IntoIterator<Item = (String, LearningRecord)>,
    {
        self.records.clear();
        let mut skipped = 0;

        for (glyph, mut record) in records {
            if catalog.by_glyph(&glyph).is_none() {
                tracing::debug!("Skipping record for unknown glyph '{}'", glyph);
                skipped += 1;
                continue;
            }
            record.glyph = glyph.clone();
            record.correct_count = record.correct_count.min(record.test_count);
            record.mastery = self.classify_record(&record);
            self.records.insert(glyph, record);
        }

        tracing::debug!(
            "Hydrated {} learning records ({} skipped)",
            self.records.len(),
            skipped
        );
        skipped
    }

    /// Apply one attempt to the record for `glyph`, creating it if needed
    ///
    /// Returns None (and changes nothing) when the glyph is not in the catalog.
    pub fn record_attempt(
        &mut self,
        catalog: &Catalog,
        glyph: &str,
        attempt: Attempt<'_>,
        now: DateTime<Utc>,
    ) -> Option<&LearningRecord> {
        let Some(item) = catalog.by_glyph(glyph) else {
            tracing::debug!("Ignoring attempt for unknown glyph '{}'", glyph);
            return None;
        };

        let untested_is_unstudied = self.untested_is_unstudied;
        let record = self
            .records
            .entry(glyph.to_string())
            .or_insert_with(|| LearningRecord::new(glyph, item.reading.clone()));

        match attempt {
            Attempt::Study => {
                record.study_count += 1;
                record.last_studied_at = Some(now);
            }
            Attempt::Test { correct, answer } => {
                record.test_count += 1;
                record.last_tested_at = Some(now);
                if correct {
                    record.correct_count += 1;
                    record.streak += 1;
                } else {
                    record.streak = 0;
                    record.error_kinds.push(match answer {
                        Some(a) => format!("wrong-answer:{}", a),
                        None => "wrong-answer".to_string(),
                    });
                    if record.error_kinds.len() > MAX_ERROR_KINDS {
                        let excess = record.error_kinds.len() - MAX_ERROR_KINDS;
                        record.error_kinds.drain(..excess);
                    }
                }
            }
        }

        record.mastery = classify_with(record, untested_is_unstudied);

        tracing::debug!(
            "Updated '{}': studied {}, tested {}, correct {}, streak {} -> {}",
            glyph,
            record.study_count,
            record.test_count,
            record.correct_count,
            record.streak,
            record.mastery
        );

        Some(&*record)
    }

    pub fn get(&self, glyph: &str) -> Option<&LearningRecord> {
        self.records.get(glyph)
    }

    pub fn has_record(&self, glyph: &str) -> bool {
        self.records.contains_key(glyph)
    }

    /// Mastery for a glyph; no record means unstudied
    pub fn mastery_of(&self, glyph: &str) -> Mastery {
        self.records
            .get(glyph)
            .map(|r| r.mastery)
            .unwrap_or(Mastery::Unstudied)
    }

    /// Glyphs currently classified as `mastery`, sorted
    pub fn glyphs_with(&self, mastery: Mastery) -> Vec<&str> {
        let mut glyphs: Vec<&str> = self
            .records
            .values()
            .filter(|r| r.mastery == mastery)
            .map(|r| r.glyph.as_str())
            .collect();
        glyphs.sort_unstable();
        glyphs
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &LearningRecord> {
        self.records.values()
    }

    /// Sorted copy for persistence
    pub fn to_map(&self) -> BTreeMap<String, LearningRecord> {
        self.records
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// (test attempts, correct answers) summed over all records
    pub fn totals(&self) -> (u64, u64) {
        self.records.values().fold((0, 0), |(tested, correct), r| {
            (tested + r.test_count as u64, correct + r.correct_count as u64)
        })
    }

    pub fn review_counts(&self) -> ReviewCounts {
        let mut counts = ReviewCounts {
            total: self.records.len(),
            ..Default::default()
        };
        for record in self.records.values() {
            match record.mastery {
                Mastery::NeedsReview => counts.needs_review += 1,
                Mastery::Familiar => counts.familiar += 1,
                Mastery::Mastered => counts.mastered += 1,
                Mastery::Unstudied => {}
            }
        }
        counts
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    fn classify_record(&self, record: &LearningRecord) -> Mastery {
        classify_with(record, self.untested_is_unstudied)
    }
}

fn classify_with(record: &LearningRecord, untested_is_unstudied: bool) -> Mastery {
    if untested_is_unstudied && record.test_count == 0 {
        return Mastery::Unstudied;
    }
    classify(record.correct_count, record.test_count, record.streak)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::sample_catalog;

    fn answered(correct: bool) -> Attempt<'static> {
        Attempt::Test {
            correct,
            answer: None,
        }
    }

    #[test]
    fn test_classify_table() {
        assert_eq!(classify(9, 10, 3), Mastery::Mastered);
        assert_eq!(classify(7, 10, 2), Mastery::Familiar);
        assert_eq!(classify(3, 10, 0), Mastery::NeedsReview);
        assert_eq!(classify(0, 0, 0), Mastery::NeedsReview);
        // Streak alone is not enough
        assert_eq!(classify(9, 10, 2), Mastery::Familiar);
        assert_eq!(classify(6, 10, 5), Mastery::NeedsReview);
    }

    #[test]
    fn test_no_record_is_unstudied() {
        let tracker = MasteryTracker::default();
        assert_eq!(tracker.mastery_of("字"), Mastery::Unstudied);
    }

    #[test]
    fn test_study_does_not_touch_test_counts() {
        let catalog = sample_catalog();
        let mut tracker = MasteryTracker::default();
        let record = tracker
            .record_attempt(&catalog, "字", Attempt::Study, Utc::now())
            .unwrap();

        assert_eq!(record.study_count, 1);
        assert_eq!(record.test_count, 0);
        assert_eq!(record.reading, "zì");
        assert!(record.last_studied_at.is_some());
        assert!(record.last_tested_at.is_none());
        assert_eq!(record.mastery, Mastery::NeedsReview);
    }

    #[test]
    fn test_untested_is_unstudied_option() {
        let catalog = sample_catalog();
        let mut tracker = MasteryTracker::new(true);
        tracker.record_attempt(&catalog, "字", Attempt::Study, Utc::now());
        assert_eq!(tracker.mastery_of("字"), Mastery::Unstudied);

        tracker.record_attempt(&catalog, "字", answered(true), Utc::now());
        assert_eq!(tracker.mastery_of("字"), Mastery::NeedsReview);
    }

    #[test]
    fn test_accuracy_gate_dominates_streak() {
        let catalog = sample_catalog();
        let mut tracker = MasteryTracker::default();
        for _ in 0..3 {
            tracker.record_attempt(&catalog, "人", answered(false), Utc::now());
        }
        for _ in 0..3 {
            tracker.record_attempt(&catalog, "人", answered(true), Utc::now());
        }

        let record = tracker.get("人").unwrap();
        assert_eq!(record.streak, 3);
        assert_eq!(record.test_count, 6);
        assert_eq!(record.correct_count, 3);
        assert_eq!(record.mastery, Mastery::NeedsReview);
    }

    #[test]
    fn test_streak_resets_and_errors_are_kept() {
        let catalog = sample_catalog();
        let mut tracker = MasteryTracker::default();
        tracker.record_attempt(&catalog, "山", answered(true), Utc::now());
        tracker.record_attempt(&catalog, "山", answered(true), Utc::now());
        tracker.record_attempt(
            &catalog,
            "山",
            Attempt::Test {
                correct: false,
                answer: Some("shàn"),
            },
            Utc::now(),
        );

        let record = tracker.get("山").unwrap();
        assert_eq!(record.streak, 0);
        assert!(record.test_count >= record.correct_count);
        assert_eq!(record.error_kinds, vec!["wrong-answer:shàn"]);
    }

    #[test]
    fn test_mastered_after_clean_run() {
        let catalog = sample_catalog();
        let mut tracker = MasteryTracker::default();
        for _ in 0..3 {
            tracker.record_attempt(&catalog, "一", answered(true), Utc::now());
        }
        tracker.record_attempt(&catalog, "人", answered(true), Utc::now());
        assert_eq!(tracker.mastery_of("一"), Mastery::Mastered);
        assert_eq!(tracker.review_counts().mastered, 1);
        assert_eq!(tracker.glyphs_with(Mastery::Mastered), vec!["一"]);
        assert_eq!(tracker.glyphs_with(Mastery::NeedsReview), vec!["人"]);
    }

    #[test]
    fn test_unknown_glyph_is_skipped() {
        let catalog = sample_catalog();
        let mut tracker = MasteryTracker::default();
        assert!(tracker
            .record_attempt(&catalog, "龘", Attempt::Study, Utc::now())
            .is_none());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_hydrate_skips_unknown_and_recomputes() {
        let catalog = sample_catalog();
        let mut stale = LearningRecord::new("字", "zì");
        stale.test_count = 10;
        stale.correct_count = 9;
        stale.streak = 3;
        stale.mastery = Mastery::NeedsReview;

        let mut tracker = MasteryTracker::default();
        let skipped = tracker.hydrate(
            vec![
                ("字".to_string(), stale),
                ("龘".to_string(), LearningRecord::new("龘", "dá")),
            ],
            &catalog,
        );

        assert_eq!(skipped, 1);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.mastery_of("字"), Mastery::Mastered);
    }
}
