//! Diagnostic track: an up-front assessment over a sequence range, followed
//! by targeted learning of the misses or a mixed review session.

use super::{Engine, EngineEvent};
use crate::{quiz, DiagnosticResult, ErrorSource, Item, LearningMode, Phase};
use chrono::Utc;
use rand::seq::SliceRandom;
use uuid::Uuid;

/// Smallest review session built after a diagnostic
const MIN_REVIEW_QUESTIONS: usize = 15;

/// Share of review questions drawn from missed items, in tenths
const MISSED_SHARE_TENTHS: usize = 7;

impl Engine {
    /// Switch to the diagnostic track and show its settings
    pub fn enter_diagnostic(&mut self) {
        self.mode = LearningMode::Diagnostic;
        self.set_phase(Phase::DiagnosticSettings);
    }

    /// Sample items from the configured range and start the assessment
    ///
    /// Returns the number of questions. Every question asks for the reading
    /// of a glyph.
    pub fn start_diagnostic(&mut self) -> usize {
        let settings = self.diagnostic_settings.clone();
        let pool = self
            .catalog
            .by_sequence_range(settings.range_start, settings.range_end);

        let mut items: Vec<Item> = pool
            .choose_multiple(&mut *self.rng, settings.count)
            .map(|item| (*item).clone())
            .collect();
        items.shuffle(&mut *self.rng);

        if items.is_empty() {
            tracing::warn!(
                "No items in diagnostic range {}-{}",
                settings.range_start,
                settings.range_end
            );
        }

        self.mode = LearningMode::Diagnostic;
        self.diagnostic_result = None;
        self.load_learning(items, self.quiz_mode, ErrorSource::Diagnostic);
        self.questions =
            quiz::build_diagnostic_questions(&self.items, &self.catalog, &mut *self.rng);
        tracing::info!(
            "Diagnostic started: {} questions from {}-{}",
            self.questions.len(),
            settings.range_start,
            settings.range_end
        );
        self.set_phase(Phase::Diagnostic);
        self.questions.len()
    }

    /// Score the diagnostic and file every miss in the error book
    ///
    /// Only runs from the diagnostic phase; elsewhere it returns whatever
    /// result already exists.
    pub fn complete_analysis(&mut self) -> Option<&DiagnosticResult> {
        if self.phase != Phase::Diagnostic {
            tracing::debug!("complete_analysis ignored in {:?}", self.phase);
            return self.diagnostic_result.as_ref();
        }

        let mut correct = Vec::new();
        let mut incorrect = Vec::new();
        // Skipped questions have no result and count as neither
        for (question, item) in self.questions.iter().zip(&self.items) {
            match self.results.iter().find(|r| r.question_id == question.id) {
                Some(result) if result.is_correct => correct.push(item.clone()),
                Some(_) => incorrect.push(item.clone()),
                None => {}
            }
        }

        let total = self.items.len();
        let accuracy_percent = if total == 0 {
            0
        } else {
            ((correct.len() as f64 / total as f64) * 100.0).round() as u32
        };
        let average_time_secs = if self.results.is_empty() {
            0
        } else {
            let spent: f64 = self.results.iter().map(|r| r.time_spent_secs).sum();
            (spent / self.results.len() as f64).round() as u32
        };

        for item in &incorrect {
            self.record_error(item, ErrorSource::Diagnostic);
        }
        if !incorrect.is_empty() {
            self.save_error_book();
        }

        tracing::info!(
            "Diagnostic finished: {}/{} correct ({}%), {} missed",
            correct.len(),
            total,
            accuracy_percent,
            incorrect.len()
        );
        self.events
            .push(EngineEvent::DiagnosticCompleted { accuracy_percent });

        self.diagnostic_result = Some(DiagnosticResult {
            id: Uuid::new_v4(),
            taken_at: Utc::now(),
            scope: format!(
                "{}-{}",
                self.diagnostic_settings.range_start, self.diagnostic_settings.range_end
            ),
            total,
            correct,
            incorrect,
            accuracy_percent,
            average_time_secs,
        });
        self.set_phase(Phase::DiagnosticResult);
        self.diagnostic_result.as_ref()
    }

    /// Learn the missed items; false (and no change) when there are none
    pub fn study_missed_items(&mut self) -> bool {
        let missed = match &self.diagnostic_result {
            Some(result) if !result.incorrect.is_empty() => result.incorrect.clone(),
            _ => {
                tracing::info!("No missed items to study");
                return false;
            }
        };

        let quiz_mode = self.settings.quiz_mode;
        self.load_learning(missed, quiz_mode, ErrorSource::Learning);
        self.set_phase(Phase::DiagnosticLearning);
        true
    }

    /// Build a review weighted toward the misses
    ///
    /// The session has `max(2 * missed, 15)` questions. Seventy percent
    /// (rounded up) cycle through the missed items; the rest cycle through
    /// a shuffled copy of the correct ones. When one side is empty the
    /// other fills the whole session. Returns false without a result.
    pub fn build_review_session(&mut self) -> bool {
        let (missed, mut correct) = match &self.diagnostic_result {
            Some(result) if result.total > 0 => {
                (result.incorrect.clone(), result.correct.clone())
            }
            _ => {
                tracing::info!("No diagnostic result to review");
                return false;
            }
        };
        if missed.is_empty() && correct.is_empty() {
            return false;
        }

        let total = (missed.len() * 2).max(MIN_REVIEW_QUESTIONS);
        let missed_share = (total * MISSED_SHARE_TENTHS + 9) / 10;
        correct.shuffle(&mut *self.rng);

        let (first, second) = match (missed.is_empty(), correct.is_empty()) {
            (false, false) => (&missed, &correct),
            (true, _) => (&correct, &correct),
            (_, true) => (&missed, &missed),
        };

        let mut review: Vec<Item> = first.iter().cycle().take(missed_share).cloned().collect();
        review.extend(second.iter().cycle().take(total - missed_share).cloned());
        review.shuffle(&mut *self.rng);

        tracing::info!(
            "Review session: {} questions ({} weighted to misses)",
            review.len(),
            missed_share
        );

        let quiz_mode = self.review_settings.quiz_mode;
        self.load_learning(review, quiz_mode, ErrorSource::Review);
        self.questions =
            quiz::build_questions(&self.items, self.quiz_mode, &self.catalog, &mut *self.rng);
        self.set_phase(Phase::DiagnosticReview);
        true
    }

    /// Leave the diagnostic track
    pub fn reset_diagnostic(&mut self) {
        self.diagnostic_result = None;
        self.mode = LearningMode::Traditional;
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{engine_with, wrong_option};
    use crate::catalog::sample_catalog;
    use crate::store::UserStore;
    use crate::{ErrorSource, LearningMode, Phase};
    use std::collections::HashSet;

    /// Run a 10-question diagnostic, missing the first `misses`
    fn run_diagnostic(engine: &mut crate::Engine, misses: usize) {
        engine.enter_diagnostic();
        engine.update_diagnostic_settings(|s| {
            s.count = 10;
            s.range_start = 1;
            s.range_end = 20;
        });
        assert_eq!(engine.start_diagnostic(), 10);

        let mut i = 0;
        while let Some(q) = engine.current_question().cloned() {
            let answer = if i < misses {
                wrong_option(&q)
            } else {
                q.correct_answer.clone()
            };
            engine.submit_answer(&answer, 3.0);
            engine.advance_quiz();
            i += 1;
        }
    }

    #[test]
    fn test_start_diagnostic_samples_range() {
        let (mut engine, _) = engine_with(sample_catalog());
        engine.enter_diagnostic();
        assert_eq!(engine.phase(), Phase::DiagnosticSettings);
        assert_eq!(engine.mode(), LearningMode::Diagnostic);

        engine.update_diagnostic_settings(|s| {
            s.count = 5;
            s.range_start = 11;
            s.range_end = 20;
        });
        assert_eq!(engine.start_diagnostic(), 5);
        assert_eq!(engine.phase(), Phase::Diagnostic);

        let glyphs: HashSet<&str> = engine.items().iter().map(|i| i.glyph.as_str()).collect();
        assert_eq!(glyphs.len(), 5);
        assert!(engine.items().iter().all(|i| (11..=20).contains(&i.sequence)));
        assert!(engine.questions().iter().all(|q| q.id.starts_with("diagnostic_")));
    }

    #[test]
    fn test_range_larger_than_catalog_takes_everything() {
        let (mut engine, _) = engine_with(sample_catalog());
        engine.update_diagnostic_settings(|s| {
            s.count = 50;
            s.range_start = 1;
            s.range_end = 500;
        });
        assert_eq!(engine.start_diagnostic(), 20);
    }

    #[test]
    fn test_complete_analysis() {
        let (mut engine, store) = engine_with(sample_catalog());
        run_diagnostic(&mut engine, 4);
        assert_eq!(engine.phase(), Phase::DiagnosticResult);

        let result = engine.diagnostic_result().unwrap();
        assert_eq!(result.total, 10);
        assert_eq!(result.correct.len(), 6);
        assert_eq!(result.incorrect.len(), 4);
        assert_eq!(result.accuracy_percent, 60);
        assert_eq!(result.average_time_secs, 3);
        assert_eq!(result.scope, "1-20");

        // Misses are filed once, at analysis time
        assert_eq!(engine.ledger().len(), 4);
        for item in &result.incorrect {
            let entry = engine.ledger().get(&item.glyph).unwrap();
            assert_eq!(entry.source, ErrorSource::Diagnostic);
            assert_eq!(entry.error_count, 1);
        }
        assert_eq!(store.load_error_entries("amy_01").unwrap().len(), 4);

        // Every diagnostic answer is a test attempt
        assert_eq!(engine.tracker().totals(), (10, 6));
    }

    #[test]
    fn test_skipped_question_is_neither_correct_nor_missed() {
        let (mut engine, _) = engine_with(sample_catalog());
        engine.update_diagnostic_settings(|s| {
            s.count = 3;
            s.range_start = 1;
            s.range_end = 20;
        });
        assert_eq!(engine.start_diagnostic(), 3);
        let items = engine.items().to_vec();

        // First question left unanswered
        engine.advance_quiz();
        let q = engine.current_question().cloned().unwrap();
        engine.submit_answer(&wrong_option(&q), 2.0);
        engine.advance_quiz();
        let q = engine.current_question().cloned().unwrap();
        engine.submit_answer(&q.correct_answer, 2.0);
        engine.advance_quiz();

        let result = engine.diagnostic_result().unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(result.incorrect, vec![items[1].clone()]);
        assert_eq!(result.correct, vec![items[2].clone()]);
        assert_eq!(result.accuracy_percent, 33);

        assert_eq!(engine.ledger().len(), 1);
        assert!(engine.ledger().get(&items[1].glyph).is_some());
        assert!(engine.ledger().get(&items[0].glyph).is_none());
    }

    #[test]
    fn test_empty_diagnostic() {
        let (mut engine, _) = engine_with(sample_catalog());
        engine.update_diagnostic_settings(|s| {
            s.range_start = 100;
            s.range_end = 200;
        });
        assert_eq!(engine.start_diagnostic(), 0);
        engine.advance_quiz();

        let result = engine.diagnostic_result().unwrap();
        assert_eq!(result.total, 0);
        assert_eq!(result.accuracy_percent, 0);
        assert_eq!(result.average_time_secs, 0);
        assert!(!engine.build_review_session());
        assert!(!engine.study_missed_items());
        assert_eq!(engine.phase(), Phase::DiagnosticResult);
    }

    #[test]
    fn test_review_session_weighting() {
        let (mut engine, _) = engine_with(sample_catalog());
        run_diagnostic(&mut engine, 4);
        let result = engine.diagnostic_result().unwrap().clone();
        let missed: HashSet<&str> = result.incorrect.iter().map(|i| i.glyph.as_str()).collect();

        assert!(engine.build_review_session());
        assert_eq!(engine.phase(), Phase::DiagnosticReview);
        assert_eq!(engine.questions().len(), 15);

        let from_missed = engine
            .items()
            .iter()
            .filter(|i| missed.contains(i.glyph.as_str()))
            .count();
        assert_eq!(from_missed, 11);
        assert_eq!(engine.items().len() - from_missed, 4);
        // Every missed item shows up at least twice
        for glyph in &missed {
            let count = engine.items().iter().filter(|i| i.glyph == *glyph).count();
            assert!(count >= 2, "{} appeared {} times", glyph, count);
        }
    }

    #[test]
    fn test_review_misses_and_finish() {
        let (mut engine, _) = engine_with(sample_catalog());
        run_diagnostic(&mut engine, 10);
        assert!(engine.build_review_session());
        // 10 misses: max(20, 15) = 20 questions, all from the misses
        assert_eq!(engine.questions().len(), 20);

        let mut first = true;
        while let Some(q) = engine.current_question().cloned() {
            let answer = if first {
                wrong_option(&q)
            } else {
                q.correct_answer.clone()
            };
            first = false;
            engine.submit_answer(&answer, 1.0);
            engine.advance_quiz();
        }
        assert_eq!(engine.phase(), Phase::Statistics);
        let reviewed = engine.results()[0].glyph.clone();
        let entry = engine.ledger().get(&reviewed).unwrap();
        assert_eq!(entry.source, ErrorSource::Review);
        assert_eq!(entry.error_count, 2);
    }

    #[test]
    fn test_study_missed_items_then_quiz() {
        let (mut engine, _) = engine_with(sample_catalog());
        run_diagnostic(&mut engine, 3);
        assert!(engine.study_missed_items());
        assert_eq!(engine.phase(), Phase::DiagnosticLearning);
        assert_eq!(engine.items().len(), 3);

        for _ in 0..3 {
            engine.advance_learning();
        }
        assert_eq!(engine.phase(), Phase::Quiz);
        assert_eq!(engine.questions().len(), 3);
    }

    #[test]
    fn test_perfect_diagnostic_review_uses_correct_items() {
        let (mut engine, _) = engine_with(sample_catalog());
        run_diagnostic(&mut engine, 0);
        assert!(!engine.study_missed_items());
        assert_eq!(engine.phase(), Phase::DiagnosticResult);

        assert!(engine.build_review_session());
        assert_eq!(engine.questions().len(), 15);
    }

    #[test]
    fn test_reset_diagnostic() {
        let (mut engine, _) = engine_with(sample_catalog());
        run_diagnostic(&mut engine, 2);
        engine.reset_diagnostic();

        assert!(engine.diagnostic_result().is_none());
        assert_eq!(engine.mode(), LearningMode::Traditional);
        assert_eq!(engine.phase(), Phase::Settings);
        assert!(engine.items().is_empty());
    }
}
