//! Core domain types for the Zici trainer.
//!
//! This module defines the fundamental types used throughout the system:
//! - Catalog items and their readings
//! - Per-item learning records and mastery tiers
//! - Error book entries
//! - Quiz questions, results and diagnostic summaries
//! - Learner settings, statistics and the persisted user blob

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Catalog Items
// ============================================================================

/// One learnable character: glyph, reading and example compounds
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub sequence: u32,
    pub glyph: String,
    pub reading: String,
    #[serde(default)]
    pub examples: Vec<String>,
}

impl Item {
    /// Build an item, dropping blank example compounds (at most three kept)
    pub fn new(
        sequence: u32,
        glyph: impl Into<String>,
        reading: impl Into<String>,
        examples: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            sequence,
            glyph: glyph.into(),
            reading: reading.into(),
            examples: examples
                .into_iter()
                .map(|w| w.trim().to_string())
                .filter(|w| !w.is_empty())
                .take(3)
                .collect(),
        }
    }

    /// First example compound, used as the error book's meaning hint
    pub fn meaning_hint(&self) -> &str {
        self.examples.first().map(String::as_str).unwrap_or("")
    }
}

// ============================================================================
// Mastery and Learning Records
// ============================================================================

/// Derived retention tier for one item
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Mastery {
    Unstudied,
    NeedsReview,
    Familiar,
    Mastered,
}

impl Mastery {
    pub fn label(&self) -> &'static str {
        match self {
            Mastery::Unstudied => "unstudied",
            Mastery::NeedsReview => "needs review",
            Mastery::Familiar => "familiar",
            Mastery::Mastered => "mastered",
        }
    }
}

impl fmt::Display for Mastery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-item performance history, keyed by glyph
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LearningRecord {
    pub glyph: String,
    pub reading: String,
    pub study_count: u32,
    pub test_count: u32,
    pub correct_count: u32,
    pub streak: u32,
    pub last_studied_at: Option<DateTime<Utc>>,
    pub last_tested_at: Option<DateTime<Utc>>,
    pub mastery: Mastery,
    #[serde(default)]
    pub error_kinds: Vec<String>,
}

impl LearningRecord {
    /// Fresh record with a reading snapshot; nothing counted yet
    pub fn new(glyph: impl Into<String>, reading: impl Into<String>) -> Self {
        Self {
            glyph: glyph.into(),
            reading: reading.into(),
            study_count: 0,
            test_count: 0,
            correct_count: 0,
            streak: 0,
            last_studied_at: None,
            last_tested_at: None,
            mastery: Mastery::Unstudied,
            error_kinds: Vec::new(),
        }
    }

    /// Fraction of test attempts answered correctly (0 when untested)
    pub fn accuracy(&self) -> f64 {
        if self.test_count == 0 {
            0.0
        } else {
            self.correct_count as f64 / self.test_count as f64
        }
    }
}

/// Tally of records per mastery tier
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReviewCounts {
    pub needs_review: usize,
    pub familiar: usize,
    pub mastered: usize,
    pub total: usize,
}

// ============================================================================
// Error Book
// ============================================================================

/// Where a miss was recorded
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Diagnostic,
    Learning,
    Review,
}

/// A missed item kept for error-focused replay
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorBookEntry {
    pub id: String,
    pub glyph: String,
    pub reading: String,
    pub meaning: String,
    pub added_at: DateTime<Utc>,
    pub error_count: u32,
    pub last_error_at: DateTime<Utc>,
    pub source: ErrorSource,
}

// ============================================================================
// Quiz Types
// ============================================================================

/// Direction of a multiple-choice question
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum QuizKind {
    /// Prompt shows a reading, options are glyphs
    ReadingToGlyph,
    /// Prompt shows a glyph, options are readings
    GlyphToReading,
}

/// Configured question direction for a session
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum QuizMode {
    ReadingToGlyph,
    GlyphToReading,
    Mixed,
}

impl std::str::FromStr for QuizMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reading-to-glyph" | "r2g" => Ok(QuizMode::ReadingToGlyph),
            "glyph-to-reading" | "g2r" => Ok(QuizMode::GlyphToReading),
            "mixed" => Ok(QuizMode::Mixed),
            other => Err(format!("unknown quiz mode: {}", other)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QuizQuestion {
    pub id: String,
    pub kind: QuizKind,
    pub prompt: String,
    pub correct_answer: String,
    pub options: Vec<String>,
    pub examples: Vec<String>,
    pub explanation: Option<String>,
}

/// One scored answer
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QuizResult {
    pub question_id: String,
    pub glyph: String,
    pub answer: String,
    pub correct_answer: String,
    pub is_correct: bool,
    pub time_spent_secs: f64,
    pub answered_at: DateTime<Utc>,
}

// ============================================================================
// Session Phases
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Settings,
    Learning,
    Quiz,
    Statistics,
    DiagnosticSettings,
    Diagnostic,
    DiagnosticResult,
    DiagnosticLearning,
    DiagnosticReview,
}

impl Phase {
    /// Phases that step through the learning list
    pub fn is_learning(&self) -> bool {
        matches!(self, Phase::Learning | Phase::DiagnosticLearning)
    }

    /// Phases that step through the question list
    pub fn is_quiz(&self) -> bool {
        matches!(
            self,
            Phase::Quiz | Phase::Diagnostic | Phase::DiagnosticReview
        )
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LearningMode {
    Traditional,
    Diagnostic,
}

/// Position within the learning or quiz list
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub percentage: u32,
}

impl Progress {
    pub fn at(index: usize, total: usize) -> Self {
        if total == 0 {
            return Self::default();
        }
        let current = (index + 1).min(total);
        Self {
            current,
            total,
            percentage: ((current as f64 / total as f64) * 100.0).round() as u32,
        }
    }
}

/// Summary of one diagnostic run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiagnosticResult {
    pub id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub scope: String,
    pub total: usize,
    pub correct: Vec<Item>,
    pub incorrect: Vec<Item>,
    pub accuracy_percent: u32,
    pub average_time_secs: u32,
}

// ============================================================================
// Settings and Scopes
// ============================================================================

/// Which items a learning session draws from (settings form)
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ScopeKind {
    AllNew,
    CustomRange,
    ErrorBook,
    NeedsReview,
    Familiar,
    Mastered,
    SequentialReview,
    RandomReview,
    Favorites,
}

impl std::str::FromStr for ScopeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new" | "all-new" => Ok(ScopeKind::AllNew),
            "range" | "custom-range" => Ok(ScopeKind::CustomRange),
            "errors" | "error-book" => Ok(ScopeKind::ErrorBook),
            "needs-review" | "review" => Ok(ScopeKind::NeedsReview),
            "familiar" => Ok(ScopeKind::Familiar),
            "mastered" => Ok(ScopeKind::Mastered),
            "sequential" | "sequential-review" => Ok(ScopeKind::SequentialReview),
            "random" | "random-review" => Ok(ScopeKind::RandomReview),
            "favorites" => Ok(ScopeKind::Favorites),
            other => Err(format!("unknown scope: {}", other)),
        }
    }
}

/// Fully resolved selection request for `Engine::start_session`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LearningScope {
    AllNew { start: u32, count: usize },
    CustomRange { start: u32, end: Option<u32>, count: usize },
    ErrorBook { count: usize },
    ByMastery { mastery: Mastery, count: usize },
    SequentialReview { count: usize },
    RandomReview { count: usize },
    Favorites { count: usize },
}

impl LearningScope {
    fn from_kind(kind: ScopeKind, start: u32, end: Option<u32>, count: usize) -> Self {
        match kind {
            ScopeKind::AllNew => LearningScope::AllNew { start, count },
            ScopeKind::CustomRange => LearningScope::CustomRange { start, end, count },
            ScopeKind::ErrorBook => LearningScope::ErrorBook { count },
            ScopeKind::NeedsReview => LearningScope::ByMastery {
                mastery: Mastery::NeedsReview,
                count,
            },
            ScopeKind::Familiar => LearningScope::ByMastery {
                mastery: Mastery::Familiar,
                count,
            },
            ScopeKind::Mastered => LearningScope::ByMastery {
                mastery: Mastery::Mastered,
                count,
            },
            ScopeKind::SequentialReview => LearningScope::SequentialReview { count },
            ScopeKind::RandomReview => LearningScope::RandomReview { count },
            ScopeKind::Favorites => LearningScope::Favorites { count },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LearningSettings {
    pub learn_count: usize,
    pub review_count: usize,
    pub quiz_mode: QuizMode,
    pub scope: ScopeKind,
    pub show_tones: bool,
    pub countdown_secs: u32,
    pub start_sequence: u32,
    pub end_sequence: Option<u32>,
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self {
            learn_count: 10,
            review_count: 15,
            quiz_mode: QuizMode::Mixed,
            scope: ScopeKind::AllNew,
            show_tones: true,
            countdown_secs: 30,
            start_sequence: 1,
            end_sequence: None,
        }
    }
}

impl LearningSettings {
    pub fn learning_scope(&self) -> LearningScope {
        LearningScope::from_kind(
            self.scope,
            self.start_sequence,
            self.end_sequence,
            self.learn_count,
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReviewSettings {
    pub review_count: usize,
    pub quiz_mode: QuizMode,
    pub scope: ScopeKind,
    pub countdown_secs: u32,
    pub show_tones: bool,
    pub shuffle_options: bool,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            review_count: 15,
            quiz_mode: QuizMode::Mixed,
            scope: ScopeKind::NeedsReview,
            countdown_secs: 30,
            show_tones: true,
            shuffle_options: true,
        }
    }
}

impl ReviewSettings {
    pub fn learning_scope(&self) -> LearningScope {
        LearningScope::from_kind(self.scope, 1, None, self.review_count)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiagnosticSettings {
    pub count: usize,
    pub range_start: u32,
    pub range_end: u32,
    pub countdown_secs: u32,
}

impl Default for DiagnosticSettings {
    fn default() -> Self {
        Self {
            count: 50,
            range_start: 1,
            range_end: 500,
            countdown_secs: 15,
        }
    }
}

// ============================================================================
// User Statistics and Persisted Blob
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct UserStats {
    pub total_items: usize,
    pub mastered_items: usize,
    /// Fraction of all test attempts answered correctly
    pub overall_accuracy: f64,
    pub days_studied: u32,
    pub streak_days: u32,
    pub last_study_date: Option<NaiveDate>,
}

impl UserStats {
    pub fn accuracy_percent(&self) -> u32 {
        (self.overall_accuracy * 100.0).round() as u32
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserInfo {
    pub name: String,
    pub student_id: String,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Everything persisted per learner in one document
///
/// Every section is optional on load and falls back to its default.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct UserBlob {
    pub user_info: Option<UserInfo>,
    pub learning_records: BTreeMap<String, LearningRecord>,
    pub user_stats: UserStats,
    pub settings: LearningSettings,
    pub review_settings: ReviewSettings,
    pub diagnostic_settings: DiagnosticSettings,
    pub favorites: Vec<String>,
}
