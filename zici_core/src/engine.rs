//! Session engine: the learning state machine.
//!
//! The engine owns everything a session touches: the shared catalog, the
//! learner's mastery records, error book, statistics and settings, the
//! current selection and question lists, and a save sink. It moves through
//!
//! - settings -> learning -> quiz -> statistics (traditional track)
//! - diagnostic-settings -> diagnostic -> diagnostic-result
//!   -> diagnostic-learning / diagnostic-review (see [`diagnostic`])
//!
//! Every mutation of persisted state submits a full snapshot to the save
//! sink and then polls for finished saves. Observers read state through
//! getters and drain the event log with [`Engine::drain_events`].

mod diagnostic;

use crate::error_book::ErrorLedger;
use crate::mastery::{Attempt, MasteryTracker};
use crate::saver::{BackgroundSaver, InlineSaver, SaveJob, SaveOutcome, SaveSink};
use crate::store::{MemoryStore, UserStore};
use crate::{
    quiz, stats, Catalog, Config, DiagnosticResult, DiagnosticSettings, ErrorBookEntry,
    ErrorSource, Item, LearningMode, LearningScope, LearningSettings, Mastery, Phase, Progress,
    QuizMode, QuizQuestion, QuizResult, ReviewCounts, ReviewSettings, UserBlob, UserInfo,
    UserStats,
};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Whether the last save of every document succeeded
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersistenceStatus {
    Synced,
    /// Working from memory only; the next successful save recovers
    Degraded { reason: String },
}

impl PersistenceStatus {
    pub fn is_synced(&self) -> bool {
        matches!(self, PersistenceStatus::Synced)
    }
}

/// Something observable that happened inside the engine
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    PhaseChanged { from: Phase, to: Phase },
    SessionStarted { items: usize },
    Studied { glyph: String },
    Answered { glyph: String, correct: bool },
    ErrorRecorded { glyph: String, source: ErrorSource },
    ErrorRemoved { glyph: String },
    FavoriteToggled { glyph: String, favorite: bool },
    StatsUpdated(UserStats),
    DiagnosticCompleted { accuracy_percent: u32 },
    UserReset,
    PersistenceDegraded { reason: String },
    PersistenceRestored,
}

/// Construction options
#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub untested_is_unstudied: bool,
    /// Settings for learners with no saved settings
    pub default_settings: LearningSettings,
    pub default_diagnostic: DiagnosticSettings,
    /// Save on a worker thread instead of inline
    pub background_saves: bool,
    /// Fixed seed for reproducible selection and option order
    pub seed: Option<u64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            untested_is_unstudied: false,
            default_settings: LearningSettings::default(),
            default_diagnostic: DiagnosticSettings::default(),
            background_saves: true,
            seed: None,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            untested_is_unstudied: config.mastery.untested_is_unstudied,
            default_settings: config.learning.clone(),
            default_diagnostic: config.diagnostic.clone(),
            ..Self::default()
        }
    }
}

pub struct Engine {
    catalog: Arc<Catalog>,
    user_id: String,
    user_info: Option<UserInfo>,

    tracker: MasteryTracker,
    ledger: ErrorLedger,
    stats: UserStats,
    settings: LearningSettings,
    review_settings: ReviewSettings,
    diagnostic_settings: DiagnosticSettings,
    favorites: Vec<String>,

    phase: Phase,
    mode: LearningMode,
    items: Vec<Item>,
    item_index: usize,
    questions: Vec<QuizQuestion>,
    question_index: usize,
    results: Vec<QuizResult>,
    quiz_mode: QuizMode,
    error_source: ErrorSource,
    diagnostic_result: Option<DiagnosticResult>,

    rng: Box<dyn RngCore + Send>,
    saver: Box<dyn SaveSink>,
    failed_saves: BTreeSet<&'static str>,
    persistence: PersistenceStatus,
    events: Vec<EngineEvent>,
}

impl Engine {
    /// Fresh learner backed by an in-memory store
    pub fn in_memory(catalog: Arc<Catalog>, options: &EngineOptions) -> Self {
        let saver = InlineSaver::new(Box::new(MemoryStore::new()));
        Self::with_saver(catalog, "guest", Box::new(saver), options)
    }

    /// Fresh learner with no history, saving through `saver`
    pub fn with_saver(
        catalog: Arc<Catalog>,
        user_id: impl Into<String>,
        saver: Box<dyn SaveSink>,
        options: &EngineOptions,
    ) -> Self {
        let rng: Box<dyn RngCore + Send> = match options.seed {
            Some(seed) => Box::new(StdRng::seed_from_u64(seed)),
            None => Box::new(StdRng::from_entropy()),
        };

        Self {
            catalog,
            user_id: user_id.into(),
            user_info: None,
            tracker: MasteryTracker::new(options.untested_is_unstudied),
            ledger: ErrorLedger::new(),
            stats: UserStats::default(),
            settings: options.default_settings.clone(),
            review_settings: ReviewSettings::default(),
            diagnostic_settings: options.default_diagnostic.clone(),
            favorites: Vec::new(),
            phase: Phase::Settings,
            mode: LearningMode::Traditional,
            items: Vec::new(),
            item_index: 0,
            questions: Vec::new(),
            question_index: 0,
            results: Vec::new(),
            quiz_mode: options.default_settings.quiz_mode,
            error_source: ErrorSource::Learning,
            diagnostic_result: None,
            rng,
            saver,
            failed_saves: BTreeSet::new(),
            persistence: PersistenceStatus::Synced,
            events: Vec::new(),
        }
    }

    /// Load a learner from `store` and keep saving to it
    ///
    /// A failed load starts the learner fresh in degraded mode rather than
    /// failing; the first successful save of each document recovers.
    pub fn open(
        catalog: Arc<Catalog>,
        user_id: impl Into<String>,
        store: Box<dyn UserStore>,
        options: &EngineOptions,
    ) -> Self {
        let user_id = user_id.into();
        let mut load_errors = Vec::new();

        let blob = store.load_user_blob(&user_id).unwrap_or_else(|e| {
            load_errors.push(("user data", e.to_string()));
            None
        });
        let entries = store.load_error_entries(&user_id).unwrap_or_else(|e| {
            load_errors.push(("error book", e.to_string()));
            Vec::new()
        });

        let saver: Box<dyn SaveSink> = if options.background_saves {
            Box::new(BackgroundSaver::spawn(store))
        } else {
            Box::new(InlineSaver::new(store))
        };

        let mut engine = Self::with_saver(catalog, user_id, saver, options);
        match blob {
            Some(blob) => engine.hydrate(blob),
            None => tracing::info!("No saved data for {}, starting fresh", engine.user_id),
        }
        engine.hydrate_error_book(entries);

        for (kind, reason) in load_errors {
            tracing::warn!("Loading {} for {} failed: {}", kind, engine.user_id, reason);
            engine.failed_saves.insert(kind);
            engine.persistence = PersistenceStatus::Degraded { reason };
        }
        engine
    }

    /// Replace learner state with a persisted blob
    ///
    /// Records and favorites for glyphs outside the catalog are dropped.
    pub fn hydrate(&mut self, blob: UserBlob) {
        let skipped = self.tracker.hydrate(blob.learning_records, &self.catalog);
        if skipped > 0 {
            tracing::debug!("Dropped {} records for unknown glyphs", skipped);
        }

        let mut seen = HashSet::new();
        self.favorites = blob
            .favorites
            .into_iter()
            .filter(|g| self.catalog.by_glyph(g).is_some() && seen.insert(g.clone()))
            .collect();

        self.user_info = blob.user_info;
        self.stats = blob.user_stats;
        self.settings = blob.settings;
        self.review_settings = blob.review_settings;
        self.diagnostic_settings = blob.diagnostic_settings;
        self.quiz_mode = self.settings.quiz_mode;

        tracing::info!(
            "Loaded {} learning records and {} favorites for {}",
            self.tracker.len(),
            self.favorites.len(),
            self.user_id
        );
    }

    pub fn hydrate_error_book(&mut self, entries: Vec<ErrorBookEntry>) {
        self.ledger.hydrate(entries, &self.catalog);
    }

    /// Swap the random source (tests pin a seed this way)
    pub fn set_rng(&mut self, rng: impl RngCore + Send + 'static) {
        self.rng = Box::new(rng);
    }

    pub fn set_user_info(&mut self, name: impl Into<String>, student_id: impl Into<String>) {
        self.user_info = Some(UserInfo {
            name: name.into(),
            student_id: student_id.into(),
            last_activity: None,
        });
        self.save_user_data();
    }

    /// Snapshot of everything persisted in the user document
    pub fn to_blob(&self) -> UserBlob {
        UserBlob {
            user_info: self.user_info.clone().map(|mut info| {
                info.last_activity = Some(Utc::now());
                info
            }),
            learning_records: self.tracker.to_map(),
            user_stats: self.stats.clone(),
            settings: self.settings.clone(),
            review_settings: self.review_settings.clone(),
            diagnostic_settings: self.diagnostic_settings.clone(),
            favorites: self.favorites.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Select items for `scope` and enter the learning phase
    ///
    /// An empty selection still starts a session; callers check
    /// `items().is_empty()` to show that there is nothing to learn.
    pub fn start_session(&mut self, scope: LearningScope) -> usize {
        let quiz_mode = self.settings.quiz_mode;
        self.begin_learning(scope, quiz_mode, ErrorSource::Learning)
    }

    /// Start a session from the saved learning settings
    pub fn start_session_from_settings(&mut self) -> usize {
        let scope = self.settings.learning_scope();
        self.start_session(scope)
    }

    /// Start a review session from the saved review settings
    pub fn start_review_session(&mut self) -> usize {
        let scope = self.review_settings.learning_scope();
        let quiz_mode = self.review_settings.quiz_mode;
        self.begin_learning(scope, quiz_mode, ErrorSource::Review)
    }

    fn begin_learning(
        &mut self,
        scope: LearningScope,
        quiz_mode: QuizMode,
        error_source: ErrorSource,
    ) -> usize {
        let items = self.select_items(&scope);
        if items.is_empty() {
            tracing::warn!("No items selected for {:?}", scope);
        } else {
            tracing::info!("Starting session with {} items ({:?})", items.len(), scope);
        }

        self.mode = LearningMode::Traditional;
        self.diagnostic_result = None;
        self.load_learning(items, quiz_mode, error_source);
        self.set_phase(Phase::Learning);
        self.items.len()
    }

    fn load_learning(&mut self, items: Vec<Item>, quiz_mode: QuizMode, error_source: ErrorSource) {
        self.events.push(EngineEvent::SessionStarted { items: items.len() });
        self.items = items;
        self.item_index = 0;
        self.questions.clear();
        self.question_index = 0;
        self.results.clear();
        self.quiz_mode = quiz_mode;
        self.error_source = error_source;
    }

    fn select_items(&mut self, scope: &LearningScope) -> Vec<Item> {
        let catalog = Arc::clone(&self.catalog);
        let tracker = &self.tracker;
        // Later duplicates of a glyph never get their own record
        let owns_glyph =
            |item: &Item| catalog.by_glyph(&item.glyph).is_some_and(|o| std::ptr::eq(o, item));

        match *scope {
            LearningScope::AllNew { start, count } => catalog
                .all()
                .iter()
                .filter(|item| item.sequence >= start && owns_glyph(*item))
                .filter(|item| !tracker.has_record(&item.glyph))
                .take(count)
                .cloned()
                .collect(),
            LearningScope::CustomRange { start, end, count } => {
                let end = end.unwrap_or_else(|| catalog.last_sequence());
                catalog
                    .by_sequence_range(start, end)
                    .into_iter()
                    .take(count)
                    .cloned()
                    .collect()
            }
            LearningScope::ErrorBook { count } => {
                let mut items = self.ledger.list_for_review(&catalog);
                items.truncate(count);
                items
            }
            LearningScope::ByMastery { mastery, count } => catalog
                .all()
                .iter()
                .filter(|item| owns_glyph(*item) && tracker.has_record(&item.glyph))
                .filter(|item| tracker.mastery_of(&item.glyph) == mastery)
                .take(count)
                .cloned()
                .collect(),
            LearningScope::SequentialReview { count } => catalog
                .all()
                .iter()
                .filter(|item| owns_glyph(*item) && tracker.has_record(&item.glyph))
                .take(count)
                .cloned()
                .collect(),
            LearningScope::RandomReview { count } => {
                let studied: Vec<&Item> = catalog
                    .all()
                    .iter()
                    .filter(|item| owns_glyph(*item) && tracker.has_record(&item.glyph))
                    .collect();
                let mut items: Vec<Item> = studied
                    .choose_multiple(&mut *self.rng, count)
                    .map(|item| (*item).clone())
                    .collect();
                items.shuffle(&mut *self.rng);
                items
            }
            LearningScope::Favorites { count } => self
                .favorites
                .iter()
                .filter_map(|glyph| catalog.by_glyph(glyph))
                .take(count)
                .cloned()
                .collect(),
        }
    }

    /// Record a study of the current item and move on
    ///
    /// Past the last item, questions are built and the quiz begins.
    pub fn advance_learning(&mut self) {
        if !self.phase.is_learning() {
            tracing::debug!("advance_learning ignored in {:?}", self.phase);
            return;
        }

        if let Some(item) = self.items.get(self.item_index) {
            let glyph = item.glyph.clone();
            if self
                .tracker
                .record_attempt(&self.catalog, &glyph, Attempt::Study, Utc::now())
                .is_some()
            {
                self.events.push(EngineEvent::Studied { glyph });
                self.save_user_data();
            }
        }

        self.item_index += 1;
        if self.item_index >= self.items.len() {
            self.start_quiz();
        }
    }

    pub fn retreat_learning(&mut self) {
        if self.phase.is_learning() {
            self.item_index = self.item_index.saturating_sub(1);
        }
    }

    fn start_quiz(&mut self) {
        self.questions =
            quiz::build_questions(&self.items, self.quiz_mode, &self.catalog, &mut *self.rng);
        self.question_index = 0;
        self.results.clear();
        tracing::info!("Quiz ready with {} questions", self.questions.len());
        self.set_phase(Phase::Quiz);
    }

    /// Score `selected` against the current question
    ///
    /// Returns None when there is no current question or it was already
    /// answered.
    pub fn submit_answer(&mut self, selected: &str, time_spent_secs: f64) -> Option<bool> {
        if !self.phase.is_quiz() {
            return None;
        }
        let question = self.questions.get(self.question_index)?;
        if self.results.iter().any(|r| r.question_id == question.id) {
            tracing::debug!("Question {} already answered", question.id);
            return None;
        }
        let item = self.items.get(self.question_index)?.clone();

        let is_correct = selected == question.correct_answer;
        self.results.push(QuizResult {
            question_id: question.id.clone(),
            glyph: item.glyph.clone(),
            answer: selected.to_string(),
            correct_answer: question.correct_answer.clone(),
            is_correct,
            time_spent_secs: time_spent_secs.max(0.0),
            answered_at: Utc::now(),
        });

        let now = Utc::now();
        let attempt = Attempt::Test {
            correct: is_correct,
            answer: Some(selected),
        };
        self.tracker
            .record_attempt(&self.catalog, &item.glyph, attempt, now);
        self.events.push(EngineEvent::Answered {
            glyph: item.glyph.clone(),
            correct: is_correct,
        });

        // Diagnostic misses reach the error book when the run is analysed
        if !is_correct && self.phase != Phase::Diagnostic {
            self.record_error(&item, self.error_source);
            self.save_error_book();
        }
        self.save_user_data();

        Some(is_correct)
    }

    /// Move to the next question, finishing the quiz past the last one
    pub fn advance_quiz(&mut self) {
        if !self.phase.is_quiz() {
            tracing::debug!("advance_quiz ignored in {:?}", self.phase);
            return;
        }

        self.question_index += 1;
        if self.question_index < self.questions.len() {
            return;
        }

        match self.phase {
            Phase::Diagnostic => {
                self.complete_analysis();
            }
            _ => self.finish_quiz(),
        }
    }

    fn finish_quiz(&mut self) {
        self.stats = stats::recompute(&self.tracker, &self.stats, stats::today());
        tracing::info!(
            "Quiz finished: {}/{} correct, overall accuracy {}%",
            self.results.iter().filter(|r| r.is_correct).count(),
            self.questions.len(),
            self.stats.accuracy_percent()
        );
        self.events.push(EngineEvent::StatsUpdated(self.stats.clone()));
        self.save_user_data();
        self.set_phase(Phase::Statistics);
    }

    /// Drop the session and return to settings
    pub fn reset(&mut self) {
        self.items.clear();
        self.item_index = 0;
        self.questions.clear();
        self.question_index = 0;
        self.results.clear();
        self.set_phase(Phase::Settings);
    }

    fn record_error(&mut self, item: &Item, source: ErrorSource) {
        self.ledger.record_error(item, source, Utc::now());
        self.events.push(EngineEvent::ErrorRecorded {
            glyph: item.glyph.clone(),
            source,
        });
    }

    fn set_phase(&mut self, to: Phase) {
        let from = self.phase;
        self.phase = to;
        if from != to {
            tracing::info!("Phase {:?} -> {:?}", from, to);
            self.events.push(EngineEvent::PhaseChanged { from, to });
        }
    }

    // ------------------------------------------------------------------
    // Learner data
    // ------------------------------------------------------------------

    pub fn update_settings(&mut self, update: impl FnOnce(&mut LearningSettings)) {
        update(&mut self.settings);
        self.save_user_data();
    }

    pub fn update_review_settings(&mut self, update: impl FnOnce(&mut ReviewSettings)) {
        update(&mut self.review_settings);
        self.save_user_data();
    }

    pub fn update_diagnostic_settings(&mut self, update: impl FnOnce(&mut DiagnosticSettings)) {
        update(&mut self.diagnostic_settings);
        self.save_user_data();
    }

    /// Flip the favorite flag; returns the new state
    ///
    /// Glyphs outside the catalog cannot be favorited.
    pub fn toggle_favorite(&mut self, glyph: &str) -> bool {
        if self.catalog.by_glyph(glyph).is_none() {
            tracing::debug!("Cannot favorite unknown glyph '{}'", glyph);
            return false;
        }

        let favorite = match self.favorites.iter().position(|g| g == glyph) {
            Some(idx) => {
                self.favorites.remove(idx);
                false
            }
            None => {
                self.favorites.push(glyph.to_string());
                true
            }
        };
        self.events.push(EngineEvent::FavoriteToggled {
            glyph: glyph.to_string(),
            favorite,
        });
        self.save_user_data();
        favorite
    }

    pub fn is_favorite(&self, glyph: &str) -> bool {
        self.favorites.iter().any(|g| g == glyph)
    }

    /// Favorited items in the order they were added
    pub fn favorite_items(&self) -> Vec<&Item> {
        self.favorites
            .iter()
            .filter_map(|g| self.catalog.by_glyph(g))
            .collect()
    }

    pub fn remove_error_entry(&mut self, glyph: &str) -> bool {
        if self.ledger.remove(glyph).is_none() {
            return false;
        }
        self.events.push(EngineEvent::ErrorRemoved {
            glyph: glyph.to_string(),
        });
        self.save_error_book();
        true
    }

    pub fn review_counts(&self) -> ReviewCounts {
        self.tracker.review_counts()
    }

    /// Forget all progress: records, stats, favorites and the error book
    ///
    /// Settings and user info are kept.
    pub fn reset_user(&mut self) {
        self.tracker.clear();
        self.ledger.clear();
        self.stats = UserStats::default();
        self.favorites.clear();
        self.diagnostic_result = None;
        self.mode = LearningMode::Traditional;
        self.reset();
        tracing::info!("Reset all progress for {}", self.user_id);
        self.events.push(EngineEvent::UserReset);
        self.save_user_data();
        self.save_error_book();
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    fn save_user_data(&mut self) {
        let job = SaveJob::UserBlob {
            user_id: self.user_id.clone(),
            blob: Box::new(self.to_blob()),
        };
        self.saver.submit(job);
        self.poll_persistence();
    }

    fn save_error_book(&mut self) {
        let job = SaveJob::ErrorEntries {
            user_id: self.user_id.clone(),
            entries: self.ledger.snapshot(),
        };
        self.saver.submit(job);
        self.poll_persistence();
    }

    /// Apply finished saves and report the resulting status
    pub fn poll_persistence(&mut self) -> &PersistenceStatus {
        let outcomes = self.saver.poll();
        self.apply_outcomes(outcomes);
        &self.persistence
    }

    /// Wait for every submitted save
    pub fn flush(&mut self) -> &PersistenceStatus {
        let outcomes = self.saver.flush();
        self.apply_outcomes(outcomes);
        &self.persistence
    }

    pub fn persistence_status(&self) -> &PersistenceStatus {
        &self.persistence
    }

    fn apply_outcomes(&mut self, outcomes: Vec<SaveOutcome>) {
        for outcome in outcomes {
            match outcome.result {
                Ok(()) => {
                    self.failed_saves.remove(outcome.kind);
                    if self.failed_saves.is_empty() && !self.persistence.is_synced() {
                        tracing::info!("Persistence restored for {}", self.user_id);
                        self.persistence = PersistenceStatus::Synced;
                        self.events.push(EngineEvent::PersistenceRestored);
                    }
                }
                Err(reason) => {
                    self.failed_saves.insert(outcome.kind);
                    if self.persistence.is_synced() {
                        tracing::warn!(
                            "Saving {} failed, continuing in memory: {}",
                            outcome.kind,
                            reason
                        );
                        self.events.push(EngineEvent::PersistenceDegraded {
                            reason: reason.clone(),
                        });
                    }
                    self.persistence = PersistenceStatus::Degraded { reason };
                }
            }
        }
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn user_info(&self) -> Option<&UserInfo> {
        self.user_info.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mode(&self) -> LearningMode {
        self.mode
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn questions(&self) -> &[QuizQuestion] {
        &self.questions
    }

    pub fn results(&self) -> &[QuizResult] {
        &self.results
    }

    pub fn current_item(&self) -> Option<&Item> {
        if self.phase.is_learning() {
            self.items.get(self.item_index)
        } else {
            None
        }
    }

    pub fn current_question(&self) -> Option<&QuizQuestion> {
        if self.phase.is_quiz() {
            self.questions.get(self.question_index)
        } else {
            None
        }
    }

    pub fn learning_progress(&self) -> Progress {
        Progress::at(self.item_index, self.items.len())
    }

    pub fn quiz_progress(&self) -> Progress {
        Progress::at(self.question_index, self.questions.len())
    }

    /// Progress through whichever list the current phase steps through
    pub fn session_progress(&self) -> Progress {
        if self.phase.is_learning() {
            self.learning_progress()
        } else if self.phase.is_quiz() {
            self.quiz_progress()
        } else {
            Progress::default()
        }
    }

    pub fn tracker(&self) -> &MasteryTracker {
        &self.tracker
    }

    pub fn mastery_of(&self, glyph: &str) -> Mastery {
        self.tracker.mastery_of(glyph)
    }

    pub fn ledger(&self) -> &ErrorLedger {
        &self.ledger
    }

    pub fn stats(&self) -> &UserStats {
        &self.stats
    }

    pub fn settings(&self) -> &LearningSettings {
        &self.settings
    }

    pub fn review_settings(&self) -> &ReviewSettings {
        &self.review_settings
    }

    pub fn diagnostic_settings(&self) -> &DiagnosticSettings {
        &self.diagnostic_settings
    }

    pub fn diagnostic_result(&self) -> Option<&DiagnosticResult> {
        self.diagnostic_result.as_ref()
    }
}
