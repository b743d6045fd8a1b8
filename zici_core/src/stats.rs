//! Aggregate learner statistics and date helpers.

use crate::mastery::MasteryTracker;
use crate::{Mastery, UserStats};
use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Calendar date used for study-day bookkeeping (UTC)
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// `YYYY-MM-DD` form of a timestamp
pub fn format_date(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d").to_string()
}

/// Short human form of an optional timestamp
pub fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => ts.format("%Y-%m-%d %H:%M").to_string(),
        None => "never".to_string(),
    }
}

/// Recompute statistics after a finished quiz
///
/// Totals come from the tracker. Study days only move when `today` differs
/// from the stored last study date: exactly one day later extends the
/// streak, any other gap (or no previous date) restarts it at 1.
pub fn recompute(tracker: &MasteryTracker, previous: &UserStats, today: NaiveDate) -> UserStats {
    let (tested, correct) = tracker.totals();
    let mastered = tracker
        .records()
        .filter(|r| r.mastery == Mastery::Mastered)
        .count();

    let mut days_studied = previous.days_studied;
    let mut streak_days = previous.streak_days;

    if previous.last_study_date != Some(today) {
        days_studied += 1;
        streak_days = match previous.last_study_date {
            Some(last) if last + Duration::days(1) == today => streak_days + 1,
            _ => 1,
        };
    }

    UserStats {
        total_items: tracker.len(),
        mastered_items: mastered,
        overall_accuracy: if tested > 0 {
            correct as f64 / tested as f64
        } else {
            0.0
        },
        days_studied,
        streak_days,
        last_study_date: Some(today),
    }
}
