//! Belt journey: earned vs studied rank and readiness for the next grading

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::aggregator::ProgressStatistics;
use crate::config::ReadinessConfig;
use crate::model::{GradingRecord, Profile, Rank, StudySession};

/// Overall readiness at which a student counts as ready to grade
pub const READY_THRESHOLD: f64 = 0.8;
/// Window used to measure recent study velocity
const VELOCITY_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    /// Studying material above the belt actually held
    StudyingAhead,
    /// Holding a higher belt while reviewing lower material
    ReviewingBelow,
}

impl MismatchKind {
    pub fn message(&self, studying: Rank, earned: Rank) -> String {
        match self {
            MismatchKind::StudyingAhead => format!(
                "Studying {} material while holding {}",
                studying.label(),
                earned.label()
            ),
            MismatchKind::ReviewingBelow => format!(
                "Reviewing {} material while holding {}",
                studying.label(),
                earned.label()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Readiness {
    /// Rank the student would grade for next; `None` at the top rank
    pub target_rank: Option<Rank>,
    pub terminology_ratio: f64,
    pub pattern_ratio: f64,
    pub study_time_ratio: f64,
    pub overall: f64,
    pub is_ready: bool,
    pub estimated_ready_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeltJourney {
    pub studying_rank: Rank,
    pub earned_rank: Rank,
    pub has_mismatch: bool,
    pub mismatch: Option<MismatchKind>,
    pub mismatch_message: Option<String>,
    pub readiness: Readiness,
    pub days_at_current_rank: i64,
    pub passed_gradings: usize,
}

pub fn calculate(
    profile: &Profile,
    gradings: &[GradingRecord],
    sessions: &[StudySession],
    statistics: &ProgressStatistics,
    config: &ReadinessConfig,
    now: DateTime<Utc>,
    today: NaiveDate,
) -> BeltJourney {
    let studying = profile.current_rank;
    let passed: Vec<&GradingRecord> = gradings.iter().filter(|g| g.passed).collect();

    // Lowest sort order is the most advanced belt
    let earned = passed
        .iter()
        .map(|g| g.rank_achieved)
        .min()
        .unwrap_or(studying);

    let mismatch = if !passed.is_empty() && earned != studying {
        Some(if studying.is_more_advanced_than(&earned) {
            MismatchKind::StudyingAhead
        } else {
            MismatchKind::ReviewingBelow
        })
    } else {
        None
    };

    let since = passed
        .iter()
        .map(|g| g.graded_at)
        .max()
        .unwrap_or(profile.created_at);

    BeltJourney {
        studying_rank: studying,
        earned_rank: earned,
        has_mismatch: mismatch.is_some(),
        mismatch,
        mismatch_message: mismatch.map(|m| m.message(studying, earned)),
        readiness: readiness(studying, sessions, statistics, config, now, today),
        days_at_current_rank: (now - since).num_days().max(0),
        passed_gradings: passed.len(),
    }
}

fn readiness(
    studying: Rank,
    sessions: &[StudySession],
    statistics: &ProgressStatistics,
    config: &ReadinessConfig,
    now: DateTime<Utc>,
    today: NaiveDate,
) -> Readiness {
    let mastery = &statistics.belt_mastery;
    let study_hours = statistics.overall.total_study_secs as f64 / 3600.0;

    let terminology_ratio = capped_ratio(mastery.terminology_ratio, config.terminology_threshold);
    let pattern_ratio = capped_ratio(mastery.pattern_ratio, config.pattern_threshold);
    let study_time_ratio = capped_ratio(study_hours, config.min_study_hours);
    let overall = (terminology_ratio + pattern_ratio + study_time_ratio) / 3.0;

    let recent = sessions
        .iter()
        .filter(|s| s.started_at >= now - Duration::days(VELOCITY_WINDOW_DAYS))
        .count();

    Readiness {
        target_rank: studying.next(),
        terminology_ratio,
        pattern_ratio,
        study_time_ratio,
        overall,
        is_ready: overall >= READY_THRESHOLD,
        estimated_ready_date: estimate_ready_date(overall, recent, sessions.len(), today),
    }
}

/// `value / threshold` capped at 1.0; a non-positive threshold is always met
fn capped_ratio(value: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return 1.0;
    }
    (value / threshold).clamp(0.0, 1.0)
}

/// Project the current pace forward: each session has so far added
/// `overall / lifetime_sessions` readiness, and recent sessions happen at
/// `recent_sessions / 30` per day.
pub fn estimate_ready_date(
    overall: f64,
    recent_sessions: usize,
    lifetime_sessions: usize,
    today: NaiveDate,
) -> Option<NaiveDate> {
    if !(overall > 0.0 && overall < 1.0) || recent_sessions == 0 || lifetime_sessions == 0 {
        return None;
    }

    let velocity = recent_sessions as f64 / VELOCITY_WINDOW_DAYS as f64;
    let gain_per_session = overall / lifetime_sessions as f64;
    let days = ((1.0 - overall) / (velocity * gain_per_session)).ceil();
    if !days.is_finite() || days > i32::MAX as f64 {
        return None;
    }

    today.checked_add_signed(Duration::days(days as i64))
}
