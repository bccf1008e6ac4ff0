//! Raw history to statistics
//!
//! Everything here is a pure function of the sessions and item progress
//! handed in, the calendar day considered "today" and the UTC offset that
//! defines where one day ends and the next begins.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{ItemKind, ItemProgress, SessionKind, StudySession};

/// Session kinds broken out individually. Mixed sessions only count overall.
const TRACKED_KINDS: [SessionKind; 3] = [SessionKind::Flashcards, SessionKind::Testing, SessionKind::Patterns];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallStats {
    pub total_study_secs: i64,
    pub session_count: usize,
    pub items_studied: u64,
    pub tracked_items: usize,
    /// Mean of per-session accuracy
    pub average_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeStats {
    pub kind: SessionKind,
    pub session_count: usize,
    pub items_studied: u64,
    pub correct_answers: u64,
    pub accuracy: f64,
    pub average_duration_secs: f64,
    pub total_secs: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakStats {
    /// Consecutive study days ending today, 0 without a session today
    pub current: u32,
    pub longest: u32,
    pub last_study_date: Option<NaiveDate>,
    pub active_days: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeltMastery {
    pub terminology_mastered: usize,
    pub terminology_total: usize,
    pub pattern_mastered: usize,
    pub pattern_total: usize,
    pub terminology_ratio: f64,
    pub pattern_ratio: f64,
    pub combined_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub total_secs: i64,
    pub accuracy: f64,
    pub session_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressStatistics {
    pub overall: OverallStats,
    pub per_kind: Vec<ModeStats>,
    pub streaks: StreakStats,
    pub belt_mastery: BeltMastery,
    pub last_7_days: Vec<DailyPoint>,
    pub last_30_days: Vec<DailyPoint>,
}

impl ProgressStatistics {
    pub fn kind(&self, kind: SessionKind) -> Option<&ModeStats> {
        self.per_kind.iter().find(|m| m.kind == kind)
    }
}

/// Calendar day of `ts` as seen at `offset`
pub fn local_day(ts: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    ts.with_timezone(&offset).date_naive()
}

pub fn aggregate(
    sessions: &[StudySession],
    progress: &[ItemProgress],
    today: NaiveDate,
    offset: FixedOffset,
) -> ProgressStatistics {
    let study_days: BTreeSet<NaiveDate> = sessions.iter().map(|s| local_day(s.started_at, offset)).collect();

    ProgressStatistics {
        overall: overall(sessions, progress),
        per_kind: TRACKED_KINDS.iter().map(|k| mode_stats(*k, sessions)).collect(),
        streaks: streaks(&study_days, today),
        belt_mastery: belt_mastery(progress),
        last_7_days: daily_series(sessions, today, 7, offset),
        last_30_days: daily_series(sessions, today, 30, offset),
    }
}

fn overall(sessions: &[StudySession], progress: &[ItemProgress]) -> OverallStats {
    OverallStats {
        total_study_secs: total_secs(sessions.iter()),
        session_count: sessions.len(),
        items_studied: sessions.iter().map(|s| s.items_studied as u64).sum(),
        tracked_items: progress.len(),
        average_accuracy: mean(sessions.iter().map(|s| s.accuracy())),
    }
}

fn mode_stats(kind: SessionKind, sessions: &[StudySession]) -> ModeStats {
    let of_kind: Vec<&StudySession> = sessions.iter().filter(|s| s.kind == kind).collect();
    let total = total_secs(of_kind.iter().copied());

    ModeStats {
        kind,
        session_count: of_kind.len(),
        items_studied: of_kind.iter().map(|s| s.items_studied as u64).sum(),
        correct_answers: of_kind.iter().map(|s| s.correct_answers as u64).sum(),
        accuracy: mean(of_kind.iter().map(|s| s.accuracy())),
        average_duration_secs: if of_kind.is_empty() {
            0.0
        } else {
            total as f64 / of_kind.len() as f64
        },
        total_secs: total,
    }
}

/// Walk the sorted study days once. Two days belong to the same run when
/// they are exactly one calendar day apart.
pub fn streaks(study_days: &BTreeSet<NaiveDate>, today: NaiveDate) -> StreakStats {
    let mut current = 0;
    let mut longest = 0;
    let mut run = 0;
    let mut prev: Option<NaiveDate> = None;

    for &day in study_days {
        run = match prev {
            Some(p) if day - p == Duration::days(1) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        if day == today {
            current = run;
        }
        prev = Some(day);
    }

    StreakStats {
        current,
        longest,
        last_study_date: prev,
        active_days: study_days.len(),
    }
}

fn belt_mastery(progress: &[ItemProgress]) -> BeltMastery {
    let count = |kind: ItemKind| {
        let of_kind = progress.iter().filter(|p| p.kind == kind);
        let total = of_kind.clone().count();
        let mastered = of_kind.filter(|p| p.is_mastered()).count();
        (mastered, total)
    };
    let (terminology_mastered, terminology_total) = count(ItemKind::Terminology);
    let (pattern_mastered, pattern_total) = count(ItemKind::Pattern);

    BeltMastery {
        terminology_mastered,
        terminology_total,
        pattern_mastered,
        pattern_total,
        terminology_ratio: ratio(terminology_mastered, terminology_total),
        pattern_ratio: ratio(pattern_mastered, pattern_total),
        combined_ratio: ratio(
            terminology_mastered + pattern_mastered,
            terminology_total + pattern_total,
        ),
    }
}

#[derive(Default)]
struct DayTotals {
    secs: i64,
    accuracy_sum: f64,
    count: u32,
}

/// `days` points ending at `today`, oldest first, days without sessions zeroed
pub fn daily_series(sessions: &[StudySession], today: NaiveDate, days: u32, offset: FixedOffset) -> Vec<DailyPoint> {
    let first = today - Duration::days(days as i64 - 1);

    let mut by_day: BTreeMap<NaiveDate, DayTotals> = BTreeMap::new();
    for s in sessions {
        let day = local_day(s.started_at, offset);
        if day < first || day > today {
            continue;
        }
        let totals = by_day.entry(day).or_default();
        totals.secs += s.duration().num_seconds();
        totals.accuracy_sum += s.accuracy();
        totals.count += 1;
    }

    (0..days as i64)
        .map(|i| {
            let date = first + Duration::days(i);
            match by_day.get(&date) {
                Some(t) => DailyPoint {
                    date,
                    total_secs: t.secs,
                    accuracy: t.accuracy_sum / t.count as f64,
                    session_count: t.count,
                },
                None => DailyPoint {
                    date,
                    total_secs: 0,
                    accuracy: 0.0,
                    session_count: 0,
                },
            }
        })
        .collect()
}

fn total_secs<'a>(sessions: impl Iterator<Item = &'a StudySession>) -> i64 {
    sessions.map(|s| s.duration().num_seconds()).sum()
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
