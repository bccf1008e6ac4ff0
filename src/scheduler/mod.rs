//! Scheduling strategies
//!
//! Two ways of deciding what a learner reviews next:
//! - Classic: no scheduling, every in-scope item is always eligible and
//!   ordered by weakest mastery first
//! - Leitner: boxed spaced repetition with per-box review intervals
//!
//! The active strategy is picked once per request by the mode coordinator and
//! then drives both answer recording and term selection.

use chrono::{DateTime, Utc};

use crate::model::ItemProgress;

pub mod leitner;
pub mod mastery;

pub use leitner::IntervalTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerStrategy {
    Classic,
    Leitner(IntervalTable),
}

impl SchedulerStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            SchedulerStrategy::Classic => "classic",
            SchedulerStrategy::Leitner(_) => "leitner",
        }
    }

    pub fn is_leitner(&self) -> bool {
        matches!(self, SchedulerStrategy::Leitner(_))
    }

    /// Record one answer on `progress`
    pub fn record_answer(&self, progress: &mut ItemProgress, correct: bool, response_time: f64, now: DateTime<Utc>) {
        mastery::record_outcome(progress, correct, response_time, now);

        match self {
            SchedulerStrategy::Classic => {
                // Classic items are never scheduled away
                progress.next_review_date = now;
            }
            SchedulerStrategy::Leitner(table) => {
                leitner::schedule(progress, correct, table, now);
            }
        }
    }

    /// Pick up to `limit` items to review from already scoped candidates
    pub fn select(&self, candidates: Vec<ItemProgress>, now: DateTime<Utc>, limit: usize) -> Vec<ItemProgress> {
        match self {
            SchedulerStrategy::Classic => select_classic(candidates, limit),
            SchedulerStrategy::Leitner(_) => leitner::select_due(candidates, now, limit),
        }
    }
}

/// Weakest tier first, then least recently reviewed (never reviewed first)
fn select_classic(mut candidates: Vec<ItemProgress>, limit: usize) -> Vec<ItemProgress> {
    candidates.sort_by(|a, b| {
        a.mastery_level
            .cmp(&b.mastery_level)
            .then_with(|| a.last_reviewed_at.cmp(&b.last_reviewed_at))
    });
    candidates.truncate(limit);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemKind, MasteryLevel, Rank, StudyItem};
    use chrono::Duration;

    fn fresh(id: &str, now: DateTime<Utc>) -> ItemProgress {
        let item = StudyItem {
            id: id.into(),
            kind: ItemKind::Terminology,
            rank: Rank::keup(8),
            label: id.into(),
        };
        ItemProgress::new("p1", &item, now)
    }

    #[test]
    fn test_leitner_six_correct_answers_cap_at_five() {
        let now = Utc::now();
        let strategy = SchedulerStrategy::Leitner(IntervalTable::default());
        let mut p = fresh("a", now);

        let mut boxes = Vec::new();
        for _ in 0..6 {
            strategy.record_answer(&mut p, true, 1.5, now);
            boxes.push(p.box_number);
        }
        assert_eq!(boxes, vec![2, 3, 4, 5, 5, 5]);
        assert!(p.next_review_date > now);
    }

    #[test]
    fn test_classic_four_correct_is_mastered() {
        let now = Utc::now();
        let strategy = SchedulerStrategy::Classic;
        let mut p = fresh("a", now);

        for _ in 0..4 {
            strategy.record_answer(&mut p, true, 2.0, now);
        }
        assert_eq!(p.accuracy(), 1.0);
        assert_eq!(p.mastery_level, MasteryLevel::Mastered);
        assert_eq!(p.next_review_date, now);
        assert_eq!(p.box_number, 1);
    }

    #[test]
    fn test_classic_selection_ignores_due_dates() {
        let now = Utc::now();
        let mut strong = fresh("strong", now);
        strong.mastery_level = MasteryLevel::Mastered;
        strong.next_review_date = now + Duration::days(30);
        let mut weak = fresh("weak", now);
        weak.last_reviewed_at = Some(now - Duration::hours(1));
        let untouched = fresh("untouched", now);

        let picked = SchedulerStrategy::Classic.select(vec![strong, weak, untouched], now, 10);
        let ids: Vec<&str> = picked.iter().map(|p| p.item_id.as_str()).collect();
        assert_eq!(ids, vec!["untouched", "weak", "strong"]);
    }
}
