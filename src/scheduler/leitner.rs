//! Leitner box scheduling
//!
//! Items live in boxes 1..=5. A correct answer moves an item one box up
//! (capped at 5), a wrong answer sends it back to box 1. Each box maps to a
//! review interval in days.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::{ProgressError, Result};
use crate::model::{clamp_box, ItemProgress, MAX_BOX, MIN_BOX};

/// Review interval in days per box, never decreasing from box 1 to box 5
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalTable {
    days: [u32; MAX_BOX as usize],
}

impl Default for IntervalTable {
    fn default() -> Self {
        Self { days: [1, 3, 7, 14, 30] }
    }
}

impl IntervalTable {
    pub fn new(days: &[u32]) -> Result<Self> {
        let days: [u32; MAX_BOX as usize] = days.try_into().map_err(|_| {
            ProgressError::InvalidIntervals(format!(
                "expected {} entries, got {}",
                MAX_BOX,
                days.len()
            ))
        })?;

        if let Some(w) = days.windows(2).find(|w| w[1] < w[0]) {
            return Err(ProgressError::InvalidIntervals(format!(
                "intervals must not decrease ({} followed by {})",
                w[0], w[1]
            )));
        }

        Ok(Self { days })
    }

    pub fn days(&self) -> &[u32; MAX_BOX as usize] {
        &self.days
    }

    /// Interval in days for a box; out-of-range boxes are clamped
    pub fn interval_days(&self, box_number: u8) -> u32 {
        let b = clamp_box(box_number as i64);
        self.days[(b - MIN_BOX) as usize]
    }

    pub fn next_review(&self, box_number: u8, from: DateTime<Utc>) -> DateTime<Utc> {
        from + Duration::days(self.interval_days(box_number) as i64)
    }
}

/// Box after an answer
pub fn next_box(current: u8, correct: bool) -> u8 {
    if correct {
        (clamp_box(current as i64) + 1).min(MAX_BOX)
    } else {
        MIN_BOX
    }
}

/// Move the item between boxes and schedule its next review
pub fn schedule(progress: &mut ItemProgress, correct: bool, table: &IntervalTable, now: DateTime<Utc>) {
    let from = progress.box_number;
    progress.box_number = next_box(from, correct);
    progress.next_review_date = table.next_review(progress.box_number, now);
    debug!(
        "Item {} moved from box {} to box {}, due {}",
        progress.item_id, from, progress.box_number, progress.next_review_date
    );
}

/// Items due at `now`: lowest box first, then oldest due date, at most `limit`
pub fn select_due(candidates: Vec<ItemProgress>, now: DateTime<Utc>, limit: usize) -> Vec<ItemProgress> {
    let mut due: Vec<ItemProgress> = candidates
        .into_iter()
        .filter(|p| p.next_review_date <= now)
        .collect();

    due.sort_by(|a, b| {
        a.box_number
            .cmp(&b.box_number)
            .then_with(|| a.next_review_date.cmp(&b.next_review_date))
    });
    due.truncate(limit);
    due
}

/// Leitner placement for an item coming from classic mode.
///
/// The box is derived from the mastery tier only, so repeated migration of
/// the same record lands in the same box. The due date counts from the last
/// review and is never earlier than `now`.
pub fn migrated(progress: &ItemProgress, table: &IntervalTable, now: DateTime<Utc>) -> ItemProgress {
    let mut next = progress.clone();
    next.box_number = progress.mastery_level.initial_box();

    let base = progress.last_reviewed_at.unwrap_or(now);
    next.next_review_date = table.next_review(next.box_number, base).max(now);
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemKind, MasteryLevel, Rank, StudyItem};
    use proptest::prelude::*;

    fn fresh(now: DateTime<Utc>) -> ItemProgress {
        let item = StudyItem {
            id: "chon-ji".into(),
            kind: ItemKind::Pattern,
            rank: Rank::keup(9),
            label: "Chon-Ji".into(),
        };
        ItemProgress::new("p1", &item, now)
    }

    proptest! {
        #[test]
        fn prop_correct_promotes_capped(b in 1u8..=5) {
            prop_assert_eq!(next_box(b, true), (b + 1).min(5));
        }

        #[test]
        fn prop_incorrect_resets(b in 1u8..=5) {
            prop_assert_eq!(next_box(b, false), 1);
        }

        #[test]
        fn prop_box_stays_in_range(raw in any::<u8>(), correct in any::<bool>()) {
            let b = next_box(raw, correct);
            prop_assert!((MIN_BOX..=MAX_BOX).contains(&b));
        }
    }

    #[test]
    fn test_default_intervals_monotonic() {
        let table = IntervalTable::default();
        for b in 1..MAX_BOX {
            assert!(table.interval_days(b) <= table.interval_days(b + 1));
        }
    }

    #[test]
    fn test_interval_table_validation() {
        assert!(IntervalTable::new(&[1, 2, 3]).is_err());
        assert!(IntervalTable::new(&[5, 4, 3, 2, 1]).is_err());
        assert!(IntervalTable::new(&[1, 1, 1, 1, 1]).is_ok());
        let t = IntervalTable::new(&[0, 2, 4, 8, 16]).unwrap();
        assert_eq!(t.interval_days(3), 4);
        assert_eq!(t.interval_days(0), 0);
        assert_eq!(t.interval_days(9), 16);
    }

    #[test]
    fn test_schedule_sets_due_date() {
        let now = Utc::now();
        let table = IntervalTable::default();
        let mut p = fresh(now);

        schedule(&mut p, true, &table, now);
        assert_eq!(p.box_number, 2);
        assert_eq!(p.next_review_date, now + Duration::days(3));

        schedule(&mut p, false, &table, now);
        assert_eq!(p.box_number, 1);
        assert_eq!(p.next_review_date, now + Duration::days(1));
    }

    #[test]
    fn test_select_due_never_returns_future_items() {
        let now = Utc::now();
        let mut items = Vec::new();
        for (i, offset) in [-3i64, -1, 0, 1, 5].iter().enumerate() {
            let mut p = fresh(now);
            p.item_id = format!("item-{}", i);
            p.next_review_date = now + Duration::days(*offset);
            items.push(p);
        }

        let due = select_due(items, now, 10);
        assert_eq!(due.len(), 3);
        assert!(due.iter().all(|p| p.next_review_date <= now));
    }

    #[test]
    fn test_select_due_orders_by_box_then_date() {
        let now = Utc::now();
        let mut a = fresh(now);
        a.item_id = "a".into();
        a.box_number = 3;
        a.next_review_date = now - Duration::days(10);
        let mut b = fresh(now);
        b.item_id = "b".into();
        b.box_number = 1;
        b.next_review_date = now - Duration::days(1);
        let mut c = fresh(now);
        c.item_id = "c".into();
        c.box_number = 1;
        c.next_review_date = now - Duration::days(2);

        let due = select_due(vec![a, b, c], now, 2);
        let ids: Vec<&str> = due.iter().map(|p| p.item_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn test_migration_mapping_and_idempotence() {
        let now = Utc::now();
        let table = IntervalTable::default();
        let levels = [
            (MasteryLevel::Learning, 1),
            (MasteryLevel::Familiar, 2),
            (MasteryLevel::Proficient, 3),
            (MasteryLevel::Mastered, 4),
        ];

        for (level, expected) in levels {
            let mut p = fresh(now);
            p.mastery_level = level;
            p.last_reviewed_at = Some(now - Duration::days(2));

            let once = migrated(&p, &table, now);
            let twice = migrated(&once, &table, now);
            assert_eq!(once.box_number, expected);
            assert_eq!(once, twice);
            assert!(once.next_review_date >= now);
        }
    }
}
