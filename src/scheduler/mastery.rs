//! Mastery tracking
//!
//! Bookkeeping shared by both scheduling modes: answer counters, the running
//! mean response time and the qualitative mastery tier.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::{ItemProgress, MasteryLevel};

/// Apply one answer to the counters of `progress`.
///
/// The response time mean is updated incrementally:
/// `avg' = (avg * (n - 1) + t) / n` with `n` the new review count.
pub fn record_outcome(progress: &mut ItemProgress, correct: bool, response_time: f64, now: DateTime<Utc>) {
    if correct {
        progress.correct_count += 1;
        progress.consecutive_correct += 1;
    } else {
        progress.incorrect_count += 1;
        progress.consecutive_correct = 0;
    }

    let n = progress.total_reviews() as f64;
    let response_time = if response_time.is_finite() { response_time.max(0.0) } else { 0.0 };
    progress.average_response_time = (progress.average_response_time * (n - 1.0) + response_time) / n;

    progress.last_reviewed_at = Some(now);
    progress.mastery_level = classify(progress);

    debug!(
        "Item {} answered {}: {}/{} correct, mastery {}",
        progress.item_id,
        if correct { "correctly" } else { "incorrectly" },
        progress.correct_count,
        progress.total_reviews(),
        progress.mastery_level.as_str()
    );
}

/// Mastery tier from lifetime accuracy
pub fn classify(progress: &ItemProgress) -> MasteryLevel {
    MasteryLevel::from_accuracy(progress.accuracy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemKind, Rank, StudyItem};

    fn fresh() -> ItemProgress {
        let item = StudyItem {
            id: "charyot".into(),
            kind: ItemKind::Terminology,
            rank: Rank::keup(10),
            label: "Attention".into(),
        };
        ItemProgress::new("p1", &item, Utc::now())
    }

    #[test]
    fn test_running_mean_response_time() {
        let mut p = fresh();
        let now = Utc::now();
        record_outcome(&mut p, true, 2.0, now);
        record_outcome(&mut p, true, 4.0, now);
        record_outcome(&mut p, false, 6.0, now);
        assert!((p.average_response_time - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_counters_and_streak_reset() {
        let mut p = fresh();
        let now = Utc::now();
        record_outcome(&mut p, true, 1.0, now);
        record_outcome(&mut p, true, 1.0, now);
        assert_eq!(p.consecutive_correct, 2);

        record_outcome(&mut p, false, 1.0, now);
        assert_eq!(p.correct_count, 2);
        assert_eq!(p.incorrect_count, 1);
        assert_eq!(p.consecutive_correct, 0);
        assert_eq!(p.last_reviewed_at, Some(now));
        assert_eq!(p.mastery_level, MasteryLevel::Familiar);
    }

    #[test]
    fn test_bad_response_time_ignored() {
        let mut p = fresh();
        record_outcome(&mut p, true, f64::NAN, Utc::now());
        assert_eq!(p.average_response_time, 0.0);
    }
}
