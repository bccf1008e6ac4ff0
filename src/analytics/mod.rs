//! Progress analytics
//!
//! Turns raw learner history into a [`ProgressSnapshot`]: statistics from the
//! aggregator plus the belt journey. Snapshot building is synchronous and
//! reads the store directly; the cache runs it on the blocking pool.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::config::{Config, ReadinessConfig};
use crate::error::{ProgressError, Result};
use crate::storage::ProgressStore;

pub mod aggregator;
pub mod journey;

pub use aggregator::{BeltMastery, DailyPoint, ModeStats, OverallStats, ProgressStatistics, StreakStats};
pub use journey::{BeltJourney, MismatchKind, Readiness};

/// Presentation-ready view of one profile's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub profile_id: String,
    pub generated_at: DateTime<Utc>,
    pub statistics: ProgressStatistics,
    pub journey: BeltJourney,
}

/// Builds snapshots from the store
#[derive(Clone)]
pub struct SnapshotBuilder {
    store: Arc<dyn ProgressStore>,
    readiness: ReadinessConfig,
    offset: FixedOffset,
}

impl SnapshotBuilder {
    pub fn new(store: Arc<dyn ProgressStore>, readiness: ReadinessConfig, offset: FixedOffset) -> Self {
        Self {
            store,
            readiness,
            offset,
        }
    }

    pub fn from_config(store: Arc<dyn ProgressStore>, config: &Config) -> Self {
        Self::new(store, config.readiness.clone(), config.analytics.offset())
    }

    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    /// Compute a snapshot as of `now`. Fails for a profile that does not exist.
    pub fn build(&self, profile_id: &str, now: DateTime<Utc>) -> Result<ProgressSnapshot> {
        let profile = self
            .store
            .fetch_profile(profile_id)?
            .ok_or_else(|| ProgressError::ProfileNotFound(profile_id.to_string()))?;
        let sessions = self.store.fetch_sessions(profile_id)?;
        let progress = self.store.fetch_item_progress(profile_id)?;
        let gradings = self.store.fetch_grading_records(profile_id)?;

        let today = aggregator::local_day(now, self.offset);
        let statistics = aggregator::aggregate(&sessions, &progress, today, self.offset);
        let journey = journey::calculate(
            &profile,
            &gradings,
            &sessions,
            &statistics,
            &self.readiness,
            now,
            today,
        );

        debug!(
            "Built snapshot for {}: {} sessions, {} items, streak {}",
            profile_id,
            sessions.len(),
            progress.len(),
            statistics.streaks.current
        );

        Ok(ProgressSnapshot {
            profile_id: profile_id.to_string(),
            generated_at: now,
            statistics,
            journey,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LearningMode, Profile, Rank, SessionKind, StudySession};
    use crate::storage::SqliteStore;
    use chrono::{Duration, Offset};

    #[test]
    fn test_build_reads_profile_history() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let now = Utc::now();
        store
            .upsert_profile(&Profile {
                id: "p1".into(),
                name: "Ji-ho".into(),
                current_rank: Rank::keup(9),
                learning_mode: LearningMode::Progression,
                created_at: now - Duration::days(3),
                last_active_at: now,
            })
            .unwrap();
        store
            .insert_session(&StudySession {
                id: "s1".into(),
                profile_id: "p1".into(),
                kind: SessionKind::Flashcards,
                started_at: now - Duration::minutes(20),
                ended_at: now - Duration::minutes(5),
                items_studied: 12,
                correct_answers: 9,
                focus_areas: vec!["stances".into()],
            })
            .unwrap();

        let builder = SnapshotBuilder::new(store, ReadinessConfig::default(), Utc.fix());
        let snapshot = builder.build("p1", now).unwrap();
        assert_eq!(snapshot.generated_at, now);
        assert_eq!(snapshot.statistics.overall.session_count, 1);
        assert_eq!(snapshot.statistics.overall.total_study_secs, 15 * 60);
        assert_eq!(snapshot.journey.studying_rank, Rank::keup(9));

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"profile_id\":\"p1\""));
    }

    #[test]
    fn test_build_unknown_profile_fails() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let builder = SnapshotBuilder::new(store, ReadinessConfig::default(), Utc.fix());
        assert!(matches!(
            builder.build("ghost", Utc::now()),
            Err(ProgressError::ProfileNotFound(_))
        ));
    }
}
