//! Progress tracker
//!
//! The entry point the application talks to. Mutations are written through
//! the store on the blocking pool and each one emits a [`ProgressEvent`] so
//! the snapshot cache can drop what it holds for the affected profile.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analytics::{ProgressSnapshot, SnapshotBuilder};
use crate::cache::SnapshotCache;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, CONFIG_FILE, DATABASE_FILE, MODE_STATE_FILE};
use crate::coordinator::{MigrationReport, ModeCoordinator};
use crate::error::{ProgressError, Result};
use crate::events::{self, EventKind, EventSender, ProgressEvent};
use crate::model::{GradingRecord, ItemProgress, Profile, Rank, SessionKind, StudySession};
use crate::storage::{ProgressStore, SqliteStore};

/// A finished study session as reported by the application
#[derive(Debug, Clone)]
pub struct NewStudySession {
    pub profile_id: String,
    pub kind: SessionKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub items_studied: u32,
    pub correct_answers: u32,
    pub focus_areas: Vec<String>,
}

/// A grading result as reported by the application
#[derive(Debug, Clone)]
pub struct NewGrading {
    pub profile_id: String,
    pub graded_at: DateTime<Utc>,
    pub rank_tested: Rank,
    pub rank_achieved: Rank,
    pub passed: bool,
    pub preparation_secs: u64,
    pub examiner: Option<String>,
    pub venue: Option<String>,
    pub notes: Option<String>,
}

pub struct ProgressTracker {
    store: Arc<dyn ProgressStore>,
    coordinator: Arc<ModeCoordinator>,
    cache: SnapshotCache,
    events: EventSender,
    clock: Arc<dyn Clock>,
}

impl ProgressTracker {
    /// Open everything under `data_dir` with the wall clock. Must be called
    /// from within a tokio runtime.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let config = Config::load(&data_dir.join(CONFIG_FILE))?;
        let intervals = config.scheduler.interval_table()?;
        let store = Arc::new(SqliteStore::open(&data_dir.join(DATABASE_FILE))?);
        let coordinator = ModeCoordinator::open(&data_dir.join(MODE_STATE_FILE), intervals)?;

        Ok(Self::new(store, coordinator, &config, Arc::new(SystemClock)))
    }

    pub fn new(
        store: Arc<dyn ProgressStore>,
        coordinator: ModeCoordinator,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, receiver) = events::channel();
        let builder = SnapshotBuilder::from_config(store.clone(), config);
        let cache = SnapshotCache::spawn(builder, clock.clone(), config.cache.ttl(), receiver);

        Self {
            store,
            coordinator: Arc::new(coordinator),
            cache,
            events,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &ModeCoordinator {
        &self.coordinator
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn ProgressStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref())).await?
    }

    /// The write already happened, so a closed cache is only worth a warning
    fn notify(&self, event: ProgressEvent) {
        if let Err(e) = self.events.emit(event) {
            warn!("Progress event dropped: {}", e);
        }
    }

    /// Apply one answer to the item's progress under the active strategy
    pub async fn record_answer(
        &self,
        profile_id: &str,
        item_id: &str,
        correct: bool,
        response_time: f64,
    ) -> Result<ItemProgress> {
        let strategy = self.coordinator.strategy();
        let now = self.clock.now();
        let (pid, iid) = (profile_id.to_string(), item_id.to_string());

        let progress = self
            .blocking(move |store| {
                let progress = store.update_item_progress(&pid, &iid, now, &mut |p: &mut ItemProgress| {
                    strategy.record_answer(p, correct, response_time, now)
                })?;
                store.touch_profile(&pid, now)?;
                Ok(progress)
            })
            .await?;

        debug!(
            "Recorded {} answer for {}/{} ({}, box {})",
            if correct { "correct" } else { "incorrect" },
            profile_id,
            item_id,
            progress.mastery_level.as_str(),
            progress.box_number
        );
        self.notify(ProgressEvent::for_profile(EventKind::AnswerRecorded, profile_id, now));
        Ok(progress)
    }

    pub async fn record_study_session(&self, new: NewStudySession) -> Result<StudySession> {
        let now = self.clock.now();
        let session = StudySession {
            id: Uuid::new_v4().to_string(),
            profile_id: new.profile_id,
            kind: new.kind,
            started_at: new.started_at,
            ended_at: new.ended_at,
            items_studied: new.items_studied,
            correct_answers: new.correct_answers.min(new.items_studied),
            focus_areas: new.focus_areas,
        };

        let row = session.clone();
        self.blocking(move |store| {
            if store.fetch_profile(&row.profile_id)?.is_none() {
                return Err(ProgressError::ProfileNotFound(row.profile_id));
            }
            store.insert_session(&row)?;
            store.touch_profile(&row.profile_id, now)
        })
        .await?;

        info!(
            "Session {} recorded for {}: {} items, {:.0}% correct",
            session.id,
            session.profile_id,
            session.items_studied,
            session.accuracy() * 100.0
        );
        self.notify(ProgressEvent::for_profile(EventKind::SessionCompleted, &session.profile_id, now));
        Ok(session)
    }

    pub async fn record_grading(&self, new: NewGrading) -> Result<GradingRecord> {
        let now = self.clock.now();
        let record = GradingRecord {
            id: Uuid::new_v4().to_string(),
            profile_id: new.profile_id,
            graded_at: new.graded_at,
            rank_tested: new.rank_tested,
            rank_achieved: new.rank_achieved,
            passed: new.passed,
            preparation_secs: new.preparation_secs,
            examiner: new.examiner,
            venue: new.venue,
            notes: new.notes,
        };

        let row = record.clone();
        self.blocking(move |store| {
            if store.fetch_profile(&row.profile_id)?.is_none() {
                return Err(ProgressError::ProfileNotFound(row.profile_id));
            }
            store.insert_grading(&row)
        })
        .await?;

        info!(
            "Grading for {} recorded: {} {}",
            record.profile_id,
            record.rank_tested.label(),
            if record.passed { "passed" } else { "not passed" }
        );
        self.notify(ProgressEvent::for_profile(EventKind::GradingRecorded, &record.profile_id, now));
        Ok(record)
    }

    /// Flip between classic and Leitner scheduling. Every snapshot is invalidated.
    pub async fn toggle_mode(&self) -> Result<bool> {
        let now = self.clock.now();
        let coordinator = self.coordinator.clone();
        let enabled = tokio::task::spawn_blocking(move || coordinator.toggle_mode(now)).await??;

        self.notify(ProgressEvent::global(EventKind::ModeToggled, now));
        Ok(enabled)
    }

    pub async fn migrate_to_leitner_mode(&self, profile_id: &str) -> Result<MigrationReport> {
        let now = self.clock.now();
        let coordinator = self.coordinator.clone();
        let pid = profile_id.to_string();

        let report = self
            .blocking(move |store| coordinator.migrate_to_leitner_mode(store, &pid, now))
            .await?;

        self.notify(ProgressEvent::for_profile(EventKind::ModeMigrated, profile_id, now));
        Ok(report)
    }

    /// Mark a profile as the one in use
    pub async fn activate_profile(&self, profile_id: &str) -> Result<Profile> {
        let now = self.clock.now();
        let pid = profile_id.to_string();

        let profile = self
            .blocking(move |store| {
                let mut profile = store
                    .fetch_profile(&pid)?
                    .ok_or_else(|| ProgressError::ProfileNotFound(pid.clone()))?;
                store.touch_profile(&pid, now)?;
                profile.last_active_at = now;
                Ok(profile)
            })
            .await?;

        info!("Activated profile {} ({})", profile.id, profile.current_rank.label());
        self.notify(ProgressEvent::for_profile(EventKind::ProfileActivated, profile_id, now));
        Ok(profile)
    }

    /// Snapshot for the profile, `None` when it cannot be produced
    pub async fn get_progress_data(&self, profile_id: &str) -> Option<ProgressSnapshot> {
        self.cache.get_or_compute(profile_id).await
    }

    /// Items to review next. Read failures yield an empty list.
    pub async fn terms_for_review(&self, profile_id: &str, limit: usize) -> Vec<ItemProgress> {
        let now = self.clock.now();
        let coordinator = self.coordinator.clone();
        let pid = profile_id.to_string();

        let result = self
            .blocking(move |store| match store.fetch_profile(&pid)? {
                Some(profile) => coordinator.terms_for_review(store, &profile, limit, now),
                None => Err(ProgressError::ProfileNotFound(pid)),
            })
            .await;

        match result {
            Ok(items) => items,
            Err(e) => {
                warn!("No review items for {}: {}", profile_id, e);
                Vec::new()
            }
        }
    }

    pub async fn refresh_all(&self) -> Result<usize> {
        self.cache.refresh_all().await
    }
}
