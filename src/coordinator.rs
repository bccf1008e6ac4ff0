//! Mode coordinator
//!
//! Holds the install-wide switch between classic and Leitner scheduling,
//! hands out the matching [`SchedulerStrategy`] and runs the explicit
//! classic-to-Leitner migration.
//!
//! Toggling the switch never touches learner data. Migration is a separate,
//! deliberate step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

use crate::error::Result;
use crate::model::{ItemProgress, Profile, MAX_BOX};
use crate::scheduler::{leitner, IntervalTable, SchedulerStrategy};
use crate::storage::ProgressStore;

const STATE_VERSION: u32 = 1;

/// Persisted mode switch
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModeState {
    pub leitner_enabled: bool,
    pub toggled_at: Option<DateTime<Utc>>,
    pub version: u32,
}

impl ModeState {
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("tmp");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }
}

/// Outcome of a classic-to-Leitner migration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub items_migrated: usize,
    /// Items placed in each box, index = box - 1
    pub per_box: [usize; MAX_BOX as usize],
}

pub struct ModeCoordinator {
    state_path: Option<PathBuf>,
    state: RwLock<ModeState>,
    intervals: IntervalTable,
}

impl ModeCoordinator {
    /// Coordinator whose switch is persisted at `state_path`
    pub fn open(state_path: &Path, intervals: IntervalTable) -> Result<Self> {
        let state = ModeState::load(state_path)?;
        info!(
            "Scheduling mode: {}",
            if state.leitner_enabled { "leitner" } else { "classic" }
        );
        Ok(Self {
            state_path: Some(state_path.to_path_buf()),
            state: RwLock::new(state),
            intervals,
        })
    }

    /// Coordinator that keeps its switch in memory only
    pub fn in_memory(leitner_enabled: bool, intervals: IntervalTable) -> Self {
        Self {
            state_path: None,
            state: RwLock::new(ModeState {
                leitner_enabled,
                toggled_at: None,
                version: STATE_VERSION,
            }),
            intervals,
        }
    }

    pub fn is_leitner_enabled(&self) -> bool {
        match self.state.read() {
            Ok(state) => state.leitner_enabled,
            Err(poisoned) => poisoned.into_inner().leitner_enabled,
        }
    }

    pub fn intervals(&self) -> &IntervalTable {
        &self.intervals
    }

    /// Strategy for the current request
    pub fn strategy(&self) -> SchedulerStrategy {
        if self.is_leitner_enabled() {
            SchedulerStrategy::Leitner(self.intervals)
        } else {
            SchedulerStrategy::Classic
        }
    }

    /// Flip the switch and persist it. Returns whether Leitner mode is now on.
    pub fn toggle_mode(&self, now: DateTime<Utc>) -> Result<bool> {
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut next = state.clone();
        next.leitner_enabled = !state.leitner_enabled;
        next.toggled_at = Some(now);
        next.version = STATE_VERSION;

        if let Some(path) = &self.state_path {
            next.save(path)?;
        }
        *state = next;

        info!(
            "Scheduling mode switched to {}",
            if state.leitner_enabled { "leitner" } else { "classic" }
        );
        Ok(state.leitner_enabled)
    }

    /// Items the profile should review next under the active strategy
    pub fn terms_for_review(
        &self,
        store: &dyn ProgressStore,
        profile: &Profile,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ItemProgress>> {
        let strategy = self.strategy();
        let items = store.fetch_items_in_scope(profile.current_rank, profile.learning_mode)?;

        let mut existing: HashMap<String, ItemProgress> = store
            .fetch_item_progress(&profile.id)?
            .into_iter()
            .map(|p| (p.item_id.clone(), p))
            .collect();

        // Items never answered enter as fresh box-1 records due now
        let candidates: Vec<ItemProgress> = items
            .iter()
            .map(|item| {
                existing
                    .remove(&item.id)
                    .unwrap_or_else(|| ItemProgress::new(&profile.id, item, now))
            })
            .collect();

        let in_scope = candidates.len();
        let picked = strategy.select(candidates, now, limit);
        debug!(
            "{} selection for {}: {} of {} in-scope items",
            strategy.name(),
            profile.id,
            picked.len(),
            in_scope
        );
        Ok(picked)
    }

    /// Place every tracked item of the profile into a Leitner box derived from
    /// its mastery tier. All rows are computed before anything is written, and
    /// they are written in a single transaction.
    pub fn migrate_to_leitner_mode(
        &self,
        store: &dyn ProgressStore,
        profile_id: &str,
        now: DateTime<Utc>,
    ) -> Result<MigrationReport> {
        let intervals = &self.intervals;
        let migrated = store.rewrite_item_progress(profile_id, &mut |p: &ItemProgress| {
            leitner::migrated(p, intervals, now)
        })?;

        let mut report = MigrationReport {
            items_migrated: migrated.len(),
            ..Default::default()
        };
        for p in &migrated {
            report.per_box[(p.box_number - 1) as usize] += 1;
        }

        info!(
            "Migrated {} items of {} to Leitner boxes {:?}",
            report.items_migrated, profile_id, report.per_box
        );
        Ok(report)
    }
}
