//! Progress storage
//!
//! The progress core reads and writes learner records through the
//! [`ProgressStore`] trait. Reads for unknown profiles return empty results
//! rather than errors. [`SqliteStore`] is the on-disk implementation.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{self, DATABASE_FILE};
use crate::error::Result;
use crate::model::{GradingRecord, ItemProgress, LearningMode, Profile, Rank, StudyItem, StudySession};

mod sqlite;

pub use sqlite::{SqliteStore, StoreCounts};

/// Source of truth for profiles, items and learner history
pub trait ProgressStore: Send + Sync {
    fn fetch_profile(&self, profile_id: &str) -> Result<Option<Profile>>;
    fn fetch_all_profile_ids(&self) -> Result<Vec<String>>;
    fn fetch_sessions(&self, profile_id: &str) -> Result<Vec<StudySession>>;
    fn fetch_item_progress(&self, profile_id: &str) -> Result<Vec<ItemProgress>>;
    fn fetch_progress_for_item(&self, profile_id: &str, item_id: &str) -> Result<Option<ItemProgress>>;
    fn fetch_grading_records(&self, profile_id: &str) -> Result<Vec<GradingRecord>>;
    fn fetch_item(&self, item_id: &str) -> Result<Option<StudyItem>>;
    /// Catalogue items a student at `current` studies under `mode`
    fn fetch_items_in_scope(&self, current: Rank, mode: LearningMode) -> Result<Vec<StudyItem>>;

    fn upsert_profile(&self, profile: &Profile) -> Result<()>;
    fn touch_profile(&self, profile_id: &str, at: DateTime<Utc>) -> Result<()>;
    fn upsert_item(&self, item: &StudyItem) -> Result<()>;
    fn save_item_progress(&self, progress: &ItemProgress) -> Result<()>;
    /// Write all rows in one transaction; either every row lands or none does
    fn save_item_progress_batch(&self, rows: &[ItemProgress]) -> Result<usize>;
    /// Read, change and write back one item's progress as a single exclusive
    /// transaction. A missing row starts from a fresh record for the catalogue
    /// item; an unknown profile or item is an error.
    fn update_item_progress(
        &self,
        profile_id: &str,
        item_id: &str,
        now: DateTime<Utc>,
        apply: &mut dyn FnMut(&mut ItemProgress),
    ) -> Result<ItemProgress>;
    /// Replace every progress row of a profile with `rewrite(row)` inside one
    /// exclusive transaction. Returns the rows as written.
    fn rewrite_item_progress(
        &self,
        profile_id: &str,
        rewrite: &mut dyn FnMut(&ItemProgress) -> ItemProgress,
    ) -> Result<Vec<ItemProgress>>;
    fn insert_session(&self, session: &StudySession) -> Result<()>;
    fn insert_grading(&self, record: &GradingRecord) -> Result<()>;
    /// Explicit cleanup of everything recorded for a profile
    fn delete_profile_data(&self, profile_id: &str) -> Result<usize>;
}

/// Create the data directory, database schema and default configuration
pub fn init(data_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = data_dir.join(DATABASE_FILE);
    SqliteStore::open(&db_path)?;
    config::write_default_config(data_dir)?;

    info!("Progress store initialized at {:?}", data_dir);
    Ok(db_path)
}
