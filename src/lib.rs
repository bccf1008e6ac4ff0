//! Dojo progress core
//!
//! Tracks how well a learner knows each study item, schedules reviews with
//! either a classic or a Leitner strategy, and serves cached progress
//! snapshots (statistics, streaks, belt journey and grading readiness).

pub mod analytics;
pub mod cache;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod model;
pub mod scheduler;
pub mod storage;
pub mod tracker;

pub use analytics::ProgressSnapshot;
pub use cache::SnapshotCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use coordinator::{MigrationReport, ModeCoordinator};
pub use error::{ProgressError, Result};
pub use model::{GradingRecord, ItemKind, ItemProgress, LearningMode, MasteryLevel, Profile, Rank, SessionKind, StudyItem, StudySession};
pub use scheduler::{IntervalTable, SchedulerStrategy};
pub use storage::{ProgressStore, SqliteStore};
pub use tracker::{NewGrading, NewStudySession, ProgressTracker};
