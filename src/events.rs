//! Invalidation channel
//!
//! Every mutation of learner data emits one [`ProgressEvent`]. The snapshot
//! cache holds the only receiver and reacts to all events the same way: the
//! affected snapshot is marked stale and recomputed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ProgressError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AnswerRecorded,
    SessionCompleted,
    GradingRecorded,
    ProfileActivated,
    ModeToggled,
    ModeMigrated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AnswerRecorded => "answer_recorded",
            EventKind::SessionCompleted => "session_completed",
            EventKind::GradingRecorded => "grading_recorded",
            EventKind::ProfileActivated => "profile_activated",
            EventKind::ModeToggled => "mode_toggled",
            EventKind::ModeMigrated => "mode_migrated",
        }
    }
}

/// Which snapshots an event touches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventScope {
    Profile(String),
    AllProfiles,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub kind: EventKind,
    pub scope: EventScope,
    pub at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn for_profile(kind: EventKind, profile_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            scope: EventScope::Profile(profile_id.to_string()),
            at,
        }
    }

    pub fn global(kind: EventKind, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            scope: EventScope::AllProfiles,
            at,
        }
    }

    pub fn profile_id(&self) -> Option<&str> {
        match &self.scope {
            EventScope::Profile(id) => Some(id),
            EventScope::AllProfiles => None,
        }
    }
}

/// Sending half handed to every mutation site
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl EventSender {
    /// Queue an event. Fails only once the cache has shut down.
    pub fn emit(&self, event: ProgressEvent) -> Result<()> {
        debug!(
            "Emitting {} for {}",
            event.kind.as_str(),
            event.profile_id().unwrap_or("all profiles")
        );
        self.tx.send(event).map_err(|_| ProgressError::CacheClosed)
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}
