//! Core records: ranks, profiles, study items and their progress
//!
//! These are plain data types shared by the scheduler, the store and the
//! analytics layer. Parsing helpers accept anything the database may hold
//! and fall back to a safe default instead of failing.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lowest box of the Leitner system
pub const MIN_BOX: u8 = 1;
/// Highest box of the Leitner system
pub const MAX_BOX: u8 = 5;

/// Clamp a raw box value (possibly corrupted) into `[MIN_BOX, MAX_BOX]`
pub fn clamp_box(raw: i64) -> u8 {
    raw.clamp(MIN_BOX as i64, MAX_BOX as i64) as u8
}

/// A belt rank, ordered by `sort_order` where lower means more advanced.
///
/// Keup grades occupy 11..=20 (10th keup = 20, 1st keup = 11) and dan
/// grades occupy 2..=10 (1st dan = 10, 9th dan = 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rank {
    sort_order: u8,
}

impl Rank {
    pub const MOST_ADVANCED: u8 = 2;
    pub const LEAST_ADVANCED: u8 = 20;

    pub fn from_sort_order(sort_order: i64) -> Self {
        Self {
            sort_order: sort_order.clamp(Self::MOST_ADVANCED as i64, Self::LEAST_ADVANCED as i64) as u8,
        }
    }

    /// Colour-belt grade, `n` in 1..=10
    pub fn keup(n: u8) -> Self {
        Self::from_sort_order(10 + n.clamp(1, 10) as i64)
    }

    /// Black-belt degree, `n` in 1..=9
    pub fn dan(n: u8) -> Self {
        Self::from_sort_order(11 - n.clamp(1, 9) as i64)
    }

    pub fn sort_order(&self) -> u8 {
        self.sort_order
    }

    pub fn is_more_advanced_than(&self, other: &Rank) -> bool {
        self.sort_order < other.sort_order
    }

    /// The next rank a student would grade for, if any
    pub fn next(&self) -> Option<Rank> {
        if self.sort_order > Self::MOST_ADVANCED {
            Some(Rank { sort_order: self.sort_order - 1 })
        } else {
            None
        }
    }

    pub fn label(&self) -> String {
        if self.sort_order >= 11 {
            format!("{} Keup", ordinal(self.sort_order - 10))
        } else {
            format!("{} Dan", ordinal(11 - self.sort_order))
        }
    }
}

fn ordinal(n: u8) -> String {
    let suffix = match (n % 10, n % 100) {
        (1, r) if r != 11 => "st",
        (2, r) if r != 12 => "nd",
        (3, r) if r != 13 => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

/// Qualitative mastery tier derived from lifetime accuracy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasteryLevel {
    Learning,
    Familiar,
    Proficient,
    Mastered,
}

impl MasteryLevel {
    pub fn from_accuracy(accuracy: f64) -> Self {
        if accuracy >= 0.90 {
            MasteryLevel::Mastered
        } else if accuracy >= 0.75 {
            MasteryLevel::Proficient
        } else if accuracy >= 0.50 {
            MasteryLevel::Familiar
        } else {
            MasteryLevel::Learning
        }
    }

    /// Starting box when an item moves into the Leitner system.
    /// Migration never places an item in the top box.
    pub fn initial_box(&self) -> u8 {
        match self {
            MasteryLevel::Learning => 1,
            MasteryLevel::Familiar => 2,
            MasteryLevel::Proficient => 3,
            MasteryLevel::Mastered => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MasteryLevel::Learning => "learning",
            MasteryLevel::Familiar => "familiar",
            MasteryLevel::Proficient => "proficient",
            MasteryLevel::Mastered => "mastered",
        }
    }

    /// Parse a stored value; anything unknown is treated as `Learning`
    pub fn parse_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "familiar" => MasteryLevel::Familiar,
            "proficient" => MasteryLevel::Proficient,
            "mastered" => MasteryLevel::Mastered,
            _ => MasteryLevel::Learning,
        }
    }
}

/// What kind of content a study item is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Terminology,
    Pattern,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Terminology => "terminology",
            ItemKind::Pattern => "pattern",
        }
    }

    pub fn parse_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pattern" => ItemKind::Pattern,
            _ => ItemKind::Terminology,
        }
    }
}

/// Which ranks a profile studies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningMode {
    /// Only the current rank's material
    #[default]
    Progression,
    /// Current rank and everything below it
    Mastery,
}

impl LearningMode {
    /// Whether an item of `item_rank` is in scope for a student at `current`
    pub fn includes(&self, current: Rank, item_rank: Rank) -> bool {
        match self {
            LearningMode::Progression => item_rank == current,
            LearningMode::Mastery => item_rank.sort_order() >= current.sort_order(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LearningMode::Progression => "progression",
            LearningMode::Mastery => "mastery",
        }
    }

    pub fn parse_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "mastery" => LearningMode::Mastery,
            _ => LearningMode::Progression,
        }
    }
}

/// Study session kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Flashcards,
    Testing,
    Patterns,
    Mixed,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Flashcards => "flashcards",
            SessionKind::Testing => "testing",
            SessionKind::Patterns => "patterns",
            SessionKind::Mixed => "mixed",
        }
    }

    pub fn parse_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "flashcards" => SessionKind::Flashcards,
            "testing" => SessionKind::Testing,
            "patterns" => SessionKind::Patterns,
            _ => SessionKind::Mixed,
        }
    }
}

/// A learner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    /// Rank currently being studied for
    pub current_rank: Rank,
    pub learning_mode: LearningMode,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

/// Reference to a piece of study content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyItem {
    pub id: String,
    pub kind: ItemKind,
    pub rank: Rank,
    pub label: String,
}

/// Per profile × item learning state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemProgress {
    pub profile_id: String,
    pub item_id: String,
    pub kind: ItemKind,
    pub rank: Rank,
    pub box_number: u8,
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub consecutive_correct: u32,
    pub mastery_level: MasteryLevel,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub next_review_date: DateTime<Utc>,
    /// Running mean response time in seconds
    pub average_response_time: f64,
}

impl ItemProgress {
    /// Fresh record for an item that has never been answered
    pub fn new(profile_id: &str, item: &StudyItem, now: DateTime<Utc>) -> Self {
        Self {
            profile_id: profile_id.to_string(),
            item_id: item.id.clone(),
            kind: item.kind,
            rank: item.rank,
            box_number: MIN_BOX,
            correct_count: 0,
            incorrect_count: 0,
            consecutive_correct: 0,
            mastery_level: MasteryLevel::Learning,
            last_reviewed_at: None,
            next_review_date: now,
            average_response_time: 0.0,
        }
    }

    pub fn total_reviews(&self) -> u32 {
        self.correct_count + self.incorrect_count
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total_reviews();
        if total == 0 {
            0.0
        } else {
            self.correct_count as f64 / total as f64
        }
    }

    pub fn is_mastered(&self) -> bool {
        self.mastery_level == MasteryLevel::Mastered
    }
}

/// A completed study session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudySession {
    pub id: String,
    pub profile_id: String,
    pub kind: SessionKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub items_studied: u32,
    pub correct_answers: u32,
    #[serde(default)]
    pub focus_areas: Vec<String>,
}

impl StudySession {
    /// Session length; a clock skew that puts the end first counts as zero
    pub fn duration(&self) -> Duration {
        let d = self.ended_at - self.started_at;
        if d < Duration::zero() {
            Duration::zero()
        } else {
            d
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.items_studied == 0 {
            0.0
        } else {
            (self.correct_answers.min(self.items_studied)) as f64 / self.items_studied as f64
        }
    }
}

/// Outcome of a grading examination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingRecord {
    pub id: String,
    pub profile_id: String,
    pub graded_at: DateTime<Utc>,
    pub rank_tested: Rank,
    pub rank_achieved: Rank,
    pub passed: bool,
    /// Preparation time in seconds
    pub preparation_secs: u64,
    pub examiner: Option<String>,
    pub venue: Option<String>,
    pub notes: Option<String>,
}
