//! SQLite-backed progress store
//!
//! Every per-learner table is indexed by `profile_id`, so lookups never scan
//! other learners' rows. Timestamps are stored as fixed-width RFC 3339 text so
//! that string order equals chronological order.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Statement, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::ProgressStore;
use crate::error::{ProgressError, Result};
use crate::model::{
    clamp_box, GradingRecord, ItemKind, ItemProgress, LearningMode, MasteryLevel, Profile, Rank,
    SessionKind, StudyItem, StudySession,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    current_rank INTEGER NOT NULL,
    learning_mode TEXT NOT NULL DEFAULT 'progression',
    created_at TEXT NOT NULL,
    last_active_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS study_items (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    rank INTEGER NOT NULL,
    label TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS item_progress (
    profile_id TEXT NOT NULL,
    item_id TEXT NOT NULL,
    box INTEGER NOT NULL DEFAULT 1,
    correct_count INTEGER NOT NULL DEFAULT 0,
    incorrect_count INTEGER NOT NULL DEFAULT 0,
    consecutive_correct INTEGER NOT NULL DEFAULT 0,
    mastery_level TEXT NOT NULL DEFAULT 'learning',
    last_reviewed_at TEXT,
    next_review_date TEXT NOT NULL,
    average_response_time REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (profile_id, item_id)
);

CREATE TABLE IF NOT EXISTS study_sessions (
    id TEXT PRIMARY KEY,
    profile_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT NOT NULL,
    items_studied INTEGER NOT NULL DEFAULT 0,
    correct_answers INTEGER NOT NULL DEFAULT 0,
    focus_areas TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS grading_records (
    id TEXT PRIMARY KEY,
    profile_id TEXT NOT NULL,
    graded_at TEXT NOT NULL,
    rank_tested INTEGER NOT NULL,
    rank_achieved INTEGER NOT NULL,
    passed INTEGER NOT NULL,
    preparation_secs INTEGER NOT NULL DEFAULT 0,
    examiner TEXT,
    venue TEXT,
    notes TEXT
);

CREATE INDEX IF NOT EXISTS idx_items_rank ON study_items(rank);
CREATE INDEX IF NOT EXISTS idx_sessions_profile ON study_sessions(profile_id, started_at);
CREATE INDEX IF NOT EXISTS idx_gradings_profile ON grading_records(profile_id, graded_at);
"#;

const PROGRESS_COLUMNS: &str = r#"
    p.profile_id, p.item_id, i.kind, i.rank, p.box, p.correct_count, p.incorrect_count,
    p.consecutive_correct, p.mastery_level, p.last_reviewed_at, p.next_review_date,
    p.average_response_time
"#;

const UPSERT_PROGRESS: &str = r#"
    INSERT INTO item_progress
    (profile_id, item_id, box, correct_count, incorrect_count, consecutive_correct,
     mastery_level, last_reviewed_at, next_review_date, average_response_time)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
    ON CONFLICT(profile_id, item_id) DO UPDATE SET
        box = excluded.box,
        correct_count = excluded.correct_count,
        incorrect_count = excluded.incorrect_count,
        consecutive_correct = excluded.consecutive_correct,
        mastery_level = excluded.mastery_level,
        last_reviewed_at = excluded.last_reviewed_at,
        next_review_date = excluded.next_review_date,
        average_response_time = excluded.average_response_time
"#;

/// Row counts for status reporting
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreCounts {
    pub profiles: i64,
    pub items: i64,
    pub progress_rows: i64,
    pub sessions: i64,
    pub gradings: i64,
}

/// Progress store backed by a single SQLite connection
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // WAL mode for better concurrent access during writes
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::with_connection(conn)
    }

    /// Throwaway store, mostly for tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        conn.set_prepared_statement_cache_capacity(16);
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-query leaves nothing half-written that SQLite did not roll back
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn counts(&self) -> Result<StoreCounts> {
        let conn = self.lock();
        let count = |table: &str| -> Result<i64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .map_err(Into::into)
        };

        Ok(StoreCounts {
            profiles: count("profiles")?,
            items: count("study_items")?,
            progress_rows: count("item_progress")?,
            sessions: count("study_sessions")?,
            gradings: count("grading_records")?,
        })
    }
}

impl ProgressStore for SqliteStore {
    fn fetch_profile(&self, profile_id: &str) -> Result<Option<Profile>> {
        query_profile(&self.lock(), profile_id)
    }

    fn fetch_all_profile_ids(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached("SELECT id FROM profiles ORDER BY id")?;
        let ids = stmt.query_map([], |row| row.get(0))?;
        ids.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn fetch_sessions(&self, profile_id: &str) -> Result<Vec<StudySession>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT id, profile_id, kind, started_at, ended_at, items_studied, correct_answers, focus_areas
            FROM study_sessions
            WHERE profile_id = ?1
            ORDER BY started_at ASC
            "#,
        )?;
        let sessions = stmt.query_map(params![profile_id], row_to_session)?;
        sessions.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn fetch_item_progress(&self, profile_id: &str) -> Result<Vec<ItemProgress>> {
        query_all_progress(&self.lock(), profile_id)
    }

    fn fetch_progress_for_item(&self, profile_id: &str, item_id: &str) -> Result<Option<ItemProgress>> {
        query_progress(&self.lock(), profile_id, item_id)
    }

    fn fetch_grading_records(&self, profile_id: &str) -> Result<Vec<GradingRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT id, profile_id, graded_at, rank_tested, rank_achieved, passed,
                   preparation_secs, examiner, venue, notes
            FROM grading_records
            WHERE profile_id = ?1
            ORDER BY graded_at ASC
            "#,
        )?;
        let records = stmt.query_map(params![profile_id], row_to_grading)?;
        records.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn fetch_item(&self, item_id: &str) -> Result<Option<StudyItem>> {
        query_item(&self.lock(), item_id)
    }

    fn fetch_items_in_scope(&self, current: Rank, mode: LearningMode) -> Result<Vec<StudyItem>> {
        let conn = self.lock();
        let sql = match mode {
            LearningMode::Progression => {
                "SELECT id, kind, rank, label FROM study_items WHERE rank = ?1 ORDER BY rank DESC, id"
            }
            LearningMode::Mastery => {
                "SELECT id, kind, rank, label FROM study_items WHERE rank >= ?1 ORDER BY rank DESC, id"
            }
        };
        let mut stmt = conn.prepare_cached(sql)?;
        let items = stmt.query_map(params![current.sort_order() as i64], row_to_item)?;
        items.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO profiles (id, name, current_rank, learning_mode, created_at, last_active_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                current_rank = excluded.current_rank,
                learning_mode = excluded.learning_mode,
                last_active_at = excluded.last_active_at
            "#,
            params![
                profile.id,
                profile.name,
                profile.current_rank.sort_order() as i64,
                profile.learning_mode.as_str(),
                format_ts(profile.created_at),
                format_ts(profile.last_active_at),
            ],
        )?;
        Ok(())
    }

    fn touch_profile(&self, profile_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE profiles SET last_active_at = ?1 WHERE id = ?2",
            params![format_ts(at), profile_id],
        )?;
        Ok(())
    }

    fn upsert_item(&self, item: &StudyItem) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO study_items (id, kind, rank, label) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET kind = excluded.kind, rank = excluded.rank, label = excluded.label
            "#,
            params![item.id, item.kind.as_str(), item.rank.sort_order() as i64, item.label],
        )?;
        Ok(())
    }

    fn save_item_progress(&self, progress: &ItemProgress) -> Result<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(UPSERT_PROGRESS)?;
        execute_upsert(&mut stmt, progress)?;
        Ok(())
    }

    fn save_item_progress_batch(&self, rows: &[ItemProgress]) -> Result<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare_cached(UPSERT_PROGRESS)?;
            for progress in rows {
                execute_upsert(&mut stmt, progress)?;
            }
        }

        tx.commit()?;
        debug!("Saved {} progress rows in one transaction", rows.len());
        Ok(rows.len())
    }

    fn update_item_progress(
        &self,
        profile_id: &str,
        item_id: &str,
        now: DateTime<Utc>,
        apply: &mut dyn FnMut(&mut ItemProgress),
    ) -> Result<ItemProgress> {
        let mut conn = self.lock();
        // IMMEDIATE takes the write lock up front so other processes cannot interleave
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if query_profile(&tx, profile_id)?.is_none() {
            return Err(ProgressError::ProfileNotFound(profile_id.to_string()));
        }
        let mut progress = match query_progress(&tx, profile_id, item_id)? {
            Some(existing) => existing,
            None => {
                let item = query_item(&tx, item_id)?
                    .ok_or_else(|| ProgressError::ItemNotFound(item_id.to_string()))?;
                ItemProgress::new(profile_id, &item, now)
            }
        };

        apply(&mut progress);
        {
            let mut stmt = tx.prepare_cached(UPSERT_PROGRESS)?;
            execute_upsert(&mut stmt, &progress)?;
        }
        tx.commit()?;
        Ok(progress)
    }

    fn rewrite_item_progress(
        &self,
        profile_id: &str,
        rewrite: &mut dyn FnMut(&ItemProgress) -> ItemProgress,
    ) -> Result<Vec<ItemProgress>> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Everything is computed before the first write
        let rows: Vec<ItemProgress> = query_all_progress(&tx, profile_id)?
            .iter()
            .map(|p| rewrite(p))
            .collect();
        {
            let mut stmt = tx.prepare_cached(UPSERT_PROGRESS)?;
            for progress in &rows {
                execute_upsert(&mut stmt, progress)?;
            }
        }
        tx.commit()?;

        debug!("Rewrote {} progress rows of {}", rows.len(), profile_id);
        Ok(rows)
    }

    fn insert_session(&self, session: &StudySession) -> Result<()> {
        let focus_areas = serde_json::to_string(&session.focus_areas)?;
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO study_sessions
            (id, profile_id, kind, started_at, ended_at, items_studied, correct_answers, focus_areas)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                session.id,
                session.profile_id,
                session.kind.as_str(),
                format_ts(session.started_at),
                format_ts(session.ended_at),
                session.items_studied as i64,
                session.correct_answers as i64,
                focus_areas,
            ],
        )?;
        Ok(())
    }

    fn insert_grading(&self, record: &GradingRecord) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO grading_records
            (id, profile_id, graded_at, rank_tested, rank_achieved, passed, preparation_secs, examiner, venue, notes)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                record.id,
                record.profile_id,
                format_ts(record.graded_at),
                record.rank_tested.sort_order() as i64,
                record.rank_achieved.sort_order() as i64,
                record.passed,
                record.preparation_secs.min(i64::MAX as u64) as i64,
                record.examiner,
                record.venue,
                record.notes,
            ],
        )?;
        Ok(())
    }

    fn delete_profile_data(&self, profile_id: &str) -> Result<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        for table in ["item_progress", "study_sessions", "grading_records"] {
            deleted += tx.execute(&format!("DELETE FROM {} WHERE profile_id = ?1", table), params![profile_id])?;
        }
        deleted += tx.execute("DELETE FROM profiles WHERE id = ?1", params![profile_id])?;
        tx.commit()?;
        Ok(deleted)
    }
}

fn query_profile(conn: &Connection, profile_id: &str) -> Result<Option<Profile>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, current_rank, learning_mode, created_at, last_active_at FROM profiles WHERE id = ?1",
    )?;
    stmt.query_row(params![profile_id], row_to_profile)
        .optional()
        .map_err(Into::into)
}

fn query_item(conn: &Connection, item_id: &str) -> Result<Option<StudyItem>> {
    let mut stmt = conn.prepare_cached("SELECT id, kind, rank, label FROM study_items WHERE id = ?1")?;
    stmt.query_row(params![item_id], row_to_item)
        .optional()
        .map_err(Into::into)
}

fn query_progress(conn: &Connection, profile_id: &str, item_id: &str) -> Result<Option<ItemProgress>> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT {}
        FROM item_progress p
        JOIN study_items i ON i.id = p.item_id
        WHERE p.profile_id = ?1 AND p.item_id = ?2
        "#,
        PROGRESS_COLUMNS
    ))?;
    stmt.query_row(params![profile_id, item_id], row_to_progress)
        .optional()
        .map_err(Into::into)
}

fn query_all_progress(conn: &Connection, profile_id: &str) -> Result<Vec<ItemProgress>> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT {}
        FROM item_progress p
        JOIN study_items i ON i.id = p.item_id
        WHERE p.profile_id = ?1
        ORDER BY p.item_id
        "#,
        PROGRESS_COLUMNS
    ))?;
    let rows = stmt.query_map(params![profile_id], row_to_progress)?;
    rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Into::into)
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Unreadable timestamps become the epoch, which makes an item due rather than lost
fn parse_ts(raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(e) => {
            warn!("Unreadable timestamp {:?} in store: {}", raw, e);
            DateTime::<Utc>::default()
        }
    }
}

fn non_negative(raw: i64) -> u32 {
    raw.clamp(0, u32::MAX as i64) as u32
}

fn execute_upsert(stmt: &mut Statement<'_>, p: &ItemProgress) -> rusqlite::Result<usize> {
    stmt.execute(params![
        p.profile_id,
        p.item_id,
        p.box_number as i64,
        p.correct_count as i64,
        p.incorrect_count as i64,
        p.consecutive_correct as i64,
        p.mastery_level.as_str(),
        p.last_reviewed_at.map(format_ts),
        format_ts(p.next_review_date),
        p.average_response_time,
    ])
}

fn row_to_profile(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get(0)?,
        name: row.get(1)?,
        current_rank: Rank::from_sort_order(row.get(2)?),
        learning_mode: LearningMode::parse_lossy(&row.get::<_, String>(3)?),
        created_at: parse_ts(&row.get::<_, String>(4)?),
        last_active_at: parse_ts(&row.get::<_, String>(5)?),
    })
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<StudyItem> {
    Ok(StudyItem {
        id: row.get(0)?,
        kind: ItemKind::parse_lossy(&row.get::<_, String>(1)?),
        rank: Rank::from_sort_order(row.get(2)?),
        label: row.get(3)?,
    })
}

fn row_to_progress(row: &Row<'_>) -> rusqlite::Result<ItemProgress> {
    let raw_box: i64 = row.get(4)?;
    let box_number = clamp_box(raw_box);
    if box_number as i64 != raw_box {
        warn!("Clamped out-of-range box {} to {}", raw_box, box_number);
    }

    Ok(ItemProgress {
        profile_id: row.get(0)?,
        item_id: row.get(1)?,
        kind: ItemKind::parse_lossy(&row.get::<_, String>(2)?),
        rank: Rank::from_sort_order(row.get(3)?),
        box_number,
        correct_count: non_negative(row.get(5)?),
        incorrect_count: non_negative(row.get(6)?),
        consecutive_correct: non_negative(row.get(7)?),
        mastery_level: MasteryLevel::parse_lossy(&row.get::<_, String>(8)?),
        last_reviewed_at: row.get::<_, Option<String>>(9)?.map(|s| parse_ts(&s)),
        next_review_date: parse_ts(&row.get::<_, String>(10)?),
        average_response_time: row.get::<_, f64>(11)?.max(0.0),
    })
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<StudySession> {
    let focus_raw: String = row.get(7)?;
    Ok(StudySession {
        id: row.get(0)?,
        profile_id: row.get(1)?,
        kind: SessionKind::parse_lossy(&row.get::<_, String>(2)?),
        started_at: parse_ts(&row.get::<_, String>(3)?),
        ended_at: parse_ts(&row.get::<_, String>(4)?),
        items_studied: non_negative(row.get(5)?),
        correct_answers: non_negative(row.get(6)?),
        focus_areas: serde_json::from_str(&focus_raw).unwrap_or_default(),
    })
}

fn row_to_grading(row: &Row<'_>) -> rusqlite::Result<GradingRecord> {
    Ok(GradingRecord {
        id: row.get(0)?,
        profile_id: row.get(1)?,
        graded_at: parse_ts(&row.get::<_, String>(2)?),
        rank_tested: Rank::from_sort_order(row.get(3)?),
        rank_achieved: Rank::from_sort_order(row.get(4)?),
        passed: row.get(5)?,
        preparation_secs: row.get::<_, i64>(6)?.max(0) as u64,
        examiner: row.get(7)?,
        venue: row.get(8)?,
        notes: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::NamedTempFile;

    fn setup() -> (NamedTempFile, SqliteStore) {
        let tmp = NamedTempFile::new().unwrap();
        let store = SqliteStore::open(tmp.path()).unwrap();
        (tmp, store)
    }

    fn profile(id: &str) -> Profile {
        let now = Utc::now();
        Profile {
            id: id.into(),
            name: "Min-jun".into(),
            current_rank: Rank::keup(9),
            learning_mode: LearningMode::Mastery,
            created_at: now,
            last_active_at: now,
        }
    }

    fn item(id: &str, rank: Rank) -> StudyItem {
        StudyItem {
            id: id.into(),
            kind: ItemKind::Terminology,
            rank,
            label: id.to_uppercase(),
        }
    }

    #[test]
    fn test_unknown_profile_reads_are_empty() {
        let (_tmp, store) = setup();
        assert!(store.fetch_profile("ghost").unwrap().is_none());
        assert!(store.fetch_sessions("ghost").unwrap().is_empty());
        assert!(store.fetch_item_progress("ghost").unwrap().is_empty());
        assert!(store.fetch_grading_records("ghost").unwrap().is_empty());
        assert!(store.fetch_all_profile_ids().unwrap().is_empty());
    }

    #[test]
    fn test_progress_roundtrip_joins_item_fields() {
        let (_tmp, store) = setup();
        store.upsert_profile(&profile("p1")).unwrap();
        let it = item("kihap", Rank::keup(9));
        store.upsert_item(&it).unwrap();

        let now = Utc::now();
        let mut p = ItemProgress::new("p1", &it, now);
        p.box_number = 3;
        p.correct_count = 4;
        p.last_reviewed_at = Some(now - Duration::days(1));
        store.save_item_progress(&p).unwrap();

        let loaded = store.fetch_progress_for_item("p1", "kihap").unwrap().unwrap();
        assert_eq!(loaded.box_number, 3);
        assert_eq!(loaded.correct_count, 4);
        assert_eq!(loaded.kind, ItemKind::Terminology);
        assert_eq!(loaded.rank, Rank::keup(9));
        assert_eq!(store.fetch_item_progress("p1").unwrap().len(), 1);
    }

    #[test]
    fn test_corrupted_box_is_clamped() {
        let (_tmp, store) = setup();
        let it = item("ap-chagi", Rank::keup(9));
        store.upsert_item(&it).unwrap();
        store.save_item_progress(&ItemProgress::new("p1", &it, Utc::now())).unwrap();

        store.lock().execute("UPDATE item_progress SET box = 17, mastery_level = 'legendary'", []).unwrap();

        let loaded = store.fetch_progress_for_item("p1", "ap-chagi").unwrap().unwrap();
        assert_eq!(loaded.box_number, 5);
        assert_eq!(loaded.mastery_level, MasteryLevel::Learning);
    }

    #[test]
    fn test_scope_queries() {
        let (_tmp, store) = setup();
        store.upsert_item(&item("white", Rank::keup(10))).unwrap();
        store.upsert_item(&item("yellow", Rank::keup(9))).unwrap();
        store.upsert_item(&item("green", Rank::keup(8))).unwrap();

        let progression = store.fetch_items_in_scope(Rank::keup(9), LearningMode::Progression).unwrap();
        assert_eq!(progression.len(), 1);
        assert_eq!(progression[0].id, "yellow");

        let mastery = store.fetch_items_in_scope(Rank::keup(9), LearningMode::Mastery).unwrap();
        let ids: Vec<&str> = mastery.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["white", "yellow"]);
    }

    #[test]
    fn test_sessions_and_gradings_scoped_by_profile() {
        let (_tmp, store) = setup();
        let now = Utc::now();
        for (id, owner) in [("s1", "p1"), ("s2", "p2"), ("s3", "p1")] {
            store
                .insert_session(&StudySession {
                    id: id.into(),
                    profile_id: owner.into(),
                    kind: SessionKind::Testing,
                    started_at: now - Duration::minutes(20),
                    ended_at: now,
                    items_studied: 10,
                    correct_answers: 8,
                    focus_areas: vec!["stances".into()],
                })
                .unwrap();
        }
        store
            .insert_grading(&GradingRecord {
                id: "g1".into(),
                profile_id: "p1".into(),
                graded_at: now,
                rank_tested: Rank::keup(8),
                rank_achieved: Rank::keup(8),
                passed: true,
                preparation_secs: 3600,
                examiner: Some("Master Kim".into()),
                venue: None,
                notes: None,
            })
            .unwrap();

        let sessions = store.fetch_sessions("p1").unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].focus_areas, vec!["stances".to_string()]);
        assert_eq!(store.fetch_grading_records("p1").unwrap().len(), 1);
        assert!(store.fetch_grading_records("p2").unwrap().is_empty());

        let deleted = store.delete_profile_data("p1").unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(store.fetch_sessions("p2").unwrap().len(), 1);
    }

    #[test]
    fn test_batch_save_and_counts() {
        let (_tmp, store) = setup();
        store.upsert_profile(&profile("p1")).unwrap();
        let now = Utc::now();
        let rows: Vec<ItemProgress> = (0..5)
            .map(|i| {
                let it = item(&format!("term-{}", i), Rank::keup(9));
                store.upsert_item(&it).unwrap();
                ItemProgress::new("p1", &it, now)
            })
            .collect();

        assert_eq!(store.save_item_progress_batch(&rows).unwrap(), 5);
        let counts = store.counts().unwrap();
        assert_eq!(counts.profiles, 1);
        assert_eq!(counts.items, 5);
        assert_eq!(counts.progress_rows, 5);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let (_tmp, store) = setup();
        store.upsert_profile(&profile("p1")).unwrap();
        store.upsert_item(&item("kihap", Rank::keup(9))).unwrap();
        let store = std::sync::Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        store
                            .update_item_progress("p1", "kihap", Utc::now(), &mut |p: &mut ItemProgress| p.correct_count += 1)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let loaded = store.fetch_progress_for_item("p1", "kihap").unwrap().unwrap();
        assert_eq!(loaded.correct_count, 400);
    }

    #[test]
    fn test_update_requires_known_profile_and_item() {
        let (_tmp, store) = setup();
        store.upsert_item(&item("kihap", Rank::keup(9))).unwrap();
        let err = store.update_item_progress("ghost", "kihap", Utc::now(), &mut |_: &mut ItemProgress| {}).unwrap_err();
        assert!(matches!(err, ProgressError::ProfileNotFound(_)));

        store.upsert_profile(&profile("p1")).unwrap();
        let err = store.update_item_progress("p1", "missing", Utc::now(), &mut |_: &mut ItemProgress| {}).unwrap_err();
        assert!(matches!(err, ProgressError::ItemNotFound(_)));
        assert!(store.fetch_item_progress("p1").unwrap().is_empty());
    }

    #[test]
    fn test_rewrite_replaces_every_row() {
        let (_tmp, store) = setup();
        store.upsert_profile(&profile("p1")).unwrap();
        let now = Utc::now();
        for id in ["charyot", "kyong-ye"] {
            let it = item(id, Rank::keup(10));
            store.upsert_item(&it).unwrap();
            store.save_item_progress(&ItemProgress::new("p1", &it, now)).unwrap();
        }

        let written = store
            .rewrite_item_progress("p1", &mut |p: &ItemProgress| ItemProgress { box_number: 4, ..p.clone() })
            .unwrap();
        assert_eq!(written.len(), 2);
        assert!(store.fetch_item_progress("p1").unwrap().iter().all(|p| p.box_number == 4));
        assert!(store.rewrite_item_progress("ghost", &mut |p: &ItemProgress| p.clone()).unwrap().is_empty());
    }
}
