//! End-to-end flow through the public tracker on an on-disk store

use chrono::{Duration, Utc};
use dojo_progress::config::{CONFIG_FILE, MODE_STATE_FILE};
use dojo_progress::{
    storage, Config, ItemKind, LearningMode, MasteryLevel, NewGrading, NewStudySession, Profile, ProgressStore,
    ProgressTracker, Rank, SessionKind, StudyItem,
};
use tempfile::TempDir;

fn seed(tracker: &ProgressTracker) {
    let now = Utc::now();
    let store = tracker.store();
    store
        .upsert_profile(&Profile {
            id: "student".into(),
            name: "Hana".into(),
            current_rank: Rank::keup(9),
            learning_mode: LearningMode::Mastery,
            created_at: now - Duration::days(60),
            last_active_at: now - Duration::days(1),
        })
        .unwrap();

    let items = [
        ("charyot", ItemKind::Terminology, Rank::keup(10)),
        ("kyong-ye", ItemKind::Terminology, Rank::keup(10)),
        ("chon-ji", ItemKind::Pattern, Rank::keup(9)),
        ("ap-chagi", ItemKind::Terminology, Rank::keup(9)),
        ("dan-gun", ItemKind::Pattern, Rank::keup(8)),
    ];
    for (id, kind, rank) in items {
        store
            .upsert_item(&StudyItem {
                id: id.into(),
                kind,
                rank,
                label: id.into(),
            })
            .unwrap();
    }
}

#[tokio::test]
async fn test_full_progress_flow() {
    let dir = TempDir::new().unwrap();
    storage::init(dir.path()).unwrap();
    assert!(dir.path().join(CONFIG_FILE).exists());

    let tracker = ProgressTracker::open(dir.path()).unwrap();
    seed(&tracker);

    // Classic mode: everything in scope is always offered, 10th + 9th keup material
    let queue = tracker.terms_for_review("student", 10).await;
    assert_eq!(queue.len(), 4);
    assert!(queue.iter().all(|p| p.item_id != "dan-gun"));

    for _ in 0..4 {
        tracker.record_answer("student", "charyot", true, 1.2).await.unwrap();
    }
    let learning = tracker.record_answer("student", "chon-ji", false, 6.0).await.unwrap();
    assert_eq!(learning.mastery_level, MasteryLevel::Learning);

    let now = Utc::now();
    tracker
        .record_study_session(NewStudySession {
            profile_id: "student".into(),
            kind: SessionKind::Flashcards,
            started_at: now - Duration::minutes(30),
            ended_at: now - Duration::minutes(10),
            items_studied: 5,
            correct_answers: 4,
            focus_areas: vec!["stances".into()],
        })
        .await
        .unwrap();

    let snapshot = tracker.get_progress_data("student").await.unwrap();
    assert_eq!(snapshot.statistics.overall.session_count, 1);
    assert_eq!(snapshot.statistics.overall.tracked_items, 2);
    assert_eq!(snapshot.statistics.belt_mastery.terminology_mastered, 1);
    assert_eq!(snapshot.statistics.last_7_days.len(), 7);
    assert_eq!(snapshot.statistics.last_30_days.len(), 30);
    assert!(!snapshot.journey.has_mismatch);

    // Within the TTL the same snapshot comes back
    let again = tracker.get_progress_data("student").await.unwrap();
    assert_eq!(again.generated_at, snapshot.generated_at);

    tracker
        .record_grading(NewGrading {
            profile_id: "student".into(),
            graded_at: now,
            rank_tested: Rank::keup(10),
            rank_achieved: Rank::keup(10),
            passed: true,
            preparation_secs: 7200,
            examiner: None,
            venue: Some("Central dojang".into()),
            notes: None,
        })
        .await
        .unwrap();
    let graded = tracker.get_progress_data("student").await.unwrap();
    assert!(graded.generated_at > snapshot.generated_at);
    assert_eq!(graded.journey.earned_rank, Rank::keup(10));
    assert!(graded.journey.has_mismatch);

    // Switch to Leitner and move existing progress into boxes
    let before_toggle = tracker.store().fetch_item_progress("student").unwrap();
    assert!(tracker.toggle_mode().await.unwrap());
    assert_eq!(tracker.store().fetch_item_progress("student").unwrap(), before_toggle);
    assert!(dir.path().join(MODE_STATE_FILE).exists());

    let report = tracker.migrate_to_leitner_mode("student").await.unwrap();
    assert_eq!(report.items_migrated, 2);
    let again = tracker.migrate_to_leitner_mode("student").await.unwrap();
    assert_eq!(again, report);

    let due = tracker.terms_for_review("student", 10).await;
    let ids: Vec<&str> = due.iter().map(|p| p.item_id.as_str()).collect();
    // Answered items now wait for their box interval; never-answered ones are due
    assert!(!ids.contains(&"charyot"));
    assert!(!ids.contains(&"chon-ji"));
    assert!(ids.contains(&"kyong-ye"));
    assert!(ids.contains(&"ap-chagi"));
    assert!(due.iter().all(|p| p.next_review_date <= Utc::now()));

    assert_eq!(tracker.refresh_all().await.unwrap(), 1);
}

#[tokio::test]
async fn test_reopen_keeps_mode_and_config() {
    let dir = TempDir::new().unwrap();
    storage::init(dir.path()).unwrap();

    {
        let tracker = ProgressTracker::open(dir.path()).unwrap();
        assert!(!tracker.coordinator().is_leitner_enabled());
        tracker.toggle_mode().await.unwrap();
    }

    let tracker = ProgressTracker::open(dir.path()).unwrap();
    assert!(tracker.coordinator().is_leitner_enabled());

    let config = Config::load(&dir.path().join(CONFIG_FILE)).unwrap();
    assert_eq!(config.cache.ttl_seconds, 300);
    assert_eq!(tracker.coordinator().intervals().days(), &[1, 3, 7, 14, 30]);
}
