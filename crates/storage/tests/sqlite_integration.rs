use puzzle_core::grading::Grade;
use puzzle_core::model::{
    CycleCompletionDelta, Puzzle, PuzzleCompletionDelta, PuzzleId, PuzzleRef, PuzzleSet,
    PuzzleSetId, ThemeCount, UserId, UserStats, UserStatsDelta,
};
use storage::repository::{
    PuzzleRepository, PuzzleSetRepository, StorageError, UserRepository,
};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn pid(s: &str) -> PuzzleId {
    PuzzleId::new(s).unwrap()
}

fn build_set() -> PuzzleSet {
    PuzzleSet::new(
        PuzzleSetId::new(1),
        UserId::new(1),
        "Knight forks",
        vec![
            PuzzleRef::new(pid("c"), 2),
            PuzzleRef::new(pid("a"), 0),
            PuzzleRef::new(pid("b"), 1),
        ],
    )
    .unwrap()
}

fn solved(id: &str, mistakes: u32, grade: u8) -> PuzzleCompletionDelta {
    PuzzleCompletionDelta {
        puzzle_id: pid(id),
        mistakes,
        time_taken_secs: 4.25,
        grade: Grade::new(grade).unwrap(),
        streak: u32::from(mistakes == 0),
        time_with_penalty_secs: 4.25 + 3.0 * f64::from(mistakes),
    }
}

#[tokio::test]
async fn puzzle_roundtrip_keeps_moves_and_themes() {
    let repo = connect("memdb_puzzle_roundtrip").await;
    let puzzle = Puzzle::from_move_list(
        pid("00sHx"),
        "q3k1nr/1pp1nQpp/3p4/1P2p3/4P3/B1PP1b2/B5PP/5K2 b k - 0 17",
        "e8d7 a2e6 d7d8 f7f8",
        vec!["mate".into(), "mateIn2".into()],
    )
    .unwrap();
    repo.upsert_puzzle(&puzzle).await.unwrap();

    let fetched = repo.get_puzzle(&pid("00sHx")).await.unwrap().unwrap();
    assert_eq!(fetched, puzzle);
    assert!(repo.get_puzzle(&pid("missing")).await.unwrap().is_none());
}

#[tokio::test]
async fn set_roundtrip_preserves_order_and_history() {
    let repo = connect("memdb_set_roundtrip").await;
    let mut set = build_set();
    set.apply_puzzle_delta(&solved("a", 1, 3)).unwrap();
    set.apply_cycle_delta(&CycleCompletionDelta {
        total_time_secs: 42.5,
    });
    repo.upsert_set(&set).await.unwrap();

    let fetched = repo.get_set(set.id()).await.unwrap().unwrap();
    assert_eq!(fetched, set);

    let listed = repo.list_sets(UserId::new(1)).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(repo.list_sets(UserId::new(2)).await.unwrap().is_empty());
}

#[tokio::test]
async fn puzzle_completion_updates_entry_and_set_counters() {
    let repo = connect("memdb_puzzle_completion").await;
    repo.upsert_set(&build_set()).await.unwrap();

    let entry = repo
        .record_puzzle_completion(PuzzleSetId::new(1), &solved("b", 0, 5))
        .await
        .unwrap();
    assert!(entry.played);
    assert_eq!(entry.count, 1);
    assert_eq!(entry.streak, 1);
    assert_eq!(entry.grades, vec![Grade::new(5).unwrap()]);

    // Solving the same puzzle again in the cycle does not move progression.
    repo.record_puzzle_completion(PuzzleSetId::new(1), &solved("b", 2, 2))
        .await
        .unwrap();

    let set = repo.get_set(PuzzleSetId::new(1)).await.unwrap().unwrap();
    assert_eq!(set.progression(), 1);
    assert!((set.current_time() - (4.25 + 4.25 + 6.0)).abs() < 1e-9);
    let b = set.puzzle(&pid("b")).unwrap();
    assert_eq!(b.mistakes, vec![0, 2]);
    assert_eq!(b.streak, 0);

    let unplayed: Vec<_> = set
        .unplayed_in_order()
        .into_iter()
        .map(|p| p.puzzle_id.as_str().to_owned())
        .collect();
    assert_eq!(unplayed, vec!["a", "c"]);
}

#[tokio::test]
async fn cycle_completion_resets_the_run() {
    let repo = connect("memdb_cycle_completion").await;
    repo.upsert_set(&build_set()).await.unwrap();
    for id in ["a", "b", "c"] {
        repo.record_puzzle_completion(PuzzleSetId::new(1), &solved(id, 0, 5))
            .await
            .unwrap();
    }

    repo.record_cycle_completion(
        PuzzleSetId::new(1),
        &CycleCompletionDelta {
            total_time_secs: 13.75,
        },
    )
    .await
    .unwrap();

    let set = repo.get_set(PuzzleSetId::new(1)).await.unwrap().unwrap();
    assert_eq!(set.cycles(), 1);
    assert_eq!(set.times(), &[13.75]);
    assert_eq!(set.progression(), 0);
    assert_eq!(set.current_time(), 0.0);
    assert!(set.puzzles().iter().all(|p| !p.played && p.count == 1));
}

#[tokio::test]
async fn missing_rows_report_not_found() {
    let repo = connect("memdb_missing_rows").await;
    let err = repo
        .record_puzzle_completion(PuzzleSetId::new(9), &solved("a", 0, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound));

    let err = repo
        .record_cycle_completion(
            PuzzleSetId::new(9),
            &CycleCompletionDelta {
                total_time_secs: 1.0,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound));

    let err = repo
        .apply_user_delta(UserId::new(9), &UserStatsDelta::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
}

#[tokio::test]
async fn user_delta_increments_and_appends_themes() {
    let repo = connect("memdb_user_delta").await;
    let mut user = UserStats::new(UserId::new(1));
    user.total_puzzle_solved = 10;
    user.themes = vec![ThemeCount::new("fork", 4), ThemeCount::new("pin", 1)];
    repo.upsert_user(&user).await.unwrap();

    let delta = UserStatsDelta {
        puzzles_solved: 1,
        theme_increments: vec![1],
        new_themes: vec![ThemeCount::new("skewer", 1)],
        sets_completed: 1,
    };
    repo.apply_user_delta(user.id, &delta).await.unwrap();

    let mut expected = user.clone();
    expected.apply_delta(&delta).unwrap();
    let stored = repo.get_user(user.id).await.unwrap().unwrap();
    assert_eq!(stored, expected);
    assert_eq!(stored.theme_count("pin"), Some(2));
    assert_eq!(stored.theme_count("skewer"), Some(1));
    assert_eq!(stored.total_set_completed, 1);

    let bad = UserStatsDelta {
        theme_increments: vec![7],
        ..UserStatsDelta::default()
    };
    let err = repo.apply_user_delta(user.id, &bad).await.unwrap_err();
    assert!(matches!(err, StorageError::Serialization(_)));
}
