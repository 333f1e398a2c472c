use hypothesis_arena::candidate::{ComparisonMode, MatchRecord, Side};
use hypothesis_arena::store::{CandidateStore, SqliteCandidateStore, StoreError};
use hypothesis_arena::{Candidate, CandidateId, LineageError};
use tempfile::tempdir;

#[derive(Debug, serde::Deserialize)]
struct ExportRow {
    candidate: Candidate,
    retired_cycle: Option<u32>,
    created_at: i64,
    updated_at: i64,
}

fn win(winner: &str, loser: &str, round: usize) -> MatchRecord {
    MatchRecord {
        first: winner.into(),
        second: loser.into(),
        winner: Side::First,
        rationale: format!("{winner} is better\nbetter hypothesis: 1"),
        mode: ComparisonMode::Direct,
        round,
    }
}

#[tokio::test]
async fn sqlite_store_put_get_update_and_export() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("arena.sqlite");
    let store = SqliteCandidateStore::new(&db_path).unwrap();

    let c = Candidate::new("alpha", "Persisters lower ATP")
        .with_review("initial", "plausible")
        .in_cycle(1);
    store.put(&c).await.unwrap();

    let mut rated = c.clone();
    rated.rating = Some(1216.0);
    rated.wins.push(win("alpha", "beta", 0));
    store.put(&rated).await.unwrap();

    let got = store.get(&"alpha".into()).await.unwrap().unwrap();
    assert_eq!(got.candidate, rated);
    assert!(got.is_active());
    assert!(store.get(&"missing".into()).await.unwrap().is_none());

    // History is append-only.
    let mut rewritten = rated.clone();
    rewritten.wins.clear();
    let err = store.put(&rewritten).await.unwrap_err();
    assert!(matches!(err, StoreError::Immutable { field: "recorded wins", .. }));

    assert_eq!(store.retire(&["alpha".into()], 1).await.unwrap(), 1);

    let export_path = dir.path().join("export.jsonl");
    assert_eq!(store.export_jsonl(&export_path).await.unwrap(), 1);
    let raw = std::fs::read_to_string(&export_path).unwrap();
    let rows: Vec<ExportRow> = raw
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.candidate.id.as_str(), "alpha");
    assert_eq!(row.candidate.rating, Some(1216.0));
    assert_eq!(row.candidate.export().win_texts.len(), 1);
    assert_eq!(row.retired_cycle, Some(1));
    assert!(row.updated_at >= row.created_at);
}

#[tokio::test]
async fn sqlite_store_survives_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("arena.sqlite");

    {
        let store = SqliteCandidateStore::new(&db_path).unwrap();
        store.put(&Candidate::new("root", "r").in_cycle(0)).await.unwrap();
        store
            .put(&Candidate::new("kid", "k").in_cycle(1).with_parent("root"))
            .await
            .unwrap();
    }

    let store = SqliteCandidateStore::new(&db_path).unwrap();
    let ids: Vec<CandidateId> = store
        .all()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.candidate.id)
        .collect();
    assert_eq!(ids, vec![CandidateId::from("root"), CandidateId::from("kid")]);

    let chain = store.lineage(&"kid".into()).await.unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[1].id.as_str(), "root");
}

#[tokio::test]
async fn sqlite_store_enforces_lineage() {
    let dir = tempdir().unwrap();
    let store = SqliteCandidateStore::new(dir.path().join("arena.sqlite")).unwrap();

    let err = store
        .put(&Candidate::new("kid", "k").in_cycle(1).with_parent("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Lineage(LineageError::UnknownParent { .. })));

    let err = store
        .put(&Candidate::new("narcissus", "n").in_cycle(1).with_parent("narcissus"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Lineage(LineageError::SelfParent { .. })));

    let err = store.lineage(&"ghost".into()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));

    let err = store.retire(&["ghost".into()], 1).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn exclusive_lock_is_released_on_drop() {
    let dir = tempdir().unwrap();
    let store = SqliteCandidateStore::new(dir.path().join("arena.sqlite")).unwrap();
    let lock = store.lock_exclusive().unwrap();
    drop(lock);
    let _again = store.lock_exclusive().unwrap();
}
