use hypothesis_arena::candidate::ComparisonMode;
use hypothesis_arena::{JsonlTraceSink, MatchTrace, TraceSink};
use tempfile::tempdir;

#[derive(Debug, serde::Deserialize)]
struct TraceRow {
    round: usize,
    match_index: usize,
    mode: String,
    winner_id: Option<String>,
    error: Option<String>,
}

fn make_trace(round: usize, match_index: usize) -> MatchTrace {
    MatchTrace {
        timestamp_ms: 0,
        run_id: None,
        cycle: Some(1),
        round,
        match_index,
        mode: ComparisonMode::Deliberated,
        first_id: "a".to_string(),
        second_id: "b".to_string(),
        first_hash: "a_hash".to_string(),
        second_hash: "b_hash".to_string(),
        winner_id: Some("b".to_string()),
        rationale_hash: Some("r_hash".to_string()),
        winner_rating_before: Some(1200.0),
        winner_rating_after: Some(1216.0),
        loser_rating_before: Some(1200.0),
        loser_rating_after: Some(1184.0),
        attempts: 1,
        turns: 3,
        input_tokens: 0,
        output_tokens: 0,
        provider_cost_nanodollars: 0,
        error: None,
    }
}

#[test]
fn jsonl_trace_sink_writes_events_and_flushes_on_join() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.jsonl");

    let (sink, worker) = JsonlTraceSink::new(&path).unwrap();
    sink.record(make_trace(0, 0)).unwrap();
    let mut failed = make_trace(1, 3);
    failed.winner_id = None;
    failed.error = Some("unresolved".to_string());
    sink.record(failed).unwrap();

    drop(sink);
    worker.join().unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let rows: Vec<TraceRow> = raw
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].round, 0);
    assert_eq!(rows[0].mode, "deliberated");
    assert_eq!(rows[0].winner_id.as_deref(), Some("b"));
    assert_eq!(rows[1].match_index, 3);
    assert!(rows[1].winner_id.is_none());
    assert_eq!(rows[1].error.as_deref(), Some("unresolved"));
}

#[test]
fn cloned_sinks_share_one_writer() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.jsonl");
    let (sink, worker) = JsonlTraceSink::new(&path).unwrap();
    let clone = sink.clone();
    sink.record(make_trace(0, 0)).unwrap();
    drop(sink);
    clone.record(make_trace(0, 1)).unwrap();
    drop(clone);
    worker.join().unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert_eq!(raw.lines().count(), 2);
}
