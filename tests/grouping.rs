use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use hypothesis_arena::gateway::{
    Attribution, ChatGateway, ChatRequest, ChatResponse, ProviderError,
};
use hypothesis_arena::grouping::{deduplicate, group_by_proximity, GroupingError};
use hypothesis_arena::oracle::{JudgeConfig, LlmJudge};
use hypothesis_arena::{Candidate, ResearchPlan};

/// Replays canned answers in order and keeps every request.
struct Script {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    seen: Mutex<Vec<ChatRequest>>,
}

#[async_trait]
impl ChatGateway for Script {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.seen.lock().unwrap().push(req);
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(String::new()))
            .map(ChatResponse::text)
    }
}

fn judge(replies: Vec<Result<&str, ProviderError>>) -> LlmJudge<Script> {
    let script = Script {
        replies: Mutex::new(replies.into_iter().map(|r| r.map(String::from)).collect()),
        seen: Mutex::new(Vec::new()),
    };
    LlmJudge::new(
        script,
        ResearchPlan::new("explain antibiotic tolerance"),
        JudgeConfig::default(),
    )
    .unwrap()
}

fn batch(n: usize) -> Vec<Candidate> {
    (1..=n)
        .map(|i| Candidate::new(format!("h{i}"), format!("hypothesis number {i}")))
        .collect()
}

fn ids(cs: &[Candidate]) -> Vec<&str> {
    cs.iter().map(|c| c.id.as_str()).collect()
}

#[tokio::test]
async fn dedup_keeps_listed_candidates_in_batch_order() {
    let j = judge(vec![Ok(
        "[2] and [4] restate [1].\n\nFinal Hypotheses: [5], [1], [3], [1]",
    )]);
    let out = deduplicate(&j, batch(5), &Attribution::new("test"))
        .await
        .unwrap();

    assert!(!out.fallback);
    assert_eq!(ids(&out.retained), vec!["h1", "h3", "h5"]);
    let dropped: Vec<&str> = out.dropped.iter().map(|id| id.as_str()).collect();
    assert_eq!(dropped, vec!["h2", "h4"]);
    assert_eq!(out.usage.calls, 1);
}

#[tokio::test]
async fn dedup_never_grows_and_falls_back_on_unusable_answers() {
    for answer in [
        "These all look distinct to me.",
        "Final Hypotheses: none of them",
        "Final Hypotheses: [9], [12]",
    ] {
        let j = judge(vec![Ok(answer)]);
        let input = batch(4);
        let out = deduplicate(&j, input.clone(), &Attribution::new("test"))
            .await
            .unwrap();
        assert!(out.fallback, "answer {answer:?} should fall back");
        assert_eq!(out.retained, input);
        assert!(out.dropped.is_empty());
    }
}

#[tokio::test]
async fn dedup_refusal_keeps_batch() {
    let j = judge(vec![Err(ProviderError::refused("I cannot do that"))]);
    let out = deduplicate(&j, batch(3), &Attribution::new("test"))
        .await
        .unwrap();
    assert!(out.fallback);
    assert_eq!(out.retained.len(), 3);
}

#[tokio::test]
async fn single_candidate_batches_skip_the_judge() {
    let j = judge(vec![]);
    let out = deduplicate(&j, batch(1), &Attribution::new("test"))
        .await
        .unwrap();
    assert_eq!(out.retained.len(), 1);
    assert!(!out.fallback);

    let pairing = group_by_proximity(&j, batch(1), &Attribution::new("test"))
        .await
        .unwrap();
    assert!(pairing.pairs.is_empty());
    assert_eq!(pairing.unpaired.len(), 1);
    assert_eq!(pairing.usage.calls, 0);
}

#[tokio::test]
async fn dedup_prompt_lists_the_batch_with_display_indices() {
    let script = Script {
        replies: Mutex::new(VecDeque::from([Ok("Final Hypotheses: [1]".to_string())])),
        seen: Mutex::new(Vec::new()),
    };
    let plan = ResearchPlan::new("goal");
    let gateway = std::sync::Arc::new(script);
    let j = LlmJudge::new(gateway.clone(), plan, JudgeConfig::default()).unwrap();

    deduplicate(&j, batch(2), &Attribution::new("test").with_cycle(4))
        .await
        .unwrap();

    let seen = gateway.seen.lock().unwrap();
    let req = &seen[0];
    assert_eq!(req.attribution.caller, "grouping::dedup");
    assert_eq!(req.attribution.cycle, Some(4));
    let user = &req.messages.last().unwrap().content;
    assert!(user.contains("[1]\nhypothesis number 1"));
    assert!(user.contains("[2]\nhypothesis number 2"));
}

#[tokio::test]
async fn proximity_pairs_never_reuse_a_candidate() {
    let j = judge(vec![Ok(
        "Proximity Graph: [1]-[2], [2]-[3], [3]-[4], [5]-[5], [6]-[9]",
    )]);
    let out = group_by_proximity(&j, batch(6), &Attribution::new("test"))
        .await
        .unwrap();

    let pairs: Vec<(&str, &str)> = out
        .pairs
        .iter()
        .map(|(a, b)| (a.id.as_str(), b.id.as_str()))
        .collect();
    assert_eq!(pairs, vec![("h1", "h2"), ("h3", "h4")]);
    assert_eq!(ids(&out.unpaired), vec!["h5", "h6"]);

    let mut seen = HashSet::new();
    for (a, b) in &out.pairs {
        assert!(seen.insert(a.id.clone()));
        assert!(seen.insert(b.id.clone()));
    }
}

#[tokio::test]
async fn proximity_without_marker_leaves_everyone_unpaired() {
    let j = judge(vec![Ok("[1]-[2] look similar")]);
    let out = group_by_proximity(&j, batch(4), &Attribution::new("test"))
        .await
        .unwrap();
    assert!(out.pairs.is_empty());
    assert_eq!(out.unpaired.len(), 4);
}

#[tokio::test]
async fn transport_errors_propagate() {
    let j = judge(vec![Err(ProviderError::config("no key"))]);
    let err = group_by_proximity(&j, batch(3), &Attribution::new("test"))
        .await
        .unwrap_err();
    assert!(matches!(err, GroupingError::Judge(_)));
}

#[tokio::test]
async fn duplicate_ids_are_rejected() {
    let j = judge(vec![]);
    let mut input = batch(2);
    input.push(Candidate::new("h1", "again"));
    let err = deduplicate(&j, input, &Attribution::new("test"))
        .await
        .unwrap_err();
    assert!(matches!(err, GroupingError::InvalidRequest(_)));
}
