use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use hypothesis_arena::gateway::Attribution;
use hypothesis_arena::oracle::{JudgeError, JudgeOracle, JudgeUsage, Judgement};
use hypothesis_arena::prompts::PromptInstance;
use hypothesis_arena::tournament::{
    run_tournament, run_tournament_with_hooks, MatchEvent, MatchObserver, ObserverError,
    RoundKind, StopReason, TournamentConfig, TournamentError, TournamentHooks,
};
use hypothesis_arena::{Candidate, CandidateId, ComparisonMode, ResearchPlan, Side};

/// Decides every match by a fixed per-candidate strength.
struct StrengthOracle {
    plan: ResearchPlan,
    strength: HashMap<CandidateId, u32>,
    calls: AtomicUsize,
    deliberated: AtomicUsize,
    unresolved: Option<(CandidateId, CandidateId)>,
}

impl StrengthOracle {
    fn new(strengths: &[(&str, u32)]) -> Self {
        Self {
            plan: ResearchPlan::new("rank hypotheses"),
            strength: strengths
                .iter()
                .map(|(id, s)| (CandidateId::from(*id), *s))
                .collect(),
            calls: AtomicUsize::new(0),
            deliberated: AtomicUsize::new(0),
            unresolved: None,
        }
    }
}

#[async_trait]
impl JudgeOracle for StrengthOracle {
    async fn compare(
        &self,
        first: &Candidate,
        second: &Candidate,
        mode: ComparisonMode,
        _attribution: &Attribution,
    ) -> Result<Judgement, JudgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if mode == ComparisonMode::Deliberated {
            self.deliberated.fetch_add(1, Ordering::SeqCst);
        }
        if let Some((a, b)) = &self.unresolved {
            let pair = (&first.id, &second.id);
            if pair == (a, b) || pair == (b, a) {
                return Err(JudgeError::Unresolved {
                    first: first.id.clone(),
                    second: second.id.clone(),
                    mode,
                    attempts: 5,
                });
            }
        }
        let winner = if self.strength[&first.id] >= self.strength[&second.id] {
            Side::First
        } else {
            Side::Second
        };
        Ok(Judgement {
            winner,
            rationale: format!("{} is stronger", if winner == Side::First { 1 } else { 2 }),
            attempts: 1,
            turns: 1,
            usage: JudgeUsage::default(),
        })
    }

    async fn ask(
        &self,
        _prompt: &PromptInstance,
        _attribution: &Attribution,
    ) -> Result<(String, JudgeUsage), JudgeError> {
        Ok((String::new(), JudgeUsage::default()))
    }

    fn plan(&self) -> &ResearchPlan {
        &self.plan
    }
}

/// First-listed candidate wins iff its id sorts lower; outcomes follow the schedule.
struct OrderOracle(ResearchPlan);

#[async_trait]
impl JudgeOracle for OrderOracle {
    async fn compare(
        &self,
        first: &Candidate,
        second: &Candidate,
        _mode: ComparisonMode,
        _attribution: &Attribution,
    ) -> Result<Judgement, JudgeError> {
        let winner = if first.id.as_str() < second.id.as_str() {
            Side::First
        } else {
            Side::Second
        };
        Ok(Judgement {
            winner,
            rationale: String::new(),
            attempts: 1,
            turns: 1,
            usage: JudgeUsage::default(),
        })
    }

    async fn ask(
        &self,
        _prompt: &PromptInstance,
        _attribution: &Attribution,
    ) -> Result<(String, JudgeUsage), JudgeError> {
        Ok((String::new(), JudgeUsage::default()))
    }

    fn plan(&self) -> &ResearchPlan {
        &self.0
    }
}

fn pair(a: &str, b: &str) -> (Candidate, Candidate) {
    (
        Candidate::new(a, format!("hypothesis {a}")),
        Candidate::new(b, format!("hypothesis {b}")),
    )
}

fn numbered_pairs(n: usize) -> Vec<(Candidate, Candidate)> {
    (0..n)
        .map(|i| pair(&format!("c{:02}", 2 * i), &format!("c{:02}", 2 * i + 1)))
        .collect()
}

fn config(rounds: usize, seed: u64) -> TournamentConfig {
    TournamentConfig {
        rounds,
        rng_seed: Some(seed),
        ..TournamentConfig::default()
    }
}

fn ids(cs: &[Candidate]) -> Vec<&str> {
    cs.iter().map(|c| c.id.as_str()).collect()
}

#[tokio::test]
async fn four_candidates_one_rematch_keeps_a_and_c() {
    let oracle = StrengthOracle::new(&[("A", 4), ("C", 3), ("D", 2), ("B", 1)]);
    let outcome = run_tournament(
        &oracle,
        vec![pair("A", "B"), pair("C", "D")],
        &config(1, 3),
        &Attribution::new("test"),
        None,
    )
    .await
    .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.rematches_completed, 1);
    assert_eq!(outcome.matches.len(), 4);

    // C and D tie at 1200; C was registered first.
    assert_eq!(ids(&outcome.retained), vec!["A", "C"]);
    assert_eq!(ids(&outcome.eliminated), vec!["D", "B"]);

    let ratings: HashMap<&str, f64> = outcome
        .ranked()
        .map(|c| (c.id.as_str(), c.rating.unwrap()))
        .collect();
    assert_eq!(ratings["A"], 1232.0);
    assert_eq!(ratings["C"], 1200.0);
    assert_eq!(ratings["D"], 1200.0);
    assert_eq!(ratings["B"], 1168.0);

    let initial = &outcome.rounds[0];
    assert_eq!(initial.kind, RoundKind::Initial);
    assert_eq!(initial.deliberated, 0);
    let rematch = &outcome.rounds[1];
    assert_eq!(rematch.kind, RoundKind::Rematch);
    assert_eq!(rematch.matches, 2);
    assert_eq!(rematch.deliberated, 1);
    assert_eq!(oracle.deliberated.load(Ordering::SeqCst), 1);

    let a = &outcome.retained[0];
    assert_eq!(a.wins.len(), 2);
    assert!(a.losses.is_empty());
    assert!(a.wins.iter().all(|m| m.winner_id() == &a.id));
}

#[tokio::test]
async fn retains_floor_half_of_entrants() {
    for n_pairs in [1, 3, 5] {
        let strengths: Vec<(String, u32)> = (0..2 * n_pairs)
            .map(|i| (format!("c{i:02}"), i as u32))
            .collect();
        let refs: Vec<(&str, u32)> = strengths.iter().map(|(s, v)| (s.as_str(), *v)).collect();
        let oracle = StrengthOracle::new(&refs);

        let outcome = run_tournament(
            &oracle,
            numbered_pairs(n_pairs),
            &config(4, 11),
            &Attribution::new("test"),
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome.retained.len(), n_pairs);
        assert_eq!(outcome.eliminated.len(), n_pairs);
        let ratings: Vec<f64> = outcome.ranked().map(|c| c.rating.unwrap()).collect();
        assert!(ratings.windows(2).all(|w| w[0] >= w[1]));
    }
}

#[tokio::test]
async fn rating_mass_is_conserved() {
    let oracle = OrderOracle(ResearchPlan::new("goal"));
    let outcome = run_tournament(
        &oracle,
        numbered_pairs(6),
        &config(4, 5),
        &Attribution::new("test"),
        None,
    )
    .await
    .unwrap();

    let total: f64 = outcome.ranked().map(|c| c.rating.unwrap()).sum();
    assert!((total - 12.0 * 1200.0).abs() < 1e-6);
}

#[tokio::test]
async fn same_seed_replays_identically() {
    let oracle = OrderOracle(ResearchPlan::new("goal"));
    let oracle = &oracle;
    let run = || async move {
        run_tournament(
            oracle,
            numbered_pairs(7),
            &config(4, 2024),
            &Attribution::new("test"),
            None,
        )
        .await
        .unwrap()
    };

    let first = run().await;
    let second = run().await;
    assert_eq!(first.matches, second.matches);
    assert_eq!(ids(&first.retained), ids(&second.retained));
    let ratings = |o: &hypothesis_arena::TournamentOutcome| -> Vec<f64> {
        o.ranked().map(|c| c.rating.unwrap()).collect()
    };
    assert_eq!(ratings(&first), ratings(&second));
}

#[tokio::test]
async fn cancel_before_start_makes_no_calls() {
    let oracle = StrengthOracle::new(&[("A", 2), ("B", 1)]);
    let cancel = AtomicBool::new(true);
    let (mut a, b) = pair("A", "B");
    a.rating = Some(1250.0);

    let outcome = run_tournament(
        &oracle,
        vec![(a, b)],
        &config(4, 1),
        &Attribution::new("test"),
        Some(&cancel),
    )
    .await
    .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Cancelled);
    assert!(outcome.matches.is_empty());
    assert!(outcome.rounds.is_empty());
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);

    // Nobody played, so ratings are exactly what came in.
    assert_eq!(ids(&outcome.retained), vec!["A"]);
    assert_eq!(ids(&outcome.eliminated), vec!["B"]);
    assert_eq!(outcome.retained[0].rating, Some(1250.0));
    assert_eq!(outcome.eliminated[0].rating, None);
}

#[tokio::test]
async fn tied_ratings_break_toward_the_earlier_initial_winner() {
    let oracle = StrengthOracle::new(&[("A", 4), ("C", 3), ("D", 2), ("B", 1)]);
    // C wins from the second seat, so it is rated before D.
    let outcome = run_tournament(
        &oracle,
        vec![pair("D", "C"), pair("A", "B")],
        &config(1, 3),
        &Attribution::new("test"),
        None,
    )
    .await
    .unwrap();

    let ratings: HashMap<&str, f64> = outcome
        .ranked()
        .map(|c| (c.id.as_str(), c.rating.unwrap()))
        .collect();
    assert_eq!(ratings["C"], 1200.0);
    assert_eq!(ratings["D"], 1200.0);
    assert_eq!(ids(&outcome.retained), vec!["A", "C"]);
    assert_eq!(ids(&outcome.eliminated), vec!["D", "B"]);
}

#[tokio::test]
async fn unresolved_match_aborts_round_without_applying_it() {
    let mut oracle = StrengthOracle::new(&[("A", 4), ("B", 3), ("C", 2), ("D", 1)]);
    oracle.unresolved = Some(("C".into(), "D".into()));

    let err = run_tournament(
        &oracle,
        vec![pair("A", "B"), pair("C", "D")],
        &config(2, 1),
        &Attribution::new("test"),
        None,
    )
    .await
    .unwrap_err();

    match err {
        TournamentError::MatchUnresolved {
            first,
            second,
            mode,
            round,
            attempts,
        } => {
            assert_eq!(first.as_str(), "C");
            assert_eq!(second.as_str(), "D");
            assert_eq!(mode, ComparisonMode::Direct);
            assert_eq!(round, 0);
            assert_eq!(attempts, 5);
        }
        other => panic!("expected MatchUnresolved, got {other:?}"),
    }
}

#[tokio::test]
async fn rejects_candidate_in_two_pairs() {
    let oracle = StrengthOracle::new(&[("A", 1), ("B", 2), ("C", 3)]);
    let err = run_tournament(
        &oracle,
        vec![pair("A", "B"), pair("A", "C")],
        &config(1, 1),
        &Attribution::new("test"),
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TournamentError::InvalidRequest(_)));
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
}

struct FailingObserver {
    seen: Mutex<Vec<MatchEvent>>,
}

#[async_trait]
impl MatchObserver for FailingObserver {
    async fn on_match(&self, event: MatchEvent) -> Result<(), ObserverError> {
        self.seen.lock().unwrap().push(event);
        Err(ObserverError::Message("disk full".into()))
    }
}

#[tokio::test]
async fn observer_failures_do_not_stop_the_tournament() {
    let oracle = StrengthOracle::new(&[("A", 4), ("C", 3), ("D", 2), ("B", 1)]);
    let observer = FailingObserver {
        seen: Mutex::new(Vec::new()),
    };

    let outcome = run_tournament_with_hooks(
        &oracle,
        vec![pair("A", "B"), pair("C", "D")],
        &config(1, 3),
        &Attribution::new("test"),
        TournamentHooks {
            trace: None,
            observer: Some(&observer),
        },
        None,
    )
    .await
    .unwrap();

    let seen = observer.seen.lock().unwrap();
    assert_eq!(seen.len(), outcome.matches.len());
    let first = &seen[0];
    assert_eq!(first.round, 0);
    assert_eq!(first.update.winner_before, 1200.0);
    assert_eq!(first.update.winner_after, 1216.0);
}
