//! Tournament state machine: Initial → Split&Rematch ×R → Finalized.
//!
//! Every match of a round is judged concurrently. Rating updates are applied
//! only after the whole round has returned, in schedule order, so a fixed
//! seed and a deterministic judge always produce the same standings.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::candidate::{Candidate, CandidateId, ComparisonMode, MatchRecord};
use crate::config::MAX_CONCURRENCY;
use crate::gateway::Attribution;
use crate::oracle::{JudgeError, JudgeOracle, JudgeUsage, Judgement};
use crate::rating::{RatingError, RatingTable};

use super::hooks::{MatchEvent, MatchObserver};
use super::trace::{now_epoch_ms, text_hash, MatchTrace, TraceError, TraceSink};
use super::types::{RoundKind, RoundSummary, StopReason, TournamentConfig, TournamentOutcome};

#[derive(Debug, thiserror::Error)]
pub enum TournamentError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("match {first} vs {second} unresolved in round {round} after {attempts} attempts")]
    MatchUnresolved {
        first: CandidateId,
        second: CandidateId,
        mode: ComparisonMode,
        round: usize,
        attempts: u32,
    },
    #[error("Judge error: {0}")]
    Judge(JudgeError),
    #[error("Rating error: {0}")]
    Rating(#[from] RatingError),
    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),
}

/// Optional per-match sinks.
#[derive(Default, Clone, Copy)]
pub struct TournamentHooks<'a> {
    pub trace: Option<&'a dyn TraceSink>,
    pub observer: Option<&'a dyn MatchObserver>,
}

/// One scheduled comparison.
#[derive(Debug, Clone)]
struct Scheduled {
    first: CandidateId,
    second: CandidateId,
    mode: ComparisonMode,
}

pub fn validate_tournament_request(
    pairs: &[(Candidate, Candidate)],
    config: &TournamentConfig,
) -> Result<(), TournamentError> {
    if config.concurrency == 0 {
        return Err(TournamentError::InvalidRequest(
            "concurrency must be >= 1".into(),
        ));
    }
    if config.concurrency > MAX_CONCURRENCY {
        return Err(TournamentError::InvalidRequest(format!(
            "concurrency must be <= {MAX_CONCURRENCY}"
        )));
    }

    let mut seen = HashSet::with_capacity(pairs.len() * 2);
    for (a, b) in pairs {
        if a.id == b.id {
            return Err(TournamentError::InvalidRequest(format!(
                "candidate {} is paired with itself",
                a.id
            )));
        }
        for id in [&a.id, &b.id] {
            if !seen.insert(id) {
                return Err(TournamentError::InvalidRequest(format!(
                    "candidate {id} appears in more than one initial pair"
                )));
            }
        }
    }
    Ok(())
}

/// Run a tournament over the initial pairs.
pub async fn run_tournament(
    oracle: &dyn JudgeOracle,
    pairs: Vec<(Candidate, Candidate)>,
    config: &TournamentConfig,
    attribution: &Attribution,
    cancel_flag: Option<&AtomicBool>,
) -> Result<TournamentOutcome, TournamentError> {
    run_tournament_with_hooks(
        oracle,
        pairs,
        config,
        attribution,
        TournamentHooks::default(),
        cancel_flag,
    )
    .await
}

/// Run a tournament with optional trace output and match observer.
pub async fn run_tournament_with_hooks(
    oracle: &dyn JudgeOracle,
    pairs: Vec<(Candidate, Candidate)>,
    config: &TournamentConfig,
    attribution: &Attribution,
    hooks: TournamentHooks<'_>,
    cancel_flag: Option<&AtomicBool>,
) -> Result<TournamentOutcome, TournamentError> {
    validate_tournament_request(&pairs, config)?;

    let mut state = State::new(config, attribution, hooks)?;
    let mut initial = Vec::with_capacity(pairs.len());
    for (a, b) in pairs {
        initial.push(Scheduled {
            first: a.id.clone(),
            second: b.id.clone(),
            mode: ComparisonMode::Direct,
        });
        state.enter(a);
        state.enter(b);
    }

    let cancelled = || cancel_flag.is_some_and(|f| f.load(AtomicOrdering::Relaxed));

    if cancelled() {
        return Ok(state.finalize(StopReason::Cancelled));
    }
    state
        .play_round(oracle, 0, RoundKind::Initial, initial, Vec::new())
        .await?;

    let mut rng = match config.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    for round in 1..=config.rounds {
        if cancelled() {
            info!(round, "tournament cancelled at round boundary");
            return Ok(state.finalize(StopReason::Cancelled));
        }
        let (schedule, sat_out) = split_and_pair(&state.table.ranked(), &mut rng);
        state
            .play_round(oracle, round, RoundKind::Rematch, schedule, sat_out)
            .await?;
        state.rematches_completed = round;
    }

    Ok(state.finalize(StopReason::Completed))
}

/// Split standings at `n/2`, shuffle each half, pair neighbours.
///
/// Upper-half pairs are deliberated, lower-half pairs are direct. The odd
/// member of a half, if any, sits out.
fn split_and_pair(
    standings: &[(CandidateId, f64)],
    rng: &mut StdRng,
) -> (Vec<Scheduled>, Vec<CandidateId>) {
    let mid = standings.len() / 2;
    let mut contenders: Vec<CandidateId> =
        standings[..mid].iter().map(|(id, _)| id.clone()).collect();
    let mut challengers: Vec<CandidateId> =
        standings[mid..].iter().map(|(id, _)| id.clone()).collect();
    contenders.shuffle(rng);
    challengers.shuffle(rng);

    let mut schedule = Vec::with_capacity(standings.len() / 2);
    let mut sat_out = Vec::new();
    for (half, mode) in [
        (contenders, ComparisonMode::Deliberated),
        (challengers, ComparisonMode::Direct),
    ] {
        let mut chunks = half.chunks_exact(2);
        for pair in &mut chunks {
            schedule.push(Scheduled {
                first: pair[0].clone(),
                second: pair[1].clone(),
                mode,
            });
        }
        sat_out.extend(chunks.remainder().iter().cloned());
    }
    (schedule, sat_out)
}

// =============================================================================
// State
// =============================================================================

struct State<'a> {
    concurrency: usize,
    attribution: &'a Attribution,
    hooks: TournamentHooks<'a>,
    table: RatingTable,
    candidates: HashMap<CandidateId, Candidate>,
    entrants: Vec<CandidateId>,
    matches: Vec<MatchRecord>,
    rounds: Vec<RoundSummary>,
    rematches_completed: usize,
    usage: JudgeUsage,
}

impl<'a> State<'a> {
    fn new(
        config: &TournamentConfig,
        attribution: &'a Attribution,
        hooks: TournamentHooks<'a>,
    ) -> Result<Self, TournamentError> {
        Ok(Self {
            concurrency: config.concurrency,
            attribution,
            hooks,
            table: RatingTable::new(config.elo)?,
            candidates: HashMap::new(),
            entrants: Vec::new(),
            matches: Vec::new(),
            rounds: Vec::new(),
            rematches_completed: 0,
            usage: JudgeUsage::default(),
        })
    }

    /// Admit a candidate. It joins the rating table at its first resolved match.
    fn enter(&mut self, candidate: Candidate) {
        self.entrants.push(candidate.id.clone());
        self.candidates.insert(candidate.id.clone(), candidate);
    }

    /// Seed a rating on first reference, keeping any rating earned in an
    /// earlier cycle.
    fn seed(&mut self, id: &CandidateId) {
        let prior = self.candidates.get(id).and_then(|c| c.rating);
        self.table.ensure(id, prior);
    }

    async fn play_round(
        &mut self,
        oracle: &dyn JudgeOracle,
        round: usize,
        kind: RoundKind,
        schedule: Vec<Scheduled>,
        sat_out: Vec<CandidateId>,
    ) -> Result<(), TournamentError> {
        let candidates = &self.candidates;
        let attribution = self.attribution;

        let mut results = stream::iter(schedule.iter().enumerate().map(move |(index, s)| async move {
            let first = &candidates[&s.first];
            let second = &candidates[&s.second];
            (index, oracle.compare(first, second, s.mode, attribution).await)
        }))
        .buffer_unordered(self.concurrency)
        .collect::<Vec<_>>()
        .await;
        results.sort_by_key(|(index, _)| *index);

        // Barrier: nothing is applied unless the whole round resolved.
        let mut judgements = Vec::with_capacity(results.len());
        for ((index, result), s) in results.into_iter().zip(&schedule) {
            match result {
                Ok(j) => judgements.push(j),
                Err(err) => {
                    self.trace_failure(round, index, s, &err)?;
                    return Err(match err {
                        JudgeError::Unresolved { attempts, .. } => {
                            TournamentError::MatchUnresolved {
                                first: s.first.clone(),
                                second: s.second.clone(),
                                mode: s.mode,
                                round,
                                attempts,
                            }
                        }
                        other => TournamentError::Judge(other),
                    });
                }
            }
        }

        let played = schedule.len();
        let deliberated = schedule
            .iter()
            .filter(|s| s.mode == ComparisonMode::Deliberated)
            .count();
        for (index, (s, judgement)) in schedule.into_iter().zip(judgements).enumerate() {
            self.apply(round, index, s, judgement).await?;
        }

        if !sat_out.is_empty() {
            debug!(round, sat_out = sat_out.len(), "odd members sat out");
        }
        let summary = RoundSummary {
            round,
            kind,
            matches: played,
            deliberated,
            sat_out,
        };
        info!(
            round,
            kind = ?summary.kind,
            matches = summary.matches,
            deliberated = summary.deliberated,
            "round complete"
        );
        self.rounds.push(summary);
        Ok(())
    }

    async fn apply(
        &mut self,
        round: usize,
        index: usize,
        s: Scheduled,
        judgement: Judgement,
    ) -> Result<(), TournamentError> {
        let record = MatchRecord {
            first: s.first,
            second: s.second,
            winner: judgement.winner,
            rationale: judgement.rationale,
            mode: s.mode,
            round,
        };
        // Winner is referenced before loser, which fixes the tie-break order.
        self.seed(record.winner_id());
        self.seed(record.loser_id());
        let update = self
            .table
            .resolve(record.winner_id(), record.loser_id())?;
        self.usage.merge(judgement.usage);

        if let Some(c) = self.candidates.get_mut(record.winner_id()) {
            c.wins.push(record.clone());
        }
        if let Some(c) = self.candidates.get_mut(record.loser_id()) {
            c.losses.push(record.clone());
        }

        if let Some(trace) = self.hooks.trace {
            let first = &self.candidates[&record.first];
            let second = &self.candidates[&record.second];
            trace.record(MatchTrace {
                timestamp_ms: now_epoch_ms(),
                run_id: self.attribution.run_id,
                cycle: self.attribution.cycle,
                round,
                match_index: index,
                mode: record.mode,
                first_id: record.first.to_string(),
                second_id: record.second.to_string(),
                first_hash: text_hash(&first.text),
                second_hash: text_hash(&second.text),
                winner_id: Some(record.winner_id().to_string()),
                rationale_hash: Some(text_hash(&record.rationale)),
                winner_rating_before: Some(update.winner_before),
                winner_rating_after: Some(update.winner_after),
                loser_rating_before: Some(update.loser_before),
                loser_rating_after: Some(update.loser_after),
                attempts: judgement.attempts,
                turns: judgement.turns,
                input_tokens: judgement.usage.input_tokens,
                output_tokens: judgement.usage.output_tokens,
                provider_cost_nanodollars: judgement.usage.cost_nanodollars,
                error: None,
            })?;
        }

        if let Some(observer) = self.hooks.observer {
            let event = MatchEvent {
                round,
                record: record.clone(),
                update,
                usage: judgement.usage,
            };
            if let Err(e) = observer.on_match(event).await {
                warn!(round, match_index = index, error = %e, "match observer failed");
            }
        }

        self.matches.push(record);
        Ok(())
    }

    fn trace_failure(
        &self,
        round: usize,
        index: usize,
        s: &Scheduled,
        err: &JudgeError,
    ) -> Result<(), TournamentError> {
        let Some(trace) = self.hooks.trace else {
            return Ok(());
        };
        let attempts = match err {
            JudgeError::Unresolved { attempts, .. } => *attempts,
            _ => 0,
        };
        trace.record(MatchTrace {
            timestamp_ms: now_epoch_ms(),
            run_id: self.attribution.run_id,
            cycle: self.attribution.cycle,
            round,
            match_index: index,
            mode: s.mode,
            first_id: s.first.to_string(),
            second_id: s.second.to_string(),
            first_hash: text_hash(&self.candidates[&s.first].text),
            second_hash: text_hash(&self.candidates[&s.second].text),
            winner_id: None,
            rationale_hash: None,
            winner_rating_before: None,
            winner_rating_after: None,
            loser_rating_before: None,
            loser_rating_after: None,
            attempts,
            turns: 0,
            input_tokens: 0,
            output_tokens: 0,
            provider_cost_nanodollars: 0,
            error: Some(err.to_string()),
        })?;
        Ok(())
    }

    /// Sort by rating and keep the top half.
    ///
    /// Candidates that never played trail the rated ones in entry order and
    /// keep whatever rating they arrived with.
    fn finalize(mut self, stop_reason: StopReason) -> TournamentOutcome {
        let keep = self.entrants.len() / 2;

        let mut ordered = Vec::with_capacity(self.entrants.len());
        for (id, rating) in self.table.ranked() {
            if let Some(mut c) = self.candidates.remove(&id) {
                c.rating = Some(rating);
                ordered.push(c);
            }
        }
        for id in &self.entrants {
            if let Some(c) = self.candidates.remove(id) {
                ordered.push(c);
            }
        }
        let eliminated = ordered.split_off(keep);

        info!(
            retained = ordered.len(),
            eliminated = eliminated.len(),
            matches = self.matches.len(),
            stop_reason = ?stop_reason,
            "tournament finalized"
        );
        TournamentOutcome {
            retained: ordered,
            eliminated,
            matches: self.matches,
            rounds: self.rounds,
            rematches_completed: self.rematches_completed,
            stop_reason,
            usage: self.usage,
        }
    }
}
