//! Tournament configuration and results.

use serde::{Deserialize, Serialize};

use crate::candidate::{Candidate, CandidateId, MatchRecord};
use crate::config::{DEFAULT_CONCURRENCY, DEFAULT_ROUNDS};
use crate::oracle::JudgeUsage;
use crate::rating::EloParams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentConfig {
    /// Split&Rematch rounds after the initial round.
    pub rounds: usize,
    /// Concurrent comparisons within a round.
    pub concurrency: usize,
    /// Seed for the rematch shuffles; drawn from entropy when unset.
    pub rng_seed: Option<u64>,
    pub elo: EloParams,
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            rounds: DEFAULT_ROUNDS,
            concurrency: DEFAULT_CONCURRENCY,
            rng_seed: None,
            elo: EloParams::default(),
        }
    }
}

/// Why the tournament stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every configured round was played.
    Completed,
    /// Cancellation was requested at a round boundary.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundKind {
    Initial,
    Rematch,
}

/// What happened in one round.
#[derive(Debug, Clone, Serialize)]
pub struct RoundSummary {
    /// 0 for the initial round.
    pub round: usize,
    pub kind: RoundKind,
    pub matches: usize,
    pub deliberated: usize,
    /// Odd members left over after pairing a half.
    pub sat_out: Vec<CandidateId>,
}

/// Final state of a tournament.
#[derive(Debug, Clone)]
pub struct TournamentOutcome {
    /// Top `floor(n/2)` candidates by rating, best first.
    pub retained: Vec<Candidate>,
    /// Remaining rated candidates, best first.
    pub eliminated: Vec<Candidate>,
    /// Every resolved match in play order.
    pub matches: Vec<MatchRecord>,
    pub rounds: Vec<RoundSummary>,
    /// Rematch rounds fully played (the initial round is not counted).
    pub rematches_completed: usize,
    pub stop_reason: StopReason,
    pub usage: JudgeUsage,
}

impl TournamentOutcome {
    /// All rated candidates, best first.
    pub fn ranked(&self) -> impl Iterator<Item = &Candidate> {
        self.retained.iter().chain(self.eliminated.iter())
    }
}
