//! Elo rating table.
//!
//! An explicit, owned store of candidate ratings. The tournament controller
//! holds the only mutable reference and applies updates after each round
//! barrier, so no locking is needed here.
//!
//! Update rule for a resolved match (winner `w`, loser `l`):
//!
//! ```text
//! E_w = 1 / (1 + 10^((R_l - R_w) / 400))
//! E_l = 1 / (1 + 10^((R_w - R_l) / 400))
//! R_w += K * (1 - E_w)
//! R_l += K * (0 - E_l)
//! ```
//!
//! Resolved matches are never retracted, so there is no inverse operation.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::candidate::CandidateId;

pub const DEFAULT_INITIAL_RATING: f64 = 1200.0;
pub const DEFAULT_K_FACTOR: f64 = 32.0;

/// Seed rating and K-factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EloParams {
    #[serde(default = "default_initial")]
    pub initial: f64,
    #[serde(default = "default_k")]
    pub k: f64,
}

fn default_initial() -> f64 {
    DEFAULT_INITIAL_RATING
}

fn default_k() -> f64 {
    DEFAULT_K_FACTOR
}

impl Default for EloParams {
    fn default() -> Self {
        Self {
            initial: DEFAULT_INITIAL_RATING,
            k: DEFAULT_K_FACTOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RatingError {
    #[error("candidate {0} cannot play itself")]
    SelfMatch(CandidateId),
    #[error("invalid Elo parameters: {0}")]
    InvalidParams(String),
}

/// Before/after ratings of one resolved match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingUpdate {
    pub winner: CandidateId,
    pub loser: CandidateId,
    pub winner_before: f64,
    pub winner_after: f64,
    pub loser_before: f64,
    pub loser_after: f64,
}

impl RatingUpdate {
    pub fn winner_delta(&self) -> f64 {
        self.winner_after - self.winner_before
    }

    pub fn loser_delta(&self) -> f64 {
        self.loser_after - self.loser_before
    }
}

/// Expected score of a player rated `r_self` against one rated `r_other`.
pub fn expected_score(r_self: f64, r_other: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((r_other - r_self) / 400.0))
}

/// Candidate ratings in first-reference order.
#[derive(Debug, Clone)]
pub struct RatingTable {
    params: EloParams,
    order: Vec<CandidateId>,
    ratings: Vec<f64>,
    index: HashMap<CandidateId, usize>,
}

impl Default for RatingTable {
    fn default() -> Self {
        Self {
            params: EloParams::default(),
            order: Vec::new(),
            ratings: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl RatingTable {
    pub fn new(params: EloParams) -> Result<Self, RatingError> {
        if !params.initial.is_finite() {
            return Err(RatingError::InvalidParams(format!(
                "initial rating must be finite, got {}",
                params.initial
            )));
        }
        if !params.k.is_finite() || params.k <= 0.0 {
            return Err(RatingError::InvalidParams(format!(
                "K-factor must be positive and finite, got {}",
                params.k
            )));
        }
        Ok(Self {
            params,
            ..Self::default()
        })
    }

    pub fn params(&self) -> EloParams {
        self.params
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &CandidateId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &CandidateId) -> Option<f64> {
        self.index.get(id).map(|&i| self.ratings[i])
    }

    /// Register `id`, seeding it with `prior` or the initial rating.
    ///
    /// Already-known candidates keep their current rating.
    pub fn ensure(&mut self, id: &CandidateId, prior: Option<f64>) -> f64 {
        if let Some(&i) = self.index.get(id) {
            return self.ratings[i];
        }
        let rating = prior
            .filter(|r| r.is_finite())
            .unwrap_or(self.params.initial);
        self.index.insert(id.clone(), self.order.len());
        self.order.push(id.clone());
        self.ratings.push(rating);
        rating
    }

    /// Apply one resolved match.
    pub fn resolve(
        &mut self,
        winner: &CandidateId,
        loser: &CandidateId,
    ) -> Result<RatingUpdate, RatingError> {
        if winner == loser {
            return Err(RatingError::SelfMatch(winner.clone()));
        }
        let r_w = self.ensure(winner, None);
        let r_l = self.ensure(loser, None);

        let e_w = expected_score(r_w, r_l);
        let e_l = expected_score(r_l, r_w);
        let w_after = r_w + self.params.k * (1.0 - e_w);
        let l_after = r_l + self.params.k * (0.0 - e_l);

        self.ratings[self.index[winner]] = w_after;
        self.ratings[self.index[loser]] = l_after;

        Ok(RatingUpdate {
            winner: winner.clone(),
            loser: loser.clone(),
            winner_before: r_w,
            winner_after: w_after,
            loser_before: r_l,
            loser_after: l_after,
        })
    }

    /// All candidates by rating, highest first. Ties keep first-reference order.
    pub fn ranked(&self) -> Vec<(CandidateId, f64)> {
        let mut out: Vec<(CandidateId, f64)> = self
            .order
            .iter()
            .cloned()
            .zip(self.ratings.iter().copied())
            .collect();
        // Stable sort; NaN cannot occur since inputs are finite.
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        out
    }

    /// Candidates in first-reference order with their ratings.
    pub fn iter(&self) -> impl Iterator<Item = (&CandidateId, f64)> + '_ {
        self.order.iter().zip(self.ratings.iter().copied())
    }
}
