//! One ranking cycle over a batch of reviewed candidates.
//!
//! dedup → proximity pairing → tournament → write-back → retirement.
//!
//! Candidates dropped as duplicates, left unpaired, or finishing in the
//! bottom half are retired in the store, never deleted.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::candidate::{Candidate, CandidateId, MatchRecord};
use crate::gateway::Attribution;
use crate::grouping::{deduplicate, group_by_proximity, GroupingError};
use crate::oracle::{JudgeOracle, JudgeUsage};
use crate::store::{CandidateStore, StoreError};
use crate::tournament::{
    run_tournament_with_hooks, MatchObserver, RoundSummary, StopReason, TournamentConfig,
    TournamentError, TournamentHooks, TraceSink,
};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Grouping error: {0}")]
    Grouping(#[from] GroupingError),
    #[error("Tournament error: {0}")]
    Tournament(#[from] TournamentError),
}

/// Result of one cycle, suitable for writing to disk.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub run_id: Uuid,
    pub cycle: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stop_reason: StopReason,
    /// Surviving candidates, best first, with updated ratings and history.
    pub retained: Vec<Candidate>,
    /// Bottom half of the tournament.
    pub eliminated: Vec<CandidateId>,
    /// Removed by deduplication.
    pub duplicates: Vec<CandidateId>,
    /// Not placed in any initial pair.
    pub unpaired: Vec<CandidateId>,
    /// Dedup answer was unusable and the whole batch went through.
    pub dedup_fallback: bool,
    pub matches: Vec<MatchRecord>,
    pub rounds: Vec<RoundSummary>,
    pub rematches_completed: usize,
    /// Judge usage across grouping and the tournament.
    pub usage: JudgeUsage,
}

impl CycleReport {
    /// Every id retired by this cycle.
    pub fn retired(&self) -> impl Iterator<Item = &CandidateId> {
        self.duplicates
            .iter()
            .chain(self.unpaired.iter())
            .chain(self.eliminated.iter())
    }
}

pub struct RankingPipeline {
    oracle: Arc<dyn JudgeOracle>,
    store: Arc<dyn CandidateStore>,
    config: TournamentConfig,
    trace: Option<Arc<dyn TraceSink>>,
    observer: Option<Arc<dyn MatchObserver>>,
    cancel_flag: Option<Arc<AtomicBool>>,
    run_id: Uuid,
}

impl RankingPipeline {
    pub fn new(
        oracle: Arc<dyn JudgeOracle>,
        store: Arc<dyn CandidateStore>,
        config: TournamentConfig,
    ) -> Self {
        Self {
            oracle,
            store,
            config,
            trace: None,
            observer: None,
            cancel_flag: None,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn with_trace(mut self, trace: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn MatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn store(&self) -> &Arc<dyn CandidateStore> {
        &self.store
    }

    /// Rank one batch and persist the outcome.
    ///
    /// A cancelled tournament still writes ratings and match history back,
    /// but retires nobody.
    pub async fn run_cycle(
        &self,
        cycle: u32,
        batch: Vec<Candidate>,
    ) -> Result<CycleReport, PipelineError> {
        let started_at = Utc::now();
        self.admit(cycle, &batch).await?;

        let attribution = Attribution::new("pipeline")
            .with_run(self.run_id)
            .with_cycle(cycle);
        let mut usage = JudgeUsage::default();
        let oracle = self.oracle.as_ref();

        let dedup = deduplicate(oracle, batch, &attribution).await?;
        usage.merge(dedup.usage);

        let pairing = group_by_proximity(oracle, dedup.retained, &attribution).await?;
        usage.merge(pairing.usage);
        let unpaired: Vec<CandidateId> = pairing.unpaired.iter().map(|c| c.id.clone()).collect();

        let hooks = TournamentHooks {
            trace: self.trace.as_deref(),
            observer: self.observer.as_deref(),
        };
        let outcome = run_tournament_with_hooks(
            oracle,
            pairing.pairs,
            &self.config,
            &attribution,
            hooks,
            self.cancel_flag.as_deref(),
        )
        .await?;
        usage.merge(outcome.usage);

        for candidate in outcome.ranked() {
            self.store.put(candidate).await?;
        }

        let report = CycleReport {
            run_id: self.run_id,
            cycle,
            started_at,
            finished_at: Utc::now(),
            stop_reason: outcome.stop_reason,
            eliminated: outcome.eliminated.iter().map(|c| c.id.clone()).collect(),
            retained: outcome.retained,
            duplicates: dedup.dropped,
            unpaired,
            dedup_fallback: dedup.fallback,
            matches: outcome.matches,
            rounds: outcome.rounds,
            rematches_completed: outcome.rematches_completed,
            usage,
        };

        if report.stop_reason == StopReason::Completed {
            let retired: Vec<CandidateId> = report.retired().cloned().collect();
            let count = self.store.retire(&retired, cycle).await?;
            info!(cycle, retired = count, "retired candidates");
        } else {
            warn!(cycle, "cycle cancelled; retirement skipped");
        }

        info!(
            run_id = %self.run_id,
            cycle,
            retained = report.retained.len(),
            matches = report.matches.len(),
            calls = report.usage.calls,
            "cycle complete"
        );
        Ok(report)
    }

    /// Store the incoming batch, enforcing lineage and rejecting retired ids.
    async fn admit(&self, cycle: u32, batch: &[Candidate]) -> Result<(), PipelineError> {
        let mut seen = HashSet::with_capacity(batch.len());
        for c in batch {
            if !seen.insert(&c.id) {
                return Err(PipelineError::InvalidRequest(format!(
                    "candidate {} appears more than once in the batch",
                    c.id
                )));
            }
            if c.cycle > cycle {
                return Err(PipelineError::InvalidRequest(format!(
                    "candidate {} belongs to cycle {} but cycle {cycle} is running",
                    c.id, c.cycle
                )));
            }
        }

        for c in batch {
            if let Some(stored) = self.store.get(&c.id).await? {
                if let Some(retired) = stored.retired_cycle {
                    return Err(PipelineError::InvalidRequest(format!(
                        "candidate {} was retired in cycle {retired}",
                        c.id
                    )));
                }
            }
            self.store.put(c).await?;
        }
        Ok(())
    }
}
