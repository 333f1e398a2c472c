//! Near-duplicate removal.

use tracing::{info, warn};

use crate::candidate::{Candidate, CandidateId};
use crate::gateway::Attribution;
use crate::oracle::{JudgeOracle, JudgeUsage};
use crate::prompts::dedup_prompt;
use crate::verdict::{parse_retained, IndexTable};

use super::{ask_judge, validate_batch, GroupingError};

#[derive(Debug, Clone)]
pub struct DedupOutcome {
    /// Distinct candidates in their original relative order.
    pub retained: Vec<Candidate>,
    /// Candidates judged to duplicate a retained one.
    pub dropped: Vec<CandidateId>,
    /// The judge's answer was unusable and the batch was kept whole.
    pub fallback: bool,
    pub usage: JudgeUsage,
}

impl DedupOutcome {
    fn keep_all(batch: Vec<Candidate>, fallback: bool, usage: JudgeUsage) -> Self {
        Self {
            retained: batch,
            dropped: Vec::new(),
            fallback,
            usage,
        }
    }
}

/// Drop candidates the judge considers restatements of others.
///
/// Batches of zero or one candidate are returned without a judge call.
pub async fn deduplicate(
    oracle: &dyn JudgeOracle,
    batch: Vec<Candidate>,
    attribution: &Attribution,
) -> Result<DedupOutcome, GroupingError> {
    validate_batch(&batch)?;
    if batch.len() <= 1 {
        return Ok(DedupOutcome::keep_all(batch, false, JudgeUsage::default()));
    }

    let table = IndexTable::new(&batch);
    let prompt = dedup_prompt(oracle.plan(), &table);
    let attribution = attribution.for_caller("grouping::dedup");
    let Some((answer, usage)) = ask_judge(oracle, &prompt, &attribution).await? else {
        return Ok(DedupOutcome::keep_all(batch, true, JudgeUsage::default()));
    };

    let Some(positions) = parse_retained(&answer, &table) else {
        warn!(
            batch = batch.len(),
            "dedup answer has no usable Final Hypotheses section; keeping whole batch"
        );
        return Ok(DedupOutcome::keep_all(batch, true, usage));
    };

    let mut keep = vec![false; batch.len()];
    for p in positions {
        keep[p] = true;
    }

    let mut retained = Vec::with_capacity(batch.len());
    let mut dropped = Vec::new();
    for (c, k) in batch.into_iter().zip(keep) {
        if k {
            retained.push(c);
        } else {
            dropped.push(c.id);
        }
    }

    info!(
        retained = retained.len(),
        dropped = dropped.len(),
        "deduplicated batch"
    );
    Ok(DedupOutcome {
        retained,
        dropped,
        fallback: false,
        usage,
    })
}
