//! Similarity pairing for the initial tournament round.
//!
//! Candidates the judge leaves out are reported as unpaired; they are never
//! paired at random.

use tracing::{info, warn};

use crate::candidate::Candidate;
use crate::gateway::Attribution;
use crate::oracle::{JudgeOracle, JudgeUsage};
use crate::prompts::proximity_prompt;
use crate::verdict::{parse_pairs, IndexTable};

use super::{ask_judge, validate_batch, GroupingError};

#[derive(Debug, Clone, Default)]
pub struct Pairing {
    /// Disjoint pairs in the order the judge listed them.
    pub pairs: Vec<(Candidate, Candidate)>,
    /// Candidates not covered by any pair, in batch order.
    pub unpaired: Vec<Candidate>,
    pub usage: JudgeUsage,
}

impl Pairing {
    fn all_unpaired(batch: Vec<Candidate>, usage: JudgeUsage) -> Self {
        Self {
            pairs: Vec::new(),
            unpaired: batch,
            usage,
        }
    }
}

/// Pair each candidate with its most similar peer, at most once each.
pub async fn group_by_proximity(
    oracle: &dyn JudgeOracle,
    batch: Vec<Candidate>,
    attribution: &Attribution,
) -> Result<Pairing, GroupingError> {
    validate_batch(&batch)?;
    if batch.len() <= 1 {
        return Ok(Pairing::all_unpaired(batch, JudgeUsage::default()));
    }

    let table = IndexTable::new(&batch);
    let prompt = proximity_prompt(oracle.plan(), &table);
    let attribution = attribution.for_caller("grouping::proximity");
    let Some((answer, usage)) = ask_judge(oracle, &prompt, &attribution).await? else {
        return Ok(Pairing::all_unpaired(batch, JudgeUsage::default()));
    };

    let positions = parse_pairs(&answer, &table);
    if positions.is_empty() {
        warn!(
            batch = batch.len(),
            "proximity answer has no usable pairs; nothing enters the tournament"
        );
        return Ok(Pairing::all_unpaired(batch, usage));
    }

    let mut slots: Vec<Option<Candidate>> = batch.into_iter().map(Some).collect();
    let mut pairs = Vec::with_capacity(positions.len());
    for (a, b) in positions {
        // parse_pairs guarantees disjoint, in-range positions
        if let (Some(first), Some(second)) = (slots[a].take(), slots[b].take()) {
            pairs.push((first, second));
        }
    }
    let unpaired: Vec<Candidate> = slots.into_iter().flatten().collect();

    info!(
        pairs = pairs.len(),
        unpaired = unpaired.len(),
        "grouped batch by proximity"
    );
    Ok(Pairing {
        pairs,
        unpaired,
        usage,
    })
}
