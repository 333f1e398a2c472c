//! Judge-driven batch grouping: deduplication and proximity pairing.
//!
//! Both stages make a single judge request over the indexed batch and fall
//! back locally when the answer cannot be used. Neither stage ever fails
//! because of what the judge wrote; only transport errors propagate.

pub mod dedup;
pub mod proximity;

use std::collections::HashSet;

use tracing::warn;

use crate::candidate::Candidate;
use crate::gateway::{Attribution, ProviderError};
use crate::oracle::{JudgeError, JudgeOracle, JudgeUsage};
use crate::prompts::PromptInstance;

pub use dedup::{deduplicate, DedupOutcome};
pub use proximity::{group_by_proximity, Pairing};

#[derive(Debug, thiserror::Error)]
pub enum GroupingError {
    #[error("Judge error: {0}")]
    Judge(#[from] JudgeError),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Rejects batches that repeat an identifier.
pub(crate) fn validate_batch(batch: &[Candidate]) -> Result<(), GroupingError> {
    let mut seen = HashSet::with_capacity(batch.len());
    for c in batch {
        if !seen.insert(&c.id) {
            return Err(GroupingError::InvalidRequest(format!(
                "candidate {} appears more than once in the batch",
                c.id
            )));
        }
    }
    Ok(())
}

/// Judge answer, or `None` when the judge refused.
pub(crate) async fn ask_judge(
    oracle: &dyn JudgeOracle,
    prompt: &PromptInstance,
    attribution: &Attribution,
) -> Result<Option<(String, JudgeUsage)>, GroupingError> {
    match oracle.ask(prompt, attribution).await {
        Ok(answer) => Ok(Some(answer)),
        Err(JudgeError::Provider(ProviderError::Refused { .. })) => {
            warn!(
                caller = attribution.caller,
                template = prompt.template_slug,
                "judge refused grouping request"
            );
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
