//! Per-match side effects (persistence, progress reporting).
//!
//! Observer failures are logged and never abort a tournament.

use crate::candidate::MatchRecord;
use crate::oracle::JudgeUsage;
use crate::rating::RatingUpdate;

#[derive(Debug, Clone)]
pub struct MatchEvent {
    pub round: usize,
    pub record: MatchRecord,
    pub update: RatingUpdate,
    pub usage: JudgeUsage,
}

#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("{0}")]
    Message(String),
}

#[async_trait::async_trait]
pub trait MatchObserver: Send + Sync {
    async fn on_match(&self, event: MatchEvent) -> Result<(), ObserverError>;
}
