#![forbid(unsafe_code)]

//! # hypothesis-arena
//!
//! Ranks research hypotheses with an LLM judge.
//!
//! A batch of reviewed candidates is deduplicated, paired by similarity, and
//! played through an Elo tournament: one direct round over the similarity
//! pairs, then several split-and-rematch rounds where the upper half debates
//! in multi-turn deliberations. The top half by rating survives the cycle.

pub mod candidate;
pub mod config;
pub mod gateway;
pub mod grouping;
pub mod oracle;
pub mod pipeline;
pub mod prompts;
pub mod rating;
pub mod store;
pub mod tournament;
pub mod verdict;

pub use candidate::{
    validate_lineage, Candidate, CandidateExport, CandidateId, ComparisonMode, LineageError,
    MatchRecord, Side,
};
pub use config::{ArenaConfig, ResearchPlan};
pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
pub use grouping::{deduplicate, group_by_proximity, DedupOutcome, GroupingError, Pairing};
pub use oracle::{JudgeError, JudgeOracle, Judgement, LlmJudge};
pub use pipeline::{CycleReport, PipelineError, RankingPipeline};
pub use rating::{EloParams, RatingTable, RatingUpdate};
pub use store::{CandidateStore, InMemoryCandidateStore, SqliteCandidateStore, StoreError};
pub use tournament::{
    run_tournament, run_tournament_with_hooks, JsonlTraceSink, MatchEvent, MatchObserver,
    MatchTrace, StopReason, TournamentConfig, TournamentError, TournamentOutcome, TraceSink,
    TraceWorker,
};
