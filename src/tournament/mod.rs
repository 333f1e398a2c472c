//! Elo tournament over judge-decided matches.
//!
//! - Initial round over the proximity pairs (direct comparisons)
//! - Split&Rematch rounds: upper half deliberated, lower half direct
//! - Finalized: top half by rating

pub mod controller;
pub mod hooks;
pub mod trace;
pub mod types;

pub use controller::{
    run_tournament, run_tournament_with_hooks, validate_tournament_request, TournamentError,
    TournamentHooks,
};
pub use hooks::{MatchEvent, MatchObserver, ObserverError};
pub use trace::{JsonlTraceSink, MatchTrace, TraceError, TraceSink, TraceWorker};
pub use types::*;
