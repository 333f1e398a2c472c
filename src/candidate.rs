//! Candidate records and match outcomes.
//!
//! A candidate is a reviewed hypothesis that enters the ranking tournament.
//! Its rating and match lists are owned by the tournament; everything else is
//! produced upstream and treated as read-only here.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Review kinds rendered into judge prompts, in the order they are shown.
pub const REVIEW_KINDS: &[&str] = &[
    "full_review",
    "deep_review",
    "observation_review",
    "simulation_review",
];

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Stable candidate identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(String);

impl CandidateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier (UUID v4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CandidateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CandidateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

fn generated_id() -> CandidateId {
    CandidateId::generate()
}

// =============================================================================
// MATCHES
// =============================================================================

/// Which comparison procedure resolved a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    /// Single request, single verdict.
    Direct,
    /// Multi-turn panel deliberation; only the closing turn is parsed.
    Deliberated,
}

impl ComparisonMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonMode::Direct => "direct",
            ComparisonMode::Deliberated => "deliberated",
        }
    }
}

/// Position of a candidate within a judged pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    First,
    Second,
}

impl Side {
    /// Maps the judge's "1"/"2" token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "1" => Some(Side::First),
            "2" => Some(Side::Second),
            _ => None,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Side::First => Side::Second,
            Side::Second => Side::First,
        }
    }
}

/// Outcome of one resolved comparison. Ties are not representable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub first: CandidateId,
    pub second: CandidateId,
    pub winner: Side,
    /// Verbatim judge output the decision was parsed from.
    pub rationale: String,
    pub mode: ComparisonMode,
    /// 0 for the initial round, 1..=R for rematch rounds.
    pub round: usize,
}

impl MatchRecord {
    pub fn winner_id(&self) -> &CandidateId {
        match self.winner {
            Side::First => &self.first,
            Side::Second => &self.second,
        }
    }

    pub fn loser_id(&self) -> &CandidateId {
        match self.winner {
            Side::First => &self.second,
            Side::Second => &self.first,
        }
    }
}

// =============================================================================
// CANDIDATE
// =============================================================================

/// A reviewed hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(default = "generated_id")]
    pub id: CandidateId,
    /// Full hypothesis text shown to the judge.
    pub text: String,
    /// Short statement of the main claim.
    #[serde(default)]
    pub claim: String,
    /// Review artifacts keyed by review kind.
    #[serde(default)]
    pub reviews: BTreeMap<String, String>,
    /// Predecessor this candidate was evolved from.
    #[serde(default)]
    pub parent: Option<CandidateId>,
    /// Cycle in which the candidate was produced.
    #[serde(default)]
    pub cycle: u32,
    /// Unset until the candidate first enters a tournament.
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub wins: Vec<MatchRecord>,
    #[serde(default)]
    pub losses: Vec<MatchRecord>,
}

impl Candidate {
    pub fn new(id: impl Into<CandidateId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            claim: String::new(),
            reviews: BTreeMap::new(),
            parent: None,
            cycle: 0,
            rating: None,
            wins: Vec::new(),
            losses: Vec::new(),
        }
    }

    pub fn with_review(mut self, kind: impl Into<String>, text: impl Into<String>) -> Self {
        self.reviews.insert(kind.into(), text.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<CandidateId>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn in_cycle(mut self, cycle: u32) -> Self {
        self.cycle = cycle;
        self
    }

    /// Review artifacts as `[kind]\n<text>` blocks.
    ///
    /// Known kinds come first in a fixed order, then any others
    /// alphabetically. Match history is never included.
    pub fn review_bundle(&self) -> String {
        let known = REVIEW_KINDS
            .iter()
            .filter_map(|k| self.reviews.get_key_value(*k));
        let extra = self
            .reviews
            .iter()
            .filter(|(k, _)| !REVIEW_KINDS.contains(&k.as_str()));

        known
            .chain(extra)
            .map(|(kind, text)| format!("[{kind}]\n{}", text.trim()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// View handed to the evolution and meta-review stages.
    pub fn export(&self) -> CandidateExport {
        CandidateExport {
            id: self.id.clone(),
            text: self.text.clone(),
            rating: self.rating,
            win_texts: self.wins.iter().map(|m| m.rationale.clone()).collect(),
            lose_texts: self.losses.iter().map(|m| m.rationale.clone()).collect(),
        }
    }
}

/// Candidate as exposed to downstream stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateExport {
    pub id: CandidateId,
    pub text: String,
    pub rating: Option<f64>,
    pub win_texts: Vec<String>,
    pub lose_texts: Vec<String>,
}

// =============================================================================
// LINEAGE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineageError {
    #[error("candidate {child} references itself as parent")]
    SelfParent { child: CandidateId },
    #[error("parent {parent} of {child} is unknown")]
    UnknownParent {
        child: CandidateId,
        parent: CandidateId,
    },
    #[error("parent {parent} (cycle {parent_cycle}) of {child} (cycle {child_cycle}) is not from an earlier cycle")]
    NotEarlier {
        child: CandidateId,
        parent: CandidateId,
        child_cycle: u32,
        parent_cycle: u32,
    },
}

/// Check that `child`'s parent, resolved through `lookup`, predates it.
///
/// Candidates without a parent always pass.
pub fn validate_lineage<'a, F>(child: &Candidate, lookup: F) -> Result<(), LineageError>
where
    F: FnOnce(&CandidateId) -> Option<&'a Candidate>,
{
    let Some(parent_id) = &child.parent else {
        return Ok(());
    };
    if parent_id == &child.id {
        return Err(LineageError::SelfParent {
            child: child.id.clone(),
        });
    }
    let parent = lookup(parent_id).ok_or_else(|| LineageError::UnknownParent {
        child: child.id.clone(),
        parent: parent_id.clone(),
    })?;
    if parent.cycle >= child.cycle {
        return Err(LineageError::NotEarlier {
            child: child.id.clone(),
            parent: parent_id.clone(),
            child_cycle: child.cycle,
            parent_cycle: parent.cycle,
        });
    }
    Ok(())
}
