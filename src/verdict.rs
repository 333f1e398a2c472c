//! Parsing of free-text judge output into decisions.
//!
//! Three grammars, all case-insensitive:
//!
//! | Output            | Marker                          | Payload            | On failure      |
//! |-------------------|---------------------------------|--------------------|-----------------|
//! | Binary decision   | `better hypothesis:` / `better idea:` | `1` or `2`   | not answered    |
//! | Proximity pairing | `Proximity Graph:`              | `[i]-[j]` tokens   | empty pairing   |
//! | Deduplication     | `Final Hypotheses:`             | `[i], [j], ...`    | keep whole batch |
//!
//! When a marker appears more than once the last occurrence wins, so a judge
//! quoting the instructions early in its answer does not decide the match.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::candidate::{Candidate, CandidateId, ComparisonMode, Side};

// Decision token: optional wrapper (<, quotes, brackets, *), then a lone 1 or 2
// closed by an optional wrapper. An echoed `<1 or 2>` template matches the
// first alternative and leaves group 1 empty.
static DIRECT_DECISION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)better\s+hypothesis\s*:\s*[<'"\[(*]*\s*(?:[12]\s*or\s*[12]|([12]))\s*[>'"\])*]*(?:$|[^0-9A-Za-z])"#,
    )
    .expect("Invalid direct decision regex")
});

static DELIBERATED_DECISION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)better\s+idea\s*:\s*[<'"\[(*]*\s*(?:[12]\s*or\s*[12]|([12]))\s*[>'"\])*]*(?:$|[^0-9A-Za-z])"#,
    )
    .expect("Invalid deliberated decision regex")
});

static PROXIMITY_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)proximity\s+graph\s*:").expect("Invalid proximity marker regex")
});

static PAIR_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\s*(\d+)\s*\]\s*-\s*\[\s*(\d+)\s*\]").expect("Invalid pair token regex")
});

static DEDUP_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)final\s+hypothes[ie]s\s*:").expect("Invalid dedup marker regex")
});

static INDEX_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[?\s*(\d+)\s*\]?").expect("Invalid index token regex"));

// A line opening a new `Label:` section, optionally in markdown emphasis.
static SECTION_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t*#_]*[A-Za-z][A-Za-z \t]*:").expect("Invalid section label regex")
});

// =============================================================================
// INDEX TABLE
// =============================================================================

/// 1-based display index ↔ batch position, plus the rendered listing.
#[derive(Debug, Clone)]
pub struct IndexTable {
    ids: Vec<CandidateId>,
    listing: String,
}

impl IndexTable {
    pub fn new(batch: &[Candidate]) -> Self {
        let ids = batch.iter().map(|c| c.id.clone()).collect();
        let listing = batch
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{}]\n{}", i + 1, c.text.trim()))
            .collect::<Vec<_>>()
            .join("\n\n");
        Self { ids, listing }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Batch position for a display index, if it exists.
    pub fn position(&self, display: usize) -> Option<usize> {
        (1..=self.ids.len()).contains(&display).then(|| display - 1)
    }

    pub fn id(&self, display: usize) -> Option<&CandidateId> {
        self.position(display).map(|p| &self.ids[p])
    }

    /// `[i]\n<text>` blocks separated by blank lines.
    pub fn listing(&self) -> &str {
        &self.listing
    }
}

// =============================================================================
// BINARY DECISION
// =============================================================================

/// Marker phrase the judge must close with in the given mode.
pub fn decision_marker(mode: ComparisonMode) -> &'static str {
    match mode {
        ComparisonMode::Direct => "better hypothesis",
        ComparisonMode::Deliberated => "better idea",
    }
}

/// Winner named by the last decision marker, or `None` if not yet answered.
///
/// A last marker that still reads `<1 or 2>` counts as not answered.
pub fn parse_decision(text: &str, mode: ComparisonMode) -> Option<Side> {
    let re = match mode {
        ComparisonMode::Direct => &*DIRECT_DECISION,
        ComparisonMode::Deliberated => &*DELIBERATED_DECISION,
    };
    re.captures_iter(text)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| Side::from_token(m.as_str()))
}

// =============================================================================
// GROUPING DECISIONS
// =============================================================================

/// Text of the section opened by the last `marker`, up to the next line that
/// starts another `Label:` section. Blank lines do not end a section.
fn section<'t>(text: &'t str, marker: &Regex) -> Option<&'t str> {
    let m = marker.find_iter(text).last()?;
    let body = &text[m.end()..];
    // The rest of the marker line always belongs to the section.
    let first_break = body.find('\n').unwrap_or(body.len());
    let end = SECTION_LABEL
        .find_at(body, first_break)
        .map(|b| b.start())
        .unwrap_or(body.len());
    Some(&body[..end])
}

/// Disjoint pairs of batch positions from a `Proximity Graph:` section.
///
/// Tokens with unknown indices, self-pairs and pairs touching an already
/// paired index are dropped. A missing marker yields no pairs.
pub fn parse_pairs(text: &str, table: &IndexTable) -> Vec<(usize, usize)> {
    let Some(body) = section(text, &PROXIMITY_MARKER) else {
        return Vec::new();
    };

    let mut used = HashSet::new();
    let mut pairs = Vec::new();
    for caps in PAIR_TOKEN.captures_iter(body) {
        let resolve = |i: usize| {
            caps[i]
                .parse::<usize>()
                .ok()
                .and_then(|d| table.position(d))
        };
        let (Some(a), Some(b)) = (resolve(1), resolve(2)) else {
            tracing::debug!(token = &caps[0], "dropping pair with unknown index");
            continue;
        };
        if a == b || used.contains(&a) || used.contains(&b) {
            tracing::debug!(token = &caps[0], "dropping overlapping pair");
            continue;
        }
        used.insert(a);
        used.insert(b);
        pairs.push((a, b));
    }
    pairs
}

/// Retained batch positions from a `Final Hypotheses:` section, in mention
/// order with repeats removed.
///
/// `None` means the batch must be kept whole: the marker is missing or no
/// listed index resolves.
pub fn parse_retained(text: &str, table: &IndexTable) -> Option<Vec<usize>> {
    let body = section(text, &DEDUP_MARKER)?;

    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    for caps in INDEX_TOKEN.captures_iter(body) {
        let Some(pos) = caps[1].parse::<usize>().ok().and_then(|d| table.position(d)) else {
            tracing::debug!(token = &caps[0], "dropping unknown index");
            continue;
        };
        if seen.insert(pos) {
            kept.push(pos);
        }
    }

    (!kept.is_empty()).then_some(kept)
}
