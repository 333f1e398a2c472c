//! Arena configuration and research plan.
//!
//! Both are plain serde structs loaded from JSON files. Every `ArenaConfig`
//! field has a default so a partial (or empty) file is valid.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::oracle::{DeliberationConfig, JudgeConfig};
use crate::rating::EloParams;
use crate::tournament::TournamentConfig;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_ROUNDS: usize = 4;
pub const DEFAULT_CONCURRENCY: usize = 8;
pub const MAX_CONCURRENCY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for one ranking cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Judge model id.
    pub model: String,
    /// Sampling temperature for every judge call.
    pub temperature: f32,
    /// Judge attempts per match before the match is declared unresolved.
    pub max_attempts: u32,
    pub deliberation: DeliberationConfig,
    /// Cap on generated tokens per judge call.
    pub max_output_tokens: Option<u32>,
    /// Split&Rematch rounds after the initial round.
    pub rounds: usize,
    /// Concurrent judge calls within a round.
    pub concurrency: usize,
    /// Seed for the rematch shuffles; random when unset.
    pub rng_seed: Option<u64>,
    pub elo: EloParams,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            deliberation: DeliberationConfig::default(),
            max_output_tokens: None,
            rounds: DEFAULT_ROUNDS,
            concurrency: DEFAULT_CONCURRENCY,
            rng_seed: None,
            elo: EloParams::default(),
        }
    }
}

impl ArenaConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let cfg: Self = read_json(path.as_ref())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must be non-empty".into()));
        }
        if !self.temperature.is_finite() || !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be >= 1".into()));
        }
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::Invalid(format!(
                "concurrency must be within [1, {MAX_CONCURRENCY}], got {}",
                self.concurrency
            )));
        }
        let d = &self.deliberation;
        if d.min_turns == 0 || d.min_turns > d.max_turns {
            return Err(ConfigError::Invalid(format!(
                "deliberation turns must satisfy 1 <= min_turns <= max_turns, got {}..{}",
                d.min_turns, d.max_turns
            )));
        }
        if !self.elo.initial.is_finite() || !self.elo.k.is_finite() || self.elo.k <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "elo parameters must be finite with k > 0, got initial={} k={}",
                self.elo.initial, self.elo.k
            )));
        }
        Ok(())
    }

    pub fn judge_config(&self) -> JudgeConfig {
        JudgeConfig {
            model: self.model.clone(),
            temperature: self.temperature,
            max_attempts: self.max_attempts,
            max_output_tokens: self.max_output_tokens,
            deliberation: self.deliberation.clone(),
        }
    }

    pub fn tournament_config(&self) -> TournamentConfig {
        TournamentConfig {
            rounds: self.rounds,
            concurrency: self.concurrency,
            rng_seed: self.rng_seed,
            elo: self.elo,
        }
    }
}

/// Research goal and evaluation criteria shown to the judge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchPlan {
    pub goal: String,
    /// Free-text criteria for hypothesis superiority.
    #[serde(default)]
    pub preferences: String,
    /// Attributes a good hypothesis should have, e.g. "novelty".
    #[serde(default)]
    pub attributes: Vec<String>,
}

impl ResearchPlan {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            ..Self::default()
        }
    }

    pub fn with_preferences(mut self, preferences: impl Into<String>) -> Self {
        self.preferences = preferences.into();
        self
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let plan: Self = read_json(path.as_ref())?;
        if plan.goal.trim().is_empty() {
            return Err(ConfigError::Invalid("research plan goal is empty".into()));
        }
        Ok(plan)
    }

    pub(crate) fn attributes_line(&self) -> String {
        if self.attributes.is_empty() {
            "correctness, novelty, testability".to_string()
        } else {
            self.attributes.join(", ")
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
        path: display,
        source,
    })
}
