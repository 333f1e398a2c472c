//! Judge oracle: pairwise comparisons and free-form grouping requests.
//!
//! [`LlmJudge`] drives a [`ChatGateway`]. A comparison is retried while the
//! judge's output carries no decision marker, up to `max_attempts`; after
//! that the match is unresolved and the error propagates. Transport failures
//! are retried inside the gateway and propagate unchanged from here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::candidate::{Candidate, CandidateId, ComparisonMode, Side};
use crate::config::{ResearchPlan, DEFAULT_MAX_ATTEMPTS, DEFAULT_MODEL, DEFAULT_TEMPERATURE};
use crate::gateway::{Attribution, ChatGateway, ChatRequest, ChatResponse, Message, ProviderError};
use crate::prompts::{deliberation_prompt, deliberation_turn, direct_prompt, PromptInstance};
use crate::verdict::parse_decision;

// =============================================================================
// Types
// =============================================================================

/// Turn bounds for deliberated comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliberationConfig {
    /// Earliest turn whose decision is accepted.
    pub min_turns: u32,
    /// Hard cap; the last turn is told to conclude.
    pub max_turns: u32,
}

impl Default for DeliberationConfig {
    fn default() -> Self {
        Self {
            min_turns: 3,
            max_turns: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub model: String,
    pub temperature: f32,
    /// Attempts per comparison before giving up.
    pub max_attempts: u32,
    pub max_output_tokens: Option<u32>,
    pub deliberation: DeliberationConfig,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_output_tokens: None,
            deliberation: DeliberationConfig::default(),
        }
    }
}

/// Token and cost totals across the calls behind one result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct JudgeUsage {
    pub calls: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_nanodollars: i64,
}

impl JudgeUsage {
    fn add(&mut self, resp: &ChatResponse) {
        self.calls += 1;
        self.input_tokens += resp.input_tokens;
        self.output_tokens += resp.output_tokens;
        self.cost_nanodollars += resp.cost_nanodollars;
    }

    pub fn merge(&mut self, other: JudgeUsage) {
        self.calls += other.calls;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost_nanodollars += other.cost_nanodollars;
    }
}

/// A decided comparison.
#[derive(Debug, Clone)]
pub struct Judgement {
    pub winner: Side,
    /// Full text of the turn the decision was parsed from.
    pub rationale: String,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    /// Deliberation turns in the successful attempt (1 for direct).
    pub turns: u32,
    pub usage: JudgeUsage,
}

#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("no {mode:?} verdict for {first} vs {second} after {attempts} attempts")]
    Unresolved {
        first: CandidateId,
        second: CandidateId,
        mode: ComparisonMode,
        attempts: u32,
    },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Source of pairwise verdicts and grouping answers.
#[async_trait]
pub trait JudgeOracle: Send + Sync {
    /// Decide which of two candidates is better.
    async fn compare(
        &self,
        first: &Candidate,
        second: &Candidate,
        mode: ComparisonMode,
        attribution: &Attribution,
    ) -> Result<Judgement, JudgeError>;

    /// Single free-text answer to a rendered prompt.
    async fn ask(
        &self,
        prompt: &PromptInstance,
        attribution: &Attribution,
    ) -> Result<(String, JudgeUsage), JudgeError>;

    /// Research plan the prompts are rendered against.
    fn plan(&self) -> &ResearchPlan;
}

// =============================================================================
// LLM judge
// =============================================================================

pub struct LlmJudge<G: ChatGateway> {
    gateway: G,
    plan: ResearchPlan,
    config: JudgeConfig,
}

impl<G: ChatGateway> LlmJudge<G> {
    pub fn new(gateway: G, plan: ResearchPlan, config: JudgeConfig) -> Result<Self, JudgeError> {
        validate_judge_config(&config)?;
        Ok(Self {
            gateway,
            plan,
            config,
        })
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    fn request(&self, messages: Vec<Message>, attribution: Attribution) -> ChatRequest {
        let req = ChatRequest::new(&self.config.model, messages, attribution)
            .temperature(self.config.temperature);
        match self.config.max_output_tokens {
            Some(max) => req.max_tokens(max),
            None => req,
        }
    }

    async fn direct(
        &self,
        first: &Candidate,
        second: &Candidate,
        attribution: &Attribution,
        usage: &mut JudgeUsage,
    ) -> Result<(String, u32), ProviderError> {
        let prompt = direct_prompt(&self.plan, first, second);
        let req = self.request(prompt.to_messages(), attribution.for_caller("oracle::direct"));
        let resp = self.gateway.chat(req).await?;
        usage.add(&resp);
        Ok((resp.content, 1))
    }

    /// Runs turns until an accepted decision or the turn cap; returns the last turn.
    async fn deliberate(
        &self,
        first: &Candidate,
        second: &Candidate,
        attribution: &Attribution,
        usage: &mut JudgeUsage,
    ) -> Result<(String, u32), ProviderError> {
        let DeliberationConfig {
            min_turns,
            max_turns,
        } = self.config.deliberation;
        let prompt = deliberation_prompt(&self.plan, first, second, min_turns, max_turns);
        let attribution = attribution.for_caller("oracle::deliberated");
        let mut messages = prompt.to_messages();

        let mut turn = 1;
        loop {
            let req = self.request(messages.clone(), attribution.clone());
            let resp = self.gateway.chat(req).await?;
            usage.add(&resp);

            let decided = parse_decision(&resp.content, ComparisonMode::Deliberated).is_some();
            if (decided && turn >= min_turns) || turn >= max_turns {
                return Ok((resp.content, turn));
            }

            messages.push(Message::assistant(resp.content));
            turn += 1;
            messages.push(Message::user(deliberation_turn(turn, min_turns, max_turns)));
        }
    }
}

#[async_trait]
impl<G: ChatGateway> JudgeOracle for LlmJudge<G> {
    async fn compare(
        &self,
        first: &Candidate,
        second: &Candidate,
        mode: ComparisonMode,
        attribution: &Attribution,
    ) -> Result<Judgement, JudgeError> {
        if first.id == second.id {
            return Err(JudgeError::InvalidRequest(format!(
                "cannot compare {} with itself",
                first.id
            )));
        }

        let mut usage = JudgeUsage::default();
        for attempt in 1..=self.config.max_attempts {
            let result = match mode {
                ComparisonMode::Direct => self.direct(first, second, attribution, &mut usage).await,
                ComparisonMode::Deliberated => {
                    self.deliberate(first, second, attribution, &mut usage).await
                }
            };

            let (text, turns) = match result {
                Ok(out) => out,
                Err(ProviderError::Refused { message }) => {
                    let refusal: String = message.chars().take(120).collect();
                    warn!(
                        first = %first.id,
                        second = %second.id,
                        attempt,
                        %refusal,
                        "judge refused comparison; retrying"
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match parse_decision(&text, mode) {
                Some(winner) => {
                    return Ok(Judgement {
                        winner,
                        rationale: text,
                        attempts: attempt,
                        turns,
                        usage,
                    })
                }
                None => warn!(
                    first = %first.id,
                    second = %second.id,
                    mode = mode.as_str(),
                    attempt,
                    max_attempts = self.config.max_attempts,
                    "judge output has no decision marker; retrying"
                ),
            }
        }

        Err(JudgeError::Unresolved {
            first: first.id.clone(),
            second: second.id.clone(),
            mode,
            attempts: self.config.max_attempts,
        })
    }

    async fn ask(
        &self,
        prompt: &PromptInstance,
        attribution: &Attribution,
    ) -> Result<(String, JudgeUsage), JudgeError> {
        let req = self.request(prompt.to_messages(), attribution.clone());
        let resp = self.gateway.chat(req).await?;
        let mut usage = JudgeUsage::default();
        usage.add(&resp);
        Ok((resp.content, usage))
    }

    fn plan(&self) -> &ResearchPlan {
        &self.plan
    }
}

fn validate_judge_config(config: &JudgeConfig) -> Result<(), JudgeError> {
    if config.max_attempts == 0 {
        return Err(JudgeError::InvalidRequest(
            "max_attempts must be >= 1".to_string(),
        ));
    }
    let d = &config.deliberation;
    if d.min_turns == 0 || d.min_turns > d.max_turns {
        return Err(JudgeError::InvalidRequest(format!(
            "deliberation turns must satisfy 1 <= min_turns <= max_turns, got {}..{}",
            d.min_turns, d.max_turns
        )));
    }
    Ok(())
}
