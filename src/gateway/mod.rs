//! Oracle gateway: chat transport to an OpenAI-compatible judge endpoint.

pub mod error;
pub mod openai;
pub mod pricing;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use openai::{ChatProvider, OpenAiAdapter};
use usage::ProviderCallRecord;

pub use error::{ErrorContext, ProviderError};
pub use pricing::*;
pub use types::*;
pub use usage::{CallStatus, NoopUsageSink, TracingUsageSink, UsageSink};

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[async_trait::async_trait]
impl<G: ChatGateway + ?Sized> ChatGateway for Arc<G> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        (**self).chat(req).await
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

/// Gateway over a single provider with transport-level retries and usage reporting.
pub struct ProviderGateway<U: UsageSink, P: ChatProvider = OpenAiAdapter> {
    provider: P,
    usage_sink: Arc<U>,
    config: GatewayConfig,
}

#[async_trait::async_trait]
impl<U: UsageSink, P: ChatProvider> ChatGateway for ProviderGateway<U, P> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

impl<U: UsageSink> ProviderGateway<U, OpenAiAdapter> {
    pub fn from_env(usage_sink: Arc<U>) -> Result<Self, ProviderError> {
        let provider = OpenAiAdapter::from_env()?;
        Ok(Self {
            provider,
            usage_sink,
            config: GatewayConfig::default(),
        })
    }
}

impl<U: UsageSink, P: ChatProvider> ProviderGateway<U, P> {
    pub fn with_config(provider: P, usage_sink: Arc<U>, config: GatewayConfig) -> Self {
        Self {
            provider,
            usage_sink,
            config,
        }
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.provider.chat(&req).await {
                Ok(resp) => {
                    self.record_usage(&req, Some(&resp), None).await;
                    return Ok(resp);
                }
                Err(err) => {
                    self.record_usage(&req, None, Some(err.code())).await;

                    if !err.is_retryable() || attempt >= self.config.max_retries {
                        return Err(err);
                    }

                    let delay = match &err {
                        ProviderError::RateLimited { retry_after, .. } => {
                            (*retry_after).min(backoff_delay(self.config.retry_base_delay, attempt + 3))
                        }
                        _ => backoff_delay(self.config.retry_base_delay, attempt),
                    };
                    tracing::warn!(
                        caller = req.attribution.caller,
                        attempt,
                        code = err.code(),
                        request_id = ?err.request_id(),
                        delay_ms = delay.as_millis() as u64,
                        "retrying judge call"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn record_usage(
        &self,
        req: &ChatRequest,
        resp: Option<&ChatResponse>,
        error_code: Option<&'static str>,
    ) {
        let mut record = ProviderCallRecord::new(&req.model, req.attribution.caller)
            .run(req.attribution.run_id, req.attribution.cycle);

        if let Some(resp) = resp {
            record = record
                .tokens(resp.input_tokens, resp.output_tokens)
                .cost(resp.cost_nanodollars)
                .latency(resp.latency.as_millis() as u64);
        }
        if let Some(code) = error_code {
            record = record.error(code);
        }

        self.usage_sink.record(record).await;
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u32.pow(attempt.min(5));
    base * multiplier
}
