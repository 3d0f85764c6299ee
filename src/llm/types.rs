//! LLM envelope types: requests, responses, budgets, and model pricing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Provider {
    Anthropic,
    OpenAI,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAI => write!(f, "openai"),
        }
    }
}

/// Coarse temperature band. Low-band requests are cacheable; medium and high
/// are not (the answers are not expected to be reproducible).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureBand {
    Low,
    Medium,
    High,
}

impl TemperatureBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Concrete sampling temperature sent to providers.
    pub fn temperature(&self) -> f64 {
        match self {
            Self::Low => 0.0,
            Self::Medium => 0.5,
            Self::High => 0.9,
        }
    }

    pub fn is_cacheable(&self) -> bool {
        matches!(self, Self::Low)
    }
}

/// Request envelope handed to the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    /// User prompt
    pub prompt: String,
    /// Pinned model; `None` lets failover pick any hosted model
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Structured context, canonicalized into the fingerprint
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    pub max_tokens: u32,
    pub temperature_band: TemperatureBand,
    /// Hard deadline; `None` means the session deadline governs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            system: None,
            context: BTreeMap::new(),
            max_tokens: 4096,
            temperature_band: TemperatureBand::Low,
            deadline: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_band(mut self, band: TemperatureBand) -> Self {
        self.temperature_band = band;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Response envelope returned by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub provider: Provider,
    pub model: String,
    pub cache_hit: bool,
    /// True when the configured primary provider did not serve this response
    #[serde(default)]
    pub failed_over: bool,
}

/// Model pricing and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub provider: Provider,
    pub max_output: u32,
    /// Input cost per million tokens (USD)
    pub input_cost_per_m: f64,
    /// Output cost per million tokens (USD)
    pub output_cost_per_m: f64,
}

impl ModelSpec {
    /// Calculate cost for given token usage.
    pub fn calculate_cost(&self, usage: &TokenUsage) -> f64 {
        let input = (usage.input_tokens as f64 / 1_000_000.0) * self.input_cost_per_m;
        let output = (usage.output_tokens as f64 / 1_000_000.0) * self.output_cost_per_m;
        input + output
    }

    pub fn claude_sonnet() -> Self {
        Self {
            id: "claude-3-5-sonnet-20241022".to_string(),
            provider: Provider::Anthropic,
            max_output: 8192,
            input_cost_per_m: 3.0,
            output_cost_per_m: 15.0,
        }
    }

    pub fn claude_haiku() -> Self {
        Self {
            id: "claude-3-5-haiku-20241022".to_string(),
            provider: Provider::Anthropic,
            max_output: 8192,
            input_cost_per_m: 0.8,
            output_cost_per_m: 4.0,
        }
    }

    pub fn gpt4o() -> Self {
        Self {
            id: "gpt-4o".to_string(),
            provider: Provider::OpenAI,
            max_output: 16384,
            input_cost_per_m: 2.5,
            output_cost_per_m: 10.0,
        }
    }

    pub fn gpt4o_mini() -> Self {
        Self {
            id: "gpt-4o-mini".to_string(),
            provider: Provider::OpenAI,
            max_output: 16384,
            input_cost_per_m: 0.15,
            output_cost_per_m: 0.60,
        }
    }
}

/// Per-session token and cost ceilings with monotonic counters.
///
/// Counters only grow; reaching a ceiling fails subsequent calls with a
/// budget-exhausted error. Cost is tracked in micro-USD so the counter can
/// stay atomic.
#[derive(Debug)]
pub struct BudgetTracker {
    token_ceiling: u64,
    cost_ceiling_micro_usd: u64,
    tokens_used: AtomicU64,
    cost_used_micro_usd: AtomicU64,
    requests: AtomicU64,
    cache_hits: AtomicU64,
    failovers: AtomicU64,
}

impl BudgetTracker {
    pub fn new(token_ceiling: u64, cost_ceiling_usd: f64) -> Self {
        Self {
            token_ceiling,
            cost_ceiling_micro_usd: (cost_ceiling_usd * 1_000_000.0) as u64,
            tokens_used: AtomicU64::new(0),
            cost_used_micro_usd: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            failovers: AtomicU64::new(0),
        }
    }

    /// Fail if either ceiling has been reached.
    pub fn check(&self) -> Result<()> {
        if self.tokens_used.load(Ordering::Relaxed) >= self.token_ceiling {
            return Err(Error::budget_exhausted("tokens"));
        }
        if self.cost_used_micro_usd.load(Ordering::Relaxed) >= self.cost_ceiling_micro_usd {
            return Err(Error::budget_exhausted("cost"));
        }
        Ok(())
    }

    /// Record a completed provider call.
    pub fn record(&self, usage: &TokenUsage, cost_usd: f64) {
        self.tokens_used.fetch_add(usage.total(), Ordering::Relaxed);
        self.cost_used_micro_usd
            .fetch_add((cost_usd * 1_000_000.0) as u64, Ordering::Relaxed);
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache hit (no provider spend).
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record that a call was served by a non-primary provider or retry.
    pub fn record_failover(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tokens_used(&self) -> u64 {
        self.tokens_used.load(Ordering::Relaxed)
    }

    pub fn cost_used_usd(&self) -> f64 {
        self.cost_used_micro_usd.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn failovers(&self) -> u64 {
        self.failovers.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_bands() {
        assert!(TemperatureBand::Low.is_cacheable());
        assert!(!TemperatureBand::Medium.is_cacheable());
        assert!(!TemperatureBand::High.is_cacheable());
        assert_eq!(TemperatureBand::Low.temperature(), 0.0);
    }

    #[test]
    fn test_request_builder() {
        let req = LlmRequest::new("pair these")
            .with_model("claude-3-5-haiku-20241022")
            .with_system("you compare elements")
            .with_context("scope", "api")
            .with_max_tokens(512)
            .with_band(TemperatureBand::Low);

        assert_eq!(req.model.as_deref(), Some("claude-3-5-haiku-20241022"));
        assert_eq!(req.max_tokens, 512);
        assert_eq!(req.context.get("scope").unwrap(), "api");
    }

    #[test]
    fn test_model_cost_calculation() {
        let sonnet = ModelSpec::claude_sonnet();
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 500_000,
        };
        // 1M * $3/M + 0.5M * $15/M = $10.5
        assert!((sonnet.calculate_cost(&usage) - 10.5).abs() < 0.01);
    }

    #[test]
    fn test_budget_monotonic_and_exhaustion() {
        let budget = BudgetTracker::new(1000, 1.0);
        assert!(budget.check().is_ok());

        budget.record(
            &TokenUsage {
                input_tokens: 600,
                output_tokens: 300,
            },
            0.10,
        );
        assert!(budget.check().is_ok());
        assert_eq!(budget.tokens_used(), 900);

        budget.record(
            &TokenUsage {
                input_tokens: 100,
                output_tokens: 0,
            },
            0.01,
        );
        assert_eq!(budget.tokens_used(), 1000);
        assert!(matches!(
            budget.check(),
            Err(Error::BudgetExhausted { .. })
        ));
    }

    #[test]
    fn test_budget_cost_ceiling() {
        let budget = BudgetTracker::new(u64::MAX, 0.05);
        budget.record(&TokenUsage::default(), 0.06);
        assert!(matches!(
            budget.check(),
            Err(Error::BudgetExhausted { .. })
        ));
    }
}
