//! LLM dispatcher: provider failover, rate limiting, retries, caching,
//! single-flight, and per-session budget accounting.

use std::sync::Arc;

use rand::Rng;
use serde_json::Value;
use tokio::time::{sleep, Duration, Instant};

use crate::cache::{ResultCache, SingleFlight};
use crate::error::{Error, Result};
use crate::fingerprint::{CacheKey, CacheNamespace, Fingerprint};

use super::breaker::{BreakerConfig, CircuitBreaker};
use super::client::LlmClient;
use super::limiter::RateLimiter;
use super::types::{BudgetTracker, LlmRequest, LlmResponse};

/// Dispatcher policy. All retry/backoff constants are configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Retry rounds across the failover chain (default: 3)
    pub max_retries: u32,
    /// First backoff delay (default: 250 ms)
    pub backoff_initial: Duration,
    /// Backoff ceiling (default: 4 s)
    pub backoff_cap: Duration,
    /// Reformat attempts when the caller asserts JSON shape (default: 2)
    pub reformat_retries: u32,
    /// Requests-per-minute bucket per provider (default: 60)
    pub requests_per_minute: u32,
    /// Tokens-per-minute bucket, if the provider enforces one
    pub tokens_per_minute: Option<u32>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_initial: Duration::from_millis(250),
            backoff_cap: Duration::from_secs(4),
            reformat_retries: 2,
            requests_per_minute: 60,
            tokens_per_minute: None,
        }
    }
}

struct ProviderSlot {
    client: Arc<dyn LlmClient>,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
}

/// Routes envelopes to an ordered provider list.
///
/// The first provider whose breaker admits the call is tried; recoverable
/// errors move on to the next provider. Identical in-flight requests are
/// deduplicated, and low-temperature answers are served from and written to
/// the result cache.
pub struct Dispatcher {
    slots: Vec<ProviderSlot>,
    cache: Arc<ResultCache>,
    flights: SingleFlight<LlmResponse>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        clients: Vec<Arc<dyn LlmClient>>,
        cache: Arc<ResultCache>,
        config: DispatcherConfig,
    ) -> Self {
        let slots = clients
            .into_iter()
            .map(|client| ProviderSlot {
                limiter: RateLimiter::new(config.requests_per_minute, config.tokens_per_minute),
                breaker: CircuitBreaker::new(BreakerConfig::default()),
                client,
            })
            .collect();

        Self {
            slots,
            cache,
            flights: SingleFlight::new(),
            config,
        }
    }

    /// Breaker states per provider, for health reporting.
    pub fn breaker_states(&self) -> Vec<(String, &'static str)> {
        self.slots
            .iter()
            .map(|s| (s.client.provider().to_string(), s.breaker.state_name()))
            .collect()
    }

    fn request_fingerprint(&self, request: &LlmRequest) -> Fingerprint {
        Fingerprint::for_llm(
            request.model.as_deref().unwrap_or("auto"),
            request.system.as_deref(),
            &request.prompt,
            &request.context,
            request.temperature_band.as_str(),
        )
    }

    fn deadline_instant(request: &LlmRequest) -> Option<Instant> {
        request.deadline.map(|deadline| {
            let remaining = (deadline - chrono::Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            Instant::now() + remaining
        })
    }

    /// Send an envelope, consulting the cache for low-temperature requests.
    pub async fn ask(
        &self,
        request: &LlmRequest,
        budget: &BudgetTracker,
    ) -> Result<LlmResponse> {
        budget.check()?;

        let fingerprint = self.request_fingerprint(request);
        let cache_key = CacheKey::new(CacheNamespace::Llm, fingerprint.clone());

        if request.temperature_band.is_cacheable() {
            if let Some(value) = self.cache.get(&cache_key).await {
                if let Ok(mut response) = serde_json::from_value::<LlmResponse>(value) {
                    response.cache_hit = true;
                    budget.record_cache_hit();
                    return Ok(response);
                }
            }
        }

        let response = self
            .flights
            .run(fingerprint.as_hex(), || self.dispatch(request, budget))
            .await?;

        if request.temperature_band.is_cacheable() {
            if let Ok(value) = serde_json::to_value(&response) {
                self.cache.put(&cache_key, value).await;
            }
        }

        Ok(response)
    }

    /// Send an envelope and assert the answer parses as JSON.
    ///
    /// On a malformed answer the dispatcher re-asks with a reformat
    /// instruction up to the configured number of times, then signals
    /// `response-unparseable`.
    pub async fn ask_json(
        &self,
        request: &LlmRequest,
        budget: &BudgetTracker,
    ) -> Result<(Value, LlmResponse)> {
        let mut attempt = request.clone();
        for round in 0..=self.config.reformat_retries {
            let response = self.ask(&attempt, budget).await?;
            if let Some(value) = extract_json(&response.content) {
                return Ok((value, response));
            }

            tracing::warn!(round, "LLM answer failed JSON parse, requesting reformat");
            attempt = request
                .clone()
                .with_context("reformat_attempt", (round + 1).to_string());
            attempt.prompt = format!(
                "{}\n\nYour previous answer was not valid JSON. \
                 Respond with a single valid JSON value and nothing else.",
                request.prompt
            );
        }

        Err(Error::ResponseUnparseable(format!(
            "no valid JSON after {} reformat attempts",
            self.config.reformat_retries
        )))
    }

    async fn dispatch(
        &self,
        request: &LlmRequest,
        budget: &BudgetTracker,
    ) -> Result<LlmResponse> {
        let deadline = Self::deadline_instant(request);
        let estimated_tokens = (request.prompt.len() / 4) as u64 + request.max_tokens as u64;
        let mut last_error: Option<Error> = None;

        for round in 0..=self.config.max_retries {
            if round > 0 {
                self.backoff(round, deadline).await?;
            }

            for (index, slot) in self.slots.iter().enumerate() {
                if let Some(model) = &request.model {
                    if !slot.client.hosts_model(model) {
                        continue;
                    }
                }

                if !slot.breaker.try_acquire() {
                    continue;
                }

                if let Err(e) = slot.limiter.acquire(estimated_tokens, deadline).await {
                    slot.breaker.cancel_probe();
                    match deadline {
                        Some(d) if Instant::now() >= d => return Err(e),
                        _ => {
                            last_error = Some(e);
                            continue;
                        }
                    }
                }

                match slot.client.complete(request).await {
                    Ok(completion) => {
                        slot.breaker.record_success();

                        let spec = slot
                            .client
                            .models()
                            .into_iter()
                            .find(|m| completion.model.starts_with(&m.id) || m.id == completion.model)
                            .unwrap_or_else(|| super::types::ModelSpec {
                                id: completion.model.clone(),
                                provider: slot.client.provider(),
                                max_output: 0,
                                input_cost_per_m: 0.0,
                                output_cost_per_m: 0.0,
                            });
                        let cost = spec.calculate_cost(&completion.usage);
                        budget.record(&completion.usage, cost);

                        let failed_over = index > 0 || round > 0;
                        if failed_over {
                            budget.record_failover();
                            tracing::info!(
                                provider = %slot.client.provider(),
                                round,
                                "provider-failover"
                            );
                        }

                        return Ok(LlmResponse {
                            content: completion.content,
                            usage: completion.usage,
                            cost_usd: cost,
                            latency_ms: completion.latency_ms,
                            provider: slot.client.provider(),
                            model: completion.model,
                            cache_hit: false,
                            failed_over,
                        });
                    }
                    Err(e) if e.is_recoverable() => {
                        slot.breaker.record_failure();
                        tracing::warn!(
                            provider = %slot.client.provider(),
                            error = %e,
                            "provider call failed, trying next"
                        );
                        last_error = Some(e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Err(Error::ProviderUnavailable(match last_error {
            Some(e) => e.to_string(),
            None => "all provider breakers open".to_string(),
        }))
    }

    async fn backoff(&self, round: u32, deadline: Option<Instant>) -> Result<()> {
        let exp = self
            .config
            .backoff_initial
            .saturating_mul(1u32 << (round - 1).min(16))
            .min(self.config.backoff_cap);
        // Full jitter: uniform in [0, exp).
        let jittered = Duration::from_millis(rand::thread_rng().gen_range(0..=exp.as_millis() as u64));

        if let Some(deadline) = deadline {
            if Instant::now() + jittered >= deadline {
                return Err(Error::deadline_exceeded(jittered.as_millis() as u64));
            }
        }

        sleep(jittered).await;
        Ok(())
    }
}

/// Pull the first JSON value out of an LLM answer, tolerating code fences
/// and surrounding prose.
pub fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    // Strip markdown fences.
    if let Some(stripped) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
    {
        if let Ok(value) = serde_json::from_str::<Value>(stripped.trim()) {
            return Some(value);
        }
    }

    // Last resort: widest brace-delimited span.
    let start = trimmed.find(['{', '['])?;
    let close = match trimmed.as_bytes()[start] {
        b'{' => '}',
        _ => ']',
    };
    let end = trimmed.rfind(close)?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::ProviderCompletion;
    use crate::llm::types::{ModelSpec, Provider, TemperatureBand, TokenUsage};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted provider double: pops canned outcomes in order, then repeats
    /// the fallback.
    struct ScriptedClient {
        provider: Provider,
        model: String,
        script: Mutex<VecDeque<std::result::Result<String, Error>>>,
        fallback: std::result::Result<String, ()>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn always_ok(provider: Provider, model: &str) -> Self {
            Self {
                provider,
                model: model.to_string(),
                script: Mutex::new(VecDeque::new()),
                fallback: Ok("ok".to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn always_failing(provider: Provider, model: &str) -> Self {
            Self {
                provider,
                model: model.to_string(),
                script: Mutex::new(VecDeque::new()),
                fallback: Err(()),
                calls: AtomicUsize::new(0),
            }
        }

        fn scripted(
            provider: Provider,
            model: &str,
            outcomes: Vec<std::result::Result<String, Error>>,
        ) -> Self {
            Self {
                provider,
                model: model.to_string(),
                script: Mutex::new(outcomes.into()),
                fallback: Ok("ok".to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn complete(&self, _request: &LlmRequest) -> Result<ProviderCompletion> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Yield so concurrent asks genuinely overlap in-flight.
            tokio::task::yield_now().await;
            let next = self.script.lock().unwrap().pop_front();
            let outcome = match next {
                Some(outcome) => outcome,
                None => match &self.fallback {
                    Ok(content) => Ok(content.clone()),
                    Err(()) => Err(Error::llm_api(self.provider.to_string(), "scripted 503")),
                },
            };

            outcome.map(|content| ProviderCompletion {
                content,
                usage: TokenUsage {
                    input_tokens: 100,
                    output_tokens: 50,
                },
                model: self.model.clone(),
                latency_ms: 5,
            })
        }

        fn provider(&self) -> Provider {
            self.provider
        }

        fn models(&self) -> Vec<ModelSpec> {
            vec![ModelSpec {
                id: self.model.clone(),
                provider: self.provider,
                max_output: 4096,
                input_cost_per_m: 1.0,
                output_cost_per_m: 2.0,
            }]
        }

        fn default_model(&self) -> String {
            self.model.clone()
        }
    }

    fn dispatcher_with(clients: Vec<Arc<dyn LlmClient>>) -> Dispatcher {
        Dispatcher::new(
            clients,
            Arc::new(ResultCache::in_memory()),
            DispatcherConfig {
                // High bucket so rate limiting never interferes with tests.
                requests_per_minute: 10_000,
                ..DispatcherConfig::default()
            },
        )
    }

    fn budget() -> BudgetTracker {
        BudgetTracker::new(u64::MAX, 1_000_000.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_to_secondary_and_breaker_opens() {
        let primary = Arc::new(ScriptedClient::always_failing(Provider::Anthropic, "model-a"));
        let secondary = Arc::new(ScriptedClient::always_ok(Provider::OpenAI, "model-b"));
        let dispatcher = dispatcher_with(vec![primary.clone(), secondary.clone()]);
        let budget = budget();

        // Each ask fails on primary once, then succeeds on secondary.
        for i in 0..5 {
            let request = LlmRequest::new(format!("q{i}")).with_band(TemperatureBand::Medium);
            let response = dispatcher.ask(&request, &budget).await.unwrap();
            assert!(response.failed_over);
            assert_eq!(response.provider, Provider::OpenAI);
        }
        assert_eq!(primary.calls(), 5);

        // Breaker is now open: the sixth ask skips the primary entirely.
        let request = LlmRequest::new("q6").with_band(TemperatureBand::Medium);
        dispatcher.ask(&request, &budget).await.unwrap();
        assert_eq!(primary.calls(), 5);
        assert_eq!(secondary.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_providers_down() {
        let a = Arc::new(ScriptedClient::always_failing(Provider::Anthropic, "model-a"));
        let b = Arc::new(ScriptedClient::always_failing(Provider::OpenAI, "model-b"));
        let dispatcher = dispatcher_with(vec![a, b]);

        let request = LlmRequest::new("q").with_band(TemperatureBand::Medium);
        let err = dispatcher.ask(&request, &budget()).await.unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_pinned_model_restricts_providers() {
        let a = Arc::new(ScriptedClient::always_ok(Provider::Anthropic, "model-a"));
        let b = Arc::new(ScriptedClient::always_ok(Provider::OpenAI, "model-b"));
        let dispatcher = dispatcher_with(vec![a.clone(), b.clone()]);

        let request = LlmRequest::new("q")
            .with_model("model-b")
            .with_band(TemperatureBand::Medium);
        let response = dispatcher.ask(&request, &budget()).await.unwrap();
        assert_eq!(response.provider, Provider::OpenAI);
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn test_non_recoverable_fails_immediately() {
        let a = Arc::new(ScriptedClient::scripted(
            Provider::Anthropic,
            "model-a",
            vec![Err(Error::Auth("bad key".into()))],
        ));
        let b = Arc::new(ScriptedClient::always_ok(Provider::OpenAI, "model-b"));
        let dispatcher = dispatcher_with(vec![a, b.clone()]);

        let request = LlmRequest::new("q").with_band(TemperatureBand::Medium);
        let err = dispatcher.ask(&request, &budget()).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_low_band_caches_and_replays() {
        let a = Arc::new(ScriptedClient::always_ok(Provider::Anthropic, "model-a"));
        let dispatcher = dispatcher_with(vec![a.clone()]);
        let budget = budget();

        let request = LlmRequest::new("stable question");
        let first = dispatcher.ask(&request, &budget).await.unwrap();
        assert!(!first.cache_hit);

        let second = dispatcher.ask(&request, &budget).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(a.calls(), 1);
        assert_eq!(budget.cache_hits(), 1);
        assert_eq!(budget.requests(), 1);
    }

    #[tokio::test]
    async fn test_high_band_skips_cache() {
        let a = Arc::new(ScriptedClient::always_ok(Provider::Anthropic, "model-a"));
        let dispatcher = dispatcher_with(vec![a.clone()]);
        let budget = budget();

        let request = LlmRequest::new("creative question").with_band(TemperatureBand::High);
        dispatcher.ask(&request, &budget).await.unwrap();
        dispatcher.ask(&request, &budget).await.unwrap();
        assert_eq!(a.calls(), 2);
    }

    #[tokio::test]
    async fn test_budget_exhausted_blocks_dispatch() {
        let a = Arc::new(ScriptedClient::always_ok(Provider::Anthropic, "model-a"));
        let dispatcher = dispatcher_with(vec![a.clone()]);
        let budget = BudgetTracker::new(10, 1.0);
        budget.record(
            &TokenUsage {
                input_tokens: 10,
                output_tokens: 0,
            },
            0.0,
        );

        let request = LlmRequest::new("q");
        let err = dispatcher.ask(&request, &budget).await.unwrap_err();
        assert!(matches!(err, Error::BudgetExhausted { .. }));
        assert_eq!(a.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_identical_asks_single_flight() {
        let a = Arc::new(ScriptedClient::always_ok(Provider::Anthropic, "model-a"));
        let dispatcher = Arc::new(dispatcher_with(vec![a.clone()]));
        let budget = Arc::new(budget());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let dispatcher = Arc::clone(&dispatcher);
            let budget = Arc::clone(&budget);
            handles.push(tokio::spawn(async move {
                // Medium band: no cache, so dedup must come from single-flight.
                let request =
                    LlmRequest::new("identical").with_band(TemperatureBand::Medium);
                dispatcher.ask(&request, &budget).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test]
    async fn test_ask_json_reformats_once() {
        let a = Arc::new(ScriptedClient::scripted(
            Provider::Anthropic,
            "model-a",
            vec![
                Ok("definitely not json".to_string()),
                Ok("{\"pairs\": []}".to_string()),
            ],
        ));
        let dispatcher = dispatcher_with(vec![a.clone()]);

        let request = LlmRequest::new("pair things").with_band(TemperatureBand::Medium);
        let (value, _) = dispatcher.ask_json(&request, &budget()).await.unwrap();
        assert_eq!(value, serde_json::json!({"pairs": []}));
        assert_eq!(a.calls(), 2);
    }

    #[tokio::test]
    async fn test_ask_json_gives_up() {
        let a = Arc::new(ScriptedClient::scripted(
            Provider::Anthropic,
            "model-a",
            vec![
                Ok("nope".to_string()),
                Ok("still nope".to_string()),
                Ok("nope again".to_string()),
            ],
        ));
        let dispatcher = dispatcher_with(vec![a]);

        let request = LlmRequest::new("pair things").with_band(TemperatureBand::Medium);
        let err = dispatcher.ask_json(&request, &budget()).await.unwrap_err();
        assert!(matches!(err, Error::ResponseUnparseable(_)));
    }

    #[test]
    fn test_extract_json_variants() {
        assert!(extract_json("{\"a\": 1}").is_some());
        assert!(extract_json("```json\n{\"a\": 1}\n```").is_some());
        assert!(extract_json("Here you go:\n{\"a\": 1}\nHope that helps!").is_some());
        assert!(extract_json("[1, 2, 3]").is_some());
        assert!(extract_json("no json here").is_none());
    }
}
