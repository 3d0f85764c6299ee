//! LLM-assisted comparison oracle: semantic pairing of leftover elements and
//! business-logic similarity judgments.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::llm::{BudgetTracker, Dispatcher, LlmRequest, TemperatureBand};
use crate::model::scope::Category;

/// Pairs below this similarity are discarded.
pub const SEMANTIC_PAIR_THRESHOLD: f64 = 0.55;

/// Logic similarity below this yields a discrepancy.
pub const LOGIC_SIMILARITY_THRESHOLD: f64 = 0.7;

/// A suggested rename pair from the oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairSuggestion {
    pub source: String,
    pub target: String,
    pub similarity: f64,
}

/// Business-logic similarity verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicJudgment {
    pub similarity: f64,
    pub diagnosis: String,
}

/// Condensed view of a function handed to the oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDigest {
    pub name: String,
    pub signature: String,
    pub logic_summary: String,
}

/// Semantic comparison seam; the LLM-backed implementation is below, tests
/// use scripted stand-ins.
#[async_trait]
pub trait SemanticOracle: Send + Sync {
    /// Suggest pairs among unpaired element names from both sides.
    async fn suggest_pairs(
        &self,
        category: Category,
        source: &[String],
        target: &[String],
    ) -> Result<Vec<PairSuggestion>>;

    /// Judge whether two functions implement the same business logic.
    async fn logic_similarity(
        &self,
        source: &FunctionDigest,
        target: &FunctionDigest,
    ) -> Result<LogicJudgment>;
}

/// Oracle backed by the LLM dispatcher, always on the low temperature band.
pub struct LlmSemanticOracle {
    dispatcher: Arc<Dispatcher>,
    budget: Arc<BudgetTracker>,
    model: Option<String>,
    deadline: Option<chrono::DateTime<chrono::Utc>>,
}

impl LlmSemanticOracle {
    pub fn new(dispatcher: Arc<Dispatcher>, budget: Arc<BudgetTracker>) -> Self {
        Self {
            dispatcher,
            budget,
            model: None,
            deadline: None,
        }
    }

    /// Pin the model used for comparison prompts.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Bound every oracle call by the session deadline.
    pub fn with_deadline(mut self, deadline: chrono::DateTime<chrono::Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn request(&self, prompt: String) -> LlmRequest {
        let mut request = LlmRequest::new(prompt)
            .with_band(TemperatureBand::Low)
            .with_max_tokens(2048)
            .with_system(
                "You compare elements of a migrated software system. \
                 Answer with JSON only.",
            );
        if let Some(model) = &self.model {
            request = request.with_model(model.clone());
        }
        if let Some(deadline) = self.deadline {
            request = request.with_deadline(deadline);
        }
        request
    }
}

#[derive(Debug, Deserialize)]
struct PairingAnswer {
    pairs: Vec<PairSuggestion>,
}

#[async_trait]
impl SemanticOracle for LlmSemanticOracle {
    async fn suggest_pairs(
        &self,
        category: Category,
        source: &[String],
        target: &[String],
    ) -> Result<Vec<PairSuggestion>> {
        if source.is_empty() || target.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = format!(
            "Source {category:?} elements with no direct match:\n{}\n\n\
             Target {category:?} elements with no direct match:\n{}\n\n\
             Pair source elements with target elements that are the same \
             element under a different name. Respond as JSON: \
             {{\"pairs\": [{{\"source\": \"...\", \"target\": \"...\", \
             \"similarity\": 0.0}}]}} with similarity in [0, 1]. \
             Omit elements with no plausible counterpart.",
            source.join("\n"),
            target.join("\n"),
        );

        let request = self.request(prompt).with_context("task", "pairing");
        let (value, _) = self.dispatcher.ask_json(&request, &self.budget).await?;
        let answer: PairingAnswer = serde_json::from_value(value)
            .map_err(|e| Error::ResponseUnparseable(format!("pairing answer: {e}")))?;

        // Only keep suggestions naming real elements.
        Ok(answer
            .pairs
            .into_iter()
            .filter(|p| {
                source.contains(&p.source)
                    && target.contains(&p.target)
                    && (0.0..=1.0).contains(&p.similarity)
            })
            .collect())
    }

    async fn logic_similarity(
        &self,
        source: &FunctionDigest,
        target: &FunctionDigest,
    ) -> Result<LogicJudgment> {
        let prompt = format!(
            "Source function:\n  name: {}\n  signature: {}\n  logic: {}\n\n\
             Target function:\n  name: {}\n  signature: {}\n  logic: {}\n\n\
             Do these implement the same business logic? Respond as JSON: \
             {{\"similarity\": 0.0, \"diagnosis\": \"one sentence\"}} with \
             similarity in [0, 1].",
            source.name,
            source.signature,
            source.logic_summary,
            target.name,
            target.signature,
            target.logic_summary,
        );

        let request = self.request(prompt).with_context("task", "logic-similarity");
        let (value, _) = self.dispatcher.ask_json(&request, &self.budget).await?;
        let judgment: LogicJudgment = serde_json::from_value(value)
            .map_err(|e| Error::ResponseUnparseable(format!("logic answer: {e}")))?;

        Ok(LogicJudgment {
            similarity: judgment.similarity.clamp(0.0, 1.0),
            diagnosis: judgment.diagnosis,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResultCache;
    use crate::llm::client::{LlmClient, ProviderCompletion};
    use crate::llm::types::{ModelSpec, Provider, TokenUsage};
    use crate::llm::DispatcherConfig;
    use std::sync::Mutex;

    struct CannedClient {
        answers: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for CannedClient {
        async fn complete(&self, _request: &LlmRequest) -> Result<ProviderCompletion> {
            let mut answers = self.answers.lock().unwrap();
            let content = if answers.is_empty() {
                "{}".to_string()
            } else {
                answers.remove(0)
            };
            Ok(ProviderCompletion {
                content,
                usage: TokenUsage {
                    input_tokens: 10,
                    output_tokens: 10,
                },
                model: "mock".to_string(),
                latency_ms: 1,
            })
        }

        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        fn models(&self) -> Vec<ModelSpec> {
            vec![ModelSpec {
                id: "mock".to_string(),
                provider: Provider::Anthropic,
                max_output: 4096,
                input_cost_per_m: 0.0,
                output_cost_per_m: 0.0,
            }]
        }

        fn default_model(&self) -> String {
            "mock".to_string()
        }
    }

    fn oracle_with(answers: Vec<&str>) -> LlmSemanticOracle {
        let client = Arc::new(CannedClient {
            answers: Mutex::new(answers.into_iter().map(String::from).collect()),
        });
        let dispatcher = Arc::new(Dispatcher::new(
            vec![client],
            Arc::new(ResultCache::in_memory()),
            DispatcherConfig {
                requests_per_minute: 10_000,
                ..DispatcherConfig::default()
            },
        ));
        LlmSemanticOracle::new(dispatcher, Arc::new(BudgetTracker::new(u64::MAX, 1000.0)))
    }

    #[tokio::test]
    async fn test_suggest_pairs_filters_unknown_names() {
        let oracle = oracle_with(vec![
            r#"{"pairs": [
                {"source": "get_user", "target": "fetchUser", "similarity": 0.9},
                {"source": "invented", "target": "fetchUser", "similarity": 0.8}
            ]}"#,
        ]);

        let pairs = oracle
            .suggest_pairs(
                Category::BackendFunctions,
                &["get_user".to_string()],
                &["fetchUser".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].source, "get_user");
    }

    #[tokio::test]
    async fn test_suggest_pairs_short_circuits_on_empty_side() {
        let oracle = oracle_with(vec![]);
        let pairs = oracle
            .suggest_pairs(Category::UiElements, &[], &["a".to_string()])
            .await
            .unwrap();
        assert!(pairs.is_empty());
    }

    #[tokio::test]
    async fn test_logic_similarity_clamps() {
        let oracle = oracle_with(vec![r#"{"similarity": 1.7, "diagnosis": "same"}"#]);
        let digest = FunctionDigest {
            name: "f".to_string(),
            signature: "f(x: int) -> int".to_string(),
            logic_summary: "adds one".to_string(),
        };
        let judgment = oracle.logic_similarity(&digest, &digest).await.unwrap();
        assert_eq!(judgment.similarity, 1.0);
    }
}
