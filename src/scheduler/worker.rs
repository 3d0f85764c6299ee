//! The per-session worker pipeline: analysis, comparison, behavioral
//! probing, synthesis, and persistence, with cooperative cancellation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Duration;

use crate::analysis::{AnalysisRunner, AnalyzerRegistry};
use crate::behavioral::{BehavioralProber, BehavioralRunner};
use crate::cache::ResultCache;
use crate::compare::{LlmSemanticOracle, SemanticComparator};
use crate::error::{Error, Result};
use crate::llm::{BudgetTracker, Dispatcher};
use crate::model::result::{
    OverallStatus, SessionUsage, StageKind, StageResult, UnifiedResult,
};
use crate::model::Side;
use crate::progress::{ProgressBroker, ProgressEvent};
use crate::session::{Session, SessionLogEntry, SessionStatus, SessionStore};
use crate::synthesis::synthesize;

/// Execution context handed to the pipeline by the worker.
pub struct WorkerContext {
    pub request_id: String,
    pub cancel: watch::Receiver<bool>,
    /// Absolute session deadline, propagated into LLM calls
    pub deadline: DateTime<Utc>,
}

impl WorkerContext {
    /// Cooperative cancellation check between pipeline steps.
    pub fn check_cancel(&self) -> Result<()> {
        if *self.cancel.borrow() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Writes a log entry to the store and mirrors it onto the progress topic.
#[derive(Clone)]
pub struct Recorder {
    store: Arc<dyn SessionStore>,
    broker: Arc<ProgressBroker>,
}

impl Recorder {
    pub fn new(store: Arc<dyn SessionStore>, broker: Arc<ProgressBroker>) -> Self {
        Self { store, broker }
    }

    pub fn log(&self, request_id: &str, entry: SessionLogEntry) {
        if let Err(e) = self.store.append_log(request_id, &entry) {
            tracing::warn!(request_id, error = %e, "failed to persist session log entry");
        }
        self.broker.publish(request_id, ProgressEvent::Log(entry));
    }

    pub fn status(&self, request_id: &str, status: SessionStatus) {
        self.broker
            .publish(request_id, ProgressEvent::StatusChanged { status });
    }
}

/// The work a worker performs for one session.
#[async_trait]
pub trait SessionPipeline: Send + Sync {
    async fn run(&self, session: &Session, ctx: &WorkerContext) -> Result<UnifiedResult>;
}

/// Per-session LLM budget ceilings.
#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub token_ceiling: u64,
    pub cost_ceiling_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            token_ceiling: 2_000_000,
            cost_ceiling_usd: 10.0,
        }
    }
}

/// The full validation pipeline behind the scheduler's workers.
pub struct ValidationPipeline {
    registry: Arc<AnalyzerRegistry>,
    cache: Arc<ResultCache>,
    dispatcher: Arc<Dispatcher>,
    prober: Arc<dyn BehavioralProber>,
    store: Arc<dyn SessionStore>,
    recorder: Recorder,
    budget: BudgetConfig,
}

impl ValidationPipeline {
    pub fn new(
        registry: Arc<AnalyzerRegistry>,
        cache: Arc<ResultCache>,
        dispatcher: Arc<Dispatcher>,
        prober: Arc<dyn BehavioralProber>,
        store: Arc<dyn SessionStore>,
        broker: Arc<ProgressBroker>,
    ) -> Self {
        let recorder = Recorder::new(Arc::clone(&store), broker);
        Self {
            registry,
            cache,
            dispatcher,
            prober,
            store,
            recorder,
            budget: BudgetConfig::default(),
        }
    }

    pub fn with_budget(mut self, budget: BudgetConfig) -> Self {
        self.budget = budget;
        self
    }

    /// Whether an error degrades to a stage-level `error` instead of failing
    /// the session.
    fn degrades_to_stage_error(e: &Error) -> bool {
        e.is_recoverable() || matches!(e, Error::BudgetExhausted { .. })
    }

    fn stage_error(stage: StageKind, e: &Error) -> StageResult {
        StageResult {
            stage,
            status: OverallStatus::Error,
            fidelity_score: 0.0,
            summary: format!("{stage:?} stage failed: {e}"),
            discrepancies: Vec::new(),
            source_representation: None,
            target_representation: None,
            execution_time_secs: 0.0,
            error: Some(format!("{}: {e}", e.code())),
        }
    }

    async fn run_static_stage(
        &self,
        session: &Session,
        ctx: &WorkerContext,
        budget: &Arc<BudgetTracker>,
    ) -> Result<StageResult> {
        let request_id = &session.request_id;
        self.recorder
            .log(request_id, SessionLogEntry::info("static analysis started"));

        let runner = AnalysisRunner::new(Arc::clone(&self.registry), Arc::clone(&self.cache));
        let (source, target) = tokio::join!(
            runner.analyze(Side::Source, &session.source_bundle, session.scope),
            runner.analyze(Side::Target, &session.target_bundle, session.scope),
        );

        let (source, target) = match (source, target) {
            (Ok(s), Ok(t)) => (s, t),
            (Err(e), _) | (_, Err(e)) => {
                self.recorder.log(
                    request_id,
                    SessionLogEntry::error(format!("analysis failed: {e}")),
                );
                return if Self::degrades_to_stage_error(&e) {
                    Ok(Self::stage_error(StageKind::Static, &e))
                } else {
                    Err(e)
                };
            }
        };

        for failure in source.failures.iter().chain(target.failures.iter()) {
            self.recorder.log(
                request_id,
                SessionLogEntry::warn(format!("artifact skipped: {failure}")),
            );
        }

        ctx.check_cancel()?;
        self.recorder.log(
            request_id,
            SessionLogEntry::info("semantic comparison started"),
        );

        let oracle = LlmSemanticOracle::new(Arc::clone(&self.dispatcher), Arc::clone(budget))
            .with_deadline(ctx.deadline);
        let comparator = SemanticComparator::new(Arc::new(oracle));

        let mut result = match comparator
            .compare(&source.representation, &target.representation, session.scope)
            .await
        {
            Ok(result) => result,
            Err(e) if Self::degrades_to_stage_error(&e) => {
                self.recorder.log(
                    request_id,
                    SessionLogEntry::error(format!("comparison degraded: {e}")),
                );
                return Ok(Self::stage_error(StageKind::Static, &e));
            }
            Err(e) => return Err(e),
        };

        if source.is_partial() || target.is_partial() {
            result.summary.push_str(" (partial: some artifacts failed analysis)");
        }

        if budget.failovers() > 0 {
            self.recorder.log(
                request_id,
                SessionLogEntry::info("provider-failover").with_payload(serde_json::json!({
                    "failovers": budget.failovers(),
                })),
            );
        }

        Ok(result)
    }

    async fn run_behavioral_stage(
        &self,
        session: &Session,
        ctx: &WorkerContext,
    ) -> Result<StageResult> {
        let request_id = &session.request_id;
        ctx.check_cancel()?;

        let config = session
            .behavioral
            .as_ref()
            .ok_or_else(|| Error::Internal("behavioral scope without config".into()))?;
        let source_url = session
            .source_bundle
            .url
            .as_deref()
            .ok_or_else(|| Error::Internal("behavioral scope without source url".into()))?;
        let target_url = session
            .target_bundle
            .url
            .as_deref()
            .ok_or_else(|| Error::Internal("behavioral scope without target url".into()))?;

        self.recorder.log(
            request_id,
            SessionLogEntry::info(format!(
                "behavioral probing started ({} scenarios)",
                config.scenarios.len()
            )),
        );

        let runner = BehavioralRunner::new(Arc::clone(&self.prober));
        match runner
            .probe(
                source_url,
                target_url,
                &config.scenarios,
                config.credentials.as_ref(),
                Duration::from_secs(config.scenario_timeout_secs.max(1)),
            )
            .await
        {
            Ok(outcome) => {
                if let Err(e) = self.store.save_scenarios(request_id, &outcome.scenarios) {
                    tracing::warn!(request_id, error = %e, "failed to persist scenario results");
                }
                Ok(outcome.stage)
            }
            Err(e) if Self::degrades_to_stage_error(&e) => {
                self.recorder.log(
                    request_id,
                    SessionLogEntry::error(format!("behavioral stage degraded: {e}")),
                );
                Ok(Self::stage_error(StageKind::Behavioral, &e))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SessionPipeline for ValidationPipeline {
    async fn run(&self, session: &Session, ctx: &WorkerContext) -> Result<UnifiedResult> {
        let budget = Arc::new(BudgetTracker::new(
            self.budget.token_ceiling,
            self.budget.cost_ceiling_usd,
        ));

        ctx.check_cancel()?;

        let static_result = if session.scope.includes_static() {
            Some(self.run_static_stage(session, ctx, &budget).await?)
        } else {
            None
        };

        let behavioral_result = if session.scope.includes_behavioral() {
            Some(self.run_behavioral_stage(session, ctx).await?)
        } else {
            None
        };

        ctx.check_cancel()?;

        let usage = SessionUsage {
            total_tokens: budget.tokens_used(),
            total_cost_usd: budget.cost_used_usd(),
            llm_requests: budget.requests(),
            cache_hits: budget.cache_hits(),
        };

        let result = synthesize(static_result, behavioral_result, None, Some(usage));
        self.recorder.log(
            &session.request_id,
            SessionLogEntry::info(format!(
                "synthesis complete: {} at {:.4}",
                result.overall_status, result.fidelity_score
            ))
            .with_payload(serde_json::json!({
                "overall_status": result.overall_status,
                "fidelity_score": result.fidelity_score,
            })),
        );

        self.store.save_result(&session.request_id, &result)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::CodeAnalyzer;
    use crate::behavioral::{BehavioralConfig, Credentials, ScenarioTrace, TraceStep};
    use crate::cache::ResultCache;
    use crate::llm::client::{LlmClient, ProviderCompletion};
    use crate::llm::types::{LlmRequest, ModelSpec, Provider, TokenUsage};
    use crate::llm::DispatcherConfig;
    use crate::model::bundle::{CodeFile, InputBundle};
    use crate::model::representation::{Representation, UiElement};
    use crate::model::result::ResultKind;
    use crate::model::scope::ValidationScope;
    use crate::session::{SqliteSessionStore, TechnologyContext};

    struct EchoAnalyzer;

    #[async_trait]
    impl CodeAnalyzer for EchoAnalyzer {
        async fn analyze(
            &self,
            file: &CodeFile,
            _scope: ValidationScope,
        ) -> Result<Representation> {
            let mut rep = Representation::new();
            // One UI element per line of the file, named by the line text.
            for line in file.content.lines() {
                rep.ui_elements.push(UiElement::new("input", line, ""));
            }
            Ok(rep)
        }

        fn language(&self) -> &str {
            "python"
        }
    }

    struct OkClient;

    #[async_trait]
    impl LlmClient for OkClient {
        async fn complete(&self, _request: &LlmRequest) -> Result<ProviderCompletion> {
            Ok(ProviderCompletion {
                content: r#"{"pairs": []}"#.to_string(),
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
                input_cost_per_m: 1.0,
                output_cost_per_m: 1.0,
            }]
        }

        fn default_model(&self) -> String {
            "mock".to_string()
        }
    }

    struct EchoProber;

    #[async_trait]
    impl BehavioralProber for EchoProber {
        async fn run_scenario(
            &self,
            _url: &str,
            scenario: &str,
            _credentials: Option<&Credentials>,
            _timeout: Duration,
        ) -> Result<ScenarioTrace> {
            Ok(ScenarioTrace {
                scenario: scenario.to_string(),
                steps: vec![TraceStep {
                    action: "navigate".to_string(),
                    selector: "/".to_string(),
                    input: None,
                    state_class: "page:/".to_string(),
                    state_fingerprint: "same".to_string(),
                    validation_error: None,
                    message: None,
                    duration_ms: 10,
                }],
            })
        }
    }

    fn pipeline(store: Arc<SqliteSessionStore>) -> ValidationPipeline {
        let registry = Arc::new(
            crate::analysis::AnalyzerRegistry::new().register_code(Arc::new(EchoAnalyzer)),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            vec![Arc::new(OkClient)],
            Arc::new(ResultCache::in_memory()),
            DispatcherConfig {
                requests_per_minute: 10_000,
                ..DispatcherConfig::default()
            },
        ));
        ValidationPipeline::new(
            registry,
            Arc::new(ResultCache::in_memory()),
            dispatcher,
            Arc::new(EchoProber),
            store,
            Arc::new(ProgressBroker::new()),
        )
    }

    fn context(request_id: &str) -> (watch::Sender<bool>, WorkerContext) {
        let (tx, rx) = watch::channel(false);
        (
            tx,
            WorkerContext {
                request_id: request_id.to_string(),
                cancel: rx,
                deadline: Utc::now() + chrono::Duration::minutes(30),
            },
        )
    }

    fn static_session() -> Session {
        Session::new(
            TechnologyContext::new("python"),
            TechnologyContext::new("python"),
            ValidationScope::Ui,
            InputBundle::new().with_file(CodeFile::new("a.py", "python", "email\nsubmit")),
            InputBundle::new().with_file(CodeFile::new("b.py", "python", "email\nsubmit")),
        )
    }

    #[tokio::test]
    async fn test_static_pipeline_end_to_end() {
        let store = Arc::new(SqliteSessionStore::in_memory().unwrap());
        let session = static_session();
        store.create(&session).unwrap();

        let pipeline = pipeline(Arc::clone(&store));
        let (_tx, ctx) = context(&session.request_id);

        let result = pipeline.run(&session, &ctx).await.unwrap();
        assert_eq!(result.kind, ResultKind::StaticOnly);
        assert_eq!(result.overall_status, OverallStatus::Approved);
        assert_eq!(result.fidelity_score, 1.0);

        // Result persisted, logs recorded.
        assert!(store.result(&session.request_id).unwrap().is_some());
        let logs = store.logs(&session.request_id).unwrap();
        assert!(logs.iter().any(|l| l.message.contains("static analysis")));
        assert!(logs.iter().any(|l| l.message.contains("synthesis complete")));
    }

    #[tokio::test]
    async fn test_hybrid_pipeline_runs_both_stages() {
        let store = Arc::new(SqliteSessionStore::in_memory().unwrap());
        let mut session = static_session();
        session.scope = ValidationScope::Full;
        session.source_bundle.url = Some("http://old".to_string());
        session.target_bundle.url = Some("http://new".to_string());
        session.behavioral = Some(BehavioralConfig::new(vec!["smoke".to_string()], 30));
        store.create(&session).unwrap();

        let pipeline = pipeline(Arc::clone(&store));
        let (_tx, ctx) = context(&session.request_id);

        let result = pipeline.run(&session, &ctx).await.unwrap();
        assert_eq!(result.kind, ResultKind::Hybrid);
        assert!(result.static_result.is_some());
        assert!(result.behavioral_result.is_some());
        assert!(result.usage.is_some());
    }

    #[tokio::test]
    async fn test_cancel_before_start_propagates() {
        let store = Arc::new(SqliteSessionStore::in_memory().unwrap());
        let session = static_session();
        store.create(&session).unwrap();

        let pipeline = pipeline(Arc::clone(&store));
        let (tx, ctx) = context(&session.request_id);
        tx.send(true).unwrap();

        let err = pipeline.run(&session, &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(store.result(&session.request_id).unwrap().is_none());
    }
}
