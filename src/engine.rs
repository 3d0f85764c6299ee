//! Engine assembly: wires the store, cache, dispatcher, analyzers, prober,
//! broker, and scheduler into one running validation engine.

use std::sync::Arc;

use crate::analysis::{AnalyzerRegistry, RegexFallbackAnalyzer};
use crate::behavioral::{BehavioralProber, UnconfiguredProber};
use crate::cache::ResultCache;
use crate::catalog::TechnologyCatalog;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::llm::{
    AnthropicClient, ClientConfig, Dispatcher, DispatcherConfig, LlmClient, OpenAIClient,
};
use crate::progress::ProgressBroker;
use crate::scheduler::{Scheduler, ValidationPipeline};
use crate::session::{SessionStore, SqliteSessionStore};

/// A fully wired validation engine.
pub struct Engine {
    pub config: EngineConfig,
    pub store: Arc<dyn SessionStore>,
    pub broker: Arc<ProgressBroker>,
    pub cache: Arc<ResultCache>,
    pub dispatcher: Arc<Dispatcher>,
    pub scheduler: Arc<Scheduler>,
    pub catalog: Arc<TechnologyCatalog>,
}

/// Optional adapter overrides for embedding and testing.
#[derive(Default)]
pub struct EngineAdapters {
    pub registry: Option<AnalyzerRegistry>,
    pub prober: Option<Arc<dyn BehavioralProber>>,
    pub store: Option<Arc<dyn SessionStore>>,
}

impl Engine {
    /// Build an engine from configuration with default adapters: the regex
    /// fallback analyzer and, until a browser driver is attached, the
    /// unconfigured prober.
    pub fn new(config: EngineConfig) -> Result<Arc<Self>> {
        Self::with_adapters(config, EngineAdapters::default())
    }

    /// Build an engine with adapter overrides.
    pub fn with_adapters(config: EngineConfig, adapters: EngineAdapters) -> Result<Arc<Self>> {
        let store: Arc<dyn SessionStore> = match adapters.store {
            Some(store) => store,
            None if config.database_url == ":memory:" => {
                Arc::new(SqliteSessionStore::in_memory()?)
            }
            None => Arc::new(SqliteSessionStore::open(&config.database_url)?),
        };

        let broker = Arc::new(ProgressBroker::new());
        let cache = Arc::new(ResultCache::in_memory());

        let mut clients: Vec<Arc<dyn LlmClient>> = Vec::new();
        if let Some(key) = &config.anthropic_api_key {
            clients.push(Arc::new(AnthropicClient::new(ClientConfig::new(key))?));
        }
        if let Some(key) = &config.openai_api_key {
            clients.push(Arc::new(OpenAIClient::new(ClientConfig::new(key))?));
        }
        if clients.is_empty() {
            tracing::warn!(
                "no LLM provider keys configured; semantic comparison will degrade"
            );
        }
        let dispatcher = Arc::new(Dispatcher::new(
            clients,
            Arc::clone(&cache),
            DispatcherConfig::default(),
        ));

        let registry = Arc::new(
            adapters
                .registry
                .unwrap_or_else(AnalyzerRegistry::new)
                .with_fallback(Arc::new(RegexFallbackAnalyzer)),
        );
        let prober = adapters
            .prober
            .unwrap_or_else(|| Arc::new(UnconfiguredProber));

        let pipeline = Arc::new(ValidationPipeline::new(
            registry,
            Arc::clone(&cache),
            Arc::clone(&dispatcher),
            prober,
            Arc::clone(&store),
            Arc::clone(&broker),
        ));

        let scheduler = Scheduler::new(
            config.scheduler_config(),
            Arc::clone(&store),
            Arc::clone(&broker),
            pipeline,
        );

        Ok(Arc::new(Self {
            config,
            store,
            broker,
            cache,
            dispatcher,
            scheduler,
            catalog: Arc::new(TechnologyCatalog::default_catalog()),
        }))
    }

    /// Start the scheduler's worker pool (and crash recovery).
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.scheduler.start()
    }

    /// Stop background work.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::bundle::{CodeFile, InputBundle};
    use crate::model::scope::ValidationScope;
    use crate::session::{Session, SessionStatus, TechnologyContext};

    fn memory_config() -> EngineConfig {
        EngineConfig {
            database_url: ":memory:".to_string(),
            concurrency_limit: 2,
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_engine_runs_ui_session_without_llm_keys() {
        let engine = Engine::new(memory_config()).unwrap();
        engine.start().unwrap();

        let html = r#"<input id="user_name" placeholder="User Name"><button id="submit_btn">Submit</button>"#;
        let session = Session::new(
            TechnologyContext::new("php"),
            TechnologyContext::new("javascript"),
            ValidationScope::Ui,
            InputBundle::new().with_file(CodeFile::new("a.html", "html", html)),
            InputBundle::new().with_file(CodeFile::new("b.html", "html", html)),
        );
        let request_id = engine.scheduler.submit(session).unwrap();

        for _ in 0..200 {
            let status = engine.store.get(&request_id).unwrap().unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let session = engine.store.get(&request_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);

        let result = engine.store.result(&request_id).unwrap().unwrap();
        assert_eq!(result.fidelity_score, 1.0);
        engine.shutdown();
    }
}
