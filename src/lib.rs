//! # mve-core
//!
//! Migration validation orchestration engine: checks that a software
//! migration from a source codebase or running system to a target preserves
//! meaning — the same structural elements, the same business logic, the same
//! observable behavior.
//!
//! ## Core Components
//!
//! - **Fingerprint & Cache**: content-hashed caching of analyzer and LLM
//!   outputs with single-flight admission
//! - **LLM Dispatcher**: provider failover, rate limiting, circuit breakers,
//!   retry with backoff, per-session budgets
//! - **Analysis / Compare / Behavioral**: the pipeline stages producing
//!   per-stage fidelity scores and discrepancies
//! - **Session / Scheduler / Progress**: the durable session state machine,
//!   the admission queue and worker pool, and progress streaming
//! - **API**: the HTTP surface over the scheduler and the session store
//!
//! ## Example
//!
//! ```rust,ignore
//! use mve_core::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::from_env()?)?;
//! engine.start()?;
//! let request_id = engine.scheduler.submit(session)?;
//! ```

pub mod analysis;
pub mod api;
pub mod behavioral;
pub mod cache;
pub mod catalog;
pub mod compare;
pub mod config;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod llm;
pub mod model;
pub mod progress;
pub mod report;
pub mod scheduler;
pub mod session;
pub mod synthesis;

// Re-exports for convenience
pub use analysis::{AnalysisRunner, AnalyzerRegistry, CodeAnalyzer, VisualAnalyzer};
pub use behavioral::{
    BehavioralConfig, BehavioralProber, BehavioralRunner, Credentials, ScenarioTrace,
};
pub use cache::{CacheConfig, CacheStats, CacheStore, MemoryCache, ResultCache, SingleFlight};
pub use catalog::TechnologyCatalog;
pub use compare::{LlmSemanticOracle, SemanticComparator, SemanticOracle};
pub use config::EngineConfig;
pub use engine::{Engine, EngineAdapters};
pub use error::{Error, Result};
pub use fingerprint::{CacheKey, CacheNamespace, Fingerprint};
pub use llm::{
    AnthropicClient, BudgetTracker, ClientConfig, Dispatcher, DispatcherConfig, LlmClient,
    LlmRequest, LlmResponse, OpenAIClient, Provider, TemperatureBand,
};
pub use model::{
    Discrepancy, DiscrepancyKind, InputBundle, OverallStatus, Representation, Severity,
    StageResult, UnifiedResult, ValidationScope,
};
pub use progress::{ProgressBroker, ProgressEvent};
pub use report::{render, ReportFormat};
pub use scheduler::{Scheduler, SchedulerConfig, SessionPipeline, ValidationPipeline};
pub use session::{
    Session, SessionLogEntry, SessionStatus, SessionStore, SqliteSessionStore,
    TechnologyContext,
};
pub use synthesis::{synthesize, StageWeights};
