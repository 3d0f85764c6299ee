//! Analysis stage runner: fans artifacts out to analyzer adapters with
//! bounded parallelism and merges the partial representations in input order.

use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use tokio::sync::Semaphore;

use crate::cache::ResultCache;
use crate::error::{Error, Result};
use crate::fingerprint::{CacheKey, CacheNamespace, Fingerprint};
use crate::model::bundle::InputBundle;
use crate::model::representation::Representation;
use crate::model::scope::ValidationScope;
use crate::model::Side;

use super::analyzer::AnalyzerRegistry;

/// Default concurrent adapter invocations per side.
pub const DEFAULT_ANALYSIS_PARALLELISM: usize = 4;

/// Output of analyzing one side.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub representation: Representation,
    /// Per-artifact failures; the stage continues around them
    pub failures: Vec<String>,
}

impl AnalysisOutcome {
    /// True when some artifacts failed but others produced elements.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Invokes Code/Visual analyzer adapters and normalizes their output.
pub struct AnalysisRunner {
    registry: Arc<AnalyzerRegistry>,
    cache: Arc<ResultCache>,
    max_parallel: usize,
}

impl AnalysisRunner {
    pub fn new(registry: Arc<AnalyzerRegistry>, cache: Arc<ResultCache>) -> Self {
        Self {
            registry,
            cache,
            max_parallel: DEFAULT_ANALYSIS_PARALLELISM,
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Analyze one side's bundle into a representation.
    ///
    /// Per-artifact errors are collected but do not abort the stage unless
    /// every artifact fails.
    pub async fn analyze(
        &self,
        side: Side,
        bundle: &InputBundle,
        scope: ValidationScope,
    ) -> Result<AnalysisOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks: Vec<BoxFuture<'_, (usize, String, Result<Representation>)>> = Vec::new();

        for (index, file) in bundle.files.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let file = file.clone();
            let label = file.path.clone();
            tasks.push(Box::pin(async move {
                let _permit = semaphore.acquire().await;
                let result = self.analyze_file(&file, scope).await;
                (index, label, result)
            }));
        }

        let file_count = bundle.files.len();
        for (offset, shot) in bundle.screenshots.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let shot = shot.clone();
            let label = shot.reference.clone();
            tasks.push(Box::pin(async move {
                let _permit = semaphore.acquire().await;
                let result = self.analyze_screenshot(&shot, scope).await;
                (file_count + offset, label, result)
            }));
        }

        if tasks.is_empty() {
            return Ok(AnalysisOutcome {
                representation: Representation::new(),
                failures: Vec::new(),
            });
        }

        let mut results = join_all(tasks).await;
        results.sort_by_key(|(index, _, _)| *index);

        let mut representation = Representation::new();
        let mut failures = Vec::new();
        let total = results.len();

        for (_, label, result) in results {
            match result {
                Ok(partial) => representation.merge(partial),
                Err(e) => {
                    tracing::warn!(%side, artifact = %label, error = %e, "artifact analysis failed");
                    failures.push(format!("{label}: {e}"));
                }
            }
        }

        if failures.len() == total {
            return Err(Error::Internal(format!(
                "analysis of {side} side failed for all {total} artifacts"
            )));
        }

        Ok(AnalysisOutcome {
            representation,
            failures,
        })
    }

    async fn analyze_file(
        &self,
        file: &crate::model::bundle::CodeFile,
        scope: ValidationScope,
    ) -> Result<Representation> {
        let analyzer = self
            .registry
            .code_analyzer(&file.language)
            .ok_or_else(|| {
                Error::invalid_input(format!("no analyzer for language {}", file.language))
            })?
            .clone();

        let key = CacheKey::new(
            CacheNamespace::Analysis,
            Fingerprint::for_analysis(scope.as_str(), &file.fingerprint),
        );

        let method = analyzer.method().to_string();
        let file = file.clone();
        let value = self
            .cache
            .get_or_compute(&key, || async move {
                let mut representation = analyzer.analyze(&file, scope).await?;
                tag_method(&mut representation, &method);
                Ok(serde_json::to_value(representation)?)
            })
            .await?;

        Ok(serde_json::from_value(value)?)
    }

    async fn analyze_screenshot(
        &self,
        shot: &crate::model::bundle::Screenshot,
        scope: ValidationScope,
    ) -> Result<Representation> {
        let analyzer = self
            .registry
            .visual_analyzer()
            .ok_or_else(|| Error::invalid_input("no visual analyzer registered"))?
            .clone();

        let key = CacheKey::new(
            CacheNamespace::Analysis,
            Fingerprint::for_analysis(scope.as_str(), &shot.fingerprint),
        );

        let method = analyzer.method().to_string();
        let shot = shot.clone();
        let value = self
            .cache
            .get_or_compute(&key, || async move {
                let mut representation = analyzer.analyze(&shot, scope).await?;
                tag_method(&mut representation, &method);
                Ok(serde_json::to_value(representation)?)
            })
            .await?;

        Ok(serde_json::from_value(value)?)
    }
}

/// Stamp elements missing an extraction-method tag.
fn tag_method(representation: &mut Representation, method: &str) {
    for f in &mut representation.backend_functions {
        f.analysis_method.get_or_insert_with(|| method.to_string());
    }
    for d in &mut representation.data_structures {
        d.analysis_method.get_or_insert_with(|| method.to_string());
    }
    for e in &mut representation.api_endpoints {
        e.analysis_method.get_or_insert_with(|| method.to_string());
    }
    for u in &mut representation.ui_elements {
        u.analysis_method.get_or_insert_with(|| method.to_string());
    }
}
