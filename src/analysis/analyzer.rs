//! Analyzer adapter traits and the language registry.
//!
//! Real analyzers are external collaborators; the engine only depends on
//! these seams. Concrete implementations are selected at runtime from a
//! registry indexed by language string.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::bundle::{CodeFile, Screenshot};
use crate::model::representation::Representation;
use crate::model::scope::ValidationScope;

/// Extracts an abstract representation from one code file.
#[async_trait]
pub trait CodeAnalyzer: Send + Sync {
    /// Analyze a file under the given scope.
    async fn analyze(&self, file: &CodeFile, scope: ValidationScope) -> Result<Representation>;

    /// Language this analyzer handles ("python", "java", ...).
    fn language(&self) -> &str;

    /// Extraction method tag attached to emitted elements ("ast", ...).
    fn method(&self) -> &str {
        "ast"
    }
}

/// Extracts UI elements from one screenshot.
#[async_trait]
pub trait VisualAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        screenshot: &Screenshot,
        scope: ValidationScope,
    ) -> Result<Representation>;

    /// Extraction method tag ("vision-model", ...).
    fn method(&self) -> &str {
        "vision-model"
    }
}

/// Registry of analyzer adapters, indexed by language.
#[derive(Default)]
pub struct AnalyzerRegistry {
    code: HashMap<String, Arc<dyn CodeAnalyzer>>,
    fallback: Option<Arc<dyn CodeAnalyzer>>,
    visual: Option<Arc<dyn VisualAnalyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_code(mut self, analyzer: Arc<dyn CodeAnalyzer>) -> Self {
        self.code
            .insert(analyzer.language().to_ascii_lowercase(), analyzer);
        self
    }

    /// Analyzer used for languages with no dedicated adapter.
    pub fn with_fallback(mut self, analyzer: Arc<dyn CodeAnalyzer>) -> Self {
        self.fallback = Some(analyzer);
        self
    }

    pub fn register_visual(mut self, analyzer: Arc<dyn VisualAnalyzer>) -> Self {
        self.visual = Some(analyzer);
        self
    }

    pub fn code_analyzer(&self, language: &str) -> Option<&Arc<dyn CodeAnalyzer>> {
        self.code
            .get(&language.to_ascii_lowercase())
            .or(self.fallback.as_ref())
    }

    pub fn visual_analyzer(&self) -> Option<&Arc<dyn VisualAnalyzer>> {
        self.visual.as_ref()
    }

    /// Languages with a registered analyzer, sorted for stable catalogs.
    pub fn supported_languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self.code.keys().cloned().collect();
        languages.sort();
        languages
    }
}
