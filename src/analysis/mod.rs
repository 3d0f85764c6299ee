//! Static analysis stage: analyzer adapter seams and the fan-out runner.

pub mod analyzer;
pub mod fallback;
pub mod runner;

pub use analyzer::{AnalyzerRegistry, CodeAnalyzer, VisualAnalyzer};
pub use fallback::RegexFallbackAnalyzer;
pub use runner::{AnalysisOutcome, AnalysisRunner, DEFAULT_ANALYSIS_PARALLELISM};
