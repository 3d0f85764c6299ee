//! Stage and unified validation results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::discrepancy::Discrepancy;
use super::representation::Representation;

/// Pipeline stage kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Static,
    Behavioral,
}

/// Outcome status for a stage or the unified result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverallStatus {
    Approved,
    ApprovedWithWarnings,
    Rejected,
    Error,
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approved => write!(f, "approved"),
            Self::ApprovedWithWarnings => write!(f, "approved-with-warnings"),
            Self::Rejected => write!(f, "rejected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// What the unified result was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultKind {
    StaticOnly,
    BehavioralOnly,
    Hybrid,
}

/// Round a score to 4 decimals, as reported everywhere.
pub fn round_score(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

/// Output of one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub status: OverallStatus,
    /// Fidelity in [0, 1], rounded to 4 decimals
    pub fidelity_score: f64,
    pub summary: String,
    pub discrepancies: Vec<Discrepancy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_representation: Option<Representation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_representation: Option<Representation>,
    pub execution_time_secs: f64,
    /// Set when status is `error` without a critical discrepancy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageResult {
    /// A `rejected` or `error` result must carry a critical discrepancy or a
    /// non-null error reason.
    pub fn is_well_formed(&self) -> bool {
        match self.status {
            OverallStatus::Rejected | OverallStatus::Error => {
                self.discrepancies.iter().any(|d| d.is_critical()) || self.error.is_some()
            }
            _ => true,
        }
    }

    pub fn critical_count(&self) -> usize {
        self.discrepancies.iter().filter(|d| d.is_critical()).count()
    }
}

/// Per-session LLM usage totals, attached to the unified result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionUsage {
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub llm_requests: u64,
    pub cache_hits: u64,
}

/// Merge of the per-stage results into one verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedResult {
    pub overall_status: OverallStatus,
    pub fidelity_score: f64,
    pub summary: String,
    /// Concatenated discrepancy list across stages, source order preserved
    pub discrepancies: Vec<Discrepancy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_result: Option<StageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavioral_result: Option<StageResult>,
    pub total_execution_time_secs: f64,
    pub timestamp: DateTime<Utc>,
    pub kind: ResultKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<SessionUsage>,
}

impl UnifiedResult {
    pub fn critical_count(&self) -> usize {
        self.discrepancies.iter().filter(|d| d.is_critical()).count()
    }
}
