//! Fidelity synthesizer: merges per-stage scores and discrepancies into the
//! unified result under configurable stage weights.

use chrono::Utc;

use crate::model::result::{
    round_score, OverallStatus, ResultKind, SessionUsage, StageResult, UnifiedResult,
};

/// Score at or above which a validation with no criticals is approved.
pub const APPROVAL_THRESHOLD: f64 = 0.95;

/// Default weight of the static stage in a hybrid merge.
pub const DEFAULT_STATIC_WEIGHT: f64 = 0.6;

/// Default weight of the behavioral stage in a hybrid merge.
pub const DEFAULT_BEHAVIORAL_WEIGHT: f64 = 0.4;

/// Stage weights for the hybrid merge; normalized before use.
#[derive(Debug, Clone, Copy)]
pub struct StageWeights {
    pub static_weight: f64,
    pub behavioral_weight: f64,
}

impl Default for StageWeights {
    fn default() -> Self {
        Self {
            static_weight: DEFAULT_STATIC_WEIGHT,
            behavioral_weight: DEFAULT_BEHAVIORAL_WEIGHT,
        }
    }
}

impl StageWeights {
    fn normalized(self) -> (f64, f64) {
        let total = self.static_weight + self.behavioral_weight;
        if total <= 0.0 {
            (DEFAULT_STATIC_WEIGHT, DEFAULT_BEHAVIORAL_WEIGHT)
        } else {
            (self.static_weight / total, self.behavioral_weight / total)
        }
    }
}

/// Project a score and criticality onto an overall status.
///
/// A critical discrepancy always rejects; otherwise a clean high score is
/// approved and anything else passes with warnings.
pub fn project_status(score: f64, has_critical: bool) -> OverallStatus {
    if has_critical {
        OverallStatus::Rejected
    } else if score >= APPROVAL_THRESHOLD {
        OverallStatus::Approved
    } else {
        OverallStatus::ApprovedWithWarnings
    }
}

/// Merge stage results into one verdict.
pub fn synthesize(
    static_result: Option<StageResult>,
    behavioral_result: Option<StageResult>,
    weights: Option<StageWeights>,
    usage: Option<SessionUsage>,
) -> UnifiedResult {
    let kind = match (&static_result, &behavioral_result) {
        (Some(_), Some(_)) => ResultKind::Hybrid,
        (Some(_), None) => ResultKind::StaticOnly,
        _ => ResultKind::BehavioralOnly,
    };

    let total_execution_time_secs = static_result
        .as_ref()
        .map(|s| s.execution_time_secs)
        .unwrap_or(0.0)
        + behavioral_result
            .as_ref()
            .map(|b| b.execution_time_secs)
            .unwrap_or(0.0);

    let mut discrepancies = Vec::new();
    if let Some(s) = &static_result {
        discrepancies.extend(s.discrepancies.clone());
    }
    if let Some(b) = &behavioral_result {
        discrepancies.extend(b.discrepancies.clone());
    }
    let has_critical = discrepancies.iter().any(|d| d.is_critical());

    let static_errored = matches!(
        static_result.as_ref().map(|s| s.status),
        Some(OverallStatus::Error)
    );
    let behavioral_errored = matches!(
        behavioral_result.as_ref().map(|b| b.status),
        Some(OverallStatus::Error)
    );

    let (fidelity_score, overall_status, error_note) = if static_errored || behavioral_errored {
        // A stage with no salvageable score degrades to rejected unless the
        // other stage is approved on its own.
        let errored_kind = if static_errored { "static" } else { "behavioral" };
        let survivor = if static_errored {
            behavioral_result.as_ref()
        } else {
            static_result.as_ref()
        }
        .filter(|s| s.status != OverallStatus::Error);

        match survivor {
            Some(stage) if stage.status == OverallStatus::Approved => (
                stage.fidelity_score,
                OverallStatus::ApprovedWithWarnings,
                Some(format!("{errored_kind} stage failed to produce a score")),
            ),
            Some(stage) => (
                stage.fidelity_score,
                OverallStatus::Rejected,
                Some(format!("{errored_kind} stage failed to produce a score")),
            ),
            None => (
                0.0,
                OverallStatus::Rejected,
                Some("no stage produced a score".to_string()),
            ),
        }
    } else {
        let score = match (&static_result, &behavioral_result) {
            (Some(s), Some(b)) => {
                let (w_s, w_b) = weights.unwrap_or_default().normalized();
                round_score(w_s * s.fidelity_score + w_b * b.fidelity_score)
            }
            (Some(s), None) => s.fidelity_score,
            (None, Some(b)) => b.fidelity_score,
            (None, None) => 0.0,
        };
        let status = if static_result.is_none() && behavioral_result.is_none() {
            OverallStatus::Rejected
        } else {
            project_status(score, has_critical)
        };
        (score, status, None)
    };

    let critical = discrepancies.iter().filter(|d| d.is_critical()).count();
    let mut summary = format!(
        "{overall_status}: fidelity {fidelity_score:.4}, {} discrepancies ({critical} critical)",
        discrepancies.len(),
    );
    if let Some(note) = &error_note {
        summary.push_str(&format!(" [error: {note}]"));
    }

    UnifiedResult {
        overall_status,
        fidelity_score,
        summary,
        discrepancies,
        static_result,
        behavioral_result,
        total_execution_time_secs,
        timestamp: Utc::now(),
        kind,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::discrepancy::{Discrepancy, DiscrepancyKind, Severity};
    use crate::model::result::StageKind;
    use pretty_assertions::assert_eq;

    fn stage(kind: StageKind, status: OverallStatus, score: f64) -> StageResult {
        StageResult {
            stage: kind,
            status,
            fidelity_score: score,
            summary: String::new(),
            discrepancies: Vec::new(),
            source_representation: None,
            target_representation: None,
            execution_time_secs: 1.0,
            error: None,
        }
    }

    /// Hybrid merge: 0.6 * 0.96 + 0.4 * 0.92 = 0.944, warnings, no criticals.
    #[test]
    fn test_hybrid_merge_default_weights() {
        let result = synthesize(
            Some(stage(StageKind::Static, OverallStatus::Approved, 0.96)),
            Some(stage(StageKind::Behavioral, OverallStatus::Approved, 0.92)),
            None,
            None,
        );
        assert_eq!(result.fidelity_score, 0.944);
        assert_eq!(result.overall_status, OverallStatus::ApprovedWithWarnings);
        assert_eq!(result.kind, ResultKind::Hybrid);
        assert_eq!(result.total_execution_time_secs, 2.0);
    }

    #[test]
    fn test_custom_weights_normalized() {
        let result = synthesize(
            Some(stage(StageKind::Static, OverallStatus::Approved, 1.0)),
            Some(stage(StageKind::Behavioral, OverallStatus::Approved, 0.0)),
            Some(StageWeights {
                static_weight: 3.0,
                behavioral_weight: 1.0,
            }),
            None,
        );
        assert_eq!(result.fidelity_score, 0.75);
    }

    #[test]
    fn test_critical_discrepancy_rejects() {
        let mut s = stage(StageKind::Static, OverallStatus::Rejected, 0.97);
        s.discrepancies.push(Discrepancy::from_source(
            DiscrepancyKind::TypeMismatch,
            Severity::Critical,
            "bad",
            "x",
        ));
        let result = synthesize(Some(s), None, None, None);
        assert_eq!(result.overall_status, OverallStatus::Rejected);
    }

    #[test]
    fn test_static_only_passthrough() {
        let result = synthesize(
            Some(stage(StageKind::Static, OverallStatus::Approved, 0.99)),
            None,
            None,
            None,
        );
        assert_eq!(result.kind, ResultKind::StaticOnly);
        assert_eq!(result.overall_status, OverallStatus::Approved);
        assert_eq!(result.fidelity_score, 0.99);
    }

    #[test]
    fn test_errored_stage_with_approved_survivor() {
        let errored = stage(StageKind::Behavioral, OverallStatus::Error, 0.0);
        let survivor = stage(StageKind::Static, OverallStatus::Approved, 0.98);
        let result = synthesize(Some(survivor), Some(errored), None, None);
        assert_eq!(result.overall_status, OverallStatus::ApprovedWithWarnings);
        assert_eq!(result.fidelity_score, 0.98);
        assert!(result.summary.contains("behavioral stage failed"));
    }

    #[test]
    fn test_errored_stage_without_approved_survivor_rejects() {
        let errored = stage(StageKind::Static, OverallStatus::Error, 0.0);
        let survivor = stage(
            StageKind::Behavioral,
            OverallStatus::ApprovedWithWarnings,
            0.9,
        );
        let result = synthesize(Some(errored), Some(survivor), None, None);
        assert_eq!(result.overall_status, OverallStatus::Rejected);
    }

    #[test]
    fn test_both_stages_errored() {
        let result = synthesize(
            Some(stage(StageKind::Static, OverallStatus::Error, 0.0)),
            Some(stage(StageKind::Behavioral, OverallStatus::Error, 0.0)),
            None,
            None,
        );
        assert_eq!(result.overall_status, OverallStatus::Rejected);
        assert_eq!(result.fidelity_score, 0.0);
    }

    #[test]
    fn test_status_projection_thresholds() {
        assert_eq!(project_status(0.95, false), OverallStatus::Approved);
        assert_eq!(
            project_status(0.9499, false),
            OverallStatus::ApprovedWithWarnings
        );
        assert_eq!(
            project_status(0.5, false),
            OverallStatus::ApprovedWithWarnings
        );
        assert_eq!(project_status(1.0, true), OverallStatus::Rejected);
    }
}
