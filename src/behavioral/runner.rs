//! Behavioral stage runner: executes scenarios against both sides and
//! compares the resulting traces.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Duration};

use crate::error::{Error, Result};
use crate::model::discrepancy::{Component, Discrepancy, DiscrepancyKind, Severity};
use crate::model::result::{round_score, OverallStatus, StageKind, StageResult};
use crate::synthesis::project_status;

use super::prober::{BehavioralProber, Credentials, ScenarioTrace, TraceStep};

/// Score penalty per critical divergence within a scenario.
pub const CRITICAL_DIVERGENCE_PENALTY: f64 = 0.2;

/// Timing beyond this factor (with no state divergence) is reported at info.
pub const TIMING_DIVERGENCE_FACTOR: f64 = 2.0;

/// Outcome of one scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub score: f64,
    pub matched_steps: usize,
    pub total_steps: usize,
    pub discrepancies: Vec<Discrepancy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_trace: Option<ScenarioTrace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_trace: Option<ScenarioTrace>,
    pub duration_secs: f64,
}

/// Behavioral stage output: the stage result plus per-scenario records.
#[derive(Debug, Clone)]
pub struct BehavioralOutcome {
    pub stage: StageResult,
    pub scenarios: Vec<ScenarioResult>,
}

/// Drives the prober on source and target URLs and compares traces.
pub struct BehavioralRunner {
    prober: Arc<dyn BehavioralProber>,
}

impl BehavioralRunner {
    pub fn new(prober: Arc<dyn BehavioralProber>) -> Self {
        Self { prober }
    }

    /// Run all scenarios sequentially; the source/target pair of one
    /// scenario runs in parallel. Prober errors zero that scenario and the
    /// rest continue.
    pub async fn probe(
        &self,
        source_url: &str,
        target_url: &str,
        scenarios: &[String],
        credentials: Option<&Credentials>,
        scenario_timeout: Duration,
    ) -> Result<BehavioralOutcome> {
        if scenarios.is_empty() {
            return Err(Error::invalid_input(
                "behavioral validation requires at least one scenario",
            ));
        }

        let started = Instant::now();
        let mut results: Vec<ScenarioResult> = Vec::new();

        for scenario in scenarios {
            let result = self
                .run_one(source_url, target_url, scenario, credentials, scenario_timeout)
                .await;
            results.push(result);
        }

        let score = round_score(
            results.iter().map(|r| r.score).sum::<f64>() / results.len() as f64,
        );
        let discrepancies: Vec<Discrepancy> = results
            .iter()
            .flat_map(|r| r.discrepancies.clone())
            .collect();
        let has_critical = discrepancies.iter().any(|d| d.is_critical());

        let all_errored = results.iter().all(|r| r.error.is_some());
        let status = if all_errored {
            OverallStatus::Error
        } else {
            project_status(score, has_critical)
        };

        let summary = format!(
            "Ran {} scenarios: {} passed cleanly, score {:.4}",
            results.len(),
            results
                .iter()
                .filter(|r| r.error.is_none() && r.discrepancies.is_empty())
                .count(),
            score,
        );

        Ok(BehavioralOutcome {
            stage: StageResult {
                stage: StageKind::Behavioral,
                status,
                fidelity_score: score,
                summary,
                discrepancies,
                source_representation: None,
                target_representation: None,
                execution_time_secs: started.elapsed().as_secs_f64(),
                error: all_errored.then(|| "all scenarios failed to run".to_string()),
            },
            scenarios: results,
        })
    }

    async fn run_one(
        &self,
        source_url: &str,
        target_url: &str,
        scenario: &str,
        credentials: Option<&Credentials>,
        scenario_timeout: Duration,
    ) -> ScenarioResult {
        let started = Instant::now();

        let pair = timeout(scenario_timeout, async {
            tokio::join!(
                self.prober
                    .run_scenario(source_url, scenario, credentials, scenario_timeout),
                self.prober
                    .run_scenario(target_url, scenario, credentials, scenario_timeout),
            )
        })
        .await;

        match pair {
            Err(_) => {
                tracing::warn!(scenario, "scenario exceeded its deadline, cancelled");
                ScenarioResult {
                    name: scenario.to_string(),
                    score: 0.0,
                    matched_steps: 0,
                    total_steps: 0,
                    discrepancies: vec![Discrepancy::between(
                        DiscrepancyKind::Error,
                        Severity::Critical,
                        format!(
                            "scenario {scenario} exceeded its {}s deadline",
                            scenario_timeout.as_secs()
                        ),
                        source_url,
                        target_url,
                    )
                    .with_component(Component::Behavioral)],
                    error: Some("deadline exceeded".to_string()),
                    source_trace: None,
                    target_trace: None,
                    duration_secs: started.elapsed().as_secs_f64(),
                }
            }
            Ok((Err(e), _) | (_, Err(e))) => {
                tracing::warn!(scenario, error = %e, "prober failed, scenario scored 0");
                ScenarioResult {
                    name: scenario.to_string(),
                    score: 0.0,
                    matched_steps: 0,
                    total_steps: 0,
                    discrepancies: vec![Discrepancy::between(
                        DiscrepancyKind::Error,
                        Severity::Critical,
                        format!("scenario {scenario} could not run: {e}"),
                        source_url,
                        target_url,
                    )
                    .with_component(Component::Behavioral)],
                    error: Some(e.to_string()),
                    source_trace: None,
                    target_trace: None,
                    duration_secs: started.elapsed().as_secs_f64(),
                }
            }
            Ok((Ok(source_trace), Ok(target_trace))) => {
                let comparison = compare_traces(scenario, &source_trace, &target_trace);
                ScenarioResult {
                    name: scenario.to_string(),
                    score: comparison.score,
                    matched_steps: comparison.matched_steps,
                    total_steps: comparison.total_steps,
                    discrepancies: comparison.discrepancies,
                    error: None,
                    source_trace: Some(source_trace),
                    target_trace: Some(target_trace),
                    duration_secs: started.elapsed().as_secs_f64(),
                }
            }
        }
    }
}

struct TraceComparison {
    score: f64,
    matched_steps: usize,
    total_steps: usize,
    discrepancies: Vec<Discrepancy>,
}

/// Compare two traces stepwise and score the scenario:
/// `matched / total` minus a penalty per critical divergence, clipped to [0, 1].
fn compare_traces(
    scenario: &str,
    source: &ScenarioTrace,
    target: &ScenarioTrace,
) -> TraceComparison {
    let total_steps = source.steps.len().max(target.steps.len());
    let mut matched_steps = 0;
    let mut discrepancies = Vec::new();

    for (index, (s, t)) in source.steps.iter().zip(target.steps.iter()).enumerate() {
        match compare_step(scenario, index, s, t) {
            Some(found) => discrepancies.push(found),
            None => matched_steps += 1,
        }
    }

    if source.steps.len() != target.steps.len() {
        discrepancies.push(
            Discrepancy::between(
                DiscrepancyKind::NavigationDivergence,
                Severity::Critical,
                format!(
                    "scenario {scenario} executed {} steps on source but {} on target",
                    source.steps.len(),
                    target.steps.len()
                ),
                format!("{scenario}[steps={}]", source.steps.len()),
                format!("{scenario}[steps={}]", target.steps.len()),
            )
            .with_component(Component::Behavioral),
        );
    }

    let criticals = discrepancies.iter().filter(|d| d.is_critical()).count();
    let base = if total_steps == 0 {
        1.0
    } else {
        matched_steps as f64 / total_steps as f64
    };
    let score = round_score(
        (base - CRITICAL_DIVERGENCE_PENALTY * criticals as f64).clamp(0.0, 1.0),
    );

    TraceComparison {
        score,
        matched_steps,
        total_steps,
        discrepancies,
    }
}

/// Compare one step pair; `None` means the step matches.
fn compare_step(
    scenario: &str,
    index: usize,
    source: &TraceStep,
    target: &TraceStep,
) -> Option<Discrepancy> {
    let pointer = |step: &TraceStep| format!("{scenario}#{index} {} {}", step.action, step.selector);

    // Navigation divergence: the step landed in a different page state.
    if source.state_class != target.state_class {
        return Some(
            Discrepancy::between(
                DiscrepancyKind::NavigationDivergence,
                Severity::Critical,
                format!(
                    "step {index} diverged: source in {} but target in {}",
                    source.state_class, target.state_class
                ),
                pointer(source),
                pointer(target),
            )
            .with_component(Component::Behavioral),
        );
    }

    // Validation error present on exactly one side.
    if source.validation_error.is_some() != target.validation_error.is_some() {
        let (present, absent) = if source.validation_error.is_some() {
            ("source", "target")
        } else {
            ("target", "source")
        };
        return Some(
            Discrepancy::between(
                DiscrepancyKind::ValidationDivergence,
                Severity::Critical,
                format!(
                    "step {index} shows a validation error on {present} but not on {absent}"
                ),
                pointer(source),
                pointer(target),
            )
            .with_component(Component::Behavioral),
        );
    }

    // Same state class, different message text.
    if source.message != target.message || source.validation_error != target.validation_error {
        return Some(
            Discrepancy::between(
                DiscrepancyKind::MessageTextDivergence,
                Severity::Warning,
                format!(
                    "step {index} message differs: {:?} vs {:?}",
                    source.message.as_deref().or(source.validation_error.as_deref()),
                    target.message.as_deref().or(target.validation_error.as_deref())
                ),
                pointer(source),
                pointer(target),
            )
            .with_component(Component::Behavioral),
        );
    }

    // Same state class and messages, diverging captured state.
    if source.state_fingerprint != target.state_fingerprint {
        return Some(
            Discrepancy::between(
                DiscrepancyKind::StateDivergence,
                Severity::Warning,
                format!("step {index} produced a different captured state"),
                pointer(source),
                pointer(target),
            )
            .with_component(Component::Behavioral),
        );
    }

    // Pure timing difference beyond the factor.
    let slow = source.duration_ms.max(target.duration_ms) as f64;
    let fast = source.duration_ms.min(target.duration_ms).max(1) as f64;
    if slow / fast > TIMING_DIVERGENCE_FACTOR {
        return Some(
            Discrepancy::between(
                DiscrepancyKind::TimingDivergence,
                Severity::Info,
                format!(
                    "step {index} timing differs {}ms vs {}ms",
                    source.duration_ms, target.duration_ms
                ),
                pointer(source),
                pointer(target),
            )
            .with_component(Component::Behavioral),
        );
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn step(state_class: &str, fingerprint: &str) -> TraceStep {
        TraceStep {
            action: "click".to_string(),
            selector: "#next".to_string(),
            input: None,
            state_class: state_class.to_string(),
            state_fingerprint: fingerprint.to_string(),
            validation_error: None,
            message: None,
            duration_ms: 100,
        }
    }

    fn trace(scenario: &str, steps: Vec<TraceStep>) -> ScenarioTrace {
        ScenarioTrace {
            scenario: scenario.to_string(),
            steps,
        }
    }

    /// Scripted prober: per (url, scenario) either a trace or an error.
    struct FakeProber {
        traces: HashMap<(String, String), std::result::Result<ScenarioTrace, String>>,
    }

    impl FakeProber {
        fn new() -> Self {
            Self {
                traces: HashMap::new(),
            }
        }

        fn with(
            mut self,
            url: &str,
            scenario: &str,
            outcome: std::result::Result<ScenarioTrace, String>,
        ) -> Self {
            self.traces
                .insert((url.to_string(), scenario.to_string()), outcome);
            self
        }
    }

    #[async_trait]
    impl BehavioralProber for FakeProber {
        async fn run_scenario(
            &self,
            url: &str,
            scenario: &str,
            _credentials: Option<&Credentials>,
            _timeout: Duration,
        ) -> Result<ScenarioTrace> {
            match self.traces.get(&(url.to_string(), scenario.to_string())) {
                Some(Ok(trace)) => Ok(trace.clone()),
                Some(Err(message)) => Err(Error::ProberFailure(message.clone())),
                None => Ok(trace(scenario, vec![])),
            }
        }
    }

    #[tokio::test]
    async fn test_matching_traces_score_one() {
        let steps = vec![step("page:/login", "aaa"), step("page:/home", "bbb")];
        let prober = FakeProber::new()
            .with("http://src", "login", Ok(trace("login", steps.clone())))
            .with("http://dst", "login", Ok(trace("login", steps)));

        let outcome = BehavioralRunner::new(Arc::new(prober))
            .probe(
                "http://src",
                "http://dst",
                &["login".to_string()],
                None,
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        assert_eq!(outcome.stage.fidelity_score, 1.0);
        assert_eq!(outcome.stage.status, OverallStatus::Approved);
        assert_eq!(outcome.scenarios[0].matched_steps, 2);
    }

    #[tokio::test]
    async fn test_navigation_divergence_penalized() {
        let source_steps = vec![step("page:/login", "aaa"), step("page:/home", "bbb")];
        let target_steps = vec![step("page:/login", "aaa"), step("page:/error", "ccc")];
        let prober = FakeProber::new()
            .with("http://src", "login", Ok(trace("login", source_steps)))
            .with("http://dst", "login", Ok(trace("login", target_steps)));

        let outcome = BehavioralRunner::new(Arc::new(prober))
            .probe(
                "http://src",
                "http://dst",
                &["login".to_string()],
                None,
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        // 1 of 2 steps matched, minus 0.2 critical penalty = 0.3.
        assert_eq!(outcome.scenarios[0].score, 0.3);
        assert_eq!(
            outcome.scenarios[0].discrepancies[0].kind,
            DiscrepancyKind::NavigationDivergence
        );
        assert_eq!(outcome.stage.status, OverallStatus::Rejected);
    }

    #[tokio::test]
    async fn test_validation_divergence_is_critical() {
        let mut s = step("page:/form", "aaa");
        s.validation_error = Some("email required".to_string());
        let t = step("page:/form", "aaa");

        let found = compare_step("signup", 0, &s, &t).unwrap();
        assert_eq!(found.kind, DiscrepancyKind::ValidationDivergence);
        assert_eq!(found.severity, Severity::Critical);
    }

    #[test]
    fn test_message_text_divergence_is_warning() {
        let mut s = step("page:/form", "aaa");
        s.message = Some("Saved!".to_string());
        let mut t = step("page:/form", "aaa");
        t.message = Some("Changes saved.".to_string());

        let found = compare_step("save", 0, &s, &t).unwrap();
        assert_eq!(found.kind, DiscrepancyKind::MessageTextDivergence);
        assert_eq!(found.severity, Severity::Warning);
    }

    #[test]
    fn test_timing_divergence_is_info() {
        let mut s = step("page:/home", "aaa");
        s.duration_ms = 100;
        let mut t = step("page:/home", "aaa");
        t.duration_ms = 250;

        let found = compare_step("load", 0, &s, &t).unwrap();
        assert_eq!(found.kind, DiscrepancyKind::TimingDivergence);
        assert_eq!(found.severity, Severity::Info);

        // Within the 2x factor no discrepancy is recorded.
        t.duration_ms = 180;
        assert!(compare_step("load", 0, &s, &t).is_none());
    }

    #[tokio::test]
    async fn test_prober_error_zeroes_scenario_but_others_continue() {
        let steps = vec![step("page:/home", "aaa")];
        let prober = FakeProber::new()
            .with("http://src", "broken", Err("browser crashed".to_string()))
            .with("http://dst", "broken", Ok(trace("broken", steps.clone())))
            .with("http://src", "ok", Ok(trace("ok", steps.clone())))
            .with("http://dst", "ok", Ok(trace("ok", steps)));

        let outcome = BehavioralRunner::new(Arc::new(prober))
            .probe(
                "http://src",
                "http://dst",
                &["broken".to_string(), "ok".to_string()],
                None,
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        assert_eq!(outcome.scenarios[0].score, 0.0);
        assert!(outcome.scenarios[0].error.is_some());
        assert_eq!(outcome.scenarios[1].score, 1.0);
        // Mean of 0.0 and 1.0.
        assert_eq!(outcome.stage.fidelity_score, 0.5);
        assert_ne!(outcome.stage.status, OverallStatus::Error);
    }

    #[tokio::test]
    async fn test_all_scenarios_failing_marks_stage_error() {
        let prober = FakeProber::new()
            .with("http://src", "a", Err("down".to_string()))
            .with("http://dst", "a", Err("down".to_string()));

        let outcome = BehavioralRunner::new(Arc::new(prober))
            .probe(
                "http://src",
                "http://dst",
                &["a".to_string()],
                None,
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        assert_eq!(outcome.stage.status, OverallStatus::Error);
        assert!(outcome.stage.error.is_some());
        assert!(outcome.stage.is_well_formed());
    }

    #[tokio::test]
    async fn test_no_scenarios_is_invalid_input() {
        let prober = FakeProber::new();
        let err = BehavioralRunner::new(Arc::new(prober))
            .probe("http://src", "http://dst", &[], None, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation-input");
    }

    #[test]
    fn test_step_count_mismatch_is_critical() {
        let source = trace("flow", vec![step("a", "1"), step("b", "2")]);
        let target = trace("flow", vec![step("a", "1")]);

        let comparison = compare_traces("flow", &source, &target);
        assert_eq!(comparison.total_steps, 2);
        assert_eq!(comparison.matched_steps, 1);
        assert!(comparison
            .discrepancies
            .iter()
            .any(|d| d.is_critical()));
        // 1/2 matched minus 0.2 penalty.
        assert_eq!(comparison.score, 0.3);
    }
}
