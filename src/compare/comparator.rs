//! Semantic comparator: drives pairing and element comparison per category
//! and produces the static stage result.

use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::model::discrepancy::{Component, Discrepancy, DiscrepancyKind};
use crate::model::representation::Representation;
use crate::model::result::{round_score, OverallStatus, StageKind, StageResult};
use crate::model::scope::{static_category_weights, Category, ValidationScope};
use crate::synthesis::project_status;

use super::elements::{
    compare_data_structures, compare_endpoints, compare_functions, compare_ui_elements,
    function_signature,
};
use super::normalize::{normalize_name, normalize_route};
use super::oracle::SemanticOracle;
use super::pairing::{pair_elements, PairOrigin, Pairing};
use super::severity::severity_for;

/// Category score per the fidelity formula: one minus the weighted
/// discrepancy mass over the paired-plus-unpaired count (floored at 1),
/// clipped to [0, 1].
fn category_score(mass: f64, element_count: usize) -> f64 {
    let denominator = element_count.max(1) as f64;
    round_score((1.0 - mass / denominator).clamp(0.0, 1.0))
}

/// Pairs source/target elements and computes per-category discrepancies and
/// partial fidelity scores.
pub struct SemanticComparator {
    oracle: Arc<dyn SemanticOracle>,
}

impl SemanticComparator {
    pub fn new(oracle: Arc<dyn SemanticOracle>) -> Self {
        Self { oracle }
    }

    /// Compare two representations under a scope.
    pub async fn compare(
        &self,
        source: &Representation,
        target: &Representation,
        scope: ValidationScope,
    ) -> Result<StageResult> {
        let started = Instant::now();

        let mut discrepancies: Vec<Discrepancy> = Vec::new();
        let mut category_scores: Vec<(Category, f64)> = Vec::new();
        let mut active: Vec<Category> = Vec::new();

        // Categories are processed in a fixed order for deterministic output.
        if !source.backend_functions.is_empty() || !target.backend_functions.is_empty() {
            let (score, found) = self.compare_backend_functions(source, target, scope).await?;
            active.push(Category::BackendFunctions);
            category_scores.push((Category::BackendFunctions, score));
            discrepancies.extend(found);
        }

        if !source.data_structures.is_empty() || !target.data_structures.is_empty() {
            let (score, found) = self.compare_structures(source, target, scope).await?;
            active.push(Category::DataStructures);
            category_scores.push((Category::DataStructures, score));
            discrepancies.extend(found);
        }

        if !source.api_endpoints.is_empty() || !target.api_endpoints.is_empty() {
            let (score, found) = self.compare_api_endpoints(source, target, scope).await?;
            active.push(Category::Endpoints);
            category_scores.push((Category::Endpoints, score));
            discrepancies.extend(found);
        }

        if !source.ui_elements.is_empty() || !target.ui_elements.is_empty() {
            let (score, found) = self.compare_ui(source, target, scope).await?;
            active.push(Category::UiElements);
            category_scores.push((Category::UiElements, score));
            discrepancies.extend(found);
        }

        let weights = static_category_weights(scope, &active);
        let fidelity_score = if weights.is_empty() {
            // Nothing to compare under this scope.
            1.0
        } else {
            round_score(
                weights
                    .iter()
                    .map(|(category, weight)| {
                        let score = category_scores
                            .iter()
                            .find(|(c, _)| c == category)
                            .map(|(_, s)| *s)
                            .unwrap_or(1.0);
                        weight * score
                    })
                    .sum(),
            )
        };

        let has_critical = discrepancies.iter().any(|d| d.is_critical());
        let status = project_status(fidelity_score, has_critical);

        let critical = discrepancies.iter().filter(|d| d.is_critical()).count();
        let summary = format!(
            "Compared {} source and {} target elements across {} categories: \
             {} discrepancies ({} critical), fidelity {:.4}",
            source.element_count(),
            target.element_count(),
            active.len(),
            discrepancies.len(),
            critical,
            fidelity_score,
        );

        Ok(StageResult {
            stage: StageKind::Static,
            status,
            fidelity_score,
            summary,
            discrepancies,
            source_representation: Some(source.clone()),
            target_representation: Some(target.clone()),
            execution_time_secs: started.elapsed().as_secs_f64(),
            error: None,
        })
    }

    async fn compare_backend_functions(
        &self,
        source: &Representation,
        target: &Representation,
        scope: ValidationScope,
    ) -> Result<(f64, Vec<Discrepancy>)> {
        let pairing = pair_elements(
            Category::BackendFunctions,
            &source.backend_functions,
            &target.backend_functions,
            &function_name,
            &normalize_name,
            Some(&function_signature),
            self.oracle.as_ref(),
        )
        .await?;

        let mut out = Vec::new();
        for (s, t, origin) in &pairing.pairs {
            if s.name != t.name {
                out.push(self.rename_discrepancy(
                    DiscrepancyKind::ElementRenamed,
                    scope,
                    Component::Backend,
                    &s.name,
                    &t.name,
                    origin,
                ));
            }
            out.extend(compare_functions(s, t, scope, self.oracle.as_ref()).await?);
        }
        self.unpaired_discrepancies(
            &pairing,
            scope,
            Component::Backend,
            &|f| f.name.clone(),
            &mut out,
        );

        Ok((score_of(&pairing, &out), out))
    }

    async fn compare_structures(
        &self,
        source: &Representation,
        target: &Representation,
        scope: ValidationScope,
    ) -> Result<(f64, Vec<Discrepancy>)> {
        let pairing = pair_elements(
            Category::DataStructures,
            &source.data_structures,
            &target.data_structures,
            &structure_name,
            &normalize_name,
            None,
            self.oracle.as_ref(),
        )
        .await?;

        let mut out = Vec::new();
        for (s, t, origin) in &pairing.pairs {
            if s.name != t.name {
                out.push(self.rename_discrepancy(
                    DiscrepancyKind::ElementRenamed,
                    scope,
                    Component::Data,
                    &s.name,
                    &t.name,
                    origin,
                ));
            }
            out.extend(compare_data_structures(s, t, scope));
        }
        self.unpaired_discrepancies(
            &pairing,
            scope,
            Component::Data,
            &|d| d.name.clone(),
            &mut out,
        );

        Ok((score_of(&pairing, &out), out))
    }

    async fn compare_api_endpoints(
        &self,
        source: &Representation,
        target: &Representation,
        scope: ValidationScope,
    ) -> Result<(f64, Vec<Discrepancy>)> {
        let pairing = pair_elements(
            Category::Endpoints,
            &source.api_endpoints,
            &target.api_endpoints,
            &endpoint_path,
            &normalize_route,
            None,
            self.oracle.as_ref(),
        )
        .await?;

        let mut out = Vec::new();
        for (s, t, origin) in &pairing.pairs {
            if normalize_route(&s.path) != normalize_route(&t.path) {
                out.push(self.rename_discrepancy(
                    DiscrepancyKind::ElementRenamed,
                    scope,
                    Component::Api,
                    &s.path,
                    &t.path,
                    origin,
                ));
            }
            out.extend(compare_endpoints(s, t, scope));
        }
        self.unpaired_discrepancies(
            &pairing,
            scope,
            Component::Api,
            &|e| e.path.clone(),
            &mut out,
        );

        Ok((score_of(&pairing, &out), out))
    }

    async fn compare_ui(
        &self,
        source: &Representation,
        target: &Representation,
        scope: ValidationScope,
    ) -> Result<(f64, Vec<Discrepancy>)> {
        let pairing = pair_elements(
            Category::UiElements,
            &source.ui_elements,
            &target.ui_elements,
            &ui_element_id,
            &normalize_name,
            None,
            self.oracle.as_ref(),
        )
        .await?;

        let mut out = Vec::new();
        for (s, t, origin) in &pairing.pairs {
            if s.id != t.id {
                out.push(self.rename_discrepancy(
                    DiscrepancyKind::UiElementRenamed,
                    scope,
                    Component::Ui,
                    &s.id,
                    &t.id,
                    origin,
                ));
            }
            out.extend(compare_ui_elements(s, t, scope));
        }
        self.unpaired_discrepancies(
            &pairing,
            scope,
            Component::Ui,
            &|u| u.id.clone(),
            &mut out,
        );

        Ok((score_of(&pairing, &out), out))
    }

    fn rename_discrepancy(
        &self,
        kind: DiscrepancyKind,
        scope: ValidationScope,
        component: Component,
        source_name: &str,
        target_name: &str,
        origin: &PairOrigin,
    ) -> Discrepancy {
        let mut discrepancy = Discrepancy::between(
            kind,
            severity_for(scope, kind),
            format!("element {source_name} appears renamed to {target_name}"),
            source_name,
            target_name,
        )
        .with_component(component);
        if let PairOrigin::Semantic(similarity) = origin {
            discrepancy = discrepancy
                .with_confidence(*similarity)
                .with_context("pairing_layer", "semantic");
        }
        discrepancy
    }

    fn unpaired_discrepancies<T>(
        &self,
        pairing: &Pairing<T>,
        scope: ValidationScope,
        component: Component,
        pointer_of: &dyn Fn(&T) -> String,
        out: &mut Vec<Discrepancy>,
    ) {
        for element in &pairing.missing {
            out.push(
                Discrepancy::from_source(
                    DiscrepancyKind::MissingElement,
                    severity_for(scope, DiscrepancyKind::MissingElement),
                    format!("{} is absent in target", pointer_of(element)),
                    pointer_of(element),
                )
                .with_component(component),
            );
        }
        for element in &pairing.additional {
            out.push(
                Discrepancy::from_target(
                    DiscrepancyKind::AdditionalElement,
                    severity_for(scope, DiscrepancyKind::AdditionalElement),
                    format!("{} is new in target", pointer_of(element)),
                    pointer_of(element),
                )
                .with_component(component),
            );
        }
    }
}

fn score_of<T>(pairing: &Pairing<T>, discrepancies: &[Discrepancy]) -> f64 {
    let mass: f64 = discrepancies.iter().map(|d| d.severity.weight()).sum();
    category_score(mass, pairing.element_count())
}

fn function_name(f: &crate::model::representation::BackendFunction) -> &str {
    &f.name
}

fn structure_name(d: &crate::model::representation::DataStructure) -> &str {
    &d.name
}

fn endpoint_path(e: &crate::model::representation::ApiEndpoint) -> &str {
    &e.path
}

fn ui_element_id(u: &crate::model::representation::UiElement) -> &str {
    &u.id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::pairing::test_support::StubOracle;
    use crate::model::representation::{
        ApiEndpoint, ComplexityBand, DataField, DataStructure, Parameter, UiElement,
    };
    use crate::model::Severity;
    use pretty_assertions::assert_eq;

    fn comparator() -> SemanticComparator {
        SemanticComparator::new(Arc::new(StubOracle::empty()))
    }

    /// Static UI-only rename: one renamed input, one button with changed
    /// text, two warnings over two elements.
    #[tokio::test]
    async fn test_ui_rename_scenario() {
        let mut source = Representation::new();
        source
            .ui_elements
            .push(UiElement::new("input", "user_name", "User Name"));
        source
            .ui_elements
            .push(UiElement::new("button", "submit_btn", "Submit"));

        let mut target = Representation::new();
        target
            .ui_elements
            .push(UiElement::new("input", "userName", "User Name"));
        target
            .ui_elements
            .push(UiElement::new("button", "submit_btn", "Save"));

        let result = comparator()
            .compare(&source, &target, ValidationScope::Ui)
            .await
            .unwrap();

        let kinds: Vec<DiscrepancyKind> = result.discrepancies.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DiscrepancyKind::UiElementRenamed,
                DiscrepancyKind::UiTextChanged
            ]
        );
        assert!(result
            .discrepancies
            .iter()
            .all(|d| d.severity == Severity::Warning));
        assert_eq!(result.fidelity_score, 0.5);
        assert_eq!(result.status, OverallStatus::ApprovedWithWarnings);
    }

    /// Data-structure type tightening: float -> int is critical and the
    /// score collapses to zero.
    #[tokio::test]
    async fn test_type_tightening_scenario() {
        let mut source = Representation::new();
        source.data_structures.push(DataStructure {
            name: "Product".to_string(),
            kind: "class".to_string(),
            fields: vec![DataField {
                name: "price".to_string(),
                type_name: "float".to_string(),
                required: true,
                constraints: Vec::new(),
            }],
            analysis_method: None,
        });
        let mut target = source.clone();
        target.data_structures[0].fields[0].type_name = "int".to_string();

        let result = comparator()
            .compare(&source, &target, ValidationScope::DataStructure)
            .await
            .unwrap();

        assert_eq!(result.discrepancies.len(), 1);
        assert_eq!(result.discrepancies[0].kind, DiscrepancyKind::TypeMismatch);
        assert_eq!(result.discrepancies[0].severity, Severity::Critical);
        assert_eq!(result.fidelity_score, 0.0);
        assert_eq!(result.status, OverallStatus::Rejected);
    }

    /// API method removal: critical, score at most 0.5, rejected.
    #[tokio::test]
    async fn test_method_removal_scenario() {
        let mut source = Representation::new();
        source.api_endpoints.push(ApiEndpoint {
            path: "/api/products".to_string(),
            methods: vec!["GET".to_string(), "POST".to_string()],
            handler: "h1".to_string(),
            analysis_method: None,
        });
        let mut target = source.clone();
        target.api_endpoints[0].methods = vec!["GET".to_string()];

        let result = comparator()
            .compare(&source, &target, ValidationScope::Api)
            .await
            .unwrap();

        assert_eq!(
            result.discrepancies[0].kind,
            DiscrepancyKind::MissingHttpMethod
        );
        assert_eq!(result.discrepancies[0].severity, Severity::Critical);
        assert!(result.fidelity_score <= 0.5);
        assert_eq!(result.status, OverallStatus::Rejected);
    }

    #[tokio::test]
    async fn test_identical_representations_approved() {
        let mut rep = Representation::new();
        rep.backend_functions.push(
            crate::model::representation::BackendFunction {
                name: "get_total".to_string(),
                parameters: vec![Parameter::new("order_id", "int")],
                return_type: Some("float".to_string()),
                http_method: None,
                route: None,
                logic_summary: "sums line items".to_string(),
                complexity: ComplexityBand::Medium,
                analysis_method: None,
            },
        );

        let result = comparator()
            .compare(&rep, &rep.clone(), ValidationScope::BackendLogic)
            .await
            .unwrap();

        assert!(result.discrepancies.is_empty());
        assert_eq!(result.fidelity_score, 1.0);
        assert_eq!(result.status, OverallStatus::Approved);
    }

    #[tokio::test]
    async fn test_empty_representations_trivially_approved() {
        let result = comparator()
            .compare(
                &Representation::new(),
                &Representation::new(),
                ValidationScope::Full,
            )
            .await
            .unwrap();
        assert_eq!(result.fidelity_score, 1.0);
        assert_eq!(result.status, OverallStatus::Approved);
    }

    #[tokio::test]
    async fn test_missing_function_is_critical() {
        let mut source = Representation::new();
        source.backend_functions.push(
            crate::model::representation::BackendFunction {
                name: "audit_log".to_string(),
                parameters: Vec::new(),
                return_type: None,
                http_method: None,
                route: None,
                logic_summary: "writes audit entries".to_string(),
                complexity: ComplexityBand::Low,
                analysis_method: None,
            },
        );

        let result = comparator()
            .compare(&source, &Representation::new(), ValidationScope::BackendLogic)
            .await
            .unwrap();

        assert_eq!(
            result.discrepancies[0].kind,
            DiscrepancyKind::MissingElement
        );
        assert_eq!(result.status, OverallStatus::Rejected);
        assert_eq!(result.fidelity_score, 0.0);
    }

    #[test]
    fn test_category_score_floors_denominator() {
        assert_eq!(category_score(0.5, 0), 0.5);
        assert_eq!(category_score(3.0, 2), 0.0);
        assert_eq!(category_score(0.0, 5), 1.0);
    }
}
