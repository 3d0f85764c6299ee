//! Per-pair element comparison rules.

use crate::model::discrepancy::{Component, Discrepancy, DiscrepancyKind, Severity};
use crate::model::representation::{
    ApiEndpoint, BackendFunction, DataField, DataStructure, UiElement,
};
use crate::model::scope::ValidationScope;

use super::normalize::{is_numeric_widening, normalize_name, types_equivalent};
use super::oracle::{FunctionDigest, LogicJudgment, SemanticOracle, LOGIC_SIMILARITY_THRESHOLD};
use super::severity::{apply_scope_policy, severity_for};
use crate::error::Result;

/// Canonical signature string used by the signature pairing layer.
pub fn function_signature(f: &BackendFunction) -> String {
    let params: Vec<String> = f
        .parameters
        .iter()
        .map(|p| super::normalize::normalize_type(&p.type_name))
        .collect();
    let ret = f
        .return_type
        .as_deref()
        .map(super::normalize::normalize_type)
        .unwrap_or_else(|| "void".to_string());
    format!("({})->{}", params.join(","), ret)
}

/// Compare a paired data structure.
pub fn compare_data_structures(
    source: &DataStructure,
    target: &DataStructure,
    scope: ValidationScope,
) -> Vec<Discrepancy> {
    let mut out = Vec::new();

    // Pair fields by normalized name.
    let mut used_target: Vec<bool> = vec![false; target.fields.len()];
    let mut unpaired_source: Vec<&DataField> = Vec::new();

    for s_field in &source.fields {
        let s_name = normalize_name(&s_field.name);
        let matched = target
            .fields
            .iter()
            .enumerate()
            .find(|(ti, t)| !used_target[*ti] && normalize_name(&t.name) == s_name);

        match matched {
            Some((ti, t_field)) => {
                used_target[ti] = true;
                compare_fields(source, s_field, t_field, scope, &mut out);
            }
            None => unpaired_source.push(s_field),
        }
    }

    // Leftovers with matching type and required flag are treated as renames.
    let mut missing: Vec<&DataField> = Vec::new();
    for s_field in unpaired_source {
        let renamed = target.fields.iter().enumerate().find(|(ti, t)| {
            !used_target[*ti]
                && types_equivalent(&s_field.type_name, &t.type_name)
                && s_field.required == t.required
        });
        match renamed {
            Some((ti, t_field)) => {
                used_target[ti] = true;
                out.push(
                    Discrepancy::between(
                        DiscrepancyKind::FieldRenamed,
                        severity_for(scope, DiscrepancyKind::FieldRenamed),
                        format!(
                            "field {}.{} appears renamed to {}",
                            source.name, s_field.name, t_field.name
                        ),
                        format!("{}.{}", source.name, s_field.name),
                        format!("{}.{}", target.name, t_field.name),
                    )
                    .with_component(Component::Data),
                );
                compare_fields(source, s_field, t_field, scope, &mut out);
            }
            None => missing.push(s_field),
        }
    }

    for s_field in missing {
        out.push(
            Discrepancy::from_source(
                DiscrepancyKind::MissingElement,
                severity_for(scope, DiscrepancyKind::MissingElement),
                format!("field {}.{} is absent in target", source.name, s_field.name),
                format!("{}.{}", source.name, s_field.name),
            )
            .with_component(Component::Data),
        );
    }

    for (ti, t_field) in target.fields.iter().enumerate() {
        if !used_target[ti] {
            out.push(
                Discrepancy::from_target(
                    DiscrepancyKind::AdditionalElement,
                    severity_for(scope, DiscrepancyKind::AdditionalElement),
                    format!("field {}.{} is new in target", target.name, t_field.name),
                    format!("{}.{}", target.name, t_field.name),
                )
                .with_component(Component::Data),
            );
        }
    }

    out
}

fn compare_fields(
    structure: &DataStructure,
    source: &DataField,
    target: &DataField,
    scope: ValidationScope,
    out: &mut Vec<Discrepancy>,
) {
    let pointer = format!("{}.{}", structure.name, source.name);

    if !types_equivalent(&source.type_name, &target.type_name) {
        let base = if is_numeric_widening(&source.type_name, &target.type_name) {
            Severity::Warning
        } else {
            Severity::Critical
        };
        out.push(
            Discrepancy::between(
                DiscrepancyKind::TypeMismatch,
                apply_scope_policy(scope, DiscrepancyKind::TypeMismatch, base),
                format!(
                    "field {} changed type {} -> {}",
                    pointer, source.type_name, target.type_name
                ),
                pointer.clone(),
                pointer.clone(),
            )
            .with_component(Component::Data)
            .with_recommendation(format!(
                "restore type {} or confirm the conversion is lossless",
                source.type_name
            )),
        );
    }

    if source.required != target.required {
        // Tightening (optional -> required) breaks existing writers.
        let base = if target.required {
            Severity::Critical
        } else {
            Severity::Warning
        };
        out.push(
            Discrepancy::between(
                DiscrepancyKind::RequiredFlagChanged,
                apply_scope_policy(scope, DiscrepancyKind::RequiredFlagChanged, base),
                format!(
                    "field {} required flag changed {} -> {}",
                    pointer, source.required, target.required
                ),
                pointer.clone(),
                pointer.clone(),
            )
            .with_component(Component::Data),
        );
    }

    for constraint in &source.constraints {
        if !target.constraints.contains(constraint) {
            out.push(
                Discrepancy::between(
                    DiscrepancyKind::ConstraintMissing,
                    severity_for(scope, DiscrepancyKind::ConstraintMissing),
                    format!("field {pointer} lost constraint {constraint}"),
                    pointer.clone(),
                    pointer.clone(),
                )
                .with_component(Component::Data),
            );
        }
    }
    for constraint in &target.constraints {
        if !source.constraints.contains(constraint) {
            out.push(
                Discrepancy::between(
                    DiscrepancyKind::ConstraintAdded,
                    severity_for(scope, DiscrepancyKind::ConstraintAdded),
                    format!("field {pointer} gained constraint {constraint}"),
                    pointer.clone(),
                    pointer.clone(),
                )
                .with_component(Component::Data),
            );
        }
    }
}

/// Compare a paired backend function, including the LLM-assisted logic check.
pub async fn compare_functions(
    source: &BackendFunction,
    target: &BackendFunction,
    scope: ValidationScope,
    oracle: &dyn SemanticOracle,
) -> Result<Vec<Discrepancy>> {
    let mut out = Vec::new();

    let source_params: Vec<String> = source
        .parameters
        .iter()
        .map(|p| super::normalize::normalize_type(&p.type_name))
        .collect();
    let target_params: Vec<String> = target
        .parameters
        .iter()
        .map(|p| super::normalize::normalize_type(&p.type_name))
        .collect();

    if source_params != target_params {
        out.push(
            Discrepancy::between(
                DiscrepancyKind::ParameterMismatch,
                severity_for(scope, DiscrepancyKind::ParameterMismatch),
                format!(
                    "function {} parameters changed ({}) -> ({})",
                    source.name,
                    source_params.join(", "),
                    target_params.join(", ")
                ),
                source.name.clone(),
                target.name.clone(),
            )
            .with_component(Component::Backend),
        );
    }

    let source_ret = source.return_type.as_deref().unwrap_or("void");
    let target_ret = target.return_type.as_deref().unwrap_or("void");
    if !types_equivalent(source_ret, target_ret) {
        out.push(
            Discrepancy::between(
                DiscrepancyKind::ReturnTypeMismatch,
                severity_for(scope, DiscrepancyKind::ReturnTypeMismatch),
                format!(
                    "function {} return type changed {} -> {}",
                    source.name, source_ret, target_ret
                ),
                source.name.clone(),
                target.name.clone(),
            )
            .with_component(Component::Backend),
        );
    }

    let judgment: LogicJudgment = oracle
        .logic_similarity(
            &FunctionDigest {
                name: source.name.clone(),
                signature: function_signature(source),
                logic_summary: source.logic_summary.clone(),
            },
            &FunctionDigest {
                name: target.name.clone(),
                signature: function_signature(target),
                logic_summary: target.logic_summary.clone(),
            },
        )
        .await?;

    if judgment.similarity < LOGIC_SIMILARITY_THRESHOLD {
        out.push(
            Discrepancy::between(
                DiscrepancyKind::LogicDivergence,
                severity_for(scope, DiscrepancyKind::LogicDivergence),
                format!(
                    "function {} business logic diverges (similarity {:.2}): {}",
                    source.name, judgment.similarity, judgment.diagnosis
                ),
                source.name.clone(),
                target.name.clone(),
            )
            .with_confidence(1.0 - judgment.similarity)
            .with_component(Component::Backend),
        );
    }

    Ok(out)
}

/// Compare a paired API endpoint.
pub fn compare_endpoints(
    source: &ApiEndpoint,
    target: &ApiEndpoint,
    scope: ValidationScope,
) -> Vec<Discrepancy> {
    let mut out = Vec::new();

    for method in &source.methods {
        if !target.methods.iter().any(|m| m.eq_ignore_ascii_case(method)) {
            out.push(
                Discrepancy::between(
                    DiscrepancyKind::MissingHttpMethod,
                    severity_for(scope, DiscrepancyKind::MissingHttpMethod),
                    format!("endpoint {} lost method {}", source.path, method),
                    format!("{} {}", method, source.path),
                    target.path.clone(),
                )
                .with_component(Component::Api),
            );
        }
    }

    for method in &target.methods {
        if !source.methods.iter().any(|m| m.eq_ignore_ascii_case(method)) {
            out.push(
                Discrepancy::between(
                    DiscrepancyKind::ExtraHttpMethod,
                    severity_for(scope, DiscrepancyKind::ExtraHttpMethod),
                    format!("endpoint {} gained method {}", target.path, method),
                    source.path.clone(),
                    format!("{} {}", method, target.path),
                )
                .with_component(Component::Api),
            );
        }
    }

    if normalize_name(&source.handler) != normalize_name(&target.handler) {
        out.push(
            Discrepancy::between(
                DiscrepancyKind::HandlerMismatch,
                severity_for(scope, DiscrepancyKind::HandlerMismatch),
                format!(
                    "endpoint {} handler changed {} -> {}",
                    source.path, source.handler, target.handler
                ),
                source.path.clone(),
                target.path.clone(),
            )
            .with_component(Component::Api),
        );
    }

    out
}

/// Attributes whose changes are warnings rather than info.
const PROTECTED_UI_ATTRIBUTES: &[&str] = &["required", "name", "id"];

/// Compare a paired UI element.
pub fn compare_ui_elements(
    source: &UiElement,
    target: &UiElement,
    scope: ValidationScope,
) -> Vec<Discrepancy> {
    let mut out = Vec::new();

    if source.kind != target.kind {
        out.push(
            Discrepancy::between(
                DiscrepancyKind::UiKindMismatch,
                severity_for(scope, DiscrepancyKind::UiKindMismatch),
                format!(
                    "element {} changed kind {} -> {}",
                    source.id, source.kind, target.kind
                ),
                source.id.clone(),
                target.id.clone(),
            )
            .with_component(Component::Ui),
        );
    }

    if source.text != target.text {
        out.push(
            Discrepancy::between(
                DiscrepancyKind::UiTextChanged,
                severity_for(scope, DiscrepancyKind::UiTextChanged),
                format!(
                    "element {} text changed \"{}\" -> \"{}\"",
                    source.id, source.text, target.text
                ),
                source.id.clone(),
                target.id.clone(),
            )
            .with_component(Component::Ui),
        );
    }

    let attribute_keys: std::collections::BTreeSet<&String> = source
        .attributes
        .keys()
        .chain(target.attributes.keys())
        .collect();
    for key in attribute_keys {
        let s_value = source.attributes.get(key);
        let t_value = target.attributes.get(key);
        if s_value != t_value {
            let base = if PROTECTED_UI_ATTRIBUTES.contains(&key.as_str()) {
                Severity::Warning
            } else {
                Severity::Info
            };
            out.push(
                Discrepancy::between(
                    DiscrepancyKind::UiAttributeChanged,
                    apply_scope_policy(scope, DiscrepancyKind::UiAttributeChanged, base),
                    format!(
                        "element {} attribute {} changed {:?} -> {:?}",
                        source.id, key, s_value, t_value
                    ),
                    source.id.clone(),
                    target.id.clone(),
                )
                .with_component(Component::Ui),
            );
        }
    }

    out
}
