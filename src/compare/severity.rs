//! Severity assignment policy: (category, change-kind, scope) to severity.

use crate::model::discrepancy::{DiscrepancyKind, Severity};
use crate::model::scope::ValidationScope;

/// Base severity for a change kind, before scope policy.
///
/// Kinds whose severity depends on the concrete change (widening type
/// mismatches, relaxed required flags, protected UI attributes) are assigned
/// by the element comparison and only pass through the scope policy here.
pub fn base_severity(kind: DiscrepancyKind) -> Severity {
    use DiscrepancyKind::*;
    match kind {
        MissingElement => Severity::Critical,
        AdditionalElement => Severity::Warning,
        ElementRenamed | FieldRenamed | UiElementRenamed => Severity::Warning,
        TypeMismatch => Severity::Critical,
        RequiredFlagChanged => Severity::Critical,
        ConstraintMissing => Severity::Warning,
        ConstraintAdded => Severity::Info,
        ParameterMismatch => Severity::Critical,
        ReturnTypeMismatch => Severity::Critical,
        LogicDivergence => Severity::Critical,
        MissingHttpMethod => Severity::Critical,
        ExtraHttpMethod => Severity::Warning,
        HandlerMismatch => Severity::Info,
        UiKindMismatch => Severity::Critical,
        UiTextChanged => Severity::Warning,
        UiAttributeChanged => Severity::Info,
        NavigationDivergence | ValidationDivergence => Severity::Critical,
        MessageTextDivergence | StateDivergence => Severity::Warning,
        TimingDivergence => Severity::Info,
        Error => Severity::Critical,
    }
}

/// Apply the scope policy on top of a computed severity.
///
/// No change kind is critical under the UI scope. Under data-structure or
/// business-rules scopes, type mismatches and missing elements are always
/// critical, widening or not.
pub fn apply_scope_policy(
    scope: ValidationScope,
    kind: DiscrepancyKind,
    severity: Severity,
) -> Severity {
    match scope {
        ValidationScope::Ui => severity.min(Severity::Warning),
        ValidationScope::DataStructure | ValidationScope::BusinessRules
            if matches!(
                kind,
                DiscrepancyKind::TypeMismatch | DiscrepancyKind::MissingElement
            ) =>
        {
            Severity::Critical
        }
        _ => severity,
    }
}

/// Base severity adjusted by scope in one step.
pub fn severity_for(scope: ValidationScope, kind: DiscrepancyKind) -> Severity {
    apply_scope_policy(scope, kind, base_severity(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_critical_under_ui_scope() {
        for kind in [
            DiscrepancyKind::MissingElement,
            DiscrepancyKind::TypeMismatch,
            DiscrepancyKind::UiKindMismatch,
            DiscrepancyKind::LogicDivergence,
        ] {
            assert!(severity_for(ValidationScope::Ui, kind) <= Severity::Warning);
        }
    }

    #[test]
    fn test_data_scope_forces_critical() {
        // A widening mismatch was downgraded to warning by the element
        // comparison; data-structure scope pulls it back up.
        let severity = apply_scope_policy(
            ValidationScope::DataStructure,
            DiscrepancyKind::TypeMismatch,
            Severity::Warning,
        );
        assert_eq!(severity, Severity::Critical);

        let severity = apply_scope_policy(
            ValidationScope::BusinessRules,
            DiscrepancyKind::MissingElement,
            Severity::Warning,
        );
        assert_eq!(severity, Severity::Critical);
    }

    #[test]
    fn test_neutral_scopes_pass_through() {
        assert_eq!(
            severity_for(ValidationScope::Api, DiscrepancyKind::MissingHttpMethod),
            Severity::Critical
        );
        assert_eq!(
            severity_for(ValidationScope::Full, DiscrepancyKind::HandlerMismatch),
            Severity::Info
        );
    }
}
