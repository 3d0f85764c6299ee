//! Discrepancies: one detected difference between source and target.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discrepancy severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Score mass this severity contributes to category fidelity scores.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Critical => 1.0,
            Self::Warning => 0.5,
            Self::Info => 0.1,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// What kind of difference was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// Present in source, absent in target
    MissingElement,
    /// Present in target, absent in source
    AdditionalElement,
    /// Paired by semantic similarity under a different name
    ElementRenamed,
    FieldRenamed,
    TypeMismatch,
    RequiredFlagChanged,
    ConstraintMissing,
    ConstraintAdded,
    ParameterMismatch,
    ReturnTypeMismatch,
    /// Business-logic similarity below threshold
    LogicDivergence,
    MissingHttpMethod,
    ExtraHttpMethod,
    HandlerMismatch,
    UiKindMismatch,
    UiElementRenamed,
    UiTextChanged,
    UiAttributeChanged,
    /// Behavioral: step landed in a different page state
    NavigationDivergence,
    /// Behavioral: validation error present on one side only
    ValidationDivergence,
    /// Behavioral: message text differs, state class matches
    MessageTextDivergence,
    /// Behavioral: captured state fingerprint differs, same page state
    StateDivergence,
    /// Behavioral: step timing beyond the 2x factor
    TimingDivergence,
    /// A scenario or stage could not run
    Error,
}

/// Which part of the system a discrepancy belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Ui,
    Backend,
    Data,
    Api,
    Behavioral,
}

/// One detected difference between source and target.
///
/// At least one of `source_element` / `target_element` is always present;
/// the constructors enforce this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    pub severity: Severity,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_element: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_element: Option<String>,
    /// Confidence in [0, 1]; 1.0 unless supplied
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<Component>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_context: Option<HashMap<String, Value>>,
}

impl Discrepancy {
    /// Create a discrepancy anchored to a source element.
    pub fn from_source(
        kind: DiscrepancyKind,
        severity: Severity,
        description: impl Into<String>,
        source_element: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity,
            description: description.into(),
            source_element: Some(source_element.into()),
            target_element: None,
            confidence: 1.0,
            recommendation: None,
            component: None,
            validation_context: None,
        }
    }

    /// Create a discrepancy anchored to a target element.
    pub fn from_target(
        kind: DiscrepancyKind,
        severity: Severity,
        description: impl Into<String>,
        target_element: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity,
            description: description.into(),
            source_element: None,
            target_element: Some(target_element.into()),
            confidence: 1.0,
            recommendation: None,
            component: None,
            validation_context: None,
        }
    }

    /// Create a discrepancy between a paired source/target element.
    pub fn between(
        kind: DiscrepancyKind,
        severity: Severity,
        description: impl Into<String>,
        source_element: impl Into<String>,
        target_element: impl Into<String>,
    ) -> Self {
        Self {
            target_element: Some(target_element.into()),
            ..Self::from_source(kind, severity, description, source_element)
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }

    pub fn with_component(mut self, component: Component) -> Self {
        self.component = Some(component);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.validation_context
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}
