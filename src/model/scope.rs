//! Validation scopes and per-scope category weights.

use serde::{Deserialize, Serialize};

/// Which axes a validation exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationScope {
    /// UI elements only
    Ui,
    /// Backend functions and the logic behind them
    BackendLogic,
    /// Data models and their fields
    DataStructure,
    /// API endpoint surface
    Api,
    /// Business rules across functions, data, and behavior
    BusinessRules,
    /// Live behavioral probing only
    Behavioral,
    /// Everything
    Full,
}

impl ValidationScope {
    /// Whether this scope runs the static analysis + comparison stage.
    pub fn includes_static(&self) -> bool {
        !matches!(self, Self::Behavioral)
    }

    /// Whether this scope runs the behavioral probing stage.
    pub fn includes_behavioral(&self) -> bool {
        matches!(self, Self::BusinessRules | Self::Behavioral | Self::Full)
    }

    /// All known scopes, for catalogs and input validation.
    pub fn all() -> &'static [ValidationScope] {
        &[
            Self::Ui,
            Self::BackendLogic,
            Self::DataStructure,
            Self::Api,
            Self::BusinessRules,
            Self::Behavioral,
            Self::Full,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ui => "ui",
            Self::BackendLogic => "backend-logic",
            Self::DataStructure => "data-structure",
            Self::Api => "api",
            Self::BusinessRules => "business-rules",
            Self::Behavioral => "behavioral",
            Self::Full => "full",
        }
    }
}

impl std::fmt::Display for ValidationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ValidationScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ui" => Ok(Self::Ui),
            "backend-logic" | "backend_logic" => Ok(Self::BackendLogic),
            "data-structure" | "data_structure" => Ok(Self::DataStructure),
            "api" => Ok(Self::Api),
            "business-rules" | "business_rules" => Ok(Self::BusinessRules),
            "behavioral" => Ok(Self::Behavioral),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown scope: {other}")),
        }
    }
}

/// Comparison category contributing to the static stage score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    BackendFunctions,
    DataStructures,
    Endpoints,
    UiElements,
    Behavioral,
}

/// Raw per-scope weight table, behavioral column included.
fn raw_weights(scope: ValidationScope) -> [(Category, f64); 5] {
    use Category::*;
    match scope {
        ValidationScope::Ui => [
            (BackendFunctions, 0.0),
            (DataStructures, 0.0),
            (Endpoints, 0.0),
            (UiElements, 1.0),
            (Behavioral, 0.0),
        ],
        ValidationScope::DataStructure => [
            (BackendFunctions, 0.1),
            (DataStructures, 0.9),
            (Endpoints, 0.0),
            (UiElements, 0.0),
            (Behavioral, 0.0),
        ],
        ValidationScope::BackendLogic => [
            (BackendFunctions, 0.6),
            (DataStructures, 0.2),
            (Endpoints, 0.2),
            (UiElements, 0.0),
            (Behavioral, 0.0),
        ],
        ValidationScope::Api => [
            (BackendFunctions, 0.2),
            (DataStructures, 0.1),
            (Endpoints, 0.7),
            (UiElements, 0.0),
            (Behavioral, 0.0),
        ],
        ValidationScope::BusinessRules => [
            (BackendFunctions, 0.5),
            (DataStructures, 0.2),
            (Endpoints, 0.1),
            (UiElements, 0.0),
            (Behavioral, 0.2),
        ],
        ValidationScope::Behavioral => [
            (BackendFunctions, 0.0),
            (DataStructures, 0.0),
            (Endpoints, 0.0),
            (UiElements, 0.0),
            (Behavioral, 1.0),
        ],
        ValidationScope::Full => [
            (BackendFunctions, 0.25),
            (DataStructures, 0.15),
            (Endpoints, 0.2),
            (UiElements, 0.1),
            (Behavioral, 0.3),
        ],
    }
}

/// Static-category weights for a scope, normalized to sum 1.
///
/// The behavioral column never contributes to the static stage score; its
/// mass is redistributed proportionally across the active static categories.
/// Categories with no elements on either side are inactive and their mass is
/// redistributed the same way.
pub fn static_category_weights(
    scope: ValidationScope,
    active: &[Category],
) -> Vec<(Category, f64)> {
    let weights: Vec<(Category, f64)> = raw_weights(scope)
        .into_iter()
        .filter(|(c, w)| *c != Category::Behavioral && *w > 0.0 && active.contains(c))
        .collect();

    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return Vec::new();
    }

    weights.into_iter().map(|(c, w)| (c, w / total)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_scope_roundtrip() {
        for scope in ValidationScope::all() {
            let parsed: ValidationScope = scope.as_str().parse().unwrap();
            assert_eq!(parsed, *scope);
        }
    }

    #[test]
    fn test_scope_stage_selection() {
        assert!(ValidationScope::Ui.includes_static());
        assert!(!ValidationScope::Ui.includes_behavioral());
        assert!(!ValidationScope::Behavioral.includes_static());
        assert!(ValidationScope::Behavioral.includes_behavioral());
        assert!(ValidationScope::Full.includes_static());
        assert!(ValidationScope::Full.includes_behavioral());
    }

    #[test]
    fn test_ui_scope_weights() {
        let weights = static_category_weights(ValidationScope::Ui, &[Category::UiElements]);
        assert_eq!(weights, vec![(Category::UiElements, 1.0)]);
    }

    #[test]
    fn test_behavioral_mass_redistributed() {
        // business-rules: backend 0.5, data 0.2, endpoints 0.1, behavioral 0.2.
        // With all static categories active the behavioral 0.2 spreads
        // proportionally over the 0.8 of static mass.
        let weights = static_category_weights(
            ValidationScope::BusinessRules,
            &[
                Category::BackendFunctions,
                Category::DataStructures,
                Category::Endpoints,
            ],
        );
        let lookup = |c: Category| weights.iter().find(|(w, _)| *w == c).unwrap().1;
        assert!((lookup(Category::BackendFunctions) - 0.625).abs() < 1e-9);
        assert!((lookup(Category::DataStructures) - 0.25).abs() < 1e-9);
        assert!((lookup(Category::Endpoints) - 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_inactive_category_mass_redistributed() {
        // data-structure scope with no backend functions present: the whole
        // mass lands on data structures.
        let weights =
            static_category_weights(ValidationScope::DataStructure, &[Category::DataStructures]);
        assert_eq!(weights, vec![(Category::DataStructures, 1.0)]);
    }

    #[test]
    fn test_no_active_categories_is_empty() {
        let weights = static_category_weights(ValidationScope::Api, &[]);
        assert!(weights.is_empty());
    }
}
