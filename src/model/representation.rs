//! The unified abstract view extracted from one side of a migration.
//!
//! Analyzers emit partial representations per artifact; the stage runner
//! merges them by concatenation in input order. Element order is preserved
//! as emitted; comparators use it only as a tie-breaker.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Coarse complexity band for a backend function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityBand {
    Low,
    Medium,
    High,
}

/// One function parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub type_name: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// An extracted backend function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendFunction {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<String>,
    /// HTTP method if the function is route-bound
    pub http_method: Option<String>,
    pub route: Option<String>,
    /// Short natural-language summary of the business logic
    pub logic_summary: String,
    pub complexity: ComplexityBand,
    /// How this element was extracted ("ast", "regex-fallback", ...)
    #[serde(default)]
    pub analysis_method: Option<String>,
}

/// One field of a data structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataField {
    pub name: String,
    pub type_name: String,
    pub required: bool,
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// An extracted data structure (class, table, schema, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStructure {
    pub name: String,
    /// Structure kind as reported by the analyzer ("class", "table", ...)
    pub kind: String,
    pub fields: Vec<DataField>,
    #[serde(default)]
    pub analysis_method: Option<String>,
}

/// An extracted API endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEndpoint {
    pub path: String,
    /// Ordered method set as emitted ("GET", "POST", ...)
    pub methods: Vec<String>,
    pub handler: String,
    #[serde(default)]
    pub analysis_method: Option<String>,
}

/// An extracted UI element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiElement {
    /// Element kind ("input", "button", "label", ...)
    pub kind: String,
    /// Stable identifier
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub analysis_method: Option<String>,
}

impl UiElement {
    pub fn new(kind: impl Into<String>, id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            text: text.into(),
            attributes: BTreeMap::new(),
            analysis_method: None,
        }
    }
}

/// The extracted abstract view of one side (source or target).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Representation {
    pub backend_functions: Vec<BackendFunction>,
    pub data_structures: Vec<DataStructure>,
    pub api_endpoints: Vec<ApiEndpoint>,
    pub ui_elements: Vec<UiElement>,
}

impl Representation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenate another partial representation, preserving input order.
    ///
    /// Elements from different files are never deduplicated here; pairing in
    /// the comparator resolves duplicates.
    pub fn merge(&mut self, other: Representation) {
        self.backend_functions.extend(other.backend_functions);
        self.data_structures.extend(other.data_structures);
        self.api_endpoints.extend(other.api_endpoints);
        self.ui_elements.extend(other.ui_elements);
    }

    pub fn is_empty(&self) -> bool {
        self.backend_functions.is_empty()
            && self.data_structures.is_empty()
            && self.api_endpoints.is_empty()
            && self.ui_elements.is_empty()
    }

    /// Total element count across categories.
    pub fn element_count(&self) -> usize {
        self.backend_functions.len()
            + self.data_structures.len()
            + self.api_endpoints.len()
            + self.ui_elements.len()
    }

    /// Check that element identifiers are unique within each category.
    pub fn validate(&self) -> Result<()> {
        fn check_unique<'a>(
            kind: &str,
            ids: impl Iterator<Item = &'a str>,
        ) -> Result<()> {
            let mut seen = std::collections::HashSet::new();
            for id in ids {
                if !seen.insert(id) {
                    return Err(Error::Internal(format!(
                        "duplicate {kind} identifier in representation: {id}"
                    )));
                }
            }
            Ok(())
        }

        check_unique(
            "function",
            self.backend_functions.iter().map(|f| f.name.as_str()),
        )?;
        check_unique(
            "data structure",
            self.data_structures.iter().map(|d| d.name.as_str()),
        )?;
        check_unique(
            "endpoint",
            self.api_endpoints.iter().map(|e| e.path.as_str()),
        )?;
        check_unique("ui element", self.ui_elements.iter().map(|u| u.id.as_str()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(name: &str) -> BackendFunction {
        BackendFunction {
            name: name.to_string(),
            parameters: vec![Parameter::new("x", "int")],
            return_type: Some("int".to_string()),
            http_method: None,
            route: None,
            logic_summary: "adds one".to_string(),
            complexity: ComplexityBand::Low,
            analysis_method: Some("ast".to_string()),
        }
    }

    #[test]
    fn test_merge_preserves_order() {
        let mut rep = Representation::new();
        rep.backend_functions.push(function("a"));

        let mut other = Representation::new();
        other.backend_functions.push(function("b"));
        other.ui_elements.push(UiElement::new("button", "save", "Save"));

        rep.merge(other);
        assert_eq!(rep.backend_functions.len(), 2);
        assert_eq!(rep.backend_functions[0].name, "a");
        assert_eq!(rep.backend_functions[1].name, "b");
        assert_eq!(rep.element_count(), 3);
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let mut rep = Representation::new();
        rep.ui_elements.push(UiElement::new("input", "email", ""));
        rep.ui_elements.push(UiElement::new("button", "email", ""));
        assert!(rep.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_unique_ids() {
        let mut rep = Representation::new();
        rep.backend_functions.push(function("a"));
        rep.backend_functions.push(function("b"));
        assert!(rep.validate().is_ok());
    }

    #[test]
    fn test_empty_representation() {
        let rep = Representation::new();
        assert!(rep.is_empty());
        assert_eq!(rep.element_count(), 0);
        assert!(rep.validate().is_ok());
    }
}
