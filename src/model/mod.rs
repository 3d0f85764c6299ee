//! Core validation data model: scopes, representations, discrepancies, results.

pub mod bundle;
pub mod discrepancy;
pub mod representation;
pub mod result;
pub mod scope;

pub use bundle::{BundleLimits, CodeFile, InputBundle, Screenshot};
pub use discrepancy::{Component, Discrepancy, DiscrepancyKind, Severity};
pub use representation::{
    ApiEndpoint, BackendFunction, ComplexityBand, DataField, DataStructure, Parameter,
    Representation, UiElement,
};
pub use result::{
    OverallStatus, ResultKind, SessionUsage, StageKind, StageResult, UnifiedResult,
};
pub use scope::{Category, ValidationScope};

use serde::{Deserialize, Serialize};

/// Which side of the migration an artifact or representation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Source,
    Target,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Target => write!(f, "target"),
        }
    }
}
