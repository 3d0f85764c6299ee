//! Semantic comparison: pairing, element rules, severity policy, scoring.

pub mod comparator;
pub mod elements;
pub mod normalize;
pub mod oracle;
pub mod pairing;
pub mod severity;

pub use comparator::SemanticComparator;
pub use oracle::{
    FunctionDigest, LlmSemanticOracle, LogicJudgment, PairSuggestion, SemanticOracle,
    LOGIC_SIMILARITY_THRESHOLD, SEMANTIC_PAIR_THRESHOLD,
};
pub use pairing::{pair_elements, PairOrigin, Pairing};
pub use severity::{apply_scope_policy, base_severity, severity_for};
