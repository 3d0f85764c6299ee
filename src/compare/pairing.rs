//! Layered element pairing: identity, signature, then LLM-assisted semantic
//! matching; the remainder becomes missing/additional discrepancies.

use std::collections::HashSet;

use crate::error::Result;
use crate::model::scope::Category;

use super::oracle::{SemanticOracle, SEMANTIC_PAIR_THRESHOLD};

/// Which layer produced a pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PairOrigin {
    Identity,
    Signature,
    /// Semantic match with the oracle's similarity
    Semantic(f64),
}

/// Result of pairing one category.
#[derive(Debug, Clone)]
pub struct Pairing<T> {
    pub pairs: Vec<(T, T, PairOrigin)>,
    /// Present in source, absent in target
    pub missing: Vec<T>,
    /// Present in target, absent in source
    pub additional: Vec<T>,
}

impl<T> Pairing<T> {
    /// Pair count plus unpaired count, the fidelity-score denominator.
    pub fn element_count(&self) -> usize {
        self.pairs.len() + self.missing.len() + self.additional.len()
    }
}

/// Pair elements of one category using the layered rule.
///
/// `normalizer` folds naming conventions for the identity layer (names for
/// most categories, route patterns for endpoints). `signature_of` is
/// supplied for backend functions only; when present, still-unpaired
/// elements with identical signatures pair at the second layer. The oracle
/// handles whatever is left; suggestions below the threshold are discarded.
///
/// When multiple targets match one source at a layer, the one appearing
/// earliest in input order wins.
pub async fn pair_elements<T: Clone>(
    category: Category,
    source: &[T],
    target: &[T],
    name_of: &(dyn Fn(&T) -> &str + Sync),
    normalizer: &(dyn Fn(&str) -> String + Sync),
    signature_of: Option<&(dyn Fn(&T) -> String + Sync)>,
    oracle: &dyn SemanticOracle,
) -> Result<Pairing<T>> {
    let mut pairs: Vec<(usize, usize, PairOrigin)> = Vec::new();
    let mut used_source: HashSet<usize> = HashSet::new();
    let mut used_target: HashSet<usize> = HashSet::new();

    // Layer 1: identity on normalized name, earliest target wins.
    for (si, s) in source.iter().enumerate() {
        let s_name = normalizer(name_of(s));
        let matched = target.iter().enumerate().find(|(ti, t)| {
            !used_target.contains(ti) && normalizer(name_of(t)) == s_name
        });
        if let Some((ti, _)) = matched {
            pairs.push((si, ti, PairOrigin::Identity));
            used_source.insert(si);
            used_target.insert(ti);
        }
    }

    // Layer 2: signature equivalence, functions only.
    if let Some(signature_of) = signature_of {
        for (si, s) in source.iter().enumerate() {
            if used_source.contains(&si) {
                continue;
            }
            let s_sig = signature_of(s);
            let matched = target.iter().enumerate().find(|(ti, t)| {
                !used_target.contains(ti) && signature_of(t) == s_sig
            });
            if let Some((ti, _)) = matched {
                pairs.push((si, ti, PairOrigin::Signature));
                used_source.insert(si);
                used_target.insert(ti);
            }
        }
    }

    // Layer 3: semantic matching over the remainders.
    let unpaired_source: Vec<String> = source
        .iter()
        .enumerate()
        .filter(|(i, _)| !used_source.contains(i))
        .map(|(_, s)| name_of(s).to_string())
        .collect();
    let unpaired_target: Vec<String> = target
        .iter()
        .enumerate()
        .filter(|(i, _)| !used_target.contains(i))
        .map(|(_, t)| name_of(t).to_string())
        .collect();

    if !unpaired_source.is_empty() && !unpaired_target.is_empty() {
        let mut suggestions = oracle
            .suggest_pairs(category, &unpaired_source, &unpaired_target)
            .await?;
        suggestions.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for suggestion in suggestions {
            if suggestion.similarity < SEMANTIC_PAIR_THRESHOLD {
                continue;
            }
            let si = source
                .iter()
                .enumerate()
                .find(|(i, s)| !used_source.contains(i) && name_of(s) == suggestion.source)
                .map(|(i, _)| i);
            let ti = target
                .iter()
                .enumerate()
                .find(|(i, t)| !used_target.contains(i) && name_of(t) == suggestion.target)
                .map(|(i, _)| i);
            if let (Some(si), Some(ti)) = (si, ti) {
                pairs.push((si, ti, PairOrigin::Semantic(suggestion.similarity)));
                used_source.insert(si);
                used_target.insert(ti);
            }
        }
    }

    // Keep pair output in source input order.
    pairs.sort_by_key(|(si, _, _)| *si);

    let missing = source
        .iter()
        .enumerate()
        .filter(|(i, _)| !used_source.contains(i))
        .map(|(_, s)| s.clone())
        .collect();
    let additional = target
        .iter()
        .enumerate()
        .filter(|(i, _)| !used_target.contains(i))
        .map(|(_, t)| t.clone())
        .collect();

    Ok(Pairing {
        pairs: pairs
            .into_iter()
            .map(|(si, ti, origin)| (source[si].clone(), target[ti].clone(), origin))
            .collect(),
        missing,
        additional,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::compare::oracle::{FunctionDigest, LogicJudgment, PairSuggestion};
    use async_trait::async_trait;

    /// Oracle double returning fixed suggestions and a fixed similarity.
    pub struct StubOracle {
        pub suggestions: Vec<PairSuggestion>,
        pub similarity: f64,
    }

    impl StubOracle {
        pub fn empty() -> Self {
            Self {
                suggestions: Vec::new(),
                similarity: 1.0,
            }
        }

        pub fn with_pairs(suggestions: Vec<PairSuggestion>) -> Self {
            Self {
                suggestions,
                similarity: 1.0,
            }
        }
    }

    #[async_trait]
    impl SemanticOracle for StubOracle {
        async fn suggest_pairs(
            &self,
            _category: Category,
            _source: &[String],
            _target: &[String],
        ) -> Result<Vec<PairSuggestion>> {
            Ok(self.suggestions.clone())
        }

        async fn logic_similarity(
            &self,
            _source: &FunctionDigest,
            _target: &FunctionDigest,
        ) -> Result<LogicJudgment> {
            Ok(LogicJudgment {
                similarity: self.similarity,
                diagnosis: "stubbed".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::StubOracle;
    use super::*;
    use crate::compare::normalize::normalize_name;
    use crate::compare::oracle::PairSuggestion;

    fn name_of(s: &String) -> &str {
        s.as_str()
    }

    fn fixed_signature(_: &String) -> String {
        "(:int,:int)->int".to_string()
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_identity_pairing_folds_conventions() {
        let source = strings(&["user_name", "submit_btn"]);
        let target = strings(&["userName", "submit_btn"]);

        let pairing = pair_elements(
            Category::UiElements,
            &source,
            &target,
            &name_of,
            &normalize_name,
            None,
            &StubOracle::empty(),
        )
        .await
        .unwrap();

        assert_eq!(pairing.pairs.len(), 2);
        assert!(pairing.missing.is_empty());
        assert!(pairing.additional.is_empty());
        assert!(pairing
            .pairs
            .iter()
            .all(|(_, _, origin)| *origin == PairOrigin::Identity));
    }

    #[tokio::test]
    async fn test_identity_tie_break_earliest_target() {
        // Two targets normalize to the same name; the first wins.
        let source = strings(&["user_name"]);
        let target = strings(&["userName", "user-name"]);

        let pairing = pair_elements(
            Category::UiElements,
            &source,
            &target,
            &name_of,
            &normalize_name,
            None,
            &StubOracle::empty(),
        )
        .await
        .unwrap();

        assert_eq!(pairing.pairs[0].1, "userName");
        assert_eq!(pairing.additional, vec!["user-name".to_string()]);
    }

    #[tokio::test]
    async fn test_signature_layer_pairs_renamed_functions() {
        let source = strings(&["calculate_total"]);
        let target = strings(&["compute_sum"]);

        let pairing = pair_elements(
            Category::BackendFunctions,
            &source,
            &target,
            &name_of,
            &normalize_name,
            Some(&fixed_signature),
            &StubOracle::empty(),
        )
        .await
        .unwrap();

        assert_eq!(pairing.pairs.len(), 1);
        assert_eq!(pairing.pairs[0].2, PairOrigin::Signature);
    }

    #[tokio::test]
    async fn test_semantic_layer_accepts_above_threshold() {
        let source = strings(&["fetch_user", "delete_user"]);
        let target = strings(&["getUserRecord", "removeUserRecord"]);
        let oracle = StubOracle::with_pairs(vec![
            PairSuggestion {
                source: "fetch_user".to_string(),
                target: "getUserRecord".to_string(),
                similarity: 0.8,
            },
            PairSuggestion {
                source: "delete_user".to_string(),
                target: "removeUserRecord".to_string(),
                similarity: 0.4,
            },
        ]);

        let pairing = pair_elements(
            Category::BackendFunctions,
            &source,
            &target,
            &name_of,
            &normalize_name,
            None,
            &oracle,
        )
        .await
        .unwrap();

        assert_eq!(pairing.pairs.len(), 1);
        assert_eq!(pairing.pairs[0].2, PairOrigin::Semantic(0.8));
        assert_eq!(pairing.missing, vec!["delete_user".to_string()]);
        assert_eq!(pairing.additional, vec!["removeUserRecord".to_string()]);
    }

    #[tokio::test]
    async fn test_unpaired_remainders() {
        let source = strings(&["a", "b"]);
        let target = strings(&["a", "c"]);

        let pairing = pair_elements(
            Category::Endpoints,
            &source,
            &target,
            &name_of,
            &normalize_name,
            None,
            &StubOracle::empty(),
        )
        .await
        .unwrap();

        assert_eq!(pairing.pairs.len(), 1);
        assert_eq!(pairing.missing, vec!["b".to_string()]);
        assert_eq!(pairing.additional, vec!["c".to_string()]);
        assert_eq!(pairing.element_count(), 3);
    }
}
