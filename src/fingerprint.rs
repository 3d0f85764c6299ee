//! Deterministic fingerprints for cacheable units of work.
//!
//! A fingerprint is the lower-case hex SHA-256 of a canonical byte encoding.
//! Cache keys prefix the fingerprint with a schema version and a namespace so
//! hashing-strategy changes invalidate cleanly and invalidations can be
//! targeted per namespace.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Cache key schema version. Bump when the hashing strategy changes.
pub const SCHEMA_VERSION: u8 = 1;

/// A deterministic identifier for a cacheable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a code file: `"file:" ‖ path ‖ NUL ‖ language ‖ NUL ‖ content`.
    pub fn for_file(path: &str, language: &str, content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"file:");
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(language.as_bytes());
        hasher.update([0u8]);
        hasher.update(content);
        Self(hex::encode(hasher.finalize()))
    }

    /// Fingerprint a screenshot: `"shot:" ‖ reference ‖ NUL ‖ content`.
    pub fn for_screenshot(reference: &str, content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"shot:");
        hasher.update(reference.as_bytes());
        hasher.update([0u8]);
        hasher.update(content);
        Self(hex::encode(hasher.finalize()))
    }

    /// Fingerprint an LLM request:
    /// `"llm:" ‖ model ‖ NUL ‖ system ‖ NUL ‖ user ‖ NUL ‖ context ‖ NUL ‖ band`.
    ///
    /// The context map is canonicalized by serializing a sorted map, so two
    /// requests with the same entries in different insertion orders hash
    /// identically.
    pub fn for_llm(
        model: &str,
        system: Option<&str>,
        user: &str,
        context: &BTreeMap<String, String>,
        temperature_band: &str,
    ) -> Self {
        let canonical_context =
            serde_json::to_string(context).unwrap_or_else(|_| String::from("{}"));

        let mut hasher = Sha256::new();
        hasher.update(b"llm:");
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(system.unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(user.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical_context.as_bytes());
        hasher.update([0u8]);
        hasher.update(temperature_band.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Cache key for an analyzer run: the artifact fingerprint scoped by the
    /// validation scope, so the same file analyzed under different scopes
    /// caches independently.
    pub fn for_analysis(scope: &str, artifact: &Fingerprint) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"analysis:");
        hasher.update(scope.as_bytes());
        hasher.update([0u8]);
        hasher.update(artifact.as_hex().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// The lower-case hex digest.
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form for display
        write!(f, "{}", &self.0[..16.min(self.0.len())])
    }
}

/// Cache namespace, used to target invalidations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheNamespace {
    /// Cached LLM completions (default TTL 30 days)
    Llm,
    /// Cached analyzer outputs (default TTL 7 days)
    Analysis,
}

impl CacheNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Analysis => "analysis",
        }
    }
}

/// A fully-qualified cache key: `{version}:{namespace}:{fingerprint}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub namespace: CacheNamespace,
    pub fingerprint: Fingerprint,
}

impl CacheKey {
    pub fn new(namespace: CacheNamespace, fingerprint: Fingerprint) -> Self {
        Self {
            namespace,
            fingerprint,
        }
    }

    /// Render the storage key string.
    pub fn storage_key(&self) -> String {
        format!(
            "{}:{}:{}",
            SCHEMA_VERSION,
            self.namespace.as_str(),
            self.fingerprint.as_hex()
        )
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            SCHEMA_VERSION,
            self.namespace.as_str(),
            self.fingerprint
        )
    }
}
