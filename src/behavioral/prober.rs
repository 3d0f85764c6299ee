//! Behavioral prober seam: scenario execution against a live URL.
//!
//! The real prober drives a headless browser and must auto-close its
//! sessions on deadline; the engine only depends on this trait and the
//! trace types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::error::Result;

/// Login credentials for probed applications.
///
/// Held in memory only: never serialized, never persisted, redacted from
/// debug output and logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &"<redacted>")
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Behavioral probing configuration attached to a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehavioralConfig {
    /// Scenario descriptors, executed in order
    pub scenarios: Vec<String>,
    /// Per-scenario deadline in seconds
    pub scenario_timeout_secs: u64,
    /// In-memory only; excluded from persistence and logs
    #[serde(skip)]
    pub credentials: Option<Credentials>,
}

impl BehavioralConfig {
    pub fn new(scenarios: Vec<String>, scenario_timeout_secs: u64) -> Self {
        Self {
            scenarios,
            scenario_timeout_secs,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// One recorded interaction step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    /// Action kind ("navigate", "click", "input", "submit", ...)
    pub action: String,
    pub selector: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Page-state class after the step (route or logical state)
    pub state_class: String,
    /// Captured state fingerprint after the step
    pub state_fingerprint: String,
    /// Validation error shown to the user, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
    /// Visible message text, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// Ordered trace of one scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioTrace {
    pub scenario: String,
    pub steps: Vec<TraceStep>,
}

/// Drives a browser to execute scenarios on a live URL.
#[async_trait]
pub trait BehavioralProber: Send + Sync {
    /// Execute a scenario against `url`, returning the ordered trace.
    ///
    /// The prober owns the browser session and must close it before the
    /// timeout elapses, even on failure.
    async fn run_scenario(
        &self,
        url: &str,
        scenario: &str,
        credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Result<ScenarioTrace>;
}

/// Placeholder prober for deployments without a browser driver attached.
///
/// Every scenario fails with `prober-failure`, which the behavioral stage
/// turns into zero-scored scenarios with error discrepancies.
pub struct UnconfiguredProber;

#[async_trait]
impl BehavioralProber for UnconfiguredProber {
    async fn run_scenario(
        &self,
        _url: &str,
        scenario: &str,
        _credentials: Option<&Credentials>,
        _timeout: Duration,
    ) -> Result<ScenarioTrace> {
        Err(crate::error::Error::ProberFailure(format!(
            "no browser prober configured, cannot run scenario {scenario}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacted() {
        let creds = Credentials::new("admin", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_credentials_not_serialized() {
        let config = BehavioralConfig::new(vec!["login".to_string()], 60)
            .with_credentials(Credentials::new("admin", "hunter2"));
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("credentials"));

        // And the round-trip drops them entirely.
        let parsed: BehavioralConfig = serde_json::from_str(&json).unwrap();
        assert!(parsed.credentials.is_none());
    }
}
