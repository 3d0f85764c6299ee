//! Session aggregate: the unit of validation and its owned children.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::behavioral::BehavioralConfig;
use crate::error::{Error, Result};
use crate::model::bundle::InputBundle;
use crate::model::scope::ValidationScope;

/// Technology context for one side of the migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnologyContext {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
}

impl TechnologyContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            framework: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = Some(framework.into());
        self
    }
}

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    Pending,
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl SessionStatus {
    /// Terminal statuses never change afterwards.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed-out",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "timed-out" => Ok(Self::TimedOut),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// Admission priority band. Interactive drains strictly before batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Interactive,
    Batch,
}

/// Log level for session log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// One appended, never-edited session log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLogEntry {
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl SessionLogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            level,
            message: message.into(),
            payload: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// The aggregate root for one validation run.
///
/// Mutated only by the session's worker (and the scheduler for admission and
/// cancellation), serialized through the store's version counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Server-assigned opaque, URL-safe, non-sequential id
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    pub source_tech: TechnologyContext,
    pub target_tech: TechnologyContext,
    pub scope: ValidationScope,
    pub source_bundle: InputBundle,
    pub target_bundle: InputBundle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behavioral: Option<BehavioralConfig>,
    pub priority: Priority,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    /// Optimistic concurrency counter, bumped on every store write
    pub version: u64,
}

impl Session {
    pub fn new(
        source_tech: TechnologyContext,
        target_tech: TechnologyContext,
        scope: ValidationScope,
        source_bundle: InputBundle,
        target_bundle: InputBundle,
    ) -> Self {
        let now = Utc::now();
        Self {
            request_id: Uuid::new_v4().to_string(),
            tenant: None,
            source_tech,
            target_tech,
            scope,
            source_bundle,
            target_bundle,
            behavioral: None,
            priority: Priority::Interactive,
            status: SessionStatus::Pending,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            deleted_by: None,
            version: 0,
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_behavioral(mut self, config: BehavioralConfig) -> Self {
        self.behavioral = Some(config);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Validate the cross-field invariants at admission time.
    ///
    /// Behavioral scopes need at least one scenario and both URLs; other
    /// scopes ignore URLs entirely.
    pub fn validate(&self) -> Result<()> {
        if self.scope.includes_behavioral() {
            let scenarios = self
                .behavioral
                .as_ref()
                .map(|b| b.scenarios.len())
                .unwrap_or(0);
            if scenarios == 0 {
                return Err(Error::invalid_input(format!(
                    "scope {} requires at least one behavioral scenario",
                    self.scope
                )));
            }
            if self.source_bundle.url.is_none() || self.target_bundle.url.is_none() {
                return Err(Error::invalid_input(format!(
                    "scope {} requires source and target URLs",
                    self.scope
                )));
            }
        }

        if self.scope.includes_static()
            && self.source_bundle.artifact_count() == 0
            && self.target_bundle.artifact_count() == 0
            && !self.scope.includes_behavioral()
        {
            return Err(Error::invalid_input(
                "static validation requires code files or screenshots",
            ));
        }

        Ok(())
    }
}
