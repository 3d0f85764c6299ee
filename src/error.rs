//! Error types for mve-core.

use thiserror::Error;

/// Result type alias using mve-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during validation operations.
///
/// Each variant maps to a stable string code (see [`Error::code`]) that is
/// safe to surface to API clients. Recoverable errors become discrepancies or
/// stage-level `error` statuses instead of aborting the session.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad request: unsupported technology, oversized file, invalid input
    #[error("Invalid input: {0}")]
    ValidationInput(String),

    /// Missing or invalid credentials
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Admission refused by the scheduler
    #[error("Overloaded: {0}")]
    Overloaded(String),

    /// All LLM providers failed or their breakers are open
    #[error("No LLM provider available: {0}")]
    ProviderUnavailable(String),

    /// Per-session token or cost ceiling reached
    #[error("Budget exhausted: {resource}")]
    BudgetExhausted { resource: String },

    /// Per-operation or per-session deadline expired
    #[error("Deadline exceeded after {elapsed_ms}ms")]
    DeadlineExceeded { elapsed_ms: u64 },

    /// LLM produced malformed structured output after reformat retries
    #[error("Unparseable LLM response: {0}")]
    ResponseUnparseable(String),

    /// Browser driver failure in the behavioral stage
    #[error("Prober failure: {0}")]
    ProberFailure(String),

    /// Recoverable LLM API error from a specific provider
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// Non-recoverable provider rejection (4xx other than 429)
    #[error("LLM request rejected by {provider} ({status}): {message}")]
    LlmRejected {
        provider: String,
        status: u16,
        message: String,
    },

    /// Session store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Optimistic concurrency control lost the race; re-read and retry
    #[error("Version conflict updating session {0}")]
    VersionConflict(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session was cancelled by the client
    #[error("Session cancelled")]
    Cancelled,

    /// Bug or invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable string code for the API error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationInput(_) => "validation-input",
            Self::Auth(_) => "auth",
            Self::Overloaded(_) => "overloaded",
            Self::ProviderUnavailable(_) => "provider-unavailable",
            Self::BudgetExhausted { .. } => "budget-exhausted",
            Self::DeadlineExceeded { .. } => "deadline-exceeded",
            Self::ResponseUnparseable(_) => "response-unparseable",
            Self::ProberFailure(_) => "prober-failure",
            Self::LlmApi { .. } => "provider-unavailable",
            Self::LlmRejected { .. } => "provider-unavailable",
            Self::Storage(_) => "internal",
            Self::VersionConflict(_) => "internal",
            Self::Serialization(_) => "internal",
            Self::Config(_) => "internal",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether retrying the same operation could succeed.
    ///
    /// Recoverable errors never abort a session; the pipeline downgrades
    /// them to discrepancies or stage-level `error` statuses.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_)
                | Self::ResponseUnparseable(_)
                | Self::ProberFailure(_)
                | Self::LlmApi { .. }
        )
    }

    /// Create an LLM API error.
    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a budget exhausted error.
    pub fn budget_exhausted(resource: impl Into<String>) -> Self {
        Self::BudgetExhausted {
            resource: resource.into(),
        }
    }

    /// Create a deadline exceeded error.
    pub fn deadline_exceeded(elapsed_ms: u64) -> Self {
        Self::DeadlineExceeded { elapsed_ms }
    }

    /// Create a validation input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::ValidationInput(message.into())
    }
}
