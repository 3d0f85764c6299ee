//! API wire types and the error envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::scope::ValidationScope;
use crate::session::Priority;

/// JSON config part of a validation submission.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidateConfig {
    pub source_technology: String,
    #[serde(default)]
    pub source_version: Option<String>,
    #[serde(default)]
    pub source_framework: Option<String>,
    pub target_technology: String,
    #[serde(default)]
    pub target_version: Option<String>,
    #[serde(default)]
    pub target_framework: Option<String>,
    pub scope: ValidationScope,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    /// Behavioral section for hybrid submissions
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub scenarios: Vec<String>,
    #[serde(default)]
    pub scenario_timeout_secs: Option<u64>,
    #[serde(default)]
    pub credentials: Option<CredentialsBody>,
}

/// Credentials as received on the wire; never persisted or echoed back.
#[derive(Clone, Deserialize)]
pub struct CredentialsBody {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for CredentialsBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsBody")
            .field("username", &"<redacted>")
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Body of `POST /api/behavioral/validate`.
#[derive(Debug, Clone, Deserialize)]
pub struct BehavioralValidateRequest {
    pub source_url: String,
    pub target_url: String,
    pub scenarios: Vec<String>,
    #[serde(default)]
    pub credentials: Option<CredentialsBody>,
    /// Per-scenario timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub tenant: Option<String>,
}

/// 202 response for accepted submissions.
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub request_id: String,
    pub status: &'static str,
}

/// Response of the status endpoint.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub request_id: String,
    pub status: String,
    pub progress: f64,
    pub result_available: bool,
}

/// Response of the delete endpoint.
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub request_id: String,
    pub status: String,
}

/// One row of the health endpoint's recent-session listing.
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub request_id: String,
    pub status: String,
    pub scope: String,
    pub created_at: chrono::DateTime<Utc>,
}

impl SessionSummary {
    pub fn from_session(session: &crate::session::Session) -> Self {
        Self {
            request_id: session.request_id.clone(),
            status: session.status.to_string(),
            scope: session.scope.to_string(),
            created_at: session.created_at,
        }
    }
}

/// Health report with per-subsystem detail and recent sessions.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub subsystems: serde_json::Value,
    pub recent_sessions: Vec<SessionSummary>,
}

/// Error envelope: `{error: {code, message, request_id?, timestamp}}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn not_found(request_id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "validation-input".to_string(),
            message: format!("unknown session {request_id}"),
            request_id: Some(request_id.to_string()),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "validation-input".to_string(),
            message: message.into(),
            request_id: None,
        }
    }

    pub fn from_error(error: &Error, request_id: Option<String>) -> Self {
        let status = match error.code() {
            "validation-input" => StatusCode::BAD_REQUEST,
            "auth" => StatusCode::UNAUTHORIZED,
            "overloaded" => StatusCode::SERVICE_UNAVAILABLE,
            "deadline-exceeded" => StatusCode::GATEWAY_TIMEOUT,
            "provider-unavailable" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Internal detail never leaks to clients.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal error".to_string()
        } else {
            error.to_string()
        };
        Self {
            status,
            code: error.code().to_string(),
            message,
            request_id,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code,
                "message": self.message,
                "request_id": self.request_id,
                "timestamp": Utc::now(),
            }
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let e = ApiError::from_error(&Error::invalid_input("bad scope"), None);
        assert_eq!(e.status, StatusCode::BAD_REQUEST);

        let e = ApiError::from_error(&Error::Overloaded("full".into()), None);
        assert_eq!(e.status, StatusCode::SERVICE_UNAVAILABLE);

        let e = ApiError::from_error(&Error::Internal("secret detail".into()), None);
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.message, "internal error");
    }

    #[test]
    fn test_credentials_body_debug_redacted() {
        let creds = CredentialsBody {
            username: "admin".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
