//! HTTP handlers. The API layer only validates requests, forwards to the
//! scheduler, queries session state, and renders reports.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::behavioral::{BehavioralConfig, Credentials};
use crate::catalog::detect_language;
use crate::engine::Engine;
use crate::error::Error;
use crate::model::bundle::{CodeFile, InputBundle, Screenshot};
use crate::model::result::{OverallStatus, ResultKind, UnifiedResult};
use crate::model::scope::ValidationScope;
use crate::report::{render, ReportFormat};
use crate::session::{Session, SessionStatus, TechnologyContext};

use super::types::{
    AcceptedResponse, ApiError, BehavioralValidateRequest, DeleteResponse, HealthResponse,
    SessionSummary, StatusResponse, ValidateConfig,
};

fn technology_context(
    name: &str,
    version: Option<String>,
    framework: Option<String>,
) -> TechnologyContext {
    let mut tech = TechnologyContext::new(name.to_ascii_lowercase());
    tech.version = version;
    tech.framework = framework;
    tech
}

fn behavioral_config(config: &ValidateConfig) -> BehavioralConfig {
    let mut behavioral = BehavioralConfig::new(
        config.scenarios.clone(),
        config.scenario_timeout_secs.unwrap_or(120),
    );
    if let Some(creds) = &config.credentials {
        behavioral = behavioral
            .with_credentials(Credentials::new(&creds.username, &creds.password));
    }
    behavioral
}

fn build_session(
    engine: &Engine,
    config: &ValidateConfig,
    source_bundle: InputBundle,
    target_bundle: InputBundle,
) -> Result<Session, ApiError> {
    for tech in [&config.source_technology, &config.target_technology] {
        if !engine.catalog.is_supported(tech) {
            return Err(ApiError::bad_request(format!(
                "unsupported technology: {tech}"
            )));
        }
    }

    let limits = engine.config.bundle_limits();
    for bundle in [&source_bundle, &target_bundle] {
        bundle
            .validate(&limits)
            .map_err(|e| ApiError::from_error(&e, None))?;
    }

    let mut session = Session::new(
        technology_context(
            &config.source_technology,
            config.source_version.clone(),
            config.source_framework.clone(),
        ),
        technology_context(
            &config.target_technology,
            config.target_version.clone(),
            config.target_framework.clone(),
        ),
        config.scope,
        source_bundle,
        target_bundle,
    );
    if let Some(tenant) = &config.tenant {
        session = session.with_tenant(tenant.clone());
    }
    if let Some(priority) = config.priority {
        session = session.with_priority(priority);
    }
    if config.scope.includes_behavioral() {
        session = session.with_behavioral(behavioral_config(config));
    }
    Ok(session)
}

async fn parse_multipart(
    mut multipart: Multipart,
) -> Result<(ValidateConfig, InputBundle, InputBundle), ApiError> {
    let mut config: Option<ValidateConfig> = None;
    let mut source = InputBundle::new();
    let mut target = InputBundle::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        let file_name = field.file_name().map(String::from);
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("failed to read part {name}: {e}")))?;

        match name.as_str() {
            "config" => {
                config = Some(
                    serde_json::from_slice(&data)
                        .map_err(|e| ApiError::bad_request(format!("invalid config: {e}")))?,
                );
            }
            "source_file" | "source_files" | "target_file" | "target_files" => {
                let path = file_name
                    .ok_or_else(|| ApiError::bad_request(format!("{name} part needs a filename")))?;
                if path.contains("..") || path.starts_with('/') {
                    return Err(ApiError::bad_request(format!("invalid filename: {path}")));
                }
                let content = String::from_utf8(data.to_vec())
                    .map_err(|_| ApiError::bad_request(format!("{path} is not valid UTF-8")))?;
                let language = detect_language(&path);
                let file = CodeFile::new(path, language, content);
                if name.starts_with("source") {
                    source.files.push(file);
                } else {
                    target.files.push(file);
                }
            }
            "source_screenshot" | "target_screenshot" => {
                let reference = file_name
                    .ok_or_else(|| ApiError::bad_request(format!("{name} part needs a filename")))?;
                let shot = Screenshot::new(reference, data.to_vec());
                if name.starts_with("source") {
                    source.screenshots.push(shot);
                } else {
                    target.screenshots.push(shot);
                }
            }
            other => {
                return Err(ApiError::bad_request(format!("unexpected part: {other}")));
            }
        }
    }

    let config = config.ok_or_else(|| ApiError::bad_request("missing config part"))?;
    Ok((config, source, target))
}

fn submit(engine: &Engine, session: Session) -> Result<Response, ApiError> {
    let request_id = engine
        .scheduler
        .submit(session)
        .map_err(|e| ApiError::from_error(&e, None))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            request_id,
            status: "accepted",
        }),
    )
        .into_response())
}

/// `POST /api/validate` — multipart static validation submission.
pub async fn submit_validation(
    State(engine): State<Arc<Engine>>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let (config, source, target) = parse_multipart(multipart).await?;
    if config.scope.includes_behavioral() {
        return Err(ApiError::bad_request(
            "behavioral scopes go through /api/behavioral/validate or /api/validate/hybrid",
        ));
    }
    let session = build_session(&engine, &config, source, target)?;
    submit(&engine, session)
}

/// `POST /api/behavioral/validate` — JSON behavioral-only submission.
pub async fn submit_behavioral(
    State(engine): State<Arc<Engine>>,
    Json(request): Json<BehavioralValidateRequest>,
) -> Result<Response, ApiError> {
    let config = ValidateConfig {
        source_technology: "javascript".to_string(),
        source_version: None,
        source_framework: None,
        target_technology: "javascript".to_string(),
        target_version: None,
        target_framework: None,
        scope: ValidationScope::Behavioral,
        tenant: request.tenant.clone(),
        priority: None,
        source_url: Some(request.source_url.clone()),
        target_url: Some(request.target_url.clone()),
        scenarios: request.scenarios.clone(),
        scenario_timeout_secs: request.timeout,
        credentials: request.credentials.clone(),
    };

    let source = InputBundle::new().with_url(request.source_url);
    let target = InputBundle::new().with_url(request.target_url);
    let session = build_session(&engine, &config, source, target)?;
    submit(&engine, session)
}

/// `POST /api/validate/hybrid` — multipart static + behavioral submission.
pub async fn submit_hybrid(
    State(engine): State<Arc<Engine>>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let (config, mut source, mut target) = parse_multipart(multipart).await?;
    if !config.scope.includes_behavioral() {
        return Err(ApiError::bad_request(
            "hybrid submissions need a behavioral scope (business-rules or full)",
        ));
    }
    source.url = config.source_url.clone();
    target.url = config.target_url.clone();
    let session = build_session(&engine, &config, source, target)?;
    submit(&engine, session)
}

fn progress_of(status: SessionStatus) -> f64 {
    match status {
        SessionStatus::Pending => 0.0,
        SessionStatus::Queued => 0.1,
        SessionStatus::Processing => 0.5,
        _ => 1.0,
    }
}

/// `GET /api/validate/:request_id/status`.
pub async fn session_status(
    State(engine): State<Arc<Engine>>,
    Path(request_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let session = engine
        .store
        .get(&request_id)
        .map_err(|e| ApiError::from_error(&e, Some(request_id.clone())))?
        .ok_or_else(|| ApiError::not_found(&request_id))?;

    let result_available = session.status.is_terminal()
        && engine
            .store
            .result(&request_id)
            .map(|r| r.is_some())
            .unwrap_or(false);

    Ok(Json(StatusResponse {
        request_id,
        status: session.status.to_string(),
        progress: progress_of(session.status),
        result_available,
    }))
}

/// A terminal session with no stored result still answers in the result
/// shape; the status carries the failure mode.
fn placeholder_result(session: &Session) -> UnifiedResult {
    let summary = match session.status {
        SessionStatus::Cancelled => "session cancelled before completion".to_string(),
        SessionStatus::TimedOut => "session exceeded its deadline".to_string(),
        _ => "session failed before producing a result".to_string(),
    };
    UnifiedResult {
        overall_status: OverallStatus::Rejected,
        fidelity_score: 0.0,
        summary,
        discrepancies: Vec::new(),
        static_result: None,
        behavioral_result: None,
        total_execution_time_secs: 0.0,
        timestamp: Utc::now(),
        kind: ResultKind::StaticOnly,
        usage: None,
    }
}

fn load_result(
    engine: &Engine,
    request_id: &str,
) -> Result<std::result::Result<UnifiedResult, SessionStatus>, ApiError> {
    let session = engine
        .store
        .get(request_id)
        .map_err(|e| ApiError::from_error(&e, Some(request_id.to_string())))?
        .ok_or_else(|| ApiError::not_found(request_id))?;

    if !session.status.is_terminal() {
        return Ok(Err(session.status));
    }

    let result = engine
        .store
        .result(request_id)
        .map_err(|e| ApiError::from_error(&e, Some(request_id.to_string())))?
        .unwrap_or_else(|| placeholder_result(&session));
    Ok(Ok(result))
}

/// `GET /api/validate/:request_id/result` — 200 with the unified result, or
/// 202 while the session is still running.
pub async fn session_result(
    State(engine): State<Arc<Engine>>,
    Path(request_id): Path<String>,
) -> Result<Response, ApiError> {
    match load_result(&engine, &request_id)? {
        Ok(result) => Ok((
            StatusCode::OK,
            [("x-request-id", request_id)],
            Json(result),
        )
            .into_response()),
        Err(status) => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "request_id": request_id,
                "status": status.to_string(),
            })),
        )
            .into_response()),
    }
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    format: Option<String>,
}

/// `GET /api/validate/:request_id/report?format=json|html|md`.
pub async fn session_report(
    State(engine): State<Arc<Engine>>,
    Path(request_id): Path<String>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    let format: ReportFormat = query
        .format
        .as_deref()
        .unwrap_or("json")
        .parse()
        .map_err(|e: Error| ApiError::from_error(&e, Some(request_id.clone())))?;

    match load_result(&engine, &request_id)? {
        Ok(result) => {
            let rendered = render(&request_id, &result, format)
                .map_err(|e| ApiError::from_error(&e, Some(request_id.clone())))?;
            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE.as_str(), format.content_type()),
                    ("x-request-id", request_id.as_str()),
                ],
                rendered,
            )
                .into_response())
        }
        Err(status) => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "request_id": request_id,
                "status": status.to_string(),
            })),
        )
            .into_response()),
    }
}

/// `DELETE /api/validate/:request_id` — cancel a running session, or
/// soft-delete a terminal one.
pub async fn cancel_or_delete(
    State(engine): State<Arc<Engine>>,
    Path(request_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let session = engine
        .store
        .get(&request_id)
        .map_err(|e| ApiError::from_error(&e, Some(request_id.clone())))?
        .ok_or_else(|| ApiError::not_found(&request_id))?;

    if session.status.is_terminal() {
        engine
            .store
            .soft_delete(&request_id, "api")
            .map_err(|e| ApiError::from_error(&e, Some(request_id.clone())))?;
        return Ok(Json(DeleteResponse {
            request_id,
            status: "deleted".to_string(),
        }));
    }

    let status = engine
        .scheduler
        .cancel(&request_id)
        .map_err(|e| ApiError::from_error(&e, Some(request_id.clone())))?;
    Ok(Json(DeleteResponse {
        request_id,
        status: status.to_string(),
    }))
}

/// `GET /api/technologies`.
pub async fn technologies(State(engine): State<Arc<Engine>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "technologies": engine.catalog.technologies.clone(),
        "scopes": engine.catalog.scopes(),
    }))
}

/// `GET /health`.
pub async fn health(State(engine): State<Arc<Engine>>) -> Json<HealthResponse> {
    // One listing doubles as the store liveness probe and the operator's
    // recent-session view.
    let recent = engine.store.list_recent(10);
    let store_ok = recent.is_ok();
    let recent_sessions: Vec<SessionSummary> = recent
        .unwrap_or_default()
        .iter()
        .map(SessionSummary::from_session)
        .collect();

    let cache_stats = engine.cache.stats().await;
    let cache_ok = cache_stats.is_ok();
    let cache_report = match cache_stats {
        Ok(stats) => serde_json::json!({
            "hits": stats.hits,
            "misses": stats.misses,
            "hit_rate": stats.hit_rate(),
            "entries": stats.entry_count,
        }),
        Err(_) => serde_json::json!("error"),
    };

    let breakers = engine.dispatcher.breaker_states();
    let any_breaker_open = breakers.iter().any(|(_, state)| *state == "open");

    let status = if store_ok && cache_ok && !any_breaker_open {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        subsystems: serde_json::json!({
            "store": if store_ok { "ok" } else { "error" },
            "cache": cache_report,
            "scheduler": {
                "queue_depth": engine.scheduler.queue_depth(),
                "active_sessions": engine.scheduler.active_count(),
            },
            "providers": breakers
                .into_iter()
                .map(|(provider, state)| (provider, serde_json::json!(state)))
                .collect::<serde_json::Map<_, _>>(),
            "progress_topics": engine.broker.topic_count(),
        }),
        recent_sessions,
    })
}
