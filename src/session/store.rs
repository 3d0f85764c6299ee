//! SQLite-backed session store.
//!
//! Write-through persistence for the session aggregate: every state
//! transition is flushed here before the event is acknowledged. Updates go
//! through a compare-and-swap on the version counter; losers get a version
//! conflict and re-read.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::behavioral::{BehavioralConfig, ScenarioResult};
use crate::error::{Error, Result};
use crate::model::bundle::InputBundle;
use crate::model::result::UnifiedResult;

use super::machine::{apply_transition, Transition};
use super::schema::{initialize_schema, is_initialized};
use super::types::{Priority, Session, SessionLogEntry, SessionStatus, TechnologyContext};

/// What startup recovery found.
#[derive(Debug, Clone, Default)]
pub struct StartupRecovery {
    /// Sessions still queued; the scheduler re-admits these
    pub requeued: Vec<String>,
    /// Sessions that were mid-flight; marked failed with reason "interrupted"
    pub interrupted: Vec<String>,
}

/// Session persistence seam.
pub trait SessionStore: Send + Sync {
    fn create(&self, session: &Session) -> Result<()>;
    fn get(&self, request_id: &str) -> Result<Option<Session>>;

    /// Compare-and-swap status update. A repeat of the current status is an
    /// idempotent no-op that leaves the version untouched.
    fn update_status(
        &self,
        request_id: &str,
        expected_version: u64,
        to: SessionStatus,
    ) -> Result<Session>;

    fn soft_delete(&self, request_id: &str, actor: &str) -> Result<()>;

    fn append_log(&self, request_id: &str, entry: &SessionLogEntry) -> Result<()>;
    fn logs(&self, request_id: &str) -> Result<Vec<SessionLogEntry>>;

    fn save_result(&self, request_id: &str, result: &UnifiedResult) -> Result<()>;
    fn result(&self, request_id: &str) -> Result<Option<UnifiedResult>>;

    fn save_scenarios(&self, request_id: &str, scenarios: &[ScenarioResult]) -> Result<()>;

    /// Crash recovery at startup: queued sessions are returned for
    /// re-admission, processing sessions are marked failed.
    fn recover_startup(&self) -> Result<StartupRecovery>;

    fn list_recent(&self, limit: usize) -> Result<Vec<Session>>;
}

/// Serialized into the `input_bundle` column.
#[derive(Debug, Serialize, Deserialize)]
struct SessionPayload {
    source_bundle: InputBundle,
    target_bundle: InputBundle,
    #[serde(skip_serializing_if = "Option::is_none")]
    behavioral: Option<BehavioralConfig>,
    priority: Priority,
}

/// SQLite implementation of [`SessionStore`].
pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Storage(e.to_string()))?;
        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(|e| Error::Storage(e.to_string()))?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing and ephemeral runs).
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| Error::Storage(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::Storage(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("failed to lock connection: {e}")))?;
        f(&conn).map_err(|e| Error::Storage(e.to_string()))
    }

    fn session_row_id(conn: &Connection, request_id: &str) -> rusqlite::Result<Option<i64>> {
        conn.query_row(
            "SELECT id FROM validation_sessions WHERE request_id = ?1",
            params![request_id],
            |row| row.get(0),
        )
        .optional()
    }

    fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
        let request_id: String = row.get("request_id")?;
        let status_text: String = row.get("status")?;
        let source_tech_json: String = row.get("source_tech")?;
        let target_tech_json: String = row.get("target_tech")?;
        let scope_text: String = row.get("scope")?;
        let payload_json: String = row.get("input_bundle")?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        let deleted_at: Option<String> = row.get("deleted_at")?;
        let deleted_by: Option<String> = row.get("deleted_by")?;
        let tenant: Option<String> = row.get("tenant")?;
        let version: i64 = row.get("version")?;

        let parse_err = |e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                e.into(),
            )
        };

        let status: SessionStatus = status_text.parse().map_err(parse_err)?;
        let scope = scope_text.parse().map_err(parse_err)?;
        let source_tech: TechnologyContext =
            serde_json::from_str(&source_tech_json).map_err(|e| parse_err(e.to_string()))?;
        let target_tech: TechnologyContext =
            serde_json::from_str(&target_tech_json).map_err(|e| parse_err(e.to_string()))?;
        let payload: SessionPayload =
            serde_json::from_str(&payload_json).map_err(|e| parse_err(e.to_string()))?;

        let parse_ts = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| parse_err(e.to_string()))
        };

        Ok(Session {
            request_id,
            tenant,
            source_tech,
            target_tech,
            scope,
            source_bundle: payload.source_bundle,
            target_bundle: payload.target_bundle,
            behavioral: payload.behavioral,
            priority: payload.priority,
            status,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
            deleted_at: deleted_at.as_deref().map(parse_ts).transpose()?,
            deleted_by,
            version: version as u64,
        })
    }
}

const SESSION_COLUMNS: &str = "request_id, status, tenant, source_tech, target_tech, scope,
        input_bundle, created_at, updated_at, deleted_at, deleted_by, version";

impl SessionStore for SqliteSessionStore {
    fn create(&self, session: &Session) -> Result<()> {
        let payload = SessionPayload {
            source_bundle: session.source_bundle.clone(),
            target_bundle: session.target_bundle.clone(),
            behavioral: session.behavioral.clone(),
            priority: session.priority,
        };
        let payload_json = serde_json::to_string(&payload)?;
        let source_tech = serde_json::to_string(&session.source_tech)?;
        let target_tech = serde_json::to_string(&session.target_tech)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO validation_sessions (
                    request_id, status, tenant, source_tech, target_tech, scope,
                    input_bundle, created_at, updated_at, version
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    session.request_id,
                    session.status.as_str(),
                    session.tenant,
                    source_tech,
                    target_tech,
                    session.scope.as_str(),
                    payload_json,
                    session.created_at.to_rfc3339(),
                    session.updated_at.to_rfc3339(),
                    session.version as i64,
                ],
            )?;
            Ok(())
        })
    }

    fn get(&self, request_id: &str) -> Result<Option<Session>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM validation_sessions WHERE request_id = ?1"
                ),
                params![request_id],
                Self::row_to_session,
            )
            .optional()
        })
    }

    fn update_status(
        &self,
        request_id: &str,
        expected_version: u64,
        to: SessionStatus,
    ) -> Result<Session> {
        let current = self
            .get(request_id)?
            .ok_or_else(|| Error::invalid_input(format!("unknown session {request_id}")))?;

        match apply_transition(current.status, to)? {
            Transition::NoOp => return Ok(current),
            Transition::Applied(_) => {}
        }

        let updated = self.with_conn(|conn| {
            conn.execute(
                "UPDATE validation_sessions
                 SET status = ?1, updated_at = ?2, version = version + 1
                 WHERE request_id = ?3 AND version = ?4",
                params![
                    to.as_str(),
                    Utc::now().to_rfc3339(),
                    request_id,
                    expected_version as i64,
                ],
            )
        })?;

        if updated == 0 {
            return Err(Error::VersionConflict(request_id.to_string()));
        }

        self.get(request_id)?
            .ok_or_else(|| Error::Internal(format!("session {request_id} vanished mid-update")))
    }

    fn soft_delete(&self, request_id: &str, actor: &str) -> Result<()> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE validation_sessions
                 SET deleted_at = ?1, deleted_by = ?2
                 WHERE request_id = ?3 AND deleted_at IS NULL",
                params![Utc::now().to_rfc3339(), actor, request_id],
            )
        })?;
        if changed == 0 {
            tracing::debug!(request_id, "soft delete was a no-op");
        }
        Ok(())
    }

    fn append_log(&self, request_id: &str, entry: &SessionLogEntry) -> Result<()> {
        let payload = entry
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.with_conn(|conn| {
            let session_id = Self::session_row_id(conn, request_id)?.ok_or(
                rusqlite::Error::QueryReturnedNoRows,
            )?;
            conn.execute(
                "INSERT INTO session_logs (session_id, ts, level, message, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session_id,
                    entry.ts.to_rfc3339(),
                    entry.level.as_str(),
                    entry.message,
                    payload,
                ],
            )?;
            Ok(())
        })
    }

    fn logs(&self, request_id: &str) -> Result<Vec<SessionLogEntry>> {
        self.with_conn(|conn| {
            let session_id = match Self::session_row_id(conn, request_id)? {
                Some(id) => id,
                None => return Ok(Vec::new()),
            };
            let mut stmt = conn.prepare(
                "SELECT ts, level, message, payload FROM session_logs
                 WHERE session_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![session_id], |row| {
                let ts: String = row.get(0)?;
                let level: String = row.get(1)?;
                let message: String = row.get(2)?;
                let payload: Option<String> = row.get(3)?;
                Ok((ts, level, message, payload))
            })?;

            let mut entries = Vec::new();
            for row in rows {
                let (ts, level, message, payload) = row?;
                entries.push(SessionLogEntry {
                    ts: DateTime::parse_from_rfc3339(&ts)
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    level: match level.as_str() {
                        "debug" => super::types::LogLevel::Debug,
                        "warn" => super::types::LogLevel::Warn,
                        "error" => super::types::LogLevel::Error,
                        _ => super::types::LogLevel::Info,
                    },
                    message,
                    payload: payload.and_then(|p| serde_json::from_str(&p).ok()),
                });
            }
            Ok(entries)
        })
    }

    fn save_result(&self, request_id: &str, result: &UnifiedResult) -> Result<()> {
        let payload = serde_json::to_string(result)?;
        let kind = serde_json::to_value(result.kind)?
            .as_str()
            .unwrap_or("static-only")
            .to_string();
        let status = result.overall_status.to_string();

        self.with_conn(|conn| {
            let session_id = Self::session_row_id(conn, request_id)?.ok_or(
                rusqlite::Error::QueryReturnedNoRows,
            )?;

            conn.execute(
                "INSERT INTO validation_results (
                    session_id, kind, overall_status, fidelity_score, summary,
                    execution_time, payload, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    session_id,
                    kind,
                    status,
                    result.fidelity_score,
                    result.summary,
                    result.total_execution_time_secs,
                    payload,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            let result_id = conn.last_insert_rowid();

            for d in &result.discrepancies {
                let context = d
                    .validation_context
                    .as_ref()
                    .and_then(|c| serde_json::to_string(c).ok());
                let component = d
                    .component
                    .and_then(|c| serde_json::to_value(c).ok())
                    .and_then(|v| v.as_str().map(String::from));
                let kind = serde_json::to_value(d.kind)
                    .ok()
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_default();

                conn.execute(
                    "INSERT INTO validation_discrepancies (
                        session_id, result_id, kind, severity, description,
                        source_element, target_element, recommendation,
                        confidence, component, context
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        session_id,
                        result_id,
                        kind,
                        d.severity.to_string(),
                        d.description,
                        d.source_element,
                        d.target_element,
                        d.recommendation,
                        d.confidence,
                        component,
                        context,
                    ],
                )?;
            }
            Ok(())
        })
    }

    fn result(&self, request_id: &str) -> Result<Option<UnifiedResult>> {
        let payload: Option<String> = self.with_conn(|conn| {
            let session_id = match Self::session_row_id(conn, request_id)? {
                Some(id) => id,
                None => return Ok(None),
            };
            conn.query_row(
                "SELECT payload FROM validation_results
                 WHERE session_id = ?1 ORDER BY id DESC LIMIT 1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()
        })?;

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save_scenarios(&self, request_id: &str, scenarios: &[ScenarioResult]) -> Result<()> {
        self.with_conn(|conn| {
            let session_id = Self::session_row_id(conn, request_id)?.ok_or(
                rusqlite::Error::QueryReturnedNoRows,
            )?;

            for scenario in scenarios {
                let comparison = serde_json::to_string(&scenario.discrepancies)
                    .unwrap_or_else(|_| "[]".to_string());
                let source_trace = scenario
                    .source_trace
                    .as_ref()
                    .and_then(|t| serde_json::to_string(t).ok());
                let target_trace = scenario
                    .target_trace
                    .as_ref()
                    .and_then(|t| serde_json::to_string(t).ok());
                let status = if scenario.error.is_some() {
                    "error"
                } else {
                    "completed"
                };

                conn.execute(
                    "INSERT INTO behavioral_test_results (
                        session_id, scenario_name, execution_status, source_trace,
                        target_trace, comparison, execution_duration, error
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        session_id,
                        scenario.name,
                        status,
                        source_trace,
                        target_trace,
                        comparison,
                        scenario.duration_secs,
                        scenario.error,
                    ],
                )?;
            }
            Ok(())
        })
    }

    fn recover_startup(&self) -> Result<StartupRecovery> {
        let mut recovery = StartupRecovery::default();

        let rows: Vec<(String, String)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT request_id, status FROM validation_sessions
                 WHERE status IN ('pending', 'queued', 'processing')",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })?;

        for (request_id, status) in rows {
            if status == "queued" {
                recovery.requeued.push(request_id);
            } else {
                // pending and processing sessions were mid-flight; a re-run
                // is a fresh session.
                self.with_conn(|conn| {
                    conn.execute(
                        "UPDATE validation_sessions
                         SET status = 'failed', updated_at = ?1, version = version + 1
                         WHERE request_id = ?2",
                        params![Utc::now().to_rfc3339(), request_id],
                    )?;
                    Ok(())
                })?;
                self.append_log(
                    &request_id,
                    &SessionLogEntry::error("session interrupted by engine restart")
                        .with_payload(serde_json::json!({"reason": "interrupted"})),
                )?;
                recovery.interrupted.push(request_id);
            }
        }

        Ok(recovery)
    }

    fn list_recent(&self, limit: usize) -> Result<Vec<Session>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM validation_sessions
                 WHERE deleted_at IS NULL
                 ORDER BY created_at DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit as i64], Self::row_to_session)?;
            rows.collect()
        })
    }
}
