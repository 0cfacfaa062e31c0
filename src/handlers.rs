//! Endpoint handlers.
//!
//! Each endpoint has a plain async function holding its logic (`translate`,
//! `create_question`, `question_results`) and a thin axum wrapper that
//! decodes the body, counts the request and turns failures into
//! `{ error, details? }` responses.  Validation always completes before any
//! outbound call is made.

use axum::extract::rejection::{BytesRejection, FailedToBufferBody, JsonRejection};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqwest::Method;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::ident::present;
use crate::metrics::Endpoint;
use crate::prompt::{self, CHAT_COMPLETIONS_PATH};
use crate::upstream::{self, Upstream, UpstreamError};
use crate::{
    AppState, QuestionCreateRequest, QuestionRef, ResultSet, ResultsRequest, TranslationRequest,
    TranslationResult,
};

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

/// Single outbound call with metrics bookkeeping.
async fn call_upstream(
    state: &AppState,
    upstream: Upstream,
    method: Method,
    path: &str,
    body: Option<&Value>,
) -> Result<Value, UpstreamError> {
    let result = state.upstream.call(upstream, method, path, body).await;
    if !matches!(result, Err(UpstreamError::NotConfigured { .. })) {
        state.metrics.record_upstream_call(upstream);
    }
    if let Err(err) = &result {
        state.metrics.record_upstream_error(err);
    }
    result
}

/// Natural language to SQL.  The model is told to emit SELECT-only SQL; the
/// result is returned as-is and is not verified.
pub async fn translate(
    state: &AppState,
    req: TranslationRequest,
) -> Result<TranslationResult, ApiError> {
    let (text, database_id) = match (
        non_blank(req.text.as_deref()),
        present(req.database_id.as_ref()),
    ) {
        (Some(text), Some(id)) => (text, id),
        _ => return Err(ApiError::validation("text and database_id are required")),
    };
    if !state.config.allowed_database_ids.permits(database_id) {
        return Err(ApiError::validation("database_id not allowed"));
    }
    state
        .upstream
        .ensure_configured(Upstream::LanguageModel)
        .map_err(ApiError::Configuration)?;

    let table_hints = req.table_hints.as_deref().unwrap_or(&[]);
    let chat = prompt::chat_request(
        state.upstream.model(),
        text,
        req.schema_hint.as_deref(),
        table_hints,
    );
    let payload =
        upstream::encode_body(Upstream::LanguageModel, &chat).map_err(ApiError::Generation)?;

    let response = call_upstream(
        state,
        Upstream::LanguageModel,
        Method::POST,
        CHAT_COMPLETIONS_PATH,
        Some(&payload),
    )
    .await
    .map_err(ApiError::Generation)?;

    let sql = prompt::first_completion(&response).ok_or(ApiError::GenerationEmpty)?;
    tracing::info!(database_id = %database_id, sql_len = sql.len(), "generated SQL");
    Ok(TranslationResult {
        sql,
        database_id: database_id.clone(),
    })
}

/// Card body for a native (raw SQL) question rendered as a table.
pub fn native_card(name: &str, sql: &str, database_id: &crate::Identifier) -> Value {
    json!({
        "name": name,
        "display": "table",
        "visualization_settings": {},
        "dataset_query": {
            "type": "native",
            "database": database_id,
            "native": {
                "query": sql,
                "template-tags": {},
            },
        },
    })
}

/// Link handed back to the caller.  A created card that already carries a
/// `public_uuid` gets its public share link; no check is made that public
/// sharing was intended.
fn question_url(base: &str, created: &Value, question_id: &Value) -> String {
    let base = base.trim_end_matches('/');
    match created
        .get("public_uuid")
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
    {
        Some(uuid) => format!("{}/public/question/{}", base, uuid),
        None => match question_id {
            Value::String(s) => format!("{}/question/{}", base, s),
            other => format!("{}/question/{}", base, other),
        },
    }
}

pub async fn create_question(
    state: &AppState,
    req: QuestionCreateRequest,
) -> Result<QuestionRef, ApiError> {
    let (name, sql, database_id) = match (
        non_blank(req.name.as_deref()),
        non_blank(req.sql.as_deref()),
        present(req.database_id.as_ref()),
    ) {
        (Some(name), Some(sql), Some(id)) => (name, sql, id),
        _ => {
            return Err(ApiError::validation(
                "name, sql and database_id are required",
            ))
        }
    };
    if !state.config.allowed_database_ids.permits(database_id) {
        return Err(ApiError::validation("database_id not allowed"));
    }

    let card = native_card(name, sql, database_id);
    let created = call_upstream(state, Upstream::Analytics, Method::POST, "/api/card", Some(&card))
        .await
        .map_err(ApiError::CreationFailed)?;

    let question_id = match created.get("id") {
        Some(id) if !id.is_null() => id.clone(),
        _ => {
            return Err(ApiError::CreationFailed(UpstreamError::InvalidResponse {
                upstream: Upstream::Analytics,
                message: "created card has no id".to_string(),
            }))
        }
    };
    let created_name = created
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(name)
        .to_string();
    let base = state.upstream.analytics_base_url().unwrap_or_default();
    let url = question_url(base, &created, &question_id);

    tracing::info!(question_id = %question_id, database_id = %database_id, "created question");
    Ok(QuestionRef {
        question_id,
        name: created_name,
        url,
    })
}

pub async fn question_results(
    state: &AppState,
    req: ResultsRequest,
) -> Result<ResultSet, ApiError> {
    let question_id = present(req.question_id.as_ref())
        .ok_or_else(|| ApiError::validation("question_id is required"))?;
    if !question_id.is_path_safe() {
        return Err(ApiError::validation("question_id is not a valid identifier"));
    }

    let path = format!("/api/card/{}/query", question_id);
    let raw = call_upstream(
        state,
        Upstream::Analytics,
        Method::POST,
        &path,
        Some(&json!({ "parameters": [] })),
    )
    .await
    .map_err(ApiError::ExecutionFailed)?;

    let column = |ptr: &str| {
        raw.pointer(ptr)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    };
    let cols = column("/data/cols");
    let rows = column("/data/rows");
    tracing::debug!(question_id = %question_id, rows = rows.len(), "fetched question results");
    Ok(ResultSet { cols, rows, raw })
}

fn respond<T: Serialize>(
    state: &AppState,
    endpoint: Endpoint,
    result: Result<T, ApiError>,
) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => {
            state.metrics.record_failure(endpoint);
            if err.status().is_client_error() {
                tracing::warn!(endpoint = endpoint.as_str(), error = %err, "request rejected");
            } else {
                let cause = err.upstream_error().map(|e| e.to_string());
                tracing::error!(endpoint = endpoint.as_str(), error = %err, cause = ?cause, "request failed");
            }
            err.into_response()
        }
    }
}

fn rejection_error(rejection: JsonRejection) -> ApiError {
    match rejection {
        JsonRejection::BytesRejection(BytesRejection::FailedToBufferBody(
            FailedToBufferBody::LengthLimitError(_),
        )) => ApiError::BodyTooLarge,
        other => ApiError::InvalidBody(other.body_text()),
    }
}

fn decode<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(inner)| inner).map_err(rejection_error)
}

pub async fn translate_handler(
    State(state): State<AppState>,
    payload: Result<Json<TranslationRequest>, JsonRejection>,
) -> Response {
    let endpoint = Endpoint::Translate;
    state.metrics.record_request(endpoint);
    let result = match decode(payload) {
        Ok(req) => translate(&state, req).await,
        Err(err) => Err(err),
    };
    respond(&state, endpoint, result)
}

pub async fn create_question_handler(
    State(state): State<AppState>,
    payload: Result<Json<QuestionCreateRequest>, JsonRejection>,
) -> Response {
    let endpoint = Endpoint::CreateQuestion;
    state.metrics.record_request(endpoint);
    let result = match decode(payload) {
        Ok(req) => create_question(&state, req).await,
        Err(err) => Err(err),
    };
    respond(&state, endpoint, result)
}

pub async fn question_results_handler(
    State(state): State<AppState>,
    payload: Result<Json<ResultsRequest>, JsonRejection>,
) -> Response {
    let endpoint = Endpoint::QuestionResults;
    state.metrics.record_request(endpoint);
    let result = match decode(payload) {
        Ok(req) => question_results(&state, req).await,
        Err(err) => Err(err),
    };
    respond(&state, endpoint, result)
}

/// Liveness probe.  Never touches an upstream.
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let body = json!({
        "ok": true,
        "service": state.config.service_name,
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(body)).into_response()
}

pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        state.metrics.render(),
    )
        .into_response()
}
