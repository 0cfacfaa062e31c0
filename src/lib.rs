//! Core library for nlq-bridge.  This module holds the request/response
//! shapes, the shared application state and the router; the endpoint logic
//! lives in `handlers`.
//!
//! The bridge is stateless: every request is validated, forwarded to at most
//! one upstream and reshaped.  Configuration is read once into an immutable
//! `AppConfig` and passed in explicitly so tests can substitute their own.

mod allowlist;
mod config;
mod error;
pub mod handlers;
mod ident;
pub mod metrics;
pub mod prompt;
pub mod upstream;

pub use allowlist::AllowList;
pub use config::{
    AnalyticsConfig, AppConfig, LanguageModelConfig, DEFAULT_MODEL, DEFAULT_UPSTREAM_TIMEOUT,
};
pub use error::{ApiError, ErrorResponse};
pub use ident::Identifier;

use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::metrics::Metrics;
use crate::upstream::UpstreamClient;

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct TranslationRequest {
    pub text: Option<String>,
    pub database_id: Option<Identifier>,
    pub schema_hint: Option<String>,
    /// Table names used only to steer generation; never checked against the
    /// real schema.
    pub table_hints: Option<Vec<String>>,
}

/// `sql` is model output.  It has not been parsed and may not be read-only.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TranslationResult {
    pub sql: String,
    pub database_id: Identifier,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct QuestionCreateRequest {
    pub name: Option<String>,
    pub sql: Option<String>,
    pub database_id: Option<Identifier>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct QuestionRef {
    pub question_id: serde_json::Value,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct ResultsRequest {
    pub question_id: Option<Identifier>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ResultSet {
    pub cols: Vec<serde_json::Value>,
    pub rows: Vec<serde_json::Value>,
    /// Upstream payload, untouched, for fields not surfaced above.
    pub raw: serde_json::Value,
}

/// Shared across handlers.  Everything inside is read-only apart from the
/// atomic counters in `metrics`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub upstream: UpstreamClient,
    pub metrics: Arc<Metrics>,
}

pub fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let upstream = UpstreamClient::new(&config).context("failed to build outbound HTTP client")?;
    Ok(AppState {
        config: Arc::new(config),
        upstream,
        metrics: Arc::new(Metrics::default()),
    })
}

/// Build state from environment variables; see `AppConfig::from_env` for the
/// variables read.
pub fn build_state_from_env() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    build_state(config)
}

/// Build the Axum router and attach handlers and middleware.
pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.config.max_request_bytes;

    let router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route(
            "/natural_language_to_sql",
            post(handlers::translate_handler),
        )
        .route("/create_question", post(handlers::create_question_handler))
        .route(
            "/get_question_results",
            post(handlers::question_results_handler),
        );

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
