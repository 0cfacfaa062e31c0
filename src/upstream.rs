//! Outbound calls to the two services this bridge fronts.
//!
//! `UpstreamClient` performs exactly one HTTP request per call: no retries, no
//! caching.  Every failure is normalised into `UpstreamError`, tagged with the
//! upstream it came from so handlers can map it without inspecting messages.

use std::fmt;
use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use crate::config::{AnalyticsConfig, AppConfig, LanguageModelConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Upstream {
    Analytics,
    LanguageModel,
}

impl Upstream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Upstream::Analytics => "analytics",
            Upstream::LanguageModel => "language_model",
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("request for {upstream} upstream could not be encoded: {message}")]
    Encoding { upstream: Upstream, message: String },
    #[error("{upstream} upstream is not configured: {missing} missing")]
    NotConfigured {
        upstream: Upstream,
        missing: &'static str,
    },
    #[error("{upstream} upstream unreachable: {message}")]
    Unreachable {
        upstream: Upstream,
        timed_out: bool,
        message: String,
    },
    #[error("{upstream} upstream responded with status {status}")]
    Rejected {
        upstream: Upstream,
        status: u16,
        body: Value,
    },
    #[error("{upstream} upstream returned an unusable response: {message}")]
    InvalidResponse { upstream: Upstream, message: String },
}

impl UpstreamError {
    pub fn upstream(&self) -> Upstream {
        match self {
            UpstreamError::Encoding { upstream, .. }
            | UpstreamError::NotConfigured { upstream, .. }
            | UpstreamError::Unreachable { upstream, .. }
            | UpstreamError::Rejected { upstream, .. }
            | UpstreamError::InvalidResponse { upstream, .. } => *upstream,
        }
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Encoding { .. } => "invalid_request",
            UpstreamError::NotConfigured { .. } => "not_configured",
            UpstreamError::Unreachable {
                timed_out: true, ..
            } => "timeout",
            UpstreamError::Unreachable { .. } => "unreachable",
            UpstreamError::Rejected { .. } => "rejected",
            UpstreamError::InvalidResponse { .. } => "invalid_response",
        }
    }

    /// Diagnostic payload surfaced to callers under `details`.
    pub fn details(&self) -> Value {
        match self {
            UpstreamError::Rejected {
                upstream,
                status,
                body,
            } => serde_json::json!({
                "upstream": upstream.as_str(),
                "status": status,
                "body": body,
            }),
            other => serde_json::json!({
                "upstream": other.upstream().as_str(),
                "kind": other.kind(),
                "message": other.to_string(),
            }),
        }
    }
}

/// Encode a request body for `upstream`.  Fails before any network traffic.
pub fn encode_body<T: Serialize + ?Sized>(
    upstream: Upstream,
    body: &T,
) -> Result<Value, UpstreamError> {
    serde_json::to_value(body).map_err(|err| UpstreamError::Encoding {
        upstream,
        message: err.to_string(),
    })
}

enum Auth {
    Header(&'static str, String),
    Bearer(String),
}

/// Shared outbound client.  Cheap to clone; the inner reqwest client pools
/// connections.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    analytics: AnalyticsConfig,
    language_model: LanguageModelConfig,
}

impl UpstreamClient {
    pub fn new(config: &AppConfig) -> Result<Self, reqwest::Error> {
        Self::with_timeout(
            config.analytics.clone(),
            config.language_model.clone(),
            config.upstream_timeout,
        )
    }

    pub fn with_timeout(
        analytics: AnalyticsConfig,
        language_model: LanguageModelConfig,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            analytics,
            language_model,
        })
    }

    /// Base URL of the analytics platform, used to build links for callers.
    pub fn analytics_base_url(&self) -> Option<&str> {
        self.analytics.base_url.as_deref()
    }

    pub fn model(&self) -> &str {
        &self.language_model.model
    }

    /// Fails with `NotConfigured` if the upstream lacks a base URL or
    /// credential.  Handlers use this to validate before building a payload.
    pub fn ensure_configured(&self, upstream: Upstream) -> Result<(), UpstreamError> {
        self.resolve(upstream).map(|_| ())
    }

    fn resolve(&self, upstream: Upstream) -> Result<(&str, Auth), UpstreamError> {
        match upstream {
            Upstream::Analytics => {
                let base = self.analytics.base_url.as_deref().ok_or(
                    UpstreamError::NotConfigured {
                        upstream,
                        missing: "METABASE_URL",
                    },
                )?;
                let auth = if let Some(key) = &self.analytics.api_key {
                    Auth::Header("x-api-key", key.clone())
                } else if let Some(token) = &self.analytics.session_token {
                    Auth::Header("x-metabase-session", token.clone())
                } else {
                    return Err(UpstreamError::NotConfigured {
                        upstream,
                        missing: "METABASE_API_KEY or METABASE_SESSION_TOKEN",
                    });
                };
                Ok((base, auth))
            }
            Upstream::LanguageModel => {
                let key = self.language_model.api_key.as_ref().ok_or(
                    UpstreamError::NotConfigured {
                        upstream,
                        missing: "OPENAI_API_KEY",
                    },
                )?;
                Ok((self.language_model.base_url.as_str(), Auth::Bearer(key.clone())))
            }
        }
    }

    /// Perform one call.  `target` is either a path joined to the upstream's
    /// base URL or a full `http(s)://` URL.
    pub async fn call(
        &self,
        upstream: Upstream,
        method: Method,
        target: &str,
        body: Option<&Value>,
    ) -> Result<Value, UpstreamError> {
        let (base, auth) = self.resolve(upstream)?;
        let url = join_url(base, target);
        tracing::debug!(upstream = %upstream, method = %method, url = %url, "calling upstream");

        let mut rb = self
            .http
            .request(method.clone(), &url)
            .header("accept", "application/json");
        rb = match auth {
            Auth::Header(name, value) => rb.header(name, value),
            Auth::Bearer(token) => rb.bearer_auth(token),
        };
        if let Some(body) = body {
            rb = rb.json(body);
        }

        let resp = rb.send().await.map_err(|err| {
            let timed_out = err.is_timeout();
            tracing::warn!(upstream = %upstream, url = %url, timed_out, error = %err, "upstream call failed");
            UpstreamError::Unreachable {
                upstream,
                timed_out,
                message: err.to_string(),
            }
        })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|err| UpstreamError::Unreachable {
            upstream,
            timed_out: err.is_timeout(),
            message: err.to_string(),
        })?;

        if !status.is_success() {
            tracing::warn!(upstream = %upstream, url = %url, status = status.as_u16(), "upstream rejected request");
            let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
            return Err(UpstreamError::Rejected {
                upstream,
                status: status.as_u16(),
                body,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| UpstreamError::InvalidResponse {
            upstream,
            message: err.to_string(),
        })
    }
}

fn join_url(base: &str, target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        return target.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        target.trim_start_matches('/')
    )
}
