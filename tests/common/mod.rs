use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, Request, StatusCode, Uri};
use axum::{Json, Router};
use nlq_bridge::{AllowList, AnalyticsConfig, AppConfig, LanguageModelConfig};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceExt;

/// Tracks environment variable mutations and restores originals on drop.
#[allow(dead_code)]
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// One request as seen by a mock upstream.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    response: serde_json::Value,
    delay: Option<Duration>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

/// Upstream stand-in that records every request and answers with a fixed
/// status and body.
#[allow(dead_code)]
pub struct MockUpstream {
    pub url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    handle: JoinHandle<()>,
}

#[allow(dead_code)]
impl MockUpstream {
    pub async fn start(status: StatusCode, response: serde_json::Value) -> Self {
        Self::start_with_delay(status, response, None).await
    }

    pub async fn start_with_delay(
        status: StatusCode,
        response: serde_json::Value,
        delay: Option<Duration>,
    ) -> Self {
        async fn capture(
            State(state): State<MockState>,
            method: Method,
            uri: Uri,
            headers: HeaderMap,
            body: Bytes,
        ) -> (StatusCode, Json<serde_json::Value>) {
            let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
            state.requests.lock().unwrap().push(Recorded {
                method,
                path: uri.path().to_string(),
                headers,
                body,
            });
            if let Some(delay) = state.delay {
                tokio::time::sleep(delay).await;
            }
            (state.status, Json(state.response.clone()))
        }

        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            status,
            response,
            delay,
            requests: requests.clone(),
        };
        let app = Router::new().fallback(capture).with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            url: format!("http://{}", addr),
            requests,
            handle,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Configuration pointing both upstreams at the given URLs.  `None` leaves an
/// upstream unconfigured.
#[allow(dead_code)]
pub fn test_config(analytics_url: Option<&str>, llm_url: Option<&str>, allowed: &str) -> AppConfig {
    AppConfig {
        service_name: "nlq-bridge-test".to_string(),
        analytics: AnalyticsConfig {
            base_url: analytics_url.map(str::to_string),
            api_key: analytics_url.map(|_| "mb_test_key".to_string()),
            session_token: None,
        },
        language_model: LanguageModelConfig {
            api_key: llm_url.map(|_| "sk-test".to_string()),
            base_url: llm_url.unwrap_or("http://127.0.0.1:9").to_string(),
            ..LanguageModelConfig::default()
        },
        allowed_database_ids: AllowList::from_csv(allowed),
        ..AppConfig::default()
    }
}

#[allow(dead_code)]
pub fn router(config: AppConfig) -> Router {
    nlq_bridge::app(nlq_bridge::build_state(config).unwrap())
}

/// POST a JSON body through the router and decode the JSON reply.
#[allow(dead_code)]
pub async fn post_json(
    app: Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    send(app, req).await
}

#[allow(dead_code)]
pub async fn send(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}
