//! Server-side relay: forwards browser requests to provider APIs (working
//! around cross-origin restrictions), re-encodes binary image payloads as
//! JSON data-URL envelopes, substitutes a fallback credential when the
//! client has none, and hosts the summarization action.

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use nexusai::supports_summarization;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

const RATE_LIMIT_REQUESTS: usize = 60;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
const RATE_LIMIT_MESSAGE: &str = "Too many requests. Please slow down.";

const SUMMARY_SYSTEM_PROMPT: &str =
    "Summarize the conversation concisely, preserving key facts and context.";
const SUMMARY_MAX_TOKENS: u64 = 500;
const SUMMARY_TEMPERATURE: f64 = 0.3;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

/// Server credentials used when the client supplies no token of its own.
/// The fallback endpoint additionally serves summarization for providers
/// that host no usable summarization model.
#[derive(Clone, Default)]
pub struct FallbackConfig {
    pub token: Option<String>,
    pub summarize_url: Option<String>,
    pub summarize_model: Option<String>,
}

impl FallbackConfig {
    pub fn from_env() -> Self {
        Self {
            token: std::env::var("NEXUSAI_FALLBACK_TOKEN").ok(),
            summarize_url: std::env::var("NEXUSAI_FALLBACK_URL").ok(),
            summarize_model: std::env::var("NEXUSAI_FALLBACK_MODEL").ok(),
        }
    }
}

pub struct AppState {
    client: reqwest::Client,
    fallback: FallbackConfig,
    rate: RateLimiter,
}

impl AppState {
    pub fn new(fallback: FallbackConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            fallback,
            rate: RateLimiter::new(RATE_LIMIT_REQUESTS, RATE_LIMIT_WINDOW),
        }
    }
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// Sliding-window limiter keyed by client IP.
struct RateLimiter {
    max_requests: usize,
    window: Duration,
    hits: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request; `false` means the caller is over the limit.
    fn check(&self, ip: IpAddr, now: Instant) -> bool {
        let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());
        let window = hits.entry(ip).or_default();
        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() >= self.max_requests {
            return false;
        }
        window.push_back(now);
        true
    }
}

fn rate_limited_response() -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": RATE_LIMIT_MESSAGE })),
    )
        .into_response();
    response.headers_mut().insert(
        "Retry-After",
        axum::http::HeaderValue::from_static("60"),
    );
    response
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub async fn run_server(host: &str, port: u16) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(FallbackConfig::from_env()));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", post(relay).get(relay_get))
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("NexusAI relay listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// POST / - relay and summarize actions
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RelayRequest {
    #[serde(default)]
    action: Option<String>,
    #[serde(alias = "api_url")]
    url: String,
    #[serde(default, alias = "payload")]
    body: Option<Value>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    method: Option<String>,
    /// Summarize action only.
    #[serde(default)]
    messages: Option<Vec<Value>>,
}

async fn relay(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<RelayRequest>,
) -> Response {
    if !state.rate.check(addr.ip(), Instant::now()) {
        tracing::warn!(ip = %addr.ip(), "rate limit exceeded");
        return rate_limited_response();
    }

    if request.action.as_deref() == Some("summarize") {
        return summarize(&state, &request).await;
    }

    if let Err(response) = validate_target(&request.url) {
        return response;
    }

    let token = effective_token(request.token.as_deref(), &state.fallback);
    let is_get = request.method.as_deref() == Some("GET") || request.body.is_none();

    tracing::debug!(url = %request.url, get = is_get, "relaying request");

    let mut upstream = if is_get {
        state.client.get(&request.url)
    } else {
        state
            .client
            .post(&request.url)
            .header("Content-Type", "application/json")
    };
    if let Some(token) = &token {
        upstream = upstream.header("Authorization", format!("Bearer {token}"));
    }
    for (name, value) in extra_headers(&request.url) {
        upstream = upstream.header(name, value);
    }
    if !is_get {
        if let Some(body) = &request.body {
            upstream = upstream.json(body);
        }
    }

    let response = match upstream.send().await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, "upstream request failed");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Upstream request failed" })),
            )
                .into_response();
        }
    };

    forward_upstream(response, is_get).await
}

/// Convert an upstream response into the relay's JSON contract: binary
/// images become a data-URL envelope, GET failures become a structured
/// error envelope, everything else passes through with its status.
async fn forward_upstream(response: reqwest::Response, is_get: bool) -> Response {
    let status = response.status();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if status.is_success() && content_type.starts_with("image/") {
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read image body");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "Failed to read image data" })),
                )
                    .into_response();
            }
        };
        let mime = content_type.split(';').next().unwrap_or("image/png");
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        return Json(json!({
            "success": true,
            "type": "image",
            "data": format!("data:{mime};base64,{encoded}"),
        }))
        .into_response();
    }

    if is_get && !status.is_success() {
        return Json(json!({
            "success": false,
            "error": {
                "message": "Image generation failed",
                "code": status.as_u16(),
            },
            "status": status.as_u16(),
        }))
        .into_response();
    }

    let body = response
        .json::<Value>()
        .await
        .unwrap_or_else(|_| json!({ "error": { "message": format!("HTTP {}", status.as_u16()) } }));
    let status = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// GET / - image passthrough
// ---------------------------------------------------------------------------

/// GET form of the relay, for image URLs passed as query parameters.
async fn relay_get(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !state.rate.check(addr.ip(), Instant::now()) {
        return rate_limited_response();
    }

    let Some(url) = params.get("url") else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing url parameter" })),
        )
            .into_response();
    };
    if let Err(response) = validate_target(url) {
        return response;
    }

    let token = effective_token(params.get("token").map(String::as_str), &state.fallback);
    let mut upstream = state.client.get(url);
    if let Some(token) = &token {
        upstream = upstream.header("Authorization", format!("Bearer {token}"));
    }
    for (name, value) in extra_headers(url) {
        upstream = upstream.header(name, value);
    }

    let response = match upstream.send().await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, "upstream request failed");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Upstream request failed" })),
            )
                .into_response();
        }
    };

    let status = response.status();
    if !status.is_success() {
        return Json(json!({
            "success": false,
            "error": {
                "message": "Image generation failed",
                "code": status.as_u16(),
            },
            "status": status.as_u16(),
        }))
        .into_response();
    }

    // Pass the bytes straight through so browsers can embed the URL.
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    match response.bytes().await {
        Ok(bytes) => ([("Content-Type", content_type)], bytes.to_vec()).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "failed to read upstream body");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Failed to read upstream response" })),
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Summarize action
// ---------------------------------------------------------------------------

async fn summarize(state: &AppState, request: &RelayRequest) -> Response {
    let messages = request.messages.as_deref().unwrap_or_default();
    if messages.is_empty() {
        return Json(json!({ "success": false, "error": "No messages to summarize" }))
            .into_response();
    }

    // Use the client's own platform when it hosts a usable model, otherwise
    // fall back to the server-configured endpoint.
    let (target_url, token, used_fallback) = if supports_summarization(&request.url) {
        (
            request.url.clone(),
            effective_token(request.token.as_deref(), &state.fallback),
            false,
        )
    } else if let Some(fallback_url) = &state.fallback.summarize_url {
        (fallback_url.clone(), state.fallback.token.clone(), true)
    } else {
        return Json(json!({
            "success": false,
            "error": "Summarization is not available for this platform",
        }))
        .into_response();
    };

    if let Err(response) = validate_target(&target_url) {
        return response;
    }

    let model = if used_fallback {
        state
            .fallback
            .summarize_model
            .clone()
            .unwrap_or_else(|| summarization_model(&target_url).to_string())
    } else {
        summarization_model(&target_url).to_string()
    };

    let body = json!({
        "model": model,
        "messages": [
            { "role": "system", "content": SUMMARY_SYSTEM_PROMPT },
            { "role": "user", "content": format!("Summarize:\n\n{}", flatten_messages(messages)) },
        ],
        "max_tokens": SUMMARY_MAX_TOKENS,
        "temperature": SUMMARY_TEMPERATURE,
    });

    let mut upstream = state
        .client
        .post(&target_url)
        .header("Content-Type", "application/json")
        .json(&body);
    if let Some(token) = &token {
        upstream = upstream.header("Authorization", format!("Bearer {token}"));
    }

    let response = match upstream.send().await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, "summarization request failed");
            return Json(json!({ "success": false, "error": "Summarization request failed" }))
                .into_response();
        }
    };

    if !response.status().is_success() {
        tracing::warn!(status = %response.status(), "summarization upstream error");
        return Json(json!({ "success": false, "error": "Summarization request failed" }))
            .into_response();
    }

    let parsed = response.json::<Value>().await.unwrap_or(Value::Null);
    let summary = parsed
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if summary.is_empty() {
        return Json(json!({ "success": false, "error": "Empty summary returned" }))
            .into_response();
    }

    Json(json!({
        "success": true,
        "summary": summary,
        "used_fallback": used_fallback,
    }))
    .into_response()
}

/// Pick a Llama model the target platform is known to host.
fn summarization_model(url: &str) -> &'static str {
    let lower = url.to_lowercase();
    if lower.contains("openrouter.ai") {
        "meta-llama/llama-3.1-8b-instruct:free"
    } else if lower.contains("together.xyz") || lower.contains("api.together.ai") {
        "meta-llama/Meta-Llama-3.1-8B-Instruct-Turbo"
    } else {
        "meta-llama/llama-3.1-8b-instruct"
    }
}

/// Flatten a messages array into "Role: content" lines for the summary
/// prompt.
fn flatten_messages(messages: &[Value]) -> String {
    messages
        .iter()
        .filter_map(|msg| {
            let role = msg.get("role").and_then(Value::as_str).unwrap_or("user");
            let content = msg.get("content").and_then(Value::as_str)?;
            if content.is_empty() {
                return None;
            }
            let mut label = role.to_string();
            if let Some(first) = label.get_mut(..1) {
                first.make_ascii_uppercase();
            }
            Some(format!("{label}: {content}"))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Targets must be absolute http(s) URLs; anything else is rejected before a
/// request leaves the server.
fn validate_target(target: &str) -> Result<(), Response> {
    match url::Url::parse(target) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => Ok(()),
        _ => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid target URL" })),
        )
            .into_response()),
    }
}

/// The client's token when present, else the server fallback.
fn effective_token(client_token: Option<&str>, fallback: &FallbackConfig) -> Option<String> {
    match client_token {
        Some(token) if !token.is_empty() => Some(token.to_string()),
        _ => fallback.token.clone(),
    }
}

/// Provider-specific headers the relay adds on the client's behalf.
fn extra_headers(url: &str) -> Vec<(&'static str, &'static str)> {
    if url.contains("huggingface.co") {
        vec![("x-wait-for-model", "true"), ("x-use-cache", "false")]
    } else {
        Vec::new()
    }
}
