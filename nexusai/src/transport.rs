//! Transports: how a built request reaches the provider. Either a direct
//! fetch of the provider URL, or a relay through the server-side proxy that
//! bypasses cross-origin restrictions and can substitute a fallback
//! credential.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::adapters::{HttpMethod, RawResponse, RequestPayload};
use crate::context::WireMessage;
use crate::types::Settings;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Logical failure reported by the relay in a 2xx body.
    #[error("{0}")]
    Relay(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            TransportError::Network(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Pull a human-readable message out of the error response formats the
/// providers and the relay are known to use.
pub fn extract_error_message(data: &Value) -> String {
    if let Some(message) = data
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
    {
        return message.to_string();
    }
    if let Some(message) = data.get("error").and_then(Value::as_str) {
        return message.to_string();
    }
    if let Some(message) = data.get("message").and_then(Value::as_str) {
        return message.to_string();
    }
    if let Some(code) = data.get("error").and_then(|e| e.get("code")) {
        let code = code.as_str().map(String::from).unwrap_or_else(|| code.to_string());
        return format!("Error: {code}");
    }
    "Request failed".to_string()
}

/// One dispatch of a built request. Implementations must observe the
/// cancellation token and return `TransportError::Cancelled` promptly.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        url: &str,
        payload: Option<&RequestPayload>,
        headers: &HashMap<String, String>,
        method: HttpMethod,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, TransportError>;
}

fn bearer_token(headers: &HashMap<String, String>) -> &str {
    headers
        .get("Authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("")
}

fn data_url(content_type: &str, bytes: &[u8]) -> String {
    let mime = content_type.split(';').next().unwrap_or(content_type);
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{encoded}")
}

// ---------------------------------------------------------------------------
// Direct transport
// ---------------------------------------------------------------------------

/// Fetches the provider URL straight from this process.
#[derive(Clone, Default)]
pub struct DirectTransport {
    client: reqwest::Client,
}

impl DirectTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for DirectTransport {
    async fn execute(
        &self,
        url: &str,
        payload: Option<&RequestPayload>,
        headers: &HashMap<String, String>,
        method: HttpMethod,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let mut request = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
        };
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if method == HttpMethod::Post {
            if let Some(body) = payload.and_then(RequestPayload::as_json) {
                request = request.json(body);
            }
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = request.send() => result?,
        };

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<Value>().await {
                Ok(body) => extract_error_message(&body),
                Err(_) => format!("HTTP {}", status.as_u16()),
            };
            return Err(TransportError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("image/") {
            let bytes = response.bytes().await?;
            return Ok(RawResponse::image(data_url(&content_type, &bytes)));
        }

        let body = response.json::<Value>().await?;
        Ok(RawResponse::json(body))
    }
}

// ---------------------------------------------------------------------------
// Relay transport
// ---------------------------------------------------------------------------

/// Relays requests through the server-side proxy. The proxy forwards to the
/// target URL with the supplied bearer token and re-encodes binary image
/// payloads into a JSON envelope.
#[derive(Clone)]
pub struct RelayTransport {
    client: reqwest::Client,
    proxy_url: String,
}

impl RelayTransport {
    pub fn new(proxy_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            proxy_url: proxy_url.into(),
        }
    }

    async fn relay(
        &self,
        envelope: Value,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, TransportError> {
        let request = self
            .client
            .post(&self.proxy_url)
            .header("Content-Type", "application/json")
            .json(&envelope);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = request.send() => result?,
        };

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<Value>().await {
                Ok(body) => extract_error_message(&body),
                Err(_) => format!("HTTP {}", status.as_u16()),
            };
            return Err(TransportError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let result = response.json::<Value>().await?;

        // An error field in a 2xx body is a logical failure.
        if result.get("error").is_some() {
            return Err(TransportError::Relay(extract_error_message(&result)));
        }

        // Binary image payloads arrive pre-decoded as a data URL envelope.
        if result.get("type").and_then(Value::as_str) == Some("image") {
            if let Some(data) = result.get("data").and_then(Value::as_str) {
                return Ok(RawResponse::image(data));
            }
        }

        Ok(RawResponse::json(result))
    }

    /// Server-side summarization of older history. Consumes the relay's
    /// `{success, summary} | {success: false, error}` contract.
    pub async fn summarize(
        &self,
        messages: &[WireMessage],
        settings: &Settings,
    ) -> Result<String, TransportError> {
        let envelope = json!({
            "action": "summarize",
            "messages": messages,
            "api_url": settings.api_url,
            "token": settings.api_token,
        });

        let response = self
            .client
            .post(&self.proxy_url)
            .header("Content-Type", "application/json")
            .json(&envelope)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                message: "Summarization request failed".into(),
            });
        }

        let result = response.json::<Value>().await?;
        if result.get("success").and_then(Value::as_bool) != Some(true) {
            let message = result
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("Summarization failed");
            return Err(TransportError::Relay(message.to_string()));
        }

        Ok(result
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl Transport for RelayTransport {
    async fn execute(
        &self,
        url: &str,
        payload: Option<&RequestPayload>,
        headers: &HashMap<String, String>,
        method: HttpMethod,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let token = bearer_token(headers);
        let envelope = match (method, payload.and_then(RequestPayload::as_json)) {
            // GETs (image generation, async polling) carry no body.
            (HttpMethod::Get, _) | (_, None) => json!({
                "url": url,
                "method": "GET",
                "token": token,
            }),
            (HttpMethod::Post, Some(body)) => json!({
                "url": url,
                "body": body,
                "token": token,
            }),
        };

        self.relay(envelope, cancel).await
    }
}
