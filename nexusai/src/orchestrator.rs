//! Request orchestration: drives one logical send/continue operation
//! through context building, adapter dispatch, transport, async polling,
//! and normalization into a uniform outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::adapters::{select_adapter, Adapter, HttpMethod, Parsed, RequestPayload};
use crate::context::{build_context, WireMessage};
use crate::debug::DebugStore;
use crate::error::{classify, ErrorKind};
use crate::transport::{DirectTransport, RelayTransport, Transport, TransportError};
use crate::types::{
    ChatOutcome, ContextSummary, Message, NormalizedResponse, Role, Settings,
};

pub const CONTINUE_PROMPT: &str = "Please continue from where you left off.";
const CONTINUE_WINDOW: usize = 10;

const MAX_POLLS: u32 = 60;
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const POLL_TIMEOUT_MESSAGE: &str = "Image generation timed out after 2 minutes";

const CORS_ADVICE: &str =
    "CORS error: Please disable \"Direct API\" in settings to use the proxy.";

enum PollEnd {
    Cancelled,
    TimedOut,
}

/// Drives chat and continue operations against a provider endpoint.
///
/// Holds no conversation state: messages, settings, and summaries are
/// borrowed for the duration of one operation, so independent conversations
/// can run concurrently on one client.
pub struct ChatClient {
    direct: Arc<dyn Transport>,
    relay: Arc<dyn Transport>,
    summarizer: RelayTransport,
    debug: DebugStore,
}

impl ChatClient {
    pub fn new(proxy_url: impl Into<String>) -> Self {
        let relay = RelayTransport::new(proxy_url);
        Self {
            direct: Arc::new(DirectTransport::new()),
            summarizer: relay.clone(),
            relay: Arc::new(relay),
            debug: DebugStore::default(),
        }
    }

    /// Swap both transports, keeping the relay for summarization. Used by
    /// embedders and tests that stub the network.
    pub fn with_transports(
        mut self,
        direct: Arc<dyn Transport>,
        relay: Arc<dyn Transport>,
    ) -> Self {
        self.direct = direct;
        self.relay = relay;
        self
    }

    /// Send one chat message: system prompt plus the trimmed/summarized
    /// context window.
    pub async fn send_chat_message(
        &self,
        messages: &[Message],
        settings: &Settings,
        context_summaries: &[ContextSummary],
        cancel: &CancellationToken,
    ) -> ChatOutcome {
        let request_id = new_request_id();
        if cancel.is_cancelled() {
            return ChatOutcome::Cancelled;
        }
        if let Err(err) = settings.validate() {
            return build_failure(err.to_string(), request_id);
        }

        let mut api_messages = Vec::new();
        if !settings.system_prompt.is_empty() {
            api_messages.push(WireMessage::text(Role::System, settings.system_prompt.clone()));
        }
        api_messages.extend(build_context(messages, settings, context_summaries));

        self.send_request(&api_messages, settings, cancel, request_id)
            .await
    }

    /// Continue a truncated response: the last 10 raw messages verbatim plus
    /// a fixed continuation instruction. The caller appends the returned
    /// content to the last assistant message rather than starting a new
    /// turn.
    pub async fn continue_response(
        &self,
        messages: &[Message],
        settings: &Settings,
        cancel: &CancellationToken,
    ) -> ChatOutcome {
        let request_id = new_request_id();
        if cancel.is_cancelled() {
            return ChatOutcome::Cancelled;
        }
        if let Err(err) = settings.validate() {
            return build_failure(err.to_string(), request_id);
        }

        let mut api_messages = Vec::new();
        if !settings.system_prompt.is_empty() {
            api_messages.push(WireMessage::text(Role::System, settings.system_prompt.clone()));
        }
        let start = messages.len().saturating_sub(CONTINUE_WINDOW);
        for msg in &messages[start..] {
            api_messages.push(WireMessage::text(msg.role, msg.content.clone()));
        }
        api_messages.push(WireMessage::text(Role::User, CONTINUE_PROMPT));

        self.send_request(&api_messages, settings, cancel, request_id)
            .await
    }

    /// One-shot connectivity probe with a tiny token budget.
    pub async fn test_connection(
        &self,
        settings: &Settings,
        cancel: &CancellationToken,
    ) -> ChatOutcome {
        let request_id = new_request_id();
        if let Err(err) = settings.validate() {
            return build_failure(err.to_string(), request_id);
        }
        let probe = Settings {
            max_tokens: Some(10),
            ..settings.clone()
        };
        let messages = vec![WireMessage::text(Role::User, "Hello")];
        self.send_request(&messages, &probe, cancel, request_id).await
    }

    /// Compress older history through the relay's summarize action.
    pub async fn summarize(
        &self,
        messages: &[Message],
        settings: &Settings,
    ) -> Result<String, TransportError> {
        let wire: Vec<WireMessage> = messages
            .iter()
            .map(|m| WireMessage::text(m.role, m.content.clone()))
            .collect();
        self.summarizer.summarize(&wire, settings).await
    }

    /// Debug data recorded for a request, if still retained.
    pub fn debug_data(&self, request_id: &str) -> Option<crate::debug::DebugEntry> {
        self.debug.get(request_id)
    }

    fn transport_for(&self, settings: &Settings) -> &dyn Transport {
        if settings.direct_api {
            self.direct.as_ref()
        } else {
            self.relay.as_ref()
        }
    }

    async fn send_request(
        &self,
        messages: &[WireMessage],
        settings: &Settings,
        cancel: &CancellationToken,
        request_id: String,
    ) -> ChatOutcome {
        let adapter = select_adapter(&settings.api_url);
        let payload = adapter.build_request(messages, settings);
        let headers = adapter.get_headers(settings);
        let transport = self.transport_for(settings);

        let user_token = !settings.api_token.is_empty();
        self.debug.record_request(
            &request_id,
            json!({
                "url": settings.api_url,
                "method": match adapter.get_method() {
                    HttpMethod::Get => "GET",
                    HttpMethod::Post => "POST",
                },
                "headers": sanitize_headers(&headers, user_token),
                "body": payload.as_json(),
            }),
        );

        // GET-image payloads carry the full request in their URL.
        let (dispatch_url, dispatch_method) = match &payload {
            RequestPayload::ImageGet { url } => (url.as_str(), HttpMethod::Get),
            RequestPayload::Json(_) => (settings.api_url.as_str(), adapter.get_method()),
        };

        let raw = match transport
            .execute(dispatch_url, Some(&payload), &headers, dispatch_method, cancel)
            .await
        {
            Ok(raw) => raw,
            Err(TransportError::Cancelled) => return ChatOutcome::Cancelled,
            Err(err) => return transport_failure(err, request_id),
        };

        let normalized = match adapter.parse_response(&raw) {
            Parsed::Complete(response) => response,
            Parsed::Async(task) => {
                tracing::info!(task_id = %task.task_id, "async task detected, polling");
                match self
                    .poll_for_result(adapter, settings, &task.task_id, &headers, transport, cancel)
                    .await
                {
                    Ok(response) => response,
                    Err(PollEnd::Cancelled) => return ChatOutcome::Cancelled,
                    Err(PollEnd::TimedOut) => {
                        return ChatOutcome::Failure {
                            error: POLL_TIMEOUT_MESSAGE.into(),
                            kind: classify(None, POLL_TIMEOUT_MESSAGE),
                            status: None,
                            request_id,
                        };
                    }
                }
            }
        };

        self.debug.record_response(
            &request_id,
            json!({
                "raw": raw.body,
                "image": raw.image_data.is_some(),
                "parsed": {
                    "content": normalized.content(),
                    "error": normalized.err().map(|e| e.message.clone()),
                },
            }),
        );

        if let Some(err) = normalized.err() {
            return ChatOutcome::Failure {
                kind: classify(None, &err.message),
                error: err.message.clone(),
                status: None,
                request_id,
            };
        }

        ChatOutcome::Success {
            content: normalized.content().to_string(),
            finish_reason: normalized.finish_reason(),
            usage: normalized.usage().cloned(),
            request_id,
        }
    }

    /// Poll an asynchronous job until it resolves. Fixed ceiling, fixed
    /// delay between attempts, no delay before the first attempt. Transport
    /// errors soft-fail to the next attempt; cancellation wins over the
    /// ceiling.
    async fn poll_for_result(
        &self,
        adapter: &dyn Adapter,
        settings: &Settings,
        task_id: &str,
        headers: &HashMap<String, String>,
        transport: &dyn Transport,
        cancel: &CancellationToken,
    ) -> Result<NormalizedResponse, PollEnd> {
        let poll_url = adapter.get_poll_url(&settings.api_url, task_id);
        tracing::debug!(%poll_url, "polling async task");

        for attempt in 1..=MAX_POLLS {
            if cancel.is_cancelled() {
                return Err(PollEnd::Cancelled);
            }
            if attempt > 1 {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(PollEnd::Cancelled),
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }

            match transport
                .execute(&poll_url, None, headers, HttpMethod::Get, cancel)
                .await
            {
                Ok(raw) => match adapter.parse_response(&raw) {
                    Parsed::Async(_) => {
                        tracing::debug!(attempt, max = MAX_POLLS, "task still processing");
                    }
                    Parsed::Complete(response) => return Ok(response),
                },
                Err(TransportError::Cancelled) => return Err(PollEnd::Cancelled),
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "poll attempt failed");
                }
            }
        }

        Err(PollEnd::TimedOut)
    }
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().simple())
}

fn build_failure(message: String, request_id: String) -> ChatOutcome {
    ChatOutcome::Failure {
        error: message,
        kind: ErrorKind::RequestBuildError,
        status: None,
        request_id,
    }
}

fn transport_failure(err: TransportError, request_id: String) -> ChatOutcome {
    let message = err.to_string();
    let status = err.status();
    let kind = classify(status, &message);

    // Direct-API fetch failures from cross-origin restrictions are the
    // exact class the proxy transport exists to work around.
    let surfaced = if message.contains("CORS")
        || message.contains("NetworkError")
        || message.contains("Failed to fetch")
    {
        CORS_ADVICE.to_string()
    } else {
        message
    };

    ChatOutcome::Failure {
        error: surfaced,
        kind,
        status,
        request_id,
    }
}

fn sanitize_headers(
    headers: &HashMap<String, String>,
    user_token: bool,
) -> HashMap<String, String> {
    let mut sanitized = headers.clone();
    if !user_token {
        if let Some(auth) = sanitized.get_mut("Authorization") {
            *auth = "[Server Token - Hidden]".into();
        }
    }
    sanitized
}
