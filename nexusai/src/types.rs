use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

// ---------------------------------------------------------------------------
// Chat messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// An image attached to a message. `data` is a base64 `data:` URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub name: String,
    pub data: String,
}

/// One turn of a conversation, as owned by the surrounding tab/conversation
/// entity. Immutable once sent; the orchestrator never mutates these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_images(mut self, images: Vec<ImageAttachment>) -> Self {
        self.images = images;
        self
    }
}

// ---------------------------------------------------------------------------
// Per-conversation settings
// ---------------------------------------------------------------------------

pub const DEFAULT_CONTEXT_MESSAGES: usize = 30;

fn default_context_messages() -> usize {
    DEFAULT_CONTEXT_MESSAGES
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub api_url: String,
    /// Secret. Never logged or reported unredacted.
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub frequency_penalty: Option<f64>,
    #[serde(default)]
    pub presence_penalty: Option<f64>,
    /// Context window budget, in messages.
    #[serde(default = "default_context_messages")]
    pub context_messages: usize,
    /// Fetch the provider URL directly instead of relaying through the proxy.
    #[serde(default)]
    pub direct_api: bool,
    /// Force reasoning-model request shaping regardless of model name.
    #[serde(default)]
    pub is_reasoning: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_token: String::new(),
            model_name: String::new(),
            system_prompt: String::new(),
            temperature: None,
            top_p: None,
            max_tokens: None,
            frequency_penalty: None,
            presence_penalty: None,
            context_messages: DEFAULT_CONTEXT_MESSAGES,
            direct_api: false,
            is_reasoning: false,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("API URL is required")]
    MissingUrl,
    #[error("Invalid API URL format")]
    InvalidUrl,
}

impl Settings {
    /// `api_url` must be a syntactically valid absolute URL before any
    /// request is attempted.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.api_url.is_empty() {
            return Err(SettingsError::MissingUrl);
        }
        url::Url::parse(&self.api_url).map_err(|_| SettingsError::InvalidUrl)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Context summaries
// ---------------------------------------------------------------------------

/// Summary of older history, produced out-of-band when the conversation
/// exceeds the context budget. Oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub summary: String,
}

// ---------------------------------------------------------------------------
// Normalized responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    Error,
}

impl FinishReason {
    /// Map a provider finish_reason string onto the closed set. Unknown
    /// values collapse to `Stop`.
    pub fn from_wire(value: Option<&str>) -> Self {
        match value {
            Some("length") => FinishReason::Length,
            Some("error") => FinishReason::Error,
            _ => FinishReason::Stop,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<serde_json::Value>,
}

/// The uniform result shape every adapter produces. `content` is either
/// text/markdown or an image reference (a `data:` URI or an https URL);
/// exactly one of `content`/`error` is populated, enforced by keeping the
/// fields private and constructing only through `text`/`image`/`error`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedResponse {
    content: String,
    finish_reason: FinishReason,
    usage: Option<Usage>,
    error: Option<ResponseError>,
}

impl NormalizedResponse {
    pub fn text(
        content: impl Into<String>,
        finish_reason: FinishReason,
        usage: Option<Usage>,
    ) -> Self {
        Self {
            content: content.into(),
            finish_reason,
            usage,
            error: None,
        }
    }

    /// An image result: a `data:` URI or an https URL the renderer embeds.
    pub fn image(reference: impl Into<String>) -> Self {
        Self::text(reference, FinishReason::Stop, None)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            finish_reason: FinishReason::Error,
            usage: None,
            error: Some(ResponseError {
                message: message.into(),
                original: None,
            }),
        }
    }

    pub fn error_with_original(message: impl Into<String>, original: serde_json::Value) -> Self {
        Self {
            content: String::new(),
            finish_reason: FinishReason::Error,
            usage: None,
            error: Some(ResponseError {
                message: message.into(),
                original: Some(original),
            }),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn finish_reason(&self) -> FinishReason {
        self.finish_reason
    }

    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    pub fn err(&self) -> Option<&ResponseError> {
        self.error.as_ref()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ---------------------------------------------------------------------------
// Async task handles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(TaskStatus::Pending),
            "PROCESSING" => Some(TaskStatus::Processing),
            "SUCCESS" => Some(TaskStatus::Success),
            "FAILED" | "ERROR" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }
}

/// Ephemeral handle for a provider-side asynchronous job. Lives only inside
/// the polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncTask {
    pub task_id: String,
    pub status: TaskStatus,
}

// ---------------------------------------------------------------------------
// Orchestrator outcomes
// ---------------------------------------------------------------------------

/// What one logical send/continue operation resolves to. Cancellation is a
/// distinct outcome, never a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    Success {
        content: String,
        finish_reason: FinishReason,
        usage: Option<Usage>,
        request_id: String,
    },
    Failure {
        error: String,
        kind: ErrorKind,
        status: Option<u16>,
        request_id: String,
    },
    Cancelled,
}

impl ChatOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ChatOutcome::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_missing_and_malformed_urls() {
        let mut settings = Settings::default();
        assert_eq!(settings.validate(), Err(SettingsError::MissingUrl));

        settings.api_url = "not a url".into();
        assert_eq!(settings.validate(), Err(SettingsError::InvalidUrl));

        settings.api_url = "https://api.openai.com/v1/chat/completions".into();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn normalized_response_content_and_error_are_exclusive() {
        let ok = NormalizedResponse::text("hello", FinishReason::Stop, None);
        assert!(ok.err().is_none());
        assert_eq!(ok.content(), "hello");

        let err = NormalizedResponse::error("boom");
        assert!(err.content().is_empty());
        assert_eq!(err.err().unwrap().message, "boom");
        assert_eq!(err.finish_reason(), FinishReason::Error);
    }

    #[test]
    fn task_status_parses_provider_values() {
        assert_eq!(TaskStatus::parse("PENDING"), Some(TaskStatus::Pending));
        assert_eq!(TaskStatus::parse("PROCESSING"), Some(TaskStatus::Processing));
        assert_eq!(TaskStatus::parse("SUCCESS"), Some(TaskStatus::Success));
        assert_eq!(TaskStatus::parse("FAILED"), Some(TaskStatus::Failed));
        assert_eq!(TaskStatus::parse("ERROR"), Some(TaskStatus::Failed));
        assert_eq!(TaskStatus::parse("weird"), None);
    }

    #[test]
    fn finish_reason_from_wire_collapses_unknown_to_stop() {
        assert_eq!(FinishReason::from_wire(Some("length")), FinishReason::Length);
        assert_eq!(FinishReason::from_wire(Some("stop")), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire(Some("tool_calls")), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire(None), FinishReason::Stop);
    }
}
