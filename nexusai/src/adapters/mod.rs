//! Per-provider adapters: translate the internal chat representation into
//! provider-specific request shapes and normalize heterogeneous responses
//! into one uniform result type.

pub mod huggingface;
pub mod openai;
pub mod pollinations;

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

pub use huggingface::HuggingFaceAdapter;
pub use openai::OpenAiAdapter;
pub use pollinations::PollinationsAdapter;

use crate::context::WireMessage;
use crate::types::{AsyncTask, NormalizedResponse, Settings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// What `build_request` produces: a POST body, or a marker for providers
/// that take the whole request in a GET URL.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPayload {
    Json(serde_json::Value),
    /// GET-only image request; the prompt and parameters are encoded into
    /// the URL itself.
    ImageGet { url: String },
}

impl RequestPayload {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            RequestPayload::Json(body) => Some(body),
            RequestPayload::ImageGet { .. } => None,
        }
    }
}

/// A transport result handed to `parse_response`: the decoded JSON body,
/// plus pre-decoded image data when the relay converted a binary payload.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub body: serde_json::Value,
    pub image_data: Option<String>,
}

impl RawResponse {
    pub fn json(body: serde_json::Value) -> Self {
        Self {
            body,
            image_data: None,
        }
    }

    pub fn image(data_url: impl Into<String>) -> Self {
        Self {
            body: serde_json::Value::Null,
            image_data: Some(data_url.into()),
        }
    }
}

/// Outcome of `parse_response`: a terminal normalized result, or a handle
/// for an asynchronous job that must be polled.
#[derive(Debug, Clone)]
pub enum Parsed {
    Complete(NormalizedResponse),
    Async(AsyncTask),
}

/// Capability set every provider adapter implements. Pure translation
/// logic; no network I/O.
pub trait Adapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pure predicate over the endpoint URL.
    fn detect(&self, url: &str) -> bool;

    fn build_request(&self, messages: &[WireMessage], settings: &Settings) -> RequestPayload;

    fn parse_response(&self, raw: &RawResponse) -> Parsed;

    fn get_headers(&self, settings: &Settings) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".into(), "application/json".into());
        if !settings.api_token.is_empty() {
            headers.insert(
                "Authorization".into(),
                format!("Bearer {}", settings.api_token),
            );
        }
        headers
    }

    fn get_method(&self) -> HttpMethod {
        HttpMethod::Post
    }

    fn get_poll_url(&self, base_url: &str, task_id: &str) -> String {
        format!("{base_url}/{task_id}")
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

static HUGGINGFACE: HuggingFaceAdapter = HuggingFaceAdapter;
static POLLINATIONS: PollinationsAdapter = PollinationsAdapter;
static OPENAI: OpenAiAdapter = OpenAiAdapter;

/// Select the adapter for an endpoint URL. Detectors run in fixed priority
/// order so the specific matchers win over the universal OpenAI fallback;
/// an empty URL also falls back to OpenAI. Deterministic and stateless.
pub fn select_adapter(url: &str) -> &'static dyn Adapter {
    if url.is_empty() {
        return &OPENAI;
    }
    let adapters: [&'static dyn Adapter; 3] = [&HUGGINGFACE, &POLLINATIONS, &OPENAI];
    for adapter in adapters {
        if adapter.detect(url) {
            tracing::debug!(adapter = adapter.name(), url, "selected adapter");
            return adapter;
        }
    }
    &OPENAI
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

static REASONING_MODEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)reason|o1-|o3-|deepseek-r").expect("reasoning pattern"));

static COMPLETION_TOKENS_MODEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^o[13]-").expect("completion-tokens pattern"));

/// Heuristic for reasoning models. The pattern is deliberately kept as-is
/// for compatibility with deployed configurations.
pub fn is_reasoning_request(settings: &Settings) -> bool {
    settings.is_reasoning || REASONING_MODEL.is_match(&settings.model_name)
}

/// o1/o3 models take `max_completion_tokens` and reject `temperature`.
pub fn uses_completion_tokens(model_name: &str) -> bool {
    COMPLETION_TOKENS_MODEL.is_match(model_name)
}

/// Last user-role message, as plain text. Image-generation providers take a
/// single prompt rather than a conversation.
pub fn last_user_prompt(messages: &[WireMessage]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == crate::types::Role::User)
        .map(|m| m.content.text())
        .unwrap_or_default()
}

/// Platforms known to host Llama models usable for server-side
/// summarization.
pub const SUMMARIZATION_CAPABLE_PLATFORMS: [&str; 8] = [
    "openrouter.ai",
    "together.xyz",
    "api.together.ai",
    "router.huggingface.co",
    "groq.com",
    "api.groq.com",
    "fireworks.ai",
    "anyscale.com",
];

pub fn supports_summarization(url: &str) -> bool {
    let lower = url.to_lowercase();
    SUMMARIZATION_CAPABLE_PLATFORMS
        .iter()
        .any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WireMessage;
    use crate::types::Role;

    #[test]
    fn registry_priority_order() {
        assert_eq!(
            select_adapter("https://api-inference.huggingface.co/models/x").name(),
            "huggingface"
        );
        assert_eq!(
            select_adapter("https://router.huggingface.co/v1/images/generations").name(),
            "huggingface"
        );
        assert_eq!(
            select_adapter("https://image.pollinations.ai/prompt").name(),
            "pollinations"
        );
        assert_eq!(
            select_adapter("https://gen.pollinations.ai/image/").name(),
            "pollinations"
        );
        assert_eq!(
            select_adapter("https://api.openai.com/v1/chat/completions").name(),
            "openai"
        );
        assert_eq!(select_adapter("").name(), "openai");
    }

    #[test]
    fn reasoning_detection_matches_known_names() {
        let with_model = |name: &str| Settings {
            model_name: name.into(),
            ..Settings::default()
        };
        assert!(is_reasoning_request(&with_model("o1-preview")));
        assert!(is_reasoning_request(&with_model("O3-mini")));
        assert!(is_reasoning_request(&with_model("deepseek-r1")));
        assert!(is_reasoning_request(&with_model("super-reasoner")));
        assert!(!is_reasoning_request(&with_model("gpt-4o")));

        let forced = Settings {
            is_reasoning: true,
            model_name: "gpt-4o".into(),
            ..Settings::default()
        };
        assert!(is_reasoning_request(&forced));
    }

    #[test]
    fn completion_tokens_only_for_o1_o3_prefixes() {
        assert!(uses_completion_tokens("o1-preview"));
        assert!(uses_completion_tokens("O3-mini"));
        assert!(!uses_completion_tokens("deepseek-r1"));
        assert!(!uses_completion_tokens("gpt-4o1-ish"));
    }

    #[test]
    fn last_user_prompt_skips_assistant_turns() {
        let messages = vec![
            WireMessage::text(Role::User, "first"),
            WireMessage::text(Role::Assistant, "reply"),
            WireMessage::text(Role::User, "a cat in a hat"),
            WireMessage::text(Role::Assistant, "later"),
        ];
        assert_eq!(last_user_prompt(&messages), "a cat in a hat");
        assert_eq!(last_user_prompt(&[]), "");
    }

    #[test]
    fn summarization_platform_detection() {
        assert!(supports_summarization("https://openrouter.ai/api/v1"));
        assert!(supports_summarization("https://api.groq.com/openai/v1"));
        assert!(!supports_summarization("https://api.openai.com/v1"));
    }
}
