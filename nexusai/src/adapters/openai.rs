//! OpenAI-compatible adapter: the default for chat-completions endpoints
//! and the registry fallback.

use serde_json::{json, Value};

use super::{
    is_reasoning_request, uses_completion_tokens, Adapter, Parsed, RawResponse, RequestPayload,
};
use crate::context::WireMessage;
use crate::types::{FinishReason, NormalizedResponse, Settings, Usage};

const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_MAX_TOKENS: u64 = 6000;

pub struct OpenAiAdapter;

impl Adapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn detect(&self, _url: &str) -> bool {
        true
    }

    fn build_request(&self, messages: &[WireMessage], settings: &Settings) -> RequestPayload {
        let model = if settings.model_name.is_empty() {
            DEFAULT_MODEL
        } else {
            &settings.model_name
        };
        let mut body = json!({
            "model": model,
            "messages": messages,
        });
        let max_tokens = settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        if is_reasoning_request(settings) {
            // Reasoning models reject sampling penalties. o1/o3 additionally
            // take max_completion_tokens and no temperature at all.
            if uses_completion_tokens(&settings.model_name) {
                body["max_completion_tokens"] = json!(max_tokens);
            } else {
                body["max_tokens"] = json!(max_tokens);
                body["temperature"] = json!(1.0);
            }
        } else {
            body["max_tokens"] = json!(max_tokens);
            body["temperature"] = json!(settings.temperature.unwrap_or(0.7));
            body["top_p"] = json!(settings.top_p.unwrap_or(1.0));
            if let Some(penalty) = settings.frequency_penalty.filter(|p| *p != 0.0) {
                body["frequency_penalty"] = json!(penalty);
            }
            if let Some(penalty) = settings.presence_penalty.filter(|p| *p != 0.0) {
                body["presence_penalty"] = json!(penalty);
            }
        }

        RequestPayload::Json(body)
    }

    fn parse_response(&self, raw: &RawResponse) -> Parsed {
        // Proxy-decoded image payloads win over everything else.
        if let Some(image) = &raw.image_data {
            return Parsed::Complete(NormalizedResponse::image(image));
        }

        let body = &raw.body;
        if let Some(error) = body.get("error") {
            return Parsed::Complete(NormalizedResponse::error_with_original(
                error_message(error),
                error.clone(),
            ));
        }

        let Some(choice) = body.get("choices").and_then(|c| c.get(0)) else {
            return Parsed::Complete(NormalizedResponse::error("No response from API"));
        };

        let message = choice
            .get("message")
            .or_else(|| choice.get("delta"))
            .cloned()
            .unwrap_or_else(|| json!({}));
        let finish_reason =
            FinishReason::from_wire(choice.get("finish_reason").and_then(Value::as_str));
        let usage = parse_usage(body);

        // Image-bearing responses, in the order providers are known to use.
        if let Some(images) = message.get("images").and_then(Value::as_array) {
            if let Some(content) = extract_image_from_array(images) {
                return Parsed::Complete(NormalizedResponse::text(content, finish_reason, usage));
            }
        }

        if let Some(image_url) = message.get("image_url") {
            let url = image_url
                .as_str()
                .or_else(|| image_url.get("url").and_then(Value::as_str));
            if let Some(url) = url {
                return Parsed::Complete(NormalizedResponse::text(url, finish_reason, usage));
            }
        }

        if let Some(image) = message.get("image").and_then(Value::as_str) {
            let content = if image.starts_with("data:") {
                image.to_string()
            } else {
                format!("data:image/png;base64,{image}")
            };
            return Parsed::Complete(NormalizedResponse::text(content, finish_reason, usage));
        }

        // Anthropic-style content_blocks, else plain text content.
        let content = match message.get("content_blocks").and_then(Value::as_array) {
            Some(blocks) => render_content_blocks(blocks),
            None => message
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        };

        Parsed::Complete(NormalizedResponse::text(content, finish_reason, usage))
    }
}

pub(super) fn parse_usage(body: &Value) -> Option<Usage> {
    body.get("usage")
        .filter(|u| u.is_object())
        .and_then(|u| serde_json::from_value(u.clone()).ok())
}

pub(super) fn error_message(error: &Value) -> String {
    if let Some(message) = error.get("message").and_then(Value::as_str) {
        return message.to_string();
    }
    if let Some(message) = error.as_str() {
        return message.to_string();
    }
    if let Some(code) = error.get("code") {
        return format!("Error: {}", code.as_str().map(String::from).unwrap_or_else(|| code.to_string()));
    }
    error.to_string()
}

/// OpenRouter/FLUX-style `message.images` array: try the known locations in
/// order and return the first usable reference.
fn extract_image_from_array(images: &[Value]) -> Option<String> {
    for img in images {
        if img.get("type").and_then(Value::as_str) == Some("image_url") {
            if let Some(url) = img
                .get("image_url")
                .and_then(|i| i.get("url"))
                .and_then(Value::as_str)
            {
                return Some(url.to_string());
            }
        }
        if let Some(url) = img.get("url").and_then(Value::as_str) {
            return Some(url.to_string());
        }
        if let Some(b64) = img.get("b64_json").and_then(Value::as_str) {
            return Some(format!("data:image/png;base64,{b64}"));
        }
    }
    None
}

/// Concatenate text blocks; render image blocks as markdown image
/// directives for the UI renderer.
fn render_content_blocks(blocks: &[Value]) -> String {
    let mut parts = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                parts.push(
                    block
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                );
            }
            Some("image_url") => {
                let url = block
                    .get("image_url")
                    .and_then(|i| i.get("url"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if !url.is_empty() {
                    if url.starts_with("data:image/") {
                        parts.push(format!("\n\n![Generated Image]({url})\n\n"));
                    } else {
                        parts.push(format!("\n\n![Image]({url})\n\n"));
                    }
                }
            }
            _ => {}
        }
    }
    parts.join("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn settings(model: &str) -> Settings {
        Settings {
            api_url: "https://api.openai.com/v1/chat/completions".into(),
            model_name: model.into(),
            ..Settings::default()
        }
    }

    fn user_messages() -> Vec<WireMessage> {
        vec![WireMessage::text(Role::User, "hello")]
    }

    fn build(settings: &Settings) -> Value {
        match OpenAiAdapter.build_request(&user_messages(), settings) {
            RequestPayload::Json(body) => body,
            other => panic!("expected JSON payload, got {other:?}"),
        }
    }

    #[test]
    fn standard_request_carries_sampling_params() {
        let mut s = settings("gpt-4o");
        s.temperature = Some(0.5);
        s.top_p = Some(0.9);
        s.max_tokens = Some(2000);
        let body = build(&s);

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["top_p"], 0.9);
        assert_eq!(body["max_tokens"], 2000);
        assert!(body.get("max_completion_tokens").is_none());
    }

    #[test]
    fn empty_model_falls_back_to_default() {
        let body = build(&settings(""));
        assert_eq!(body["model"], "gpt-3.5-turbo");
    }

    #[test]
    fn o1_models_use_completion_tokens_and_no_temperature() {
        let body = build(&settings("o1-preview"));
        assert_eq!(body["max_completion_tokens"], 6000);
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("temperature").is_none());
        assert!(body.get("top_p").is_none());
    }

    #[test]
    fn deepseek_r_keeps_max_tokens_with_pinned_temperature() {
        let body = build(&settings("deepseek-r1"));
        assert_eq!(body["max_tokens"], 6000);
        assert_eq!(body["temperature"], 1.0);
        assert!(body.get("max_completion_tokens").is_none());
        assert!(body.get("top_p").is_none());
    }

    #[test]
    fn penalties_included_only_when_set() {
        let mut s = settings("gpt-4o");
        s.frequency_penalty = Some(0.4);
        let body = build(&s);
        assert_eq!(body["frequency_penalty"], 0.4);
        assert!(body.get("presence_penalty").is_none());
    }

    #[test]
    fn parses_standard_text_choice() {
        let raw = RawResponse::json(json!({
            "choices": [{"message": {"content": "hi there"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 5, "total_tokens": 8}
        }));
        match OpenAiAdapter.parse_response(&raw) {
            Parsed::Complete(resp) => {
                assert_eq!(resp.content(), "hi there");
                assert_eq!(resp.finish_reason(), FinishReason::Stop);
                assert_eq!(resp.usage().unwrap().total_tokens, Some(8));
            }
            other => panic!("expected complete, got {other:?}"),
        }
    }

    #[test]
    fn length_finish_reason_survives() {
        let raw = RawResponse::json(json!({
            "choices": [{"message": {"content": "truncated"}, "finish_reason": "length"}]
        }));
        let Parsed::Complete(resp) = OpenAiAdapter.parse_response(&raw) else {
            panic!("expected complete");
        };
        assert_eq!(resp.finish_reason(), FinishReason::Length);
    }

    #[test]
    fn proxy_image_data_wins() {
        let raw = RawResponse::image("data:image/png;base64,abc");
        let Parsed::Complete(resp) = OpenAiAdapter.parse_response(&raw) else {
            panic!("expected complete");
        };
        assert_eq!(resp.content(), "data:image/png;base64,abc");
        assert!(!resp.is_error());
    }

    #[test]
    fn error_envelope_yields_error_response() {
        let raw = RawResponse::json(json!({"error": {"message": "model overloaded"}}));
        let Parsed::Complete(resp) = OpenAiAdapter.parse_response(&raw) else {
            panic!("expected complete");
        };
        assert!(resp.is_error());
        assert_eq!(resp.err().unwrap().message, "model overloaded");
        assert!(resp.content().is_empty());
    }

    #[test]
    fn missing_choices_is_an_error() {
        let raw = RawResponse::json(json!({"object": "chat.completion"}));
        let Parsed::Complete(resp) = OpenAiAdapter.parse_response(&raw) else {
            panic!("expected complete");
        };
        assert_eq!(resp.err().unwrap().message, "No response from API");
    }

    #[test]
    fn openrouter_images_array_extracted() {
        let raw = RawResponse::json(json!({
            "choices": [{"message": {
                "content": "",
                "images": [{"type": "image_url", "image_url": {"url": "data:image/png;base64,xyz"}}]
            }}]
        }));
        let Parsed::Complete(resp) = OpenAiAdapter.parse_response(&raw) else {
            panic!("expected complete");
        };
        assert_eq!(resp.content(), "data:image/png;base64,xyz");
    }

    #[test]
    fn b64_json_image_gets_data_url_prefix() {
        let raw = RawResponse::json(json!({
            "choices": [{"message": {"images": [{"b64_json": "abcd"}]}}]
        }));
        let Parsed::Complete(resp) = OpenAiAdapter.parse_response(&raw) else {
            panic!("expected complete");
        };
        assert_eq!(resp.content(), "data:image/png;base64,abcd");
    }

    #[test]
    fn raw_image_field_prefixed_when_not_data_url() {
        let raw = RawResponse::json(json!({
            "choices": [{"message": {"image": "abcd"}}]
        }));
        let Parsed::Complete(resp) = OpenAiAdapter.parse_response(&raw) else {
            panic!("expected complete");
        };
        assert_eq!(resp.content(), "data:image/png;base64,abcd");
    }

    #[test]
    fn content_blocks_render_text_and_images() {
        let raw = RawResponse::json(json!({
            "choices": [{"message": {"content_blocks": [
                {"type": "text", "text": "Here you go:"},
                {"type": "image_url", "image_url": {"url": "https://img.example/cat.png"}},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,zz"}}
            ]}}]
        }));
        let Parsed::Complete(resp) = OpenAiAdapter.parse_response(&raw) else {
            panic!("expected complete");
        };
        assert_eq!(
            resp.content(),
            "Here you go:\n\n![Image](https://img.example/cat.png)\n\n\n\n![Generated Image](data:image/png;base64,zz)\n\n"
        );
    }

    #[test]
    fn headers_omit_authorization_without_token() {
        let s = settings("gpt-4o");
        let headers = OpenAiAdapter.get_headers(&s);
        assert_eq!(headers.get("Content-Type").unwrap(), "application/json");
        assert!(!headers.contains_key("Authorization"));

        let mut with_token = s.clone();
        with_token.api_token = "sk-test".into();
        let headers = OpenAiAdapter.get_headers(&with_token);
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer sk-test");
    }
}
