//! HuggingFace inference adapter: text generation and asynchronous image
//! generation jobs.

use serde_json::{json, Value};

use super::openai::error_message;
use super::{is_reasoning_request, Adapter, Parsed, RawResponse, RequestPayload};
use crate::context::WireMessage;
use crate::types::{AsyncTask, FinishReason, NormalizedResponse, Settings, TaskStatus};

const DEFAULT_MAX_NEW_TOKENS: u64 = 1024;

pub struct HuggingFaceAdapter;

impl Adapter for HuggingFaceAdapter {
    fn name(&self) -> &'static str {
        "huggingface"
    }

    fn detect(&self, url: &str) -> bool {
        if url.contains("api-inference.huggingface.co") {
            return true;
        }
        url.contains("huggingface.co") && url.contains("/images/generations")
    }

    fn build_request(&self, messages: &[WireMessage], settings: &Settings) -> RequestPayload {
        let prompt = super::last_user_prompt(messages);

        if settings.api_url.contains("/images/generations") {
            let mut body = json!({ "prompt": prompt });
            if !settings.model_name.is_empty() {
                body["model"] = json!(settings.model_name);
            }
            return RequestPayload::Json(body);
        }

        let mut parameters = json!({
            "max_new_tokens": settings.max_tokens.unwrap_or(DEFAULT_MAX_NEW_TOKENS),
            "return_full_text": false,
        });
        if !is_reasoning_request(settings) {
            parameters["temperature"] = json!(settings.temperature.unwrap_or(0.7));
            parameters["top_p"] = json!(settings.top_p.unwrap_or(1.0));
        }

        RequestPayload::Json(json!({
            "inputs": prompt,
            "parameters": parameters,
        }))
    }

    fn parse_response(&self, raw: &RawResponse) -> Parsed {
        if let Some(image) = &raw.image_data {
            return Parsed::Complete(NormalizedResponse::image(image));
        }

        let body = &raw.body;

        // Async job envelope (image generation).
        if let Some(status) = body.get("task_status").and_then(Value::as_str) {
            match TaskStatus::parse(status) {
                Some(state @ (TaskStatus::Pending | TaskStatus::Processing)) => {
                    let task_id = body
                        .get("id")
                        .or_else(|| body.get("request_id"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    return Parsed::Async(AsyncTask {
                        task_id,
                        status: state,
                    });
                }
                Some(TaskStatus::Success) => {
                    if let Some(result) = extract_success_image(body) {
                        return Parsed::Complete(NormalizedResponse::image(result));
                    }
                    // Fall through: a SUCCESS envelope with no image in any
                    // known location is an unexpected shape.
                }
                Some(TaskStatus::Failed) => {
                    let message = body
                        .get("error")
                        .map(error_message)
                        .or_else(|| {
                            body.get("message").and_then(Value::as_str).map(String::from)
                        })
                        .unwrap_or_else(|| "Image generation failed".into());
                    return Parsed::Complete(NormalizedResponse::error(message));
                }
                None => {}
            }
        }

        if let Some(error) = body.get("error") {
            return Parsed::Complete(NormalizedResponse::error_with_original(
                error_message(error),
                error.clone(),
            ));
        }

        // Text generation: array of generations, or a single object.
        if let Some(items) = body.as_array() {
            let text = items
                .first()
                .and_then(|item| item.get("generated_text"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Parsed::Complete(NormalizedResponse::text(text, FinishReason::Stop, None));
        }

        if let Some(text) = body.get("generated_text").and_then(Value::as_str) {
            return Parsed::Complete(NormalizedResponse::text(text, FinishReason::Stop, None));
        }

        Parsed::Complete(NormalizedResponse::error("Unexpected response format"))
    }

    fn get_headers(
        &self,
        settings: &Settings,
    ) -> std::collections::HashMap<String, String> {
        let mut headers = std::collections::HashMap::new();
        headers.insert("Content-Type".into(), "application/json".into());
        // HuggingFace always gets the Authorization header, even empty.
        headers.insert(
            "Authorization".into(),
            format!("Bearer {}", settings.api_token),
        );
        headers.insert("x-wait-for-model".into(), "true".into());
        headers.insert("x-use-cache".into(), "false".into());
        headers
    }

    fn get_poll_url(&self, base_url: &str, task_id: &str) -> String {
        if let Some(idx) = base_url.find("/async/") {
            return format!("{}/async-result/{task_id}", &base_url[..idx]);
        }
        format!("{base_url}/{task_id}")
    }
}

/// Known locations for the image in a successful async result: URL fields
/// first, then base64 fields.
fn extract_success_image(body: &Value) -> Option<String> {
    let url_locations = [
        body.get("result").and_then(|r| r.get("image_url")),
        body.get("image_result")
            .and_then(|r| r.get(0))
            .and_then(|r| r.get("url")),
        body.get("data").and_then(|r| r.get(0)).and_then(|r| r.get("url")),
        body.get("images")
            .and_then(|r| r.get(0))
            .and_then(|r| r.get("url")),
        body.get("output").and_then(|r| r.get("image_url")),
    ];
    for loc in url_locations {
        if let Some(url) = loc.and_then(Value::as_str) {
            return Some(url.to_string());
        }
    }

    let b64_locations = [
        body.get("result").and_then(|r| r.get("image")),
        body.get("image_result")
            .and_then(|r| r.get(0))
            .and_then(|r| r.get("b64_json")),
        body.get("data")
            .and_then(|r| r.get(0))
            .and_then(|r| r.get("b64_json")),
        body.get("images")
            .and_then(|r| r.get(0))
            .and_then(|r| r.get("b64_json")),
    ];
    for loc in b64_locations {
        if let Some(b64) = loc.and_then(Value::as_str) {
            if b64.starts_with("data:") {
                return Some(b64.to_string());
            }
            return Some(format!("data:image/png;base64,{b64}"));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FinishReason, Role};

    fn hf_settings(url: &str) -> Settings {
        Settings {
            api_url: url.into(),
            model_name: "black-forest-labs/FLUX.1-dev".into(),
            ..Settings::default()
        }
    }

    fn prompt_messages() -> Vec<WireMessage> {
        vec![
            WireMessage::text(Role::System, "be nice"),
            WireMessage::text(Role::User, "a red fox"),
        ]
    }

    #[test]
    fn image_endpoint_builds_prompt_body() {
        let s = hf_settings("https://router.huggingface.co/v1/images/generations");
        let RequestPayload::Json(body) =
            HuggingFaceAdapter.build_request(&prompt_messages(), &s)
        else {
            panic!("expected JSON payload");
        };
        assert_eq!(body["prompt"], "a red fox");
        assert_eq!(body["model"], "black-forest-labs/FLUX.1-dev");
    }

    #[test]
    fn text_endpoint_builds_inputs_with_parameters() {
        let mut s = hf_settings("https://api-inference.huggingface.co/models/gpt2");
        s.model_name = "gpt2".into();
        s.max_tokens = Some(256);
        let RequestPayload::Json(body) =
            HuggingFaceAdapter.build_request(&prompt_messages(), &s)
        else {
            panic!("expected JSON payload");
        };
        assert_eq!(body["inputs"], "a red fox");
        assert_eq!(body["parameters"]["max_new_tokens"], 256);
        assert_eq!(body["parameters"]["return_full_text"], false);
        assert_eq!(body["parameters"]["temperature"], 0.7);
        assert_eq!(body["parameters"]["top_p"], 1.0);
    }

    #[test]
    fn reasoning_models_omit_sampling_parameters() {
        let mut s = hf_settings("https://api-inference.huggingface.co/models/x");
        s.model_name = "deepseek-r1".into();
        let RequestPayload::Json(body) =
            HuggingFaceAdapter.build_request(&prompt_messages(), &s)
        else {
            panic!("expected JSON payload");
        };
        assert!(body["parameters"].get("temperature").is_none());
        assert!(body["parameters"].get("top_p").is_none());
    }

    #[test]
    fn pending_task_yields_async_marker() {
        let raw = RawResponse::json(json!({"task_status": "PENDING", "id": "task-1"}));
        match HuggingFaceAdapter.parse_response(&raw) {
            Parsed::Async(task) => {
                assert_eq!(task.task_id, "task-1");
                assert_eq!(task.status, TaskStatus::Pending);
            }
            other => panic!("expected async marker, got {other:?}"),
        }
    }

    #[test]
    fn processing_task_reads_request_id_fallback() {
        let raw =
            RawResponse::json(json!({"task_status": "PROCESSING", "request_id": "task-2"}));
        let Parsed::Async(task) = HuggingFaceAdapter.parse_response(&raw) else {
            panic!("expected async marker");
        };
        assert_eq!(task.task_id, "task-2");
        assert_eq!(task.status, TaskStatus::Processing);
    }

    #[test]
    fn success_task_tries_known_url_locations() {
        for body in [
            json!({"task_status": "SUCCESS", "result": {"image_url": "https://img/1.png"}}),
            json!({"task_status": "SUCCESS", "image_result": [{"url": "https://img/1.png"}]}),
            json!({"task_status": "SUCCESS", "data": [{"url": "https://img/1.png"}]}),
            json!({"task_status": "SUCCESS", "images": [{"url": "https://img/1.png"}]}),
            json!({"task_status": "SUCCESS", "output": {"image_url": "https://img/1.png"}}),
        ] {
            let Parsed::Complete(resp) =
                HuggingFaceAdapter.parse_response(&RawResponse::json(body))
            else {
                panic!("expected complete");
            };
            assert_eq!(resp.content(), "https://img/1.png");
        }
    }

    #[test]
    fn success_task_falls_back_to_base64_locations() {
        let raw = RawResponse::json(json!({
            "task_status": "SUCCESS",
            "data": [{"b64_json": "abcd"}]
        }));
        let Parsed::Complete(resp) = HuggingFaceAdapter.parse_response(&raw) else {
            panic!("expected complete");
        };
        assert_eq!(resp.content(), "data:image/png;base64,abcd");
    }

    #[test]
    fn failed_task_is_an_error() {
        let raw = RawResponse::json(json!({"task_status": "FAILED", "error": "boom"}));
        let Parsed::Complete(resp) = HuggingFaceAdapter.parse_response(&raw) else {
            panic!("expected complete");
        };
        assert_eq!(resp.err().unwrap().message, "boom");
        assert_eq!(resp.finish_reason(), FinishReason::Error);
    }

    #[test]
    fn failed_task_without_message_uses_default() {
        let raw = RawResponse::json(json!({"task_status": "ERROR"}));
        let Parsed::Complete(resp) = HuggingFaceAdapter.parse_response(&raw) else {
            panic!("expected complete");
        };
        assert_eq!(resp.err().unwrap().message, "Image generation failed");
    }

    #[test]
    fn array_generation_response_parses() {
        let raw = RawResponse::json(json!([{"generated_text": "once upon a time"}]));
        let Parsed::Complete(resp) = HuggingFaceAdapter.parse_response(&raw) else {
            panic!("expected complete");
        };
        assert_eq!(resp.content(), "once upon a time");
    }

    #[test]
    fn single_object_generation_response_parses() {
        let raw = RawResponse::json(json!({"generated_text": "hello"}));
        let Parsed::Complete(resp) = HuggingFaceAdapter.parse_response(&raw) else {
            panic!("expected complete");
        };
        assert_eq!(resp.content(), "hello");
    }

    #[test]
    fn unknown_shape_is_a_parse_failure() {
        let raw = RawResponse::json(json!({"something": "else"}));
        let Parsed::Complete(resp) = HuggingFaceAdapter.parse_response(&raw) else {
            panic!("expected complete");
        };
        assert_eq!(resp.err().unwrap().message, "Unexpected response format");
    }

    #[test]
    fn poll_url_rewrites_async_paths() {
        assert_eq!(
            HuggingFaceAdapter.get_poll_url(
                "https://api.example.com/v1/async/generate",
                "task-9"
            ),
            "https://api.example.com/v1/async-result/task-9"
        );
        assert_eq!(
            HuggingFaceAdapter.get_poll_url("https://api.example.com/v1/jobs", "task-9"),
            "https://api.example.com/v1/jobs/task-9"
        );
    }

    #[test]
    fn headers_always_include_wait_and_cache_controls() {
        let s = hf_settings("https://api-inference.huggingface.co/models/x");
        let headers = HuggingFaceAdapter.get_headers(&s);
        assert_eq!(headers.get("x-wait-for-model").unwrap(), "true");
        assert_eq!(headers.get("x-use-cache").unwrap(), "false");
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer ");
    }
}
