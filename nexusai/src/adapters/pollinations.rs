//! Pollinations image adapter: the whole request is a GET URL with the
//! prompt as a path segment.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;

use super::openai::error_message;
use super::{Adapter, HttpMethod, Parsed, RawResponse, RequestPayload};
use crate::context::WireMessage;
use crate::types::{NormalizedResponse, Settings};

const DEFAULT_BASE_URL: &str = "https://gen.pollinations.ai/image/";

// encodeURIComponent leaves these unescaped.
const PROMPT_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub struct PollinationsAdapter;

impl Adapter for PollinationsAdapter {
    fn name(&self) -> &'static str {
        "pollinations"
    }

    fn detect(&self, url: &str) -> bool {
        url.contains("pollinations.ai/image/")
            || url.contains("image.pollinations.ai")
            || url.contains("gen.pollinations.ai/image")
    }

    fn build_request(&self, messages: &[WireMessage], settings: &Settings) -> RequestPayload {
        let prompt = super::last_user_prompt(messages);
        let encoded = utf8_percent_encode(&prompt, PROMPT_SEGMENT).to_string();

        let mut base_url = if settings.api_url.is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            settings.api_url.clone()
        };
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        let mut params = vec![];
        if !settings.model_name.is_empty() {
            params.push(("model", settings.model_name.as_str()));
        }
        params.push(("width", "1024"));
        params.push(("height", "1024"));
        params.push(("enhance", "true"));
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={}", utf8_percent_encode(v, PROMPT_SEGMENT)))
            .collect::<Vec<_>>()
            .join("&");

        RequestPayload::ImageGet {
            url: format!("{base_url}{encoded}?{query}"),
        }
    }

    fn parse_response(&self, raw: &RawResponse) -> Parsed {
        if let Some(image) = &raw.image_data {
            return Parsed::Complete(NormalizedResponse::image(image));
        }

        // Direct fetches can yield the image data URL as a bare string body.
        if let Some(text) = raw.body.as_str() {
            if text.starts_with("data:image") {
                return Parsed::Complete(NormalizedResponse::image(text));
            }
        }

        if let Some(error) = raw.body.get("error") {
            return Parsed::Complete(NormalizedResponse::error_with_original(
                error_message(error),
                error.clone(),
            ));
        }

        Parsed::Complete(NormalizedResponse::error("Unexpected response format"))
    }

    fn get_headers(
        &self,
        settings: &Settings,
    ) -> std::collections::HashMap<String, String> {
        let mut headers = std::collections::HashMap::new();
        if !settings.api_token.is_empty() {
            headers.insert(
                "Authorization".into(),
                format!("Bearer {}", settings.api_token),
            );
        }
        headers
    }

    fn get_method(&self) -> HttpMethod {
        HttpMethod::Get
    }
}
