//! Error classification and reporting support.
//!
//! Failures are sorted into a closed taxonomy. Categories attributable to
//! the external API are surfaced to the user but never reported upstream;
//! categories attributable to this application are eligible for reporting,
//! with secret-bearing fields redacted first.

use serde::{Deserialize, Serialize};

pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // Provider-side (not reported)
    ApiServerError,
    ApiAuthError,
    ApiRateLimit,
    ApiNotFound,
    ApiBadRequest,
    ApiTimeout,
    // App-side (reported)
    ParseError,
    RenderError,
    RequestBuildError,
    CorsError,
    NetworkError,
    UnknownError,
}

/// Classify a failure from its HTTP status (exact checks first) and message
/// text (case-insensitive substring patterns, fixed priority order).
pub fn classify(status: Option<u16>, message: &str) -> ErrorKind {
    if let Some(status) = status {
        match status {
            500..=599 => return ErrorKind::ApiServerError,
            401 | 403 => return ErrorKind::ApiAuthError,
            429 => return ErrorKind::ApiRateLimit,
            404 => return ErrorKind::ApiNotFound,
            400 => return ErrorKind::ApiBadRequest,
            _ => {}
        }
    }

    let msg = message.to_lowercase();

    if contains_any(&msg, &["timeout", "timed out", "aborted"]) {
        return ErrorKind::ApiTimeout;
    }
    if contains_any(&msg, &["cors", "cross-origin", "access-control"]) {
        return ErrorKind::CorsError;
    }
    if contains_any(&msg, &["network", "failed to fetch", "connection"]) {
        return ErrorKind::NetworkError;
    }
    if contains_any(
        &msg,
        &["parse", "json", "unexpected token", "syntax", "unexpected response"],
    ) {
        return ErrorKind::ParseError;
    }
    if contains_any(
        &msg,
        &["unauthorized", "authentication", "invalid token", "api key", "invalid_api_key"],
    ) {
        return ErrorKind::ApiAuthError;
    }
    if contains_any(&msg, &["rate limit", "too many requests", "quota"]) {
        return ErrorKind::ApiRateLimit;
    }
    if contains_any(
        &msg,
        &["internal server error", "service unavailable", "bad gateway", "overloaded"],
    ) {
        return ErrorKind::ApiServerError;
    }

    ErrorKind::UnknownError
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Fixed user-facing message for each category.
pub fn user_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::ApiServerError => {
            "The AI service is experiencing issues. Please try again later."
        }
        ErrorKind::ApiAuthError => {
            "Authentication failed. Please check your API token in settings."
        }
        ErrorKind::ApiRateLimit => {
            "Rate limit exceeded. Please wait a moment before trying again."
        }
        ErrorKind::ApiNotFound => {
            "The API endpoint was not found. Please check your API URL in settings."
        }
        ErrorKind::ApiBadRequest => {
            "The request was invalid. Please check your settings or try a different prompt."
        }
        ErrorKind::ApiTimeout => {
            "The request timed out. The AI service may be slow or unavailable."
        }
        ErrorKind::ParseError => {
            "Failed to understand the API response. This may be a compatibility issue."
        }
        ErrorKind::RenderError => {
            "Failed to display the response. Please try refreshing the page."
        }
        ErrorKind::RequestBuildError => {
            "Failed to build the request. Please check your settings."
        }
        ErrorKind::CorsError => {
            "Cross-origin request blocked. Try disabling \"Direct API\" in settings."
        }
        ErrorKind::NetworkError => "Network error. Please check your internet connection.",
        ErrorKind::UnknownError => "An unexpected error occurred. Please try again.",
    }
}

/// Only app-attributable categories are reported upstream; provider-side
/// categories reflect the external API's behavior, not a defect here.
pub fn is_reportable(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ParseError
            | ErrorKind::RenderError
            | ErrorKind::RequestBuildError
            | ErrorKind::UnknownError
    )
}

const SENSITIVE_FIELDS: [&str; 6] =
    ["token", "api_key", "apikey", "authorization", "secret", "password"];

/// Recursively replace the values of secret-bearing fields (matched by
/// case-insensitive key-name substring) with a placeholder.
pub fn redact_secrets(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                let lower = key.to_lowercase();
                if SENSITIVE_FIELDS.iter().any(|f| lower.contains(f)) {
                    *entry = serde_json::Value::String("[REDACTED]".into());
                } else {
                    redact_secrets(entry);
                }
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                redact_secrets(item);
            }
        }
        _ => {}
    }
}

/// Payload sent to the error-reporting endpoint. Construction redacts the
/// request body; callers must not bypass `new`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub error_type: ErrorKind,
    pub error_message: String,
    pub api_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub app_version: &'static str,
}

impl ErrorReport {
    pub fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        api_url: impl Into<String>,
        status_code: Option<u16>,
        request_body: Option<serde_json::Value>,
        response_body: Option<serde_json::Value>,
    ) -> Self {
        let request_body = request_body.map(|mut body| {
            redact_secrets(&mut body);
            body
        });
        Self {
            error_type: kind,
            error_message: message.into(),
            api_url: api_url.into(),
            status_code,
            request_body,
            response_body,
            timestamp: chrono::Utc::now(),
            app_version: APP_VERSION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_codes_win_over_message_text() {
        assert_eq!(classify(Some(429), "totally fine"), ErrorKind::ApiRateLimit);
        assert_eq!(classify(Some(503), "rate limit"), ErrorKind::ApiServerError);
        assert_eq!(classify(Some(401), ""), ErrorKind::ApiAuthError);
        assert_eq!(classify(Some(403), ""), ErrorKind::ApiAuthError);
        assert_eq!(classify(Some(404), ""), ErrorKind::ApiNotFound);
        assert_eq!(classify(Some(400), ""), ErrorKind::ApiBadRequest);
    }

    #[test]
    fn message_patterns_apply_in_priority_order() {
        assert_eq!(classify(None, "Failed to fetch"), ErrorKind::NetworkError);
        assert_eq!(
            classify(None, "Unexpected response format"),
            ErrorKind::ParseError
        );
        assert_eq!(classify(None, "Request timed out"), ErrorKind::ApiTimeout);
        assert_eq!(classify(None, "CORS policy blocked"), ErrorKind::CorsError);
        assert_eq!(
            classify(None, "invalid_api_key provided"),
            ErrorKind::ApiAuthError
        );
        assert_eq!(classify(None, "quota exceeded"), ErrorKind::ApiRateLimit);
        assert_eq!(classify(None, "bad gateway"), ErrorKind::ApiServerError);
        assert_eq!(classify(None, "something odd"), ErrorKind::UnknownError);
    }

    #[test]
    fn timeout_outranks_later_patterns() {
        // "aborted" must match before the network/connection patterns.
        assert_eq!(
            classify(None, "connection aborted"),
            ErrorKind::ApiTimeout
        );
    }

    #[test]
    fn unclassified_status_falls_through_to_message() {
        assert_eq!(classify(Some(418), "timed out"), ErrorKind::ApiTimeout);
    }

    #[test]
    fn reportable_is_limited_to_app_side_kinds() {
        assert!(is_reportable(ErrorKind::ParseError));
        assert!(is_reportable(ErrorKind::RenderError));
        assert!(is_reportable(ErrorKind::RequestBuildError));
        assert!(is_reportable(ErrorKind::UnknownError));
        assert!(!is_reportable(ErrorKind::ApiServerError));
        assert!(!is_reportable(ErrorKind::ApiRateLimit));
        assert!(!is_reportable(ErrorKind::CorsError));
        assert!(!is_reportable(ErrorKind::NetworkError));
    }

    #[test]
    fn redaction_is_recursive_and_substring_based() {
        let mut body = json!({
            "model": "gpt-4o",
            "api_token": "sk-secret",
            "nested": {
                "Authorization": "Bearer sk-secret",
                "messages": [{"role": "user", "content": "hi", "apiKey": "k"}]
            }
        });
        redact_secrets(&mut body);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["api_token"], "[REDACTED]");
        assert_eq!(body["nested"]["Authorization"], "[REDACTED]");
        assert_eq!(body["nested"]["messages"][0]["apiKey"], "[REDACTED]");
        assert_eq!(body["nested"]["messages"][0]["content"], "hi");
    }

    #[test]
    fn error_report_redacts_request_body() {
        let report = ErrorReport::new(
            ErrorKind::ParseError,
            "bad shape",
            "https://example.com/v1",
            None,
            Some(json!({"token": "sk-abc", "model": "m"})),
            None,
        );
        let body = report.request_body.unwrap();
        assert_eq!(body["token"], "[REDACTED]");
        assert_eq!(body["model"], "m");
    }
}
