//! Shared HTTP client and header helpers.

use std::sync::OnceLock;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::error::PipelineError;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

const ERROR_SUMMARY_LIMIT: usize = 200;

/// Get (or create) the shared reqwest client.
///
/// No overall timeout is set here; every call applies its own budget.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
}

/// Copy of `headers` carrying `Authorization: Bearer <access_token>`.
///
/// Any caller-supplied authorization header is replaced.
pub fn with_bearer(headers: &HeaderMap, access_token: &str) -> Result<HeaderMap, PipelineError> {
    let mut headers = headers.clone();
    let mut value = HeaderValue::from_str(&format!("Bearer {access_token}")).map_err(|_| {
        PipelineError::Authentication("access token is not a valid header value".to_string())
    })?;
    value.set_sensitive(true);
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}

/// Default `Content-Type: application/json` for requests with a body.
pub fn ensure_json_content_type(headers: &mut HeaderMap) {
    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
}

/// Short, log-safe description of an error body.
///
/// Prefers the `detail` or `error` field of a JSON body.
pub fn error_summary(body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["detail", "error", "message"]
                .iter()
                .find_map(|key| v.get(*key).and_then(|m| m.as_str()).map(str::to_string))
        });
    let text = from_json.unwrap_or_else(|| body.trim().to_string());
    if text.is_empty() {
        return "empty response body".to_string();
    }
    text.chars().take(ERROR_SUMMARY_LIMIT).collect()
}
