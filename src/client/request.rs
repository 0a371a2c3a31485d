//! Request and response values passed through the pipeline.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::PipelineError;

/// A business call: `{method, url, headers, body?}`.
///
/// `url` may be absolute or a path relative to the configured base URL. The
/// value is reused verbatim for the single retry, so it owns its body.
///
/// # Example
/// ```
/// use authpipe::client::ApiRequest;
/// use serde_json::json;
///
/// let request = ApiRequest::post("/api/social/posts/create/")
///     .json(&json!({ "text": "hello" }))?;
/// assert!(request.body_bytes().is_some());
/// # Ok::<(), authpipe::error::PipelineError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    json: bool,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            json: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, PipelineError> {
        self.body = Some(serde_json::to_vec(value)?);
        self.json = true;
        Ok(self)
    }

    /// Raw body; the caller is responsible for `Content-Type`.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self.json = false;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub(crate) fn is_json(&self) -> bool {
        self.json
    }
}

/// A response handed back to the caller unchanged.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, PipelineError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn json_body_is_marked_json() {
        let request = ApiRequest::post("/x").json(&json!({"a": 1})).unwrap();
        assert!(request.is_json());
        assert_eq!(request.body_bytes(), Some(br#"{"a":1}"#.as_slice()));

        let raw = request.body("plain");
        assert!(!raw.is_json());
    }

    #[test]
    fn response_json_decodes_body() {
        let response = ApiResponse::new(StatusCode::OK, HeaderMap::new(), br#"{"ok":true}"#.to_vec());
        let value: Value = response.json().unwrap();
        assert_eq!(value, json!({"ok": true}));
        assert!(response.is_success());
    }

    #[test]
    fn response_json_reports_malformed_body() {
        let response = ApiResponse::new(StatusCode::OK, HeaderMap::new(), b"<html>".to_vec());
        assert!(matches!(
            response.json::<Value>(),
            Err(PipelineError::Serialization(_))
        ));
    }
}
