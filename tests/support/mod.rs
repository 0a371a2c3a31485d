#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use authpipe::auth::{KeyValueStore, MemoryKeyValueStore};
use authpipe::client::ApiClient;
use authpipe::config::ClientConfig;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const REFRESH_PATH: &str = "/api/auth/token/refresh/";
pub const LOGIN_PATH: &str = "/api/auth/login/";
pub const LOGOUT_PATH: &str = "/api/auth/logout/";

pub fn config(server: &MockServer) -> ClientConfig {
    ClientConfig::builder()
        .base_url(server.uri())
        .request_timeout(Duration::from_secs(2))
        .refresh_timeout(Duration::from_secs(2))
        .build()
}

/// Storage already holding a signed-in session.
pub fn seeded_storage(access: &str, refresh: &str) -> Arc<MemoryKeyValueStore> {
    let storage = Arc::new(MemoryKeyValueStore::new());
    storage
        .write(&[
            ("access_token", Some(access.to_string())),
            ("refresh_token", Some(refresh.to_string())),
        ])
        .expect("seed storage");
    storage
}

pub fn signed_in_client(server: &MockServer, access: &str, refresh: &str) -> ApiClient {
    client_with(config(server), seeded_storage(access, refresh))
}

pub fn signed_out_client(server: &MockServer) -> ApiClient {
    client_with(config(server), Arc::new(MemoryKeyValueStore::new()))
}

pub fn client_with(config: ClientConfig, storage: Arc<dyn KeyValueStore>) -> ApiClient {
    ApiClient::with_storage(config, storage).expect("build client")
}

/// Refresh endpoint answering `refresh_token` with `body` after `delay`.
pub async fn mount_refresh(
    server: &MockServer,
    refresh_token: &str,
    status: u16,
    body: Value,
    delay: Duration,
    expected_calls: u64,
) {
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({ "refresh": refresh_token })))
        .respond_with(
            ResponseTemplate::new(status)
                .set_body_json(body)
                .set_delay(delay),
        )
        .expect(expected_calls)
        .mount(server)
        .await;
}
