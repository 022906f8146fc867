//! Shared fixtures for the unit tests.

use std::sync::Arc;
use wiremock::MockServer;

use crate::api::ApiClient;
use crate::config::BackendConfig;
use crate::storage::{CredentialStorage, MemoryStorage};
use crate::tokens::make_token;

/// Access token valid for another hour.
pub(crate) fn fresh_token() -> String {
    make_token(chrono::Utc::now().timestamp() + 3600)
}

/// Access token that expired ten seconds ago.
pub(crate) fn stale_token() -> String {
    make_token(chrono::Utc::now().timestamp() - 10)
}

pub(crate) fn test_config(server: &MockServer) -> BackendConfig {
    BackendConfig::new(&server.uri())
}

/// Client pointed at `server` with a stored token pair.
pub(crate) fn signed_in_client(
    server: &MockServer,
    access: &str,
    refresh: &str,
) -> (Arc<ApiClient>, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .set(crate::storage::KEY_ACCESS_TOKEN, access)
        .expect("seed access token");
    storage
        .set(crate::storage::KEY_REFRESH_TOKEN, refresh)
        .expect("seed refresh token");
    let client = ApiClient::new(test_config(server), storage.clone()).expect("client");
    (Arc::new(client), storage)
}

/// Client pointed at `server` with nothing stored.
pub(crate) fn anonymous_client(server: &MockServer) -> (Arc<ApiClient>, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    let client = ApiClient::new(test_config(server), storage.clone()).expect("client");
    (Arc::new(client), storage)
}
