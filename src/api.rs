//! REST backend client.
//!
//! Every call goes through [`ApiClient::fetch_api`], which attaches the bearer
//! token and recovers from the three transient failures the backend produces:
//!
//! - 401: the access token was rejected; refresh it and retry once, or tear
//!   the session down when the refresh fails.
//! - 429: rate limited; wait `Retry-After` (capped) and retry once.
//! - 403 with the tenant-not-ready code: the token predates the user's
//!   business link; refresh it and retry once.

use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::error::{AdapterError, Result};
use crate::session::SessionState;
use crate::storage::CredentialStorage;
use crate::tokens::TokenStore;

// ---------------------------------------------------------------------------
// Request / response plumbing
// ---------------------------------------------------------------------------

/// A file sent to the storage upload endpoint.
#[derive(Debug, Clone)]
pub struct FileUpload {
    /// Destination path in backend storage.
    pub path: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Request payload. Multipart forms are single-use in reqwest, so the body
/// is kept in this form and rebuilt for every attempt.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(FileUpload),
}

impl RequestBody {
    fn multipart_form(upload: &FileUpload) -> Result<Form> {
        let part = Part::bytes(upload.bytes.clone())
            .file_name(upload.file_name.clone())
            .mime_str(&upload.content_type)
            .map_err(|e| {
                AdapterError::InvalidArgument(format!(
                    "invalid content type {:?}: {e}",
                    upload.content_type
                ))
            })?;
        Ok(Form::new().text("path", upload.path.clone()).part("file", part))
    }
}

/// A fully read response.
struct RawResponse {
    status: StatusCode,
    retry_after: Option<String>,
    body: String,
}

impl RawResponse {
    fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// `code` field of a JSON error body.
    fn error_code(&self) -> Option<String> {
        self.json()?
            .get("code")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn error_message(&self) -> Option<String> {
        let json = self.json()?;
        json.get("error")
            .or_else(|| json.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn into_result(self) -> Result<Value> {
        if !self.status.is_success() {
            let message = self.error_message();
            return Err(AdapterError::from_status(self.status, message));
        }
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.body)
            .map_err(|e| AdapterError::InvalidResponse(format!("invalid JSON: {e}")))
    }
}

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach backend at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid backend URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ApiClient {
    http: Client,
    config: BackendConfig,
    tokens: TokenStore,
    session: SessionState,
    /// Serialises refresh calls so concurrent expirations share one refresh.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl ApiClient {
    pub fn new(config: BackendConfig, storage: Arc<dyn CredentialStorage>) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AdapterError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            config,
            tokens: TokenStore::load(storage),
            session: SessionState::new(),
            refresh_gate: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        body: &RequestBody,
        token: Option<&str>,
    ) -> Result<RawResponse> {
        let mut req = self.http.request(method.clone(), url);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        req = match body {
            RequestBody::Empty => req.header(CONTENT_TYPE, "application/json"),
            RequestBody::Json(value) => req.json(value),
            RequestBody::Multipart(upload) => req.multipart(RequestBody::multipart_form(upload)?),
        };

        let resp = req
            .send()
            .await
            .map_err(|e| AdapterError::Network(friendly_error(&self.config.api_url, &e)))?;
        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .text()
            .await
            .map_err(|e| AdapterError::Network(friendly_error(&self.config.api_url, &e)))?;
        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }

    /// Authenticated request to `path` (relative to the API root), decoded
    /// into `T`. Empty success bodies decode from JSON `null`.
    pub async fn fetch_api<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
    ) -> Result<T> {
        let value = self.fetch_value(method, path, &body).await?;
        serde_json::from_value(value).map_err(|e| AdapterError::InvalidResponse(e.to_string()))
    }

    async fn fetch_value(&self, method: Method, path: &str, body: &RequestBody) -> Result<Value> {
        let url = self.config.endpoint(path);
        let mut token = self.get_token().await;
        let mut resp = self.send(&method, &url, body, token.as_deref()).await?;

        if resp.status == StatusCode::UNAUTHORIZED {
            let Some(rejected) = token.take() else {
                return Err(AdapterError::SessionExpired);
            };
            debug!(path, "access token rejected, refreshing");
            self.tokens.invalidate_access_if(&rejected);
            token = self.get_token().await;
            let Some(fresh) = token.as_deref() else {
                self.expire_session();
                return Err(AdapterError::SessionExpired);
            };
            resp = self.send(&method, &url, body, Some(fresh)).await?;
            if resp.status == StatusCode::UNAUTHORIZED {
                self.expire_session();
                return Err(AdapterError::SessionExpired);
            }
        }

        if resp.status == StatusCode::TOO_MANY_REQUESTS {
            let delay = self.config.retry_after_delay(resp.retry_after.as_deref());
            warn!(
                path,
                delay_ms = delay.as_millis() as u64,
                "rate limited, retrying once"
            );
            tokio::time::sleep(delay).await;
            resp = self.send(&method, &url, body, token.as_deref()).await?;
        }

        if resp.status == StatusCode::FORBIDDEN {
            if let Some(stale) = token.as_deref() {
                if resp.error_code().as_deref() == Some(self.config.tenant_not_ready_code.as_str())
                {
                    info!(path, "tenant not ready for this token, refreshing and retrying");
                    self.tokens.invalidate_access_if(stale);
                    if let Some(fresh) = self.get_token().await {
                        resp = self.send(&method, &url, body, Some(&fresh)).await?;
                    }
                }
            }
        }

        resp.into_result()
    }

    /// Request without a bearer token and without any retry handling. Used
    /// by the credential endpoints, where a 401 means bad credentials rather
    /// than an expired session.
    pub(crate) async fn fetch_public(&self, method: Method, path: &str, body: Value) -> Result<Value> {
        let url = self.config.endpoint(path);
        self.send(&method, &url, &RequestBody::Json(body), None)
            .await?
            .into_result()
    }

    /// A usable access token, refreshing it when the cached one is missing
    /// or about to expire. `None` means the caller is signed out; a failed
    /// refresh ends the session.
    pub async fn get_token(&self) -> Option<String> {
        if let Some(token) = self.tokens.valid_access_token() {
            return Some(token);
        }
        self.tokens.refresh_token()?;

        let _gate = self.refresh_gate.lock().await;
        // Another caller may have refreshed while this one waited.
        if let Some(token) = self.tokens.valid_access_token() {
            return Some(token);
        }
        let refresh = self.tokens.refresh_token()?;

        match self.refresh_access_token(&refresh).await {
            Ok(access) => {
                if let Err(e) = self.tokens.set_access(&access) {
                    warn!(error = %e, "failed to persist refreshed access token");
                }
                info!("access token refreshed");
                Some(access)
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed, ending session");
                self.expire_session();
                None
            }
        }
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<String> {
        let resp = self
            .fetch_public(
                Method::POST,
                "/auth/refresh",
                serde_json::json!({ "refreshToken": refresh_token }),
            )
            .await?;
        if resp.get("success").and_then(Value::as_bool) == Some(false) {
            let message = resp
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("refresh rejected");
            return Err(AdapterError::InvalidResponse(message.to_string()));
        }
        resp.get("accessToken")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AdapterError::InvalidResponse("refresh response without accessToken".into()))
    }

    /// Clear tokens and the current user. Listeners hear `None` once, and
    /// only if a user was signed in.
    pub(crate) fn expire_session(&self) {
        self.tokens.clear();
        if self.session.teardown_if_authenticated() {
            warn!("session could not be refreshed, signed out");
        }
    }

    /// Best-effort authenticated POST whose outcome is ignored.
    pub(crate) async fn post_quietly(&self, path: &str, body: Value) {
        let url = self.config.endpoint(path);
        let token = self.tokens.access_token();
        match self
            .send(&Method::POST, &url, &RequestBody::Json(body), token.as_deref())
            .await
        {
            Ok(resp) if resp.status.is_success() => {}
            Ok(resp) => debug!(path, status = resp.status.as_u16(), "ignored failed request"),
            Err(e) => debug!(path, error = %e, "ignored failed request"),
        }
    }
}
