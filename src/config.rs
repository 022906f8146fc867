//! Backend configuration and API root normalisation.

use std::time::Duration;

use crate::error::{AdapterError, Result};

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between polls of a live subscription.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Wait used for a 429 without a usable `Retry-After` header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(2);

/// Upper bound on any 429 wait, whatever the server asks for.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(10);

const DEFAULT_TENANT_NOT_READY_CODE: &str = "TENANT_NOT_READY";

const ENV_API_URL: &str = "RETAIL_BACKEND_URL";
const ENV_TIMEOUT_SECS: &str = "RETAIL_BACKEND_TIMEOUT_SECS";
const ENV_POLL_MS: &str = "RETAIL_BACKEND_POLL_MS";
const ENV_TENANT_CODE: &str = "RETAIL_BACKEND_TENANT_CODE";

#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Normalised API root, always ending in exactly one `/api`.
    pub api_url: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    /// `code` value of a 403 body meaning the user's business link is not
    /// established yet.
    pub tenant_not_ready_code: String,
    pub default_retry_after: Duration,
    pub max_retry_after: Duration,
}

impl BackendConfig {
    pub fn new(api_url: &str) -> Self {
        Self {
            api_url: normalize_api_url(api_url),
            request_timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            tenant_not_ready_code: DEFAULT_TENANT_NOT_READY_CODE.to_string(),
            default_retry_after: DEFAULT_RETRY_AFTER,
            max_retry_after: MAX_RETRY_AFTER,
        }
    }

    /// Build the config from `RETAIL_BACKEND_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var(ENV_API_URL)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AdapterError::Config(format!("{ENV_API_URL} is not set")))?;

        let mut config = Self::new(&url);
        if let Some(secs) = env_u64(ENV_TIMEOUT_SECS)? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_u64(ENV_POLL_MS)? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Ok(code) = std::env::var(ENV_TENANT_CODE) {
            let code = code.trim();
            if !code.is_empty() {
                config.tenant_not_ready_code = code.to_string();
            }
        }
        Ok(config)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Full URL for an API path such as `/auth/login`.
    pub fn endpoint(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.api_url)
        } else {
            format!("{}/{path}", self.api_url)
        }
    }

    /// Wait for a 429 response given its raw `Retry-After` header.
    pub fn retry_after_delay(&self, header: Option<&str>) -> Duration {
        header
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.default_retry_after)
            .min(self.max_retry_after)
    }
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| AdapterError::Config(format!("{name} must be a number, got {raw:?}"))),
        _ => Ok(None),
    }
}

/// Normalise the backend URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes and trailing `/api` segments
/// - append exactly one `/api`
pub fn normalize_api_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    loop {
        while url.ends_with('/') {
            url.pop();
        }
        if url.ends_with("/api") {
            url.truncate(url.len() - 4);
        } else {
            break;
        }
    }

    format!("{url}/api")
}
