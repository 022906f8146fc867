//! Access/refresh token pair with durable persistence.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::error::Result;
use crate::storage::{CredentialStorage, KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN};

/// A token expiring within this many seconds is already treated as expired,
/// so a request started just before expiry cannot land after it.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Default)]
struct CachedTokens {
    access: Option<String>,
    refresh: Option<String>,
}

impl CachedTokens {
    fn wipe_access(&mut self) {
        if let Some(mut token) = self.access.take() {
            token.zeroize();
        }
    }

    fn wipe(&mut self) {
        self.wipe_access();
        if let Some(mut token) = self.refresh.take() {
            token.zeroize();
        }
    }
}

/// Holds the token pair in memory and mirrors it to durable storage.
///
/// The memory cache is read from storage once, when the store is built.
pub struct TokenStore {
    storage: Arc<dyn CredentialStorage>,
    cache: Mutex<CachedTokens>,
}

impl TokenStore {
    pub fn load(storage: Arc<dyn CredentialStorage>) -> Self {
        let access = storage.get(KEY_ACCESS_TOKEN).filter(|t| !t.is_empty());
        let refresh = storage.get(KEY_REFRESH_TOKEN).filter(|t| !t.is_empty());
        let cache = match (access, refresh) {
            (Some(access), Some(refresh)) => CachedTokens {
                access: Some(access),
                refresh: Some(refresh),
            },
            (None, None) => CachedTokens::default(),
            (mut access, mut refresh) => {
                warn!("partial token pair in storage, treating session as signed out");
                access.zeroize();
                refresh.zeroize();
                CachedTokens::default()
            }
        };
        Self {
            storage,
            cache: Mutex::new(cache),
        }
    }

    /// Store a new pair, replacing any previous one.
    ///
    /// If only the access token could be written, both tokens are removed
    /// so storage never holds a mismatched pair.
    pub fn persist(&self, access: &str, refresh: &str) -> Result<()> {
        self.storage.set(KEY_ACCESS_TOKEN, access)?;
        if let Err(e) = self.storage.set(KEY_REFRESH_TOKEN, refresh) {
            warn!(error = %e, "failed to store refresh token, dropping the partial pair");
            self.clear();
            return Err(e);
        }
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.wipe();
        cache.access = Some(access.to_string());
        cache.refresh = Some(refresh.to_string());
        Ok(())
    }

    /// Replace the access token and keep the current refresh token.
    pub fn set_access(&self, access: &str) -> Result<()> {
        self.storage.set(KEY_ACCESS_TOKEN, access)?;
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.wipe_access();
        cache.access = Some(access.to_string());
        Ok(())
    }

    /// Remove both tokens from storage and memory.
    pub fn clear(&self) {
        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.wipe();
        }
        for key in [KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN] {
            if let Err(e) = self.storage.delete(key) {
                warn!(key, error = %e, "failed to delete stored token");
            }
        }
        debug!("token store cleared");
    }

    /// Forget the cached access token only if it is still `stale`.
    ///
    /// A concurrent caller may already have replaced it with a fresh one.
    pub fn invalidate_access_if(&self, stale: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.access.as_deref() == Some(stale) {
            cache.wipe_access();
        }
    }

    pub fn access_token(&self) -> Option<String> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.access.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.refresh.clone()
    }

    /// Cached access token when present and not about to expire.
    pub fn valid_access_token(&self) -> Option<String> {
        self.access_token().filter(|t| !is_expired(t))
    }
}

/// Whether `token` is expired (or about to be) right now.
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now())
}

/// Whether `token` is expired at `now`, including the safety margin.
///
/// Any token whose payload segment does not decode to a JSON object with a
/// numeric `exp` counts as expired.
pub fn is_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    let Some(exp) = token_expiry(token) else {
        return true;
    };
    let deadline_ms = now.timestamp_millis() + EXPIRY_MARGIN_SECS * 1000;
    exp * 1000.0 < deadline_ms as f64
}

fn token_expiry(token: &str) -> Option<f64> {
    let payload = token.split('.').nth(1)?;
    if payload.is_empty() {
        return None;
    }
    // JWTs use the URL-safe alphabet without padding.
    let base64 = payload.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    claims.as_object()?.get("exp")?.as_f64()
}

#[cfg(test)]
pub(crate) fn make_token(exp: i64) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(
        serde_json::json!({ "sub": "user-1", "exp": exp })
            .to_string()
            .as_bytes(),
    );
    format!("{header}.{claims}.signature")
}
