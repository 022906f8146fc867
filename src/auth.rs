//! Email/password authentication against the REST backend.
//!
//! The session is either anonymous (no current user) or authenticated.
//! Login, signup and the initial session check move it to authenticated;
//! logout, a failed refresh, or an unrecoverable 401 move it back.

use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, RequestBody};
use crate::error::{AdapterError, Result};
use crate::session::{SessionUser, Subscription};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    access_token: String,
    refresh_token: String,
    user: SessionUser,
}

/// Auth operations bound to one client.
#[derive(Clone)]
pub struct Auth {
    client: Arc<ApiClient>,
}

impl Auth {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    pub fn current_user(&self) -> Option<SessionUser> {
        self.client.session().current()
    }

    /// Register an auth-state listener. It is called right away with the
    /// current user, then on every transition.
    pub fn on_auth_state_changed<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Option<&SessionUser>) + Send + Sync + 'static,
    {
        self.client.session().subscribe(listener)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<SessionUser> {
        self.authenticate("/auth/login", email, password).await
    }

    pub async fn signup(&self, email: &str, password: &str) -> Result<SessionUser> {
        self.authenticate("/auth/signup", email, password).await
    }

    async fn authenticate(&self, path: &str, email: &str, password: &str) -> Result<SessionUser> {
        let resp = self
            .client
            .fetch_public(
                Method::POST,
                path,
                serde_json::json!({ "email": email.trim(), "password": password }),
            )
            .await?;
        let auth: AuthResponse = serde_json::from_value(resp)
            .map_err(|e| AdapterError::InvalidResponse(format!("auth response: {e}")))?;

        self.client
            .tokens()
            .persist(&auth.access_token, &auth.refresh_token)?;
        info!(uid = %auth.user.uid, path, "signed in");
        self.client.session().set_user(Some(auth.user.clone()));
        Ok(auth.user)
    }

    /// Sign out. The server-side invalidation is best effort; local state is
    /// always cleared.
    pub async fn logout(&self) {
        let refresh = self.client.tokens().refresh_token();
        self.client
            .post_quietly(
                "/auth/logout",
                serde_json::json!({ "refreshToken": refresh.unwrap_or_default() }),
            )
            .await;
        self.client.tokens().clear();
        self.client.session().teardown();
        info!("signed out");
    }

    /// Restore a session from stored tokens. Runs once when the backend
    /// starts.
    pub async fn init_session(&self) -> Option<SessionUser> {
        if self.client.get_token().await.is_none() {
            debug!("no stored session");
            return None;
        }

        match self.fetch_me().await {
            Ok(user) => {
                info!(uid = %user.uid, "session restored");
                self.client.session().set_user(Some(user.clone()));
                Some(user)
            }
            Err(e) => {
                warn!(error = %e, "stored session is not usable, clearing it");
                self.client.expire_session();
                None
            }
        }
    }

    async fn fetch_me(&self) -> Result<SessionUser> {
        let value: Value = self
            .client
            .fetch_api(Method::GET, "/auth/me", RequestBody::Empty)
            .await?;
        parse_user(value)
    }

    /// Access token for the current user, refreshed first when
    /// `force_refresh` is set or the cached one is near expiry.
    pub async fn get_id_token(&self, force_refresh: bool) -> Result<String> {
        let tokens = self.client.tokens();
        if self.current_user().is_none() && tokens.refresh_token().is_none() {
            return Err(AdapterError::NotAuthenticated);
        }
        if force_refresh {
            if let Some(current) = tokens.access_token() {
                tokens.invalidate_access_if(&current);
            }
        }
        match self.client.get_token().await {
            Some(token) => Ok(token),
            None => {
                self.client.expire_session();
                Err(AdapterError::SessionExpired)
            }
        }
    }
}

/// `/auth/me` answers either with the user object or `{ "user": {...} }`.
fn parse_user(value: Value) -> Result<SessionUser> {
    let user = match value.get("user") {
        Some(inner) if inner.is_object() => inner.clone(),
        _ => value,
    };
    serde_json::from_value(user).map_err(|e| AdapterError::InvalidResponse(format!("user: {e}")))
}
