//! Process-wide auth state: the signed-in user and the listeners watching it.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// The signed-in user as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    #[serde(alias = "id")]
    pub uid: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
}

type Listener = Arc<dyn Fn(Option<&SessionUser>) + Send + Sync>;

#[derive(Default)]
struct SessionInner {
    user: Option<SessionUser>,
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
}

impl SessionInner {
    fn listener_handles(&self) -> Vec<Listener> {
        self.listeners.iter().map(|(_, l)| l.clone()).collect()
    }
}

/// Current user plus auth-state listeners.
///
/// Cloning shares the same state. Notifications (including the replay on
/// subscribe) are delivered one at a time, so every listener sees the
/// transitions in order. Listeners must not change the session from inside
/// the callback.
#[derive(Clone, Default)]
pub struct SessionState {
    inner: Arc<Mutex<SessionInner>>,
    notify: Arc<Mutex<()>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<SessionUser> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current().is_some()
    }

    /// Register `listener` and immediately call it with the current state.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Option<&SessionUser>) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let _notify = self.notify.lock().unwrap_or_else(|e| e.into_inner());
        let (id, user) = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let id = inner.next_listener_id;
            inner.next_listener_id += 1;
            inner.listeners.push((id, listener.clone()));
            (id, inner.user.clone())
        };
        listener(user.as_ref());
        Subscription {
            id,
            session: Arc::downgrade(&self.inner),
        }
    }

    /// Replace the current user and notify every listener.
    pub fn set_user(&self, user: Option<SessionUser>) {
        let _notify = self.notify.lock().unwrap_or_else(|e| e.into_inner());
        let listeners = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.user = user.clone();
            inner.listener_handles()
        };
        Self::fan_out(user.as_ref(), &listeners);
    }

    /// Drop the current user and tell listeners the session is gone.
    pub fn teardown(&self) {
        self.set_user(None);
    }

    /// Tear down only a signed-in session. Returns whether a user was set.
    pub fn teardown_if_authenticated(&self) -> bool {
        let _notify = self.notify.lock().unwrap_or_else(|e| e.into_inner());
        let listeners = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.user.take().is_none() {
                return false;
            }
            inner.listener_handles()
        };
        Self::fan_out(None, &listeners);
        true
    }

    fn fan_out(user: Option<&SessionUser>, listeners: &[Listener]) {
        debug!(
            authenticated = user.is_some(),
            listeners = listeners.len(),
            "auth state changed"
        );
        for listener in listeners {
            listener(user);
        }
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.listeners.len()
    }
}

/// Handle returned by [`SessionState::subscribe`].
#[must_use = "dropping the handle keeps the listener registered; call unsubscribe() to remove it"]
pub struct Subscription {
    id: u64,
    session: Weak<Mutex<SessionInner>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.session.upgrade() {
            let mut inner = inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
pub(crate) fn test_user() -> SessionUser {
    SessionUser {
        uid: "user-1".into(),
        email: "owner@shop.example".into(),
        display_name: Some("Shop Owner".into()),
        email_verified: true,
    }
}
