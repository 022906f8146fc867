//! Error type shared by every adapter operation.

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AdapterError>;

#[derive(Debug, Error)]
pub enum AdapterError {
    /// The session could not be recovered by a token refresh.
    #[error("Session expired. Please sign in again.")]
    SessionExpired,

    /// An operation that needs a signed-in user ran while anonymous.
    #[error("Not signed in")]
    NotAuthenticated,

    /// Non-success response from the backend. `message` is the server's
    /// `error` text, or `HTTP <status>` when the body carried none.
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("{0}")]
    Network(String),

    #[error("Invalid response from backend: {0}")]
    InvalidResponse(String),

    #[error("Credential storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl AdapterError {
    pub(crate) fn from_status(status: StatusCode, message: Option<String>) -> Self {
        AdapterError::Api {
            status: status.as_u16(),
            message: message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
        }
    }

    /// HTTP status carried by the error, when it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            AdapterError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a backend error looks like a missing-document failure.
    ///
    /// Matches a 404 status, or a message containing "404", "not found" or
    /// "not-found" case-insensitively. Transport errors never match.
    pub fn is_not_found(&self) -> bool {
        match self {
            AdapterError::Api { status, message } => {
                let message = message.to_ascii_lowercase();
                *status == 404
                    || message.contains("404")
                    || message.contains("not found")
                    || message.contains("not-found")
            }
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for AdapterError {
    fn from(e: rusqlite::Error) -> Self {
        AdapterError::Storage(format!("sqlite: {e}"))
    }
}

impl From<keyring::Error> for AdapterError {
    fn from(e: keyring::Error) -> Self {
        AdapterError::Storage(format!("keyring: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_fallback_message_when_body_has_no_error() {
        let err = AdapterError::from_status(StatusCode::BAD_GATEWAY, None);
        assert_eq!(err.to_string(), "HTTP 502");
        assert_eq!(err.status(), Some(502));

        let err = AdapterError::from_status(StatusCode::BAD_REQUEST, Some("   ".into()));
        assert_eq!(err.to_string(), "HTTP 400");
    }

    #[test]
    fn not_found_classifier_matches_all_shapes() {
        for message in ["HTTP 404", "Document Not Found", "firestore/not-found: missing"] {
            let err = AdapterError::Api {
                status: 500,
                message: message.to_string(),
            };
            assert!(err.is_not_found(), "expected not-found for {message}");
        }
        let err = AdapterError::Api {
            status: 500,
            message: "Internal error".into(),
        };
        assert!(!err.is_not_found());
        assert!(!AdapterError::SessionExpired.is_not_found());
        // Only backend responses are classified, not transport failures.
        assert!(!AdapterError::Network("Cannot reach backend at http://127.0.0.1:4040".into())
            .is_not_found());
        assert!(AdapterError::from_status(StatusCode::NOT_FOUND, None).is_not_found());
    }
}
