use serde::Serialize;
use thiserror::Error;

/// Failure classes reported by the identity provider SDK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum ProviderErrorKind {
    PopupBlocked,
    PopupClosedByUser,
    InvalidCredential,
    Network,
    Other(String),
}

/// Error returned by an [`IdentityProvider`](super::IdentityProvider) call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classifies an SDK error code such as `auth/popup-blocked`.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let kind = match code.strip_prefix("auth/").unwrap_or(code) {
            "popup-blocked" => ProviderErrorKind::PopupBlocked,
            "popup-closed-by-user" | "cancelled-popup-request" => {
                ProviderErrorKind::PopupClosedByUser
            }
            "invalid-credential" => ProviderErrorKind::InvalidCredential,
            "network-request-failed" => ProviderErrorKind::Network,
            other => ProviderErrorKind::Other(other.to_string()),
        };
        Self::new(kind, message)
    }

    pub fn code(&self) -> &str {
        match &self.kind {
            ProviderErrorKind::PopupBlocked => "auth/popup-blocked",
            ProviderErrorKind::PopupClosedByUser => "auth/popup-closed-by-user",
            ProviderErrorKind::InvalidCredential => "auth/invalid-credential",
            ProviderErrorKind::Network => "auth/network-request-failed",
            ProviderErrorKind::Other(code) => code,
        }
    }
}

/// Failures surfaced to the user by the auth controller.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthError {
    #[error("sign-in cancelled")]
    Cancelled,

    #[error("identity provider error ({code}): {0}", code = .0.code())]
    Provider(ProviderError),

    #[error("sign-in attempt timed out")]
    Timeout,

    #[error("redirect loop detected")]
    RedirectLoop,
}

impl AuthError {
    /// Whether the UI should offer a "try again" action.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Cancelled => "Sign-in was cancelled.",
            Self::Provider(err) => match err.kind {
                ProviderErrorKind::InvalidCredential => {
                    "Your sign-in credentials were rejected. Please try again."
                }
                ProviderErrorKind::Network => {
                    "Could not reach the sign-in service. Check your connection and try again."
                }
                _ => "Sign-in failed. Please try again.",
            },
            Self::Timeout => "Sign-in took too long. Please try again.",
            Self::RedirectLoop => {
                "Sign-in kept redirecting without finishing. Please try again in a moment."
            }
        }
    }
}

/// Session storage failures. The controller logs and swallows these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("session storage is unavailable")]
    Unavailable,

    #[error("session storage quota exceeded")]
    QuotaExceeded,

    #[error("storage error: {0}")]
    Other(String),
}
