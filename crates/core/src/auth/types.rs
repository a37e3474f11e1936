use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::AuthError;

/// Identity resolved by the identity provider.
///
/// The provider's client library owns the user; the controller only keeps a
/// copy of what it last observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
    /// Provider that issued the identity (e.g. `google.com`).
    pub provider_id: String,
}

impl AuthUser {
    pub fn new(uid: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: None,
            email: None,
            photo_url: None,
            provider_id: provider_id.into(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }
}

/// Per-tab sign-in bookkeeping that has to survive a full page reload.
///
/// The default value is the "nothing pending" record; persisting it removes
/// every key from session storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFlags {
    /// Sole source of truth for "a sign-in is pending".
    pub sign_in_attempt: bool,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub sign_in_timestamp: Option<DateTime<Utc>>,
    pub auth_redirect_count: u32,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_redirect_time: Option<DateTime<Utc>>,
    /// Set by the callback page once the provider handed control back.
    pub auth_complete: bool,
}

impl SessionFlags {
    /// Drops the markers of a previous attempt, keeping the redirect counter
    /// so loops can still be detected across attempts.
    pub fn clear_attempt(&mut self) {
        self.sign_in_attempt = false;
        self.sign_in_timestamp = None;
        self.auth_complete = false;
    }

    /// Resets every flag, counters included.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Lifecycle of a sign-in attempt within one browser tab.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    #[default]
    Idle,
    AwaitingPopup,
    /// Survives a reload through the persisted `signInAttempt` flag.
    AwaitingRedirect,
    Reconciling,
    Authenticated,
    Error,
}

impl AuthPhase {
    /// Whether an attempt is in flight.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            Self::AwaitingPopup | Self::AwaitingRedirect | Self::Reconciling
        )
    }

    /// Transition table of the per-tab state machine.
    pub fn can_transition_to(self, next: AuthPhase) -> bool {
        use AuthPhase::*;

        match (self, next) {
            (Idle | Error, AwaitingPopup | AwaitingRedirect) => true,
            // Sign-in started again while a redirect is still recorded, e.g. the
            // navigation never happened. The new attempt replaces the old one.
            (AwaitingRedirect, AwaitingPopup) => true,
            // Popup blocked, falling back to redirect.
            (AwaitingPopup, AwaitingRedirect) => true,
            (Idle | AwaitingRedirect, Reconciling) => true,
            (AwaitingPopup | AwaitingRedirect | Reconciling, Authenticated | Error | Idle) => true,
            // Sign-in aborted by the loop check before anything was pending.
            (Idle, Error) => true,
            // Auth-state changes reported by the provider outside an attempt.
            (Idle | Error, Authenticated) => true,
            (Authenticated, Idle) => true,
            (Error, Idle) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AwaitingPopup => "awaiting_popup",
            Self::AwaitingRedirect => "awaiting_redirect",
            Self::Reconciling => "reconciling",
            Self::Authenticated => "authenticated",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// How the provider's sign-in UI is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignInMethod {
    Popup,
    Redirect,
}

/// Outcome of a redirect loop check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCheck {
    NoLoop,
    LoopDetected,
}

impl LoopCheck {
    pub fn is_loop(self) -> bool {
        self == Self::LoopDetected
    }
}

/// Window and threshold for redirect loop detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopPolicy {
    pub window: Duration,
    pub threshold: u32,
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            window: Duration::seconds(30),
            threshold: 2,
        }
    }
}

/// What the runtime environment looks like for the purpose of choosing
/// between popup and redirect sign-in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrowserEnvironment {
    pub is_mobile: bool,
    /// Running inside an iframe or an in-app web view.
    pub is_embedded: bool,
    pub is_known_desktop_browser: bool,
    pub hostname: String,
}

/// State exposed to the rest of the application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthSnapshot {
    pub user: Option<AuthUser>,
    pub loading: bool,
    pub phase: AuthPhase,
    pub error: Option<AuthError>,
}

impl Default for AuthSnapshot {
    fn default() -> Self {
        Self {
            user: None,
            loading: true,
            phase: AuthPhase::Idle,
            error: None,
        }
    }
}
