use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use url::Url;

use super::{AuthUser, BrowserEnvironment, ProviderError, StorageError};

/// Result type for identity provider calls.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Abstraction over the identity provider's client SDK.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Run the sign-in flow in a secondary window.
    async fn sign_in_with_popup(&self) -> Result<AuthUser>;

    /// Navigate the page to the provider. On a real page nothing after a
    /// successful call runs; the outcome is read back with
    /// [`redirect_result`](Self::redirect_result) after the reload.
    async fn sign_in_with_redirect(&self) -> Result<()>;

    /// Outcome of the last redirect sign-in, if the provider has one.
    async fn redirect_result(&self) -> Result<Option<AuthUser>>;

    /// User currently signed in according to the provider.
    fn current_user(&self) -> Option<AuthUser>;

    /// Auth-state change notifications.
    fn subscribe(&self) -> watch::Receiver<Option<AuthUser>>;

    async fn sign_out(&self) -> Result<()>;
}

/// Per-tab key/value storage that survives a reload.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn get_item(&self, key: &str) -> std::result::Result<Option<String>, StorageError>;

    async fn set_item(&self, key: &str, value: &str) -> std::result::Result<(), StorageError>;

    async fn remove_item(&self, key: &str) -> std::result::Result<(), StorageError>;
}

/// Capability detection for choosing the sign-in method.
pub trait EnvironmentProbe: Send + Sync {
    fn environment(&self) -> BrowserEnvironment;
}

/// The page's address bar.
pub trait Location: Send + Sync {
    fn current_url(&self) -> Url;

    /// Replace the current URL without adding a history entry.
    fn replace_url(&self, url: Url);
}

/// Wall clock, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
