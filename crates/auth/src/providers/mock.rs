//! Mock identity provider for development and testing.
//!
//! Outcomes are scripted up front; each call consumes the next one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;

use tilshare_core::auth::{AuthUser, IdentityProvider, ProviderError, ProviderErrorKind, Result};

/// What the next popup sign-in does.
#[derive(Debug, Clone)]
pub enum PopupOutcome {
    Success(AuthUser),
    Failure(ProviderError),
    /// Never resolves, like a popup the user walked away from.
    Hang,
}

/// Scripted [`IdentityProvider`].
pub struct MockProvider {
    popups: Mutex<VecDeque<PopupOutcome>>,
    redirect_error: Mutex<Option<ProviderError>>,
    redirect_result: Mutex<Option<Result<Option<AuthUser>>>>,
    redirect_result_pending: AtomicBool,
    popup_calls: AtomicUsize,
    redirect_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
    auth_state: watch::Sender<Option<AuthUser>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a provider with nobody signed in and nothing scripted.
    pub fn new() -> Self {
        let (auth_state, _) = watch::channel(None);
        Self {
            popups: Mutex::new(VecDeque::new()),
            redirect_error: Mutex::new(None),
            redirect_result: Mutex::new(None),
            redirect_result_pending: AtomicBool::new(false),
            popup_calls: AtomicUsize::new(0),
            redirect_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
            auth_state,
        }
    }

    /// Queue the outcome of the next popup sign-in.
    pub fn with_popup(self, outcome: PopupOutcome) -> Self {
        lock(&self.popups).push_back(outcome);
        self
    }

    /// Make the next redirect call fail.
    pub fn with_redirect_error(self, error: ProviderError) -> Self {
        *lock(&self.redirect_error) = Some(error);
        self
    }

    /// Result handed out by the next `redirect_result` call.
    pub fn with_redirect_result(self, result: Result<Option<AuthUser>>) -> Self {
        *lock(&self.redirect_result) = Some(result);
        self
    }

    /// Make `redirect_result` never resolve.
    pub fn with_pending_redirect_result(self) -> Self {
        self.redirect_result_pending.store(true, Ordering::SeqCst);
        self
    }

    /// Start with `user` already signed in.
    pub fn signed_in(self, user: AuthUser) -> Self {
        self.auth_state.send_replace(Some(user));
        self
    }

    /// Simulate an auth-state change coming from the provider.
    pub fn set_current_user(&self, user: Option<AuthUser>) {
        self.auth_state.send_replace(user);
    }

    pub fn popup_calls(&self) -> usize {
        self.popup_calls.load(Ordering::SeqCst)
    }

    pub fn redirect_calls(&self) -> usize {
        self.redirect_calls.load(Ordering::SeqCst)
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for MockProvider {
    async fn sign_in_with_popup(&self) -> Result<AuthUser> {
        self.popup_calls.fetch_add(1, Ordering::SeqCst);

        let outcome = lock(&self.popups).pop_front().unwrap_or_else(|| {
            PopupOutcome::Failure(ProviderError::new(
                ProviderErrorKind::PopupClosedByUser,
                "no popup outcome scripted",
            ))
        });

        match outcome {
            PopupOutcome::Success(user) => {
                self.auth_state.send_replace(Some(user.clone()));
                Ok(user)
            }
            PopupOutcome::Failure(error) => Err(error),
            PopupOutcome::Hang => std::future::pending().await,
        }
    }

    async fn sign_in_with_redirect(&self) -> Result<()> {
        self.redirect_calls.fetch_add(1, Ordering::SeqCst);

        match lock(&self.redirect_error).take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn redirect_result(&self) -> Result<Option<AuthUser>> {
        if self.redirect_result_pending.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }

        let result = lock(&self.redirect_result).take().unwrap_or(Ok(None));

        if let Ok(Some(user)) = &result {
            self.auth_state.send_replace(Some(user.clone()));
        }

        result
    }

    fn current_user(&self) -> Option<AuthUser> {
        self.auth_state.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<AuthUser>> {
        self.auth_state.subscribe()
    }

    async fn sign_out(&self) -> Result<()> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        self.auth_state.send_replace(None);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
