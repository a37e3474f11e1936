//! Sign-in reconciliation controller.
//!
//! Owns the session flag record for one browser tab, drives the popup and
//! redirect flows, and publishes an [`AuthSnapshot`] for the rest of the
//! application. Flags are written through to [`SessionStorage`] so an attempt
//! survives the full page reload of the redirect flow.

use std::sync::{Arc, PoisonError, Weak};

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use tilshare_core::auth::{
    annotate_redirect_loop, attempt_deadline, begin_attempt, choose_sign_in_method,
    detect_redirect_loop, is_attempt_stale, AuthError, AuthPhase, AuthSnapshot, AuthUser, Clock, EnvironmentProbe,
    IdentityProvider, Location, LoopCheck, ProviderErrorKind, SessionFlags, SessionStorage,
    SignInMethod, SystemClock,
};

use crate::config::AuthConfig;
use crate::storage::{load_flags, save_flags};

/// Collaborators the controller talks to.
#[derive(Clone)]
pub struct AuthServices {
    pub provider: Arc<dyn IdentityProvider>,
    pub storage: Arc<dyn SessionStorage>,
    pub probe: Arc<dyn EnvironmentProbe>,
    pub location: Arc<dyn Location>,
    pub clock: Arc<dyn Clock>,
}

impl AuthServices {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        storage: Arc<dyn SessionStorage>,
        probe: Arc<dyn EnvironmentProbe>,
        location: Arc<dyn Location>,
    ) -> Self {
        Self {
            provider,
            storage,
            probe,
            location,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Auth reconciliation controller. Clones share the same state.
#[derive(Clone)]
pub struct AuthController {
    inner: Arc<Inner>,
}

struct Inner {
    services: AuthServices,
    config: AuthConfig,
    state: Mutex<ControllerState>,
    snapshot: watch::Sender<AuthSnapshot>,
    listener: std::sync::Mutex<Option<JoinHandle<()>>>,
}

struct ControllerState {
    flags: SessionFlags,
    phase: AuthPhase,
    user: Option<AuthUser>,
    error: Option<AuthError>,
    loading: bool,
    /// Generation of the current attempt; bumped whenever an attempt starts or
    /// is abandoned so late results can be recognised.
    attempt: u64,
    watchdog: Option<JoinHandle<()>>,
}

impl ControllerState {
    fn is_current(&self, attempt: u64) -> bool {
        self.attempt == attempt && self.phase.is_pending()
    }

    fn disarm_watchdog(&mut self) {
        if let Some(handle) = self.watchdog.take() {
            handle.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state.get_mut().disarm_watchdog();
        let listener = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = listener.take() {
            handle.abort();
        }
    }
}

impl AuthController {
    pub fn new(services: AuthServices, config: AuthConfig) -> Self {
        let (snapshot, _) = watch::channel(AuthSnapshot::default());

        Self {
            inner: Arc::new(Inner {
                services,
                config,
                state: Mutex::new(ControllerState {
                    flags: SessionFlags::default(),
                    phase: AuthPhase::Idle,
                    user: None,
                    error: None,
                    loading: true,
                    attempt: 0,
                    watchdog: None,
                }),
                snapshot,
                listener: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Current auth state as seen by the UI.
    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.inner.snapshot.borrow().user.clone()
    }

    pub fn loading(&self) -> bool {
        self.inner.snapshot.borrow().loading
    }

    /// Start listening to provider auth-state changes and reconcile whatever a
    /// previous page load left behind.
    ///
    /// # Errors
    ///
    /// Returns the reconciliation failure, which is also published in the
    /// snapshot.
    pub async fn mount(&self) -> Result<Option<AuthUser>, AuthError> {
        self.spawn_listener();
        self.reconcile_on_load().await
    }

    /// Stop background tasks. The controller stays usable for reads.
    pub async fn unmount(&self) {
        self.inner.state.lock().await.disarm_watchdog();
        let handle = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        tracing::debug!("Auth controller unmounted");
    }

    /// Start a sign-in attempt, by popup when the environment allows it and by
    /// redirect otherwise.
    ///
    /// On the redirect path a successful call means the page is navigating
    /// away; the attempt is finished by [`reconcile_on_load`](Self::reconcile_on_load)
    /// after the reload.
    ///
    /// # Errors
    ///
    /// Returns the failure that ended the attempt: `Cancelled` when the user
    /// closed the popup, `RedirectLoop`, `Timeout`, or a provider error.
    pub async fn sign_in(&self) -> Result<(), AuthError> {
        let services = &self.inner.services;
        let method = choose_sign_in_method(
            &services.probe.environment(),
            self.inner.config.production_host.as_deref(),
        );

        let attempt = {
            let mut state = self.inner.state.lock().await;
            let now = services.clock.now();

            if begin_attempt(&mut state.flags, now, &self.inner.config.loop_policy()).is_loop() {
                self.persist(&state.flags).await;
                self.annotate_loop();
                return Err(self.fail_locked(&mut state, AuthError::RedirectLoop).await);
            }

            self.persist(&state.flags).await;
            state.attempt += 1;
            state.error = None;
            state.loading = true;
            self.transition(
                &mut state,
                match method {
                    SignInMethod::Popup => AuthPhase::AwaitingPopup,
                    SignInMethod::Redirect => AuthPhase::AwaitingRedirect,
                },
            );
            self.arm_watchdog(&mut state);
            self.publish(&state);

            tracing::info!(?method, attempt = state.attempt, "Sign-in started");
            state.attempt
        };

        match method {
            SignInMethod::Popup => self.popup_flow(attempt).await,
            SignInMethod::Redirect => self.redirect_flow(attempt).await,
        }
    }

    async fn popup_flow(&self, attempt: u64) -> Result<(), AuthError> {
        match self.inner.services.provider.sign_in_with_popup().await {
            Ok(user) => {
                let mut state = self.inner.state.lock().await;
                if !state.is_current(attempt) {
                    return Err(self.superseded(&state, attempt));
                }
                self.succeed_locked(&mut state, user).await;
                Ok(())
            }
            Err(e) if e.kind == ProviderErrorKind::PopupBlocked => {
                tracing::info!("Popup blocked, falling back to redirect");
                {
                    let mut state = self.inner.state.lock().await;
                    if !state.is_current(attempt) {
                        return Err(self.superseded(&state, attempt));
                    }
                    self.transition(&mut state, AuthPhase::AwaitingRedirect);
                    self.publish(&state);
                }
                self.redirect_flow(attempt).await
            }
            Err(e) if e.kind == ProviderErrorKind::PopupClosedByUser => {
                tracing::info!("Popup closed before sign-in finished");
                self.fail(attempt, AuthError::Cancelled).await
            }
            Err(e) => {
                tracing::error!(code = e.code(), error = %e, "Popup sign-in failed");
                self.fail(attempt, AuthError::Provider(e)).await
            }
        }
    }

    async fn redirect_flow(&self, attempt: u64) -> Result<(), AuthError> {
        match self.inner.services.provider.sign_in_with_redirect().await {
            Ok(()) => {
                tracing::debug!(attempt, "Redirecting to identity provider");
                Ok(())
            }
            Err(e) => {
                tracing::error!(code = e.code(), error = %e, "Redirect sign-in failed");
                self.fail(attempt, AuthError::Provider(e)).await
            }
        }
    }

    /// Finish whatever sign-in the previous page load started.
    ///
    /// # Errors
    ///
    /// Returns `RedirectLoop` when the loop check trips, `Timeout` when the
    /// persisted attempt is older than the attempt timeout, and the provider
    /// error when the redirect result cannot be read.
    pub async fn reconcile_on_load(&self) -> Result<Option<AuthUser>, AuthError> {
        let services = &self.inner.services;
        let persisted = load_flags(services.storage.as_ref()).await;

        let attempt = {
            let mut state = self.inner.state.lock().await;
            state.flags = persisted;

            if state.flags.auth_complete {
                if let Some(user) = services.provider.current_user() {
                    tracing::info!(uid = %user.uid, "Callback page reported completion");
                    if !state.phase.is_pending() && state.flags.sign_in_attempt {
                        self.transition(&mut state, AuthPhase::Reconciling);
                    }
                    self.succeed_locked(&mut state, user.clone()).await;
                    return Ok(Some(user));
                }
                tracing::debug!("Completion flag set without a current user");
            }

            if !state.flags.sign_in_attempt {
                return Ok(self.settle_locked(&mut state));
            }

            let timeout = self.inner.config.attempt_timeout_chrono();
            if is_attempt_stale(&state.flags, services.clock.now(), timeout) {
                tracing::warn!(
                    started = ?state.flags.sign_in_timestamp,
                    "Discarding stale sign-in attempt"
                );
                return Err(self.time_out_locked(&mut state).await);
            }

            if !state.phase.is_pending() {
                self.transition(&mut state, AuthPhase::AwaitingRedirect);
            }
            self.transition(&mut state, AuthPhase::Reconciling);
            state.attempt += 1;
            state.loading = true;

            if self.check_loop_locked(&mut state).await.is_loop() {
                return Err(self.fail_locked(&mut state, AuthError::RedirectLoop).await);
            }

            self.arm_watchdog(&mut state);
            self.publish(&state);
            state.attempt
        };

        let result = services.provider.redirect_result().await;

        let mut state = self.inner.state.lock().await;
        if !state.is_current(attempt) {
            return Err(self.superseded(&state, attempt));
        }

        match result {
            Ok(Some(user)) => {
                self.succeed_locked(&mut state, user.clone()).await;
                Ok(Some(user))
            }
            Ok(None) => {
                tracing::info!("Redirect finished without a user");
                state.flags.clear();
                self.persist(&state.flags).await;
                state.disarm_watchdog();
                state.error = None;
                state.loading = false;
                self.transition(&mut state, AuthPhase::Idle);
                self.publish(&state);
                Ok(None)
            }
            Err(e) => {
                tracing::error!(code = e.code(), error = %e, "Failed to read redirect result");
                Err(self.fail_locked(&mut state, AuthError::Provider(e)).await)
            }
        }
    }

    /// Count a redirect against the loop window.
    ///
    /// On a loop every flag is cleared, the page URL is marked with
    /// `?error=redirect_loop_detected` and the controller enters the error
    /// state.
    pub async fn detect_redirect_loop(&self) -> LoopCheck {
        let mut state = self.inner.state.lock().await;
        let check = self.check_loop_locked(&mut state).await;
        if check.is_loop() {
            self.fail_locked(&mut state, AuthError::RedirectLoop).await;
        }
        check
    }

    /// Sign out with the provider and forget the user. Session flags are not
    /// touched.
    ///
    /// # Errors
    ///
    /// Returns the provider error; local state is left unchanged in that case.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.inner
            .services
            .provider
            .sign_out()
            .await
            .map_err(|e| {
                tracing::error!(code = e.code(), error = %e, "Sign-out failed");
                AuthError::Provider(e)
            })?;

        let mut state = self.inner.state.lock().await;
        state.user = None;
        state.error = None;
        state.loading = false;
        if state.phase == AuthPhase::Authenticated {
            self.transition(&mut state, AuthPhase::Idle);
        }
        self.publish(&state);

        tracing::info!("Signed out");
        Ok(())
    }

    /// Abandon the pending attempt. A popup the browser already opened stays
    /// open; its result is ignored.
    pub async fn cancel_sign_in(&self) {
        let mut state = self.inner.state.lock().await;
        if !state.phase.is_pending() && !state.flags.sign_in_attempt {
            return;
        }

        state.attempt += 1;
        state.flags.clear();
        self.persist(&state.flags).await;
        state.disarm_watchdog();
        state.error = None;
        state.loading = false;
        self.transition(&mut state, AuthPhase::Idle);
        self.publish(&state);

        tracing::info!("Sign-in cancelled");
    }

    /// Acknowledge the current error.
    pub async fn dismiss_error(&self) {
        let mut state = self.inner.state.lock().await;
        if state.error.is_none() {
            return;
        }
        state.error = None;
        if state.phase == AuthPhase::Error {
            self.transition(&mut state, AuthPhase::Idle);
        }
        self.publish(&state);
    }

    async fn expire_attempt(&self, attempt: u64) {
        let mut state = self.inner.state.lock().await;
        // This task is the watchdog; drop its handle instead of aborting it.
        state.watchdog = None;

        if !state.is_current(attempt) {
            return;
        }

        tracing::warn!(
            attempt,
            timeout_secs = self.inner.config.attempt_timeout.as_secs(),
            "Sign-in attempt timed out"
        );
        self.time_out_locked(&mut state).await;
    }

    async fn apply_auth_state(&self, user: Option<AuthUser>) {
        let mut state = self.inner.state.lock().await;
        if state.phase.is_pending() {
            tracing::debug!("Ignoring auth-state change during a sign-in attempt");
            return;
        }

        match user {
            Some(user) => {
                state.user = Some(user);
                state.error = None;
                self.transition(&mut state, AuthPhase::Authenticated);
            }
            None => {
                state.user = None;
                if state.phase == AuthPhase::Authenticated {
                    self.transition(&mut state, AuthPhase::Idle);
                }
            }
        }
        state.loading = false;
        self.publish(&state);
    }

    fn spawn_listener(&self) {
        let mut changes = self.inner.services.provider.subscribe();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let user = changes.borrow_and_update().clone();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                AuthController { inner }.apply_auth_state(user).await;
            }
        });

        let previous = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn arm_watchdog(&self, state: &mut ControllerState) {
        state.disarm_watchdog();

        let timeout = self.inner.config.attempt_timeout_chrono();
        let Some(deadline) = attempt_deadline(&state.flags, timeout) else {
            return;
        };
        let remaining = (deadline - self.inner.services.clock.now())
            .to_std()
            .unwrap_or_default();

        let weak = Arc::downgrade(&self.inner);
        let attempt = state.attempt;

        state.watchdog = Some(tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            if let Some(inner) = weak.upgrade() {
                AuthController { inner }.expire_attempt(attempt).await;
            }
        }));
    }

    async fn check_loop_locked(&self, state: &mut ControllerState) -> LoopCheck {
        let now = self.inner.services.clock.now();
        let check = detect_redirect_loop(&mut state.flags, now, &self.inner.config.loop_policy());
        self.persist(&state.flags).await;

        if check.is_loop() {
            self.annotate_loop();
        }
        check
    }

    async fn succeed_locked(&self, state: &mut ControllerState, user: AuthUser) {
        state.flags.clear();
        self.persist(&state.flags).await;
        state.disarm_watchdog();

        tracing::info!(uid = %user.uid, provider = %user.provider_id, "Signed in");
        state.user = Some(user);
        state.error = None;
        state.loading = false;
        self.transition(state, AuthPhase::Authenticated);
        self.publish(state);
    }

    async fn fail(&self, attempt: u64, error: AuthError) -> Result<(), AuthError> {
        let mut state = self.inner.state.lock().await;
        if !state.is_current(attempt) {
            return Err(self.superseded(&state, attempt));
        }
        Err(self.fail_locked(&mut state, error).await)
    }

    async fn fail_locked(&self, state: &mut ControllerState, error: AuthError) -> AuthError {
        state.flags.clear();
        self.persist(&state.flags).await;
        state.disarm_watchdog();

        state.error = Some(error.clone());
        state.loading = false;
        self.transition(state, AuthPhase::Error);
        self.publish(state);
        error
    }

    /// Abandon the attempt and go back to idle, keeping `Timeout` in the
    /// snapshot for the UI.
    async fn time_out_locked(&self, state: &mut ControllerState) -> AuthError {
        state.flags.clear();
        self.persist(&state.flags).await;
        state.disarm_watchdog();

        state.error = Some(AuthError::Timeout);
        state.loading = false;
        self.transition(state, AuthPhase::Idle);
        self.publish(state);
        AuthError::Timeout
    }

    /// Nothing to reconcile: settle on what the provider already knows.
    fn settle_locked(&self, state: &mut ControllerState) -> Option<AuthUser> {
        if state.user.is_none() && !state.phase.is_pending() {
            if let Some(user) = self.inner.services.provider.current_user() {
                state.user = Some(user);
                self.transition(state, AuthPhase::Authenticated);
            }
        }
        state.loading = false;
        self.publish(state);
        state.user.clone()
    }

    fn superseded(&self, state: &ControllerState, attempt: u64) -> AuthError {
        tracing::warn!(
            attempt,
            current = state.attempt,
            "Discarding result of a superseded sign-in attempt"
        );
        state.error.clone().unwrap_or(AuthError::Cancelled)
    }

    fn transition(&self, state: &mut ControllerState, next: AuthPhase) {
        if state.phase == next {
            return;
        }
        if !state.phase.can_transition_to(next) {
            tracing::warn!(from = %state.phase, to = %next, "Unexpected auth phase transition");
        } else {
            tracing::debug!(from = %state.phase, to = %next, "Auth phase transition");
        }
        state.phase = next;
    }

    fn publish(&self, state: &ControllerState) {
        self.inner.snapshot.send_replace(AuthSnapshot {
            user: state.user.clone(),
            loading: state.loading,
            phase: state.phase,
            error: state.error.clone(),
        });
    }

    async fn persist(&self, flags: &SessionFlags) {
        save_flags(self.inner.services.storage.as_ref(), flags).await;
    }

    fn annotate_loop(&self) {
        let location = &self.inner.services.location;
        let annotated = annotate_redirect_loop(&location.current_url());
        tracing::warn!(url = %annotated, "Redirect loop detected, sign-in flags cleared");
        location.replace_url(annotated);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use tilshare_core::auth::{ProviderError, AUTH_REDIRECT_COUNT_KEY, SIGN_IN_ATTEMPT_KEY};
    use url::Url;

    use super::*;
    use crate::environment::FixedEnvironment;
    use crate::location::MemoryLocation;
    use crate::providers::{MockProvider, PopupOutcome};
    use crate::storage::{MemoryStorage, UnavailableStorage};

    struct ManualClock(std::sync::Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
            Arc::new(Self(std::sync::Mutex::new(start)))
        }

        fn advance(&self, secs: i64) {
            *self.0.lock().unwrap() += chrono::Duration::seconds(secs);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    struct Harness {
        controller: AuthController,
        provider: Arc<MockProvider>,
        storage: MemoryStorage,
        location: MemoryLocation,
        clock: Arc<ManualClock>,
        env: FixedEnvironment,
        config: AuthConfig,
    }

    impl Harness {
        fn new(provider: MockProvider, env: FixedEnvironment) -> Self {
            Self::with_config(provider, env, AuthConfig::default())
        }

        fn with_config(provider: MockProvider, env: FixedEnvironment, config: AuthConfig) -> Self {
            Self::build(
                provider,
                env,
                config,
                MemoryStorage::new(),
                MemoryLocation::new(Url::parse("https://til.example.com/feed").unwrap()),
                ManualClock::new(),
            )
        }

        fn build(
            provider: MockProvider,
            env: FixedEnvironment,
            config: AuthConfig,
            storage: MemoryStorage,
            location: MemoryLocation,
            clock: Arc<ManualClock>,
        ) -> Self {
            let provider = Arc::new(provider);
            let services = AuthServices::new(
                provider.clone(),
                Arc::new(storage.clone()),
                Arc::new(env.clone()),
                Arc::new(location.clone()),
            )
            .with_clock(clock.clone());

            Self {
                controller: AuthController::new(services, config.clone()),
                provider,
                storage,
                location,
                clock,
                env,
                config,
            }
        }

        /// Same tab after a full page reload: storage, URL and clock survive.
        fn reload(&self, provider: MockProvider) -> Self {
            Self::build(
                provider,
                self.env.clone(),
                self.config.clone(),
                self.storage.clone(),
                self.location.clone(),
                self.clock.clone(),
            )
        }

        async fn preset(&self, flags: SessionFlags) {
            save_flags(&self.storage, &flags).await;
        }
    }

    fn user() -> AuthUser {
        AuthUser::new("uid-42", "google.com")
            .with_display_name("Ada Lovelace")
            .with_email("ada@example.com")
    }

    fn desktop() -> FixedEnvironment {
        FixedEnvironment::desktop("localhost")
    }

    fn mobile() -> FixedEnvironment {
        FixedEnvironment::mobile("til.example.com")
    }

    // ==================== Popup flow ====================

    #[tokio::test]
    async fn test_popup_success_authenticates_and_clears_flags() {
        let h = Harness::new(
            MockProvider::new().with_popup(PopupOutcome::Success(user())),
            desktop(),
        );

        h.controller.sign_in().await.unwrap();

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.phase, AuthPhase::Authenticated);
        assert_eq!(snapshot.user, Some(user()));
        assert!(!snapshot.loading);
        assert!(snapshot.error.is_none());
        assert!(h.storage.is_empty().await);
        assert_eq!(h.provider.popup_calls(), 1);
        assert_eq!(h.provider.redirect_calls(), 0);
    }

    #[tokio::test]
    async fn test_popup_blocked_falls_back_to_redirect() {
        let h = Harness::new(
            MockProvider::new().with_popup(PopupOutcome::Failure(ProviderError::from_code(
                "auth/popup-blocked",
                "blocked",
            ))),
            desktop(),
        );

        h.controller.sign_in().await.unwrap();

        assert_eq!(h.provider.redirect_calls(), 1);
        assert_eq!(h.controller.snapshot().phase, AuthPhase::AwaitingRedirect);
        assert!(h.controller.loading());

        let entries = h.storage.entries().await;
        assert_eq!(entries.get(SIGN_IN_ATTEMPT_KEY).map(String::as_str), Some("true"));
    }

    #[tokio::test]
    async fn test_popup_closed_is_cancelled_without_retry() {
        let h = Harness::new(
            MockProvider::new().with_popup(PopupOutcome::Failure(ProviderError::from_code(
                "auth/popup-closed-by-user",
                "closed",
            ))),
            desktop(),
        );

        let err = h.controller.sign_in().await.unwrap_err();

        assert_eq!(err, AuthError::Cancelled);
        assert!(!err.is_retryable());
        assert_eq!(h.provider.popup_calls(), 1);
        assert_eq!(h.provider.redirect_calls(), 0);

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.phase, AuthPhase::Error);
        assert_eq!(snapshot.error, Some(AuthError::Cancelled));
        assert!(h.storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_popup_provider_error_is_retryable() {
        let h = Harness::new(
            MockProvider::new().with_popup(PopupOutcome::Failure(ProviderError::from_code(
                "auth/invalid-credential",
                "bad token",
            ))),
            desktop(),
        );

        let err = h.controller.sign_in().await.unwrap_err();

        assert!(matches!(err, AuthError::Provider(_)));
        assert!(err.is_retryable());
        assert_eq!(h.controller.snapshot().phase, AuthPhase::Error);
        assert!(h.storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_dismiss_error_returns_to_idle() {
        let h = Harness::new(MockProvider::new(), desktop());
        let _ = h.controller.sign_in().await;
        assert_eq!(h.controller.snapshot().phase, AuthPhase::Error);

        h.controller.dismiss_error().await;

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.phase, AuthPhase::Idle);
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_storage_still_signs_in() {
        let provider = Arc::new(MockProvider::new().with_popup(PopupOutcome::Success(user())));
        let services = AuthServices::new(
            provider,
            Arc::new(UnavailableStorage),
            Arc::new(desktop()),
            Arc::new(MemoryLocation::new(Url::parse("http://localhost/").unwrap())),
        );
        let controller = AuthController::new(services, AuthConfig::default());

        controller.mount().await.unwrap();
        controller.sign_in().await.unwrap();

        assert_eq!(controller.user(), Some(user()));
    }

    // ==================== Redirect flow ====================

    #[tokio::test]
    async fn test_mobile_uses_redirect() {
        let h = Harness::new(MockProvider::new(), mobile());

        h.controller.sign_in().await.unwrap();

        assert_eq!(h.provider.popup_calls(), 0);
        assert_eq!(h.provider.redirect_calls(), 1);
        assert_eq!(h.controller.snapshot().phase, AuthPhase::AwaitingRedirect);
    }

    #[tokio::test]
    async fn test_production_host_uses_redirect() {
        let config = AuthConfig {
            production_host: Some("til.example.com".to_string()),
            ..AuthConfig::default()
        };
        let h = Harness::with_config(
            MockProvider::new(),
            FixedEnvironment::desktop("til.example.com"),
            config,
        );

        h.controller.sign_in().await.unwrap();

        assert_eq!(h.provider.popup_calls(), 0);
        assert_eq!(h.provider.redirect_calls(), 1);
    }

    #[tokio::test]
    async fn test_redirect_error_clears_flags() {
        let h = Harness::new(
            MockProvider::new().with_redirect_error(ProviderError::from_code(
                "auth/network-request-failed",
                "offline",
            )),
            mobile(),
        );

        let err = h.controller.sign_in().await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(h.controller.snapshot().phase, AuthPhase::Error);
        assert!(h.storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_redirect_then_reload_reconciles_user() {
        let h = Harness::new(MockProvider::new(), mobile());
        h.controller.sign_in().await.unwrap();
        assert!(!h.storage.is_empty().await);

        h.clock.advance(5);
        let reloaded = h.reload(MockProvider::new().with_redirect_result(Ok(Some(user()))));
        let resolved = reloaded.controller.mount().await.unwrap();

        assert_eq!(resolved, Some(user()));
        let snapshot = reloaded.controller.snapshot();
        assert_eq!(snapshot.phase, AuthPhase::Authenticated);
        assert_eq!(snapshot.user, Some(user()));
        assert!(!snapshot.loading);
        assert!(reloaded.storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_three_sign_ins_within_ten_seconds_detect_loop() {
        let h = Harness::new(MockProvider::new(), mobile());

        h.controller.sign_in().await.unwrap();
        h.clock.advance(4);
        h.controller.sign_in().await.unwrap();
        h.clock.advance(5);
        let err = h.controller.sign_in().await.unwrap_err();

        assert_eq!(err, AuthError::RedirectLoop);
        assert_eq!(h.provider.redirect_calls(), 2);
        assert_eq!(h.controller.snapshot().phase, AuthPhase::Error);
        assert!(h.storage.is_empty().await);
        assert_eq!(
            h.location.current_url().as_str(),
            "https://til.example.com/feed?error=redirect_loop_detected"
        );
    }

    // ==================== Reconciliation ====================

    #[tokio::test]
    async fn test_mount_without_attempt_settles_idle() {
        let h = Harness::new(MockProvider::new(), mobile());

        let resolved = h.controller.mount().await.unwrap();

        assert_eq!(resolved, None);
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.phase, AuthPhase::Idle);
        assert!(!snapshot.loading);
    }

    #[tokio::test]
    async fn test_mount_picks_up_existing_provider_session() {
        let h = Harness::new(MockProvider::new().signed_in(user()), mobile());

        let resolved = h.controller.mount().await.unwrap();

        assert_eq!(resolved, Some(user()));
        assert_eq!(h.controller.snapshot().phase, AuthPhase::Authenticated);
    }

    #[tokio::test]
    async fn test_reconcile_absent_user_returns_to_idle_silently() {
        let h = Harness::new(MockProvider::new(), mobile());
        h.preset(SessionFlags {
            sign_in_attempt: true,
            sign_in_timestamp: Some(h.clock.now()),
            last_redirect_time: Some(h.clock.now()),
            ..Default::default()
        })
        .await;

        let resolved = h.controller.mount().await.unwrap();

        assert_eq!(resolved, None);
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.phase, AuthPhase::Idle);
        assert!(snapshot.error.is_none());
        assert!(h.storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_reconcile_provider_error() {
        let h = Harness::new(
            MockProvider::new().with_redirect_result(Err(ProviderError::from_code(
                "auth/invalid-credential",
                "expired",
            ))),
            mobile(),
        );
        h.preset(SessionFlags {
            sign_in_attempt: true,
            sign_in_timestamp: Some(h.clock.now()),
            ..Default::default()
        })
        .await;

        let err = h.controller.mount().await.unwrap_err();

        assert!(matches!(err, AuthError::Provider(_)));
        assert_eq!(h.controller.snapshot().phase, AuthPhase::Error);
        assert!(h.storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_reconcile_detects_loop() {
        let h = Harness::new(
            MockProvider::new().with_redirect_result(Ok(Some(user()))),
            mobile(),
        );
        let earlier = h.clock.now() - chrono::Duration::seconds(5);
        h.preset(SessionFlags {
            sign_in_attempt: true,
            sign_in_timestamp: Some(earlier),
            auth_redirect_count: 1,
            last_redirect_time: Some(earlier),
            auth_complete: false,
        })
        .await;

        let err = h.controller.mount().await.unwrap_err();

        assert_eq!(err, AuthError::RedirectLoop);
        assert_eq!(h.controller.snapshot().phase, AuthPhase::Error);
        assert!(h.controller.user().is_none());
        assert!(h.storage.is_empty().await);
        assert!(h
            .location
            .current_url()
            .query()
            .unwrap()
            .contains("error=redirect_loop_detected"));
    }

    #[tokio::test]
    async fn test_completion_flag_accepts_current_user() {
        let h = Harness::new(MockProvider::new().signed_in(user()), mobile());
        h.preset(SessionFlags {
            sign_in_attempt: true,
            sign_in_timestamp: Some(h.clock.now()),
            auth_complete: true,
            ..Default::default()
        })
        .await;

        let resolved = h.controller.mount().await.unwrap();

        assert_eq!(resolved, Some(user()));
        assert_eq!(h.controller.snapshot().phase, AuthPhase::Authenticated);
        assert!(h.storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_completion_flag_without_user_falls_through() {
        let h = Harness::new(
            MockProvider::new().with_redirect_result(Ok(Some(user()))),
            mobile(),
        );
        h.preset(SessionFlags {
            sign_in_attempt: true,
            sign_in_timestamp: Some(h.clock.now()),
            auth_complete: true,
            ..Default::default()
        })
        .await;

        let resolved = h.controller.mount().await.unwrap();

        assert_eq!(resolved, Some(user()));
        assert!(h.storage.is_empty().await);
    }

    // ==================== Loop detection ====================

    #[tokio::test]
    async fn test_detect_redirect_loop_resets_after_window() {
        let h = Harness::new(MockProvider::new(), mobile());
        h.preset(SessionFlags {
            auth_redirect_count: 5,
            last_redirect_time: Some(h.clock.now() - chrono::Duration::seconds(31)),
            ..Default::default()
        })
        .await;
        h.controller.mount().await.unwrap();

        let check = h.controller.detect_redirect_loop().await;

        assert_eq!(check, LoopCheck::NoLoop);
        assert!(!h.storage.entries().await.contains_key(AUTH_REDIRECT_COUNT_KEY));
        assert_eq!(h.controller.snapshot().phase, AuthPhase::Idle);
    }

    #[tokio::test]
    async fn test_detect_redirect_loop_once_counter_reaches_two() {
        let h = Harness::new(MockProvider::new(), mobile());
        h.preset(SessionFlags {
            auth_redirect_count: 2,
            last_redirect_time: Some(h.clock.now() - chrono::Duration::seconds(3)),
            ..Default::default()
        })
        .await;
        h.controller.mount().await.unwrap();

        let check = h.controller.detect_redirect_loop().await;

        assert_eq!(check, LoopCheck::LoopDetected);
        assert!(h.storage.is_empty().await);
        assert_eq!(h.controller.snapshot().error, Some(AuthError::RedirectLoop));
    }

    // ==================== Timeout and cancellation ====================

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_attempt_times_out_after_two_minutes() {
        let h = Harness::new(MockProvider::new().with_popup(PopupOutcome::Hang), desktop());
        let controller = h.controller.clone();
        let task = tokio::spawn(async move { controller.sign_in().await });

        tokio::time::sleep(Duration::from_secs(119)).await;
        assert_eq!(h.controller.snapshot().phase, AuthPhase::AwaitingPopup);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.phase, AuthPhase::Idle);
        assert_eq!(snapshot.error, Some(AuthError::Timeout));
        assert!(!snapshot.loading);
        assert!(h.storage.is_empty().await);

        // The popup itself is still open; only local state was reset.
        assert!(!task.is_finished());
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_times_out_when_redirect_result_never_arrives() {
        let h = Harness::new(MockProvider::new().with_pending_redirect_result(), mobile());
        let started = h.clock.now() - chrono::Duration::seconds(30);
        h.preset(SessionFlags {
            sign_in_attempt: true,
            sign_in_timestamp: Some(started),
            last_redirect_time: Some(started),
            ..Default::default()
        })
        .await;
        let controller = h.controller.clone();
        let task = tokio::spawn(async move { controller.mount().await });

        // The deadline counts from the persisted start, not from the reload.
        tokio::time::sleep(Duration::from_secs(89)).await;
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.phase, AuthPhase::Reconciling);
        assert!(snapshot.loading);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.phase, AuthPhase::Idle);
        assert_eq!(snapshot.error, Some(AuthError::Timeout));
        assert!(!snapshot.loading);
        assert!(h.storage.is_empty().await);

        task.abort();
    }

    #[tokio::test]
    async fn test_reconcile_discards_stale_attempt() {
        let h = Harness::new(
            MockProvider::new().with_redirect_result(Ok(Some(user()))),
            mobile(),
        );
        let started = h.clock.now() - chrono::Duration::minutes(10);
        h.preset(SessionFlags {
            sign_in_attempt: true,
            sign_in_timestamp: Some(started),
            last_redirect_time: Some(started),
            ..Default::default()
        })
        .await;

        let err = h.controller.mount().await.unwrap_err();

        assert_eq!(err, AuthError::Timeout);
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.phase, AuthPhase::Idle);
        assert_eq!(snapshot.error, Some(AuthError::Timeout));
        assert!(snapshot.user.is_none());
        assert!(!snapshot.loading);
        assert!(h.storage.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_timeout_error() {
        let h = Harness::new(MockProvider::new().with_popup(PopupOutcome::Hang), desktop());
        let controller = h.controller.clone();
        let task = tokio::spawn(async move { controller.sign_in().await });
        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(h.controller.snapshot().error, Some(AuthError::Timeout));

        h.controller.dismiss_error().await;

        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.phase, AuthPhase::Idle);
        assert!(snapshot.error.is_none());
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_disarms_timeout() {
        let h = Harness::new(MockProvider::new().with_popup(PopupOutcome::Hang), desktop());
        let controller = h.controller.clone();
        let task = tokio::spawn(async move { controller.sign_in().await });

        h.controller
            .subscribe()
            .wait_for(|s| s.phase == AuthPhase::AwaitingPopup)
            .await
            .unwrap();
        h.controller.cancel_sign_in().await;

        assert_eq!(h.controller.snapshot().phase, AuthPhase::Idle);
        assert!(h.storage.is_empty().await);

        tokio::time::sleep(Duration::from_secs(300)).await;
        let snapshot = h.controller.snapshot();
        assert_eq!(snapshot.phase, AuthPhase::Idle);
        assert!(snapshot.error.is_none());

        task.abort();
    }

    // ==================== Auth state and sign-out ====================

    #[tokio::test]
    async fn test_sign_out_writes_no_flags() {
        let h = Harness::new(MockProvider::new().signed_in(user()), desktop());
        h.controller.mount().await.unwrap();
        assert_eq!(h.controller.snapshot().phase, AuthPhase::Authenticated);
        let writes = h.storage.write_count().await;

        h.controller.sign_out().await.unwrap();

        let snapshot = h.controller.snapshot();
        assert!(snapshot.user.is_none());
        assert_eq!(snapshot.phase, AuthPhase::Idle);
        assert_eq!(h.provider.sign_out_calls(), 1);
        assert_eq!(h.storage.write_count().await, writes);
        assert!(h.storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_listener_follows_provider_auth_state() {
        let h = Harness::new(MockProvider::new(), desktop());
        h.controller.mount().await.unwrap();
        let mut rx = h.controller.subscribe();

        h.provider.set_current_user(Some(user()));
        rx.wait_for(|s| s.phase == AuthPhase::Authenticated)
            .await
            .unwrap();
        assert_eq!(h.controller.user(), Some(user()));

        h.provider.set_current_user(None);
        rx.wait_for(|s| s.phase == AuthPhase::Idle).await.unwrap();
        assert!(h.controller.user().is_none());
    }

    #[tokio::test]
    async fn test_unmount_stops_listener() {
        let h = Harness::new(MockProvider::new(), desktop());
        h.controller.mount().await.unwrap();
        h.controller.unmount().await;

        h.provider.set_current_user(Some(user()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(h.controller.user().is_none());
    }
}
