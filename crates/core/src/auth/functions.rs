use chrono::{DateTime, Duration, Utc};

use super::{BrowserEnvironment, LoopCheck, LoopPolicy, SessionFlags, SignInMethod};

/// Check for a redirect loop and update the redirect counter.
///
/// Outside the policy window the counter is reset and no loop is reported.
/// Inside it the counter is incremented; reaching the threshold is a loop, in
/// which case every flag is cleared to break the cycle.
pub fn detect_redirect_loop(
    flags: &mut SessionFlags,
    now: DateTime<Utc>,
    policy: &LoopPolicy,
) -> LoopCheck {
    let within_window = flags
        .last_redirect_time
        .is_some_and(|last| now - last <= policy.window);

    if !within_window {
        flags.auth_redirect_count = 0;
        return LoopCheck::NoLoop;
    }

    flags.auth_redirect_count = flags.auth_redirect_count.saturating_add(1);

    if flags.auth_redirect_count >= policy.threshold {
        flags.clear();
        return LoopCheck::LoopDetected;
    }

    LoopCheck::NoLoop
}

/// Record the start of a sign-in attempt.
///
/// Stale attempt markers are dropped first, then the redirect is counted. On a
/// loop the record is left cleared and no attempt is recorded.
pub fn begin_attempt(
    flags: &mut SessionFlags,
    now: DateTime<Utc>,
    policy: &LoopPolicy,
) -> LoopCheck {
    flags.clear_attempt();

    if detect_redirect_loop(flags, now, policy).is_loop() {
        return LoopCheck::LoopDetected;
    }

    flags.sign_in_attempt = true;
    flags.sign_in_timestamp = Some(now);
    flags.last_redirect_time = Some(now);
    LoopCheck::NoLoop
}

/// Moment at which the pending attempt times out, if one is pending.
pub fn attempt_deadline(flags: &SessionFlags, timeout: Duration) -> Option<DateTime<Utc>> {
    if !flags.sign_in_attempt {
        return None;
    }
    flags.sign_in_timestamp.map(|started| started + timeout)
}

/// Check if the pending attempt has gone unresolved for longer than `timeout`.
pub fn is_attempt_stale(flags: &SessionFlags, now: DateTime<Utc>, timeout: Duration) -> bool {
    attempt_deadline(flags, timeout).is_some_and(|deadline| now > deadline)
}

/// Pick popup or redirect sign-in for the given environment.
///
/// Popups are only used on known desktop browsers, outside embedded frames,
/// and never on the production host.
pub fn choose_sign_in_method(
    env: &BrowserEnvironment,
    production_host: Option<&str>,
) -> SignInMethod {
    let on_production = production_host.is_some_and(|host| env.hostname.eq_ignore_ascii_case(host));

    if !env.is_mobile && !env.is_embedded && env.is_known_desktop_browser && !on_production {
        SignInMethod::Popup
    } else {
        SignInMethod::Redirect
    }
}
