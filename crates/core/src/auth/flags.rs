//! Mapping between [`SessionFlags`] and session storage entries.
//!
//! Each field lives under its own key so the static callback page can set
//! `authComplete` without knowing about the rest of the record. Booleans are
//! stored as `"true"`, timestamps as epoch milliseconds.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::SessionFlags;

pub const SIGN_IN_ATTEMPT_KEY: &str = "signInAttempt";
pub const SIGN_IN_TIMESTAMP_KEY: &str = "signInTimestamp";
pub const AUTH_REDIRECT_COUNT_KEY: &str = "authRedirectCount";
pub const LAST_REDIRECT_TIME_KEY: &str = "lastRedirectTime";
pub const AUTH_COMPLETE_KEY: &str = "authComplete";

/// Every key owned by the session flag record.
pub const FLAG_KEYS: [&str; 5] = [
    SIGN_IN_ATTEMPT_KEY,
    SIGN_IN_TIMESTAMP_KEY,
    AUTH_REDIRECT_COUNT_KEY,
    LAST_REDIRECT_TIME_KEY,
    AUTH_COMPLETE_KEY,
];

impl SessionFlags {
    /// Storage entries for this record. `None` means the key must be removed.
    pub fn to_entries(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            (SIGN_IN_ATTEMPT_KEY, encode_bool(self.sign_in_attempt)),
            (
                SIGN_IN_TIMESTAMP_KEY,
                self.sign_in_timestamp.map(encode_timestamp),
            ),
            (
                AUTH_REDIRECT_COUNT_KEY,
                (self.auth_redirect_count > 0).then(|| self.auth_redirect_count.to_string()),
            ),
            (
                LAST_REDIRECT_TIME_KEY,
                self.last_redirect_time.map(encode_timestamp),
            ),
            (AUTH_COMPLETE_KEY, encode_bool(self.auth_complete)),
        ]
    }

    /// Rebuilds the record from raw storage values.
    ///
    /// Unparseable values read as absent, so a corrupted entry degrades to
    /// "nothing pending" instead of failing the page.
    pub fn from_entries(entries: &HashMap<String, String>) -> Self {
        let get = |key: &str| entries.get(key).map(String::as_str);

        Self {
            sign_in_attempt: get(SIGN_IN_ATTEMPT_KEY).is_some_and(decode_bool),
            sign_in_timestamp: get(SIGN_IN_TIMESTAMP_KEY).and_then(decode_timestamp),
            auth_redirect_count: get(AUTH_REDIRECT_COUNT_KEY)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            last_redirect_time: get(LAST_REDIRECT_TIME_KEY).and_then(decode_timestamp),
            auth_complete: get(AUTH_COMPLETE_KEY).is_some_and(decode_bool),
        }
    }
}

fn encode_bool(value: bool) -> Option<String> {
    value.then(|| "true".to_string())
}

fn decode_bool(value: &str) -> bool {
    value == "true"
}

fn encode_timestamp(at: DateTime<Utc>) -> String {
    at.timestamp_millis().to_string()
}

fn decode_timestamp(value: &str) -> Option<DateTime<Utc>> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}
