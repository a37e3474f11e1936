use std::time::Duration;

use thiserror::Error;
use tilshare_core::auth::{validate_return_to, LoopPolicy};

/// Default window in which repeated redirects count towards a loop.
pub const DEFAULT_LOOP_WINDOW: Duration = Duration::from_secs(30);

/// Default number of redirects inside the window that counts as a loop.
pub const DEFAULT_LOOP_THRESHOLD: u32 = 2;

/// Default time an attempt may stay unresolved.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Auth controller and callback page configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Hostname on which popups are never used.
    pub production_host: Option<String>,
    pub loop_window: Duration,
    pub loop_threshold: u32,
    pub attempt_timeout: Duration,
    /// Where the callback page sends the user when there is no opener window.
    pub app_root: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            production_host: None,
            loop_window: DEFAULT_LOOP_WINDOW,
            loop_threshold: DEFAULT_LOOP_THRESHOLD,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            app_root: "/".to_string(),
        }
    }
}

impl AuthConfig {
    /// Load from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `AUTH_PRODUCTION_HOST`: Hostname where sign-in always redirects (optional)
    /// - `AUTH_LOOP_WINDOW_SECS`: Redirect loop window in seconds (default: 30)
    /// - `AUTH_LOOP_THRESHOLD`: Redirects inside the window that count as a loop (default: 2)
    /// - `AUTH_ATTEMPT_TIMEOUT_SECS`: Seconds before a pending attempt times out (default: 120)
    /// - `AUTH_APP_ROOT`: Local path the callback page falls back to (default: `/`)
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let production_host = lookup("AUTH_PRODUCTION_HOST")
            .map(|host| host.trim().to_string())
            .filter(|host| !host.is_empty());

        let loop_window = parse_var(&lookup, "AUTH_LOOP_WINDOW_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.loop_window);

        let loop_threshold = match parse_var::<u32, _>(&lookup, "AUTH_LOOP_THRESHOLD")? {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    name: "AUTH_LOOP_THRESHOLD",
                    value: "0".to_string(),
                })
            }
            Some(threshold) => threshold,
            None => defaults.loop_threshold,
        };

        let attempt_timeout = parse_var(&lookup, "AUTH_ATTEMPT_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.attempt_timeout);

        let app_root = match lookup("AUTH_APP_ROOT") {
            Some(root) => validate_return_to(&root)
                .map(String::from)
                .ok_or(ConfigError::InvalidValue {
                    name: "AUTH_APP_ROOT",
                    value: root.clone(),
                })?,
            None => defaults.app_root,
        };

        Ok(Self {
            production_host,
            loop_window,
            loop_threshold,
            attempt_timeout,
            app_root,
        })
    }

    /// Loop detection parameters for the functional core.
    pub fn loop_policy(&self) -> LoopPolicy {
        LoopPolicy {
            window: to_chrono(self.loop_window),
            threshold: self.loop_threshold,
        }
    }

    pub fn attempt_timeout_chrono(&self) -> chrono::Duration {
        to_chrono(self.attempt_timeout)
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(None),
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
