//! Environment probes for choosing between popup and redirect sign-in.

use tilshare_core::auth::{BrowserEnvironment, EnvironmentProbe};

const MOBILE_MARKERS: [&str; 8] = [
    "Android",
    "webOS",
    "iPhone",
    "iPad",
    "iPod",
    "BlackBerry",
    "IEMobile",
    "Opera Mini",
];

const DESKTOP_BROWSERS: [&str; 4] = ["Chrome", "Firefox", "Safari", "Edg"];

/// Derives the environment from what a browser reports about itself.
#[derive(Debug, Clone)]
pub struct UserAgentProbe {
    user_agent: String,
    hostname: String,
    embedded: bool,
}

impl UserAgentProbe {
    pub fn new(user_agent: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            hostname: hostname.into(),
            embedded: false,
        }
    }

    /// Mark the page as running inside a frame (`window.self !== window.top`).
    pub fn embedded(mut self, embedded: bool) -> Self {
        self.embedded = embedded;
        self
    }
}

impl EnvironmentProbe for UserAgentProbe {
    fn environment(&self) -> BrowserEnvironment {
        let ua = self.user_agent.as_str();
        let is_mobile = MOBILE_MARKERS.iter().any(|marker| ua.contains(marker))
            || ua.contains("Mobile");

        BrowserEnvironment {
            is_mobile,
            is_embedded: self.embedded,
            is_known_desktop_browser: DESKTOP_BROWSERS.iter().any(|name| ua.contains(name)),
            hostname: self.hostname.clone(),
        }
    }
}

/// Probe that always reports the same environment.
#[derive(Debug, Clone, Default)]
pub struct FixedEnvironment(pub BrowserEnvironment);

impl FixedEnvironment {
    /// A desktop browser on the given host.
    pub fn desktop(hostname: impl Into<String>) -> Self {
        Self(BrowserEnvironment {
            is_mobile: false,
            is_embedded: false,
            is_known_desktop_browser: true,
            hostname: hostname.into(),
        })
    }

    /// A phone browser on the given host.
    pub fn mobile(hostname: impl Into<String>) -> Self {
        Self(BrowserEnvironment {
            is_mobile: true,
            is_embedded: false,
            is_known_desktop_browser: false,
            hostname: hostname.into(),
        })
    }
}

impl EnvironmentProbe for FixedEnvironment {
    fn environment(&self) -> BrowserEnvironment {
        self.0.clone()
    }
}
