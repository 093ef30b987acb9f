//! Supervisor configuration.

use std::time::Duration;

use crate::i18n::Locale;

/// Settings shared by every run of one supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Maximum number of events buffered between worker and client.
    pub relay_capacity: usize,

    /// How long one drain wait may block before the worker is re-checked.
    pub poll_interval: Duration,

    /// Local debugging ports are allocated after this one.
    pub base_cdp_port: u16,

    /// Chromium-compatible executable used for local environments.
    pub browser_path: String,

    /// Launch local browsers without a window.
    pub headless: bool,

    /// Proxy passed to local browsers.
    pub proxy_server: Option<String>,

    /// How long a freshly launched browser has to answer `/json/version`.
    pub browser_ready_timeout: Duration,

    /// Timeout for remote environment lookups and releases.
    pub remote_timeout: Duration,

    /// Externally reachable endpoint substituted into remote debugger URLs.
    pub public_cdp_endpoint: Option<String>,

    /// Language of the human-readable texts attached to events.
    pub locale: Locale,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            relay_capacity: 100,
            poll_interval: Duration::from_millis(500),
            base_cdp_port: 9222,
            browser_path: "chromium".to_string(),
            headless: true,
            proxy_server: None,
            browser_ready_timeout: Duration::from_secs(10),
            remote_timeout: Duration::from_secs(30),
            public_cdp_endpoint: None,
            locale: Locale::default(),
        }
    }
}
