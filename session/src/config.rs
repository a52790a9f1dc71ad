//! Session configuration parsed from environment variables.

use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:3000";
pub const DEFAULT_SYNC_BROWSER_TABS_TIMEOUT_MS: u64 = 50;
pub const DEFAULT_SAVE_TO_CLOUD_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LANG_CODE: &str = "en";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Base URL of the board server, without a trailing slash.
    pub server_url: String,
    /// Bearer token for the board API. Boards are unavailable without one.
    pub token: Option<String>,
    /// Debounce between a tab becoming visible and the storage check.
    pub sync_tabs_debounce: Duration,
    /// Interval of the debounced save-to-cloud tick.
    pub cloud_save_interval: Duration,
    /// Whole-request timeout for HTTP calls.
    pub http_timeout: Duration,
    /// Language code restored after a tab sync.
    pub lang_code: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_owned(),
            token: None,
            sync_tabs_debounce: Duration::from_millis(DEFAULT_SYNC_BROWSER_TABS_TIMEOUT_MS),
            cloud_save_interval: Duration::from_millis(DEFAULT_SAVE_TO_CLOUD_TIMEOUT_MS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            lang_code: DEFAULT_LANG_CODE.to_owned(),
        }
    }
}

impl SessionConfig {
    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `SKETCHBOARD_SERVER_URL`: default `http://localhost:3000`
    /// - `SKETCHBOARD_TOKEN`: bearer token for the board API
    /// - `SKETCHBOARD_LANG`: default `en`
    /// - `SYNC_BROWSER_TABS_TIMEOUT_MS`: default 50
    /// - `SAVE_TO_CLOUD_TIMEOUT_MS`: default 1000, minimum 1
    /// - `HTTP_TIMEOUT_SECS`: default 30
    #[must_use]
    pub fn from_env() -> Self {
        let server_url = std::env::var("SKETCHBOARD_SERVER_URL")
            .unwrap_or_else(|_| DEFAULT_SERVER_URL.to_owned())
            .trim_end_matches('/')
            .to_owned();
        let token = std::env::var("SKETCHBOARD_TOKEN")
            .ok()
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty());
        let lang_code = std::env::var("SKETCHBOARD_LANG")
            .ok()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LANG_CODE.to_owned());

        Self {
            server_url,
            token,
            sync_tabs_debounce: Duration::from_millis(env_parse(
                "SYNC_BROWSER_TABS_TIMEOUT_MS",
                DEFAULT_SYNC_BROWSER_TABS_TIMEOUT_MS,
            )),
            cloud_save_interval: cloud_save_interval(env_parse(
                "SAVE_TO_CLOUD_TIMEOUT_MS",
                DEFAULT_SAVE_TO_CLOUD_TIMEOUT_MS,
            )),
            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)),
            lang_code,
        }
    }
}

/// Cloud-save period, at least one millisecond.
fn cloud_save_interval(ms: u64) -> Duration {
    Duration::from_millis(ms.max(1))
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
