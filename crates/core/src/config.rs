use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Explicit browser binary. When set, platform discovery is skipped
    /// and this path is authoritative.
    #[serde(default)]
    pub path_override: Option<String>,
    /// Upper bound for any single navigation, independent of the login
    /// wait deadline.
    #[serde(default = "default_nav_timeout_secs")]
    pub nav_timeout_secs: u64,
    /// Delay after spawning a system browser before connecting to its
    /// debug endpoint.
    #[serde(default = "default_launch_settle_ms")]
    pub launch_settle_ms: u64,
    /// How long to poll the debug endpoint before giving up on a launch.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_nav_timeout_secs() -> u64 {
    30
}

fn default_launch_settle_ms() -> u64 {
    1500
}

fn default_connect_timeout_secs() -> u64 {
    15
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            path_override: None,
            nav_timeout_secs: default_nav_timeout_secs(),
            launch_settle_ms: default_launch_settle_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginConfig {
    #[serde(default = "default_wait_minutes")]
    pub default_wait_minutes: f64,
    /// Interval for the URL / selector / signal-file pollers.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Settle delay after a navigation away from a login page, so the
    /// watcher does not fire on an intermediate redirect hop.
    #[serde(default = "default_redirect_settle_ms")]
    pub redirect_settle_ms: u64,
}

fn default_wait_minutes() -> f64 {
    3.0
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_redirect_settle_ms() -> u64 {
    2000
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            default_wait_minutes: default_wait_minutes(),
            poll_interval_ms: default_poll_interval_ms(),
            redirect_settle_ms: default_redirect_settle_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub screenshot: ScreenshotConfig,
    #[serde(default)]
    pub login: LoginConfig,
}

impl Config {
    /// Load config from disk, falling back to defaults when the file is
    /// missing. A malformed file is an error; silently ignoring it would
    /// hide typos in user-edited config.
    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let file = paths.config_file();
        if !file.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&file)?;
        let config = serde_json::from_str(&raw)
            .map_err(|e| crate::Error::Config(format!("{}: {}", file.display(), e)))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.browser.nav_timeout_secs, 30);
        assert_eq!(config.screenshot.width, 1920);
        assert_eq!(config.screenshot.height, 1080);
        assert_eq!(config.login.default_wait_minutes, 3.0);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"screenshot": {"width": 1280}}"#).unwrap();
        assert_eq!(config.screenshot.width, 1280);
        assert_eq!(config.screenshot.height, 1080);
        assert_eq!(config.browser.nav_timeout_secs, 30);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let config = Config::load_or_default(&paths).unwrap();
        assert_eq!(config.login.poll_interval_ms, 1000);
    }

    #[test]
    fn test_load_malformed_file_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(paths.config_file(), "{not json").unwrap();
        assert!(Config::load_or_default(&paths).is_err());
    }
}
