//! Browser session lifecycle.
//!
//! The process owns at most one live browser handle and, within it, at
//! most one shared authenticated page. A mode change (headless vs
//! visible, managed vs system-via-debug-port) always forces a full
//! relaunch; there is no in-place reconfiguration.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use authshot_core::{Config, Error, Paths, Result};
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::cdp::CdpClient;

/// Requested browser configuration, tracked explicitly at creation time.
/// Never inferred from the running process's arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowserMode {
    pub headless: bool,
    /// Attach to the user's system browser over its debug port instead
    /// of launching a managed instance. Only meaningful when visible.
    pub system: bool,
}

/// How a navigation is considered finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    Load,
    DomContentLoaded,
    NetworkIdle0,
    NetworkIdle2,
}

impl WaitUntil {
    pub fn parse(s: &str) -> Self {
        match s {
            "load" => Self::Load,
            "domcontentloaded" => Self::DomContentLoaded,
            "networkidle0" => Self::NetworkIdle0,
            _ => Self::NetworkIdle2,
        }
    }
}

/// One page target with its own CDP connection. Methods take `&self` so
/// a handle can be shared across interleaved tool calls; the shared
/// authenticated page is exactly such a handle.
pub struct Page {
    pub cdp: CdpClient,
    pub target_id: String,
}

impl Page {
    /// Navigate and wait for the requested lifecycle point, bounded by
    /// `timeout` (independent of any login deadline).
    pub async fn navigate(&self, url: &str, wait: WaitUntil, timeout: Duration) -> Result<()> {
        let mut fired = match wait {
            WaitUntil::DomContentLoaded => {
                self.cdp.subscribe_event("Page.domContentEventFired").await
            }
            _ => self.cdp.subscribe_event("Page.loadEventFired").await,
        };
        self.cdp.navigate(url).await?;
        if tokio::time::timeout(timeout, fired.recv()).await.is_err() {
            return Err(Error::Timeout(format!(
                "navigation to {} did not settle within {}s",
                url,
                timeout.as_secs()
            )));
        }
        // The idle variants get a short grace period for straggling
        // requests; raw CDP has no networkidle lifecycle event.
        if matches!(wait, WaitUntil::NetworkIdle0 | WaitUntil::NetworkIdle2) {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Ok(())
    }

    /// Liveness probe. A page closed externally fails the round-trip.
    pub async fn is_open(&self) -> bool {
        self.cdp.evaluate("1").await.is_ok()
    }
}

/// The one live browser handle.
struct BrowserSession {
    mode: BrowserMode,
    /// True when actually attached over a system browser's debug port
    /// (a system request can fall back to a managed launch).
    attached_system: bool,
    debug_port: u16,
    /// Owned child for managed launches; system launches are detached.
    process: Option<Child>,
    /// Browser-level CDP connection, used for target management.
    cdp: CdpClient,
    /// Owned temporary profile directory, removed on close.
    profile_dir: Option<PathBuf>,
    auth_page: Option<Arc<Page>>,
}

pub struct SessionManager {
    config: Config,
    paths: Paths,
    session: Option<BrowserSession>,
}

impl SessionManager {
    pub fn new(config: Config, paths: Paths) -> Self {
        Self {
            config,
            paths,
            session: None,
        }
    }

    pub fn current_mode(&self) -> Option<BrowserMode> {
        self.session.as_ref().map(|s| s.mode)
    }

    /// Human-readable description of the live handle, for tool summaries.
    pub fn describe(&self) -> &'static str {
        match &self.session {
            Some(s) if s.attached_system => "system default browser (debug port)",
            Some(_) => "managed browser",
            None => "no browser",
        }
    }

    /// Ensure a live handle matching the requested mode. A mismatched
    /// existing handle is closed first; no two modes ever coexist.
    pub async fn acquire(&mut self, headless: bool, system: bool) -> Result<()> {
        let mode = BrowserMode { headless, system };
        if let Some(session) = &self.session {
            if session.mode == mode {
                return Ok(());
            }
            info!(?mode, "Browser mode changed, relaunching");
            self.close().await;
        }
        let session = self.launch(mode).await?;
        self.session = Some(session);
        Ok(())
    }

    async fn launch(&self, mode: BrowserMode) -> Result<BrowserSession> {
        if mode.system && !mode.headless {
            match self.launch_system(mode).await {
                Ok(session) => return Ok(session),
                // Single fallback: a second failure surfaces to the caller.
                Err(e) => warn!("System browser launch failed ({}), falling back to managed launch", e),
            }
        }
        self.launch_managed(mode).await
    }

    /// Start the user's browser as a detached process on a free debug
    /// port with an isolated profile, then attach over the debug endpoint.
    async fn launch_system(&self, mode: BrowserMode) -> Result<BrowserSession> {
        let path = self
            .browser_path()
            .ok_or_else(|| Error::NotFound("no system browser discovered".into()))?;
        let port = find_free_port().await?;
        let profile_dir = self.paths.new_profile_dir();
        std::fs::create_dir_all(&profile_dir)?;

        info!(browser = %path, port, profile = %profile_dir.display(), "Starting system browser");
        let spawned = std::process::Command::new(&path)
            .args(system_browser_args(port, &profile_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(e) = spawned {
            let _ = std::fs::remove_dir_all(&profile_dir);
            return Err(Error::Browser(format!("failed to start {}: {}", path, e)));
        }

        tokio::time::sleep(Duration::from_millis(self.config.browser.launch_settle_ms)).await;

        let connected = self.attach(port).await;
        match connected {
            Ok(cdp) => Ok(BrowserSession {
                mode,
                attached_system: true,
                debug_port: port,
                process: None,
                cdp,
                profile_dir: Some(profile_dir),
                auth_page: None,
            }),
            Err(e) => {
                let _ = std::fs::remove_dir_all(&profile_dir);
                Err(e)
            }
        }
    }

    /// Launch a managed instance with the fixed automation-hardening
    /// flag set.
    async fn launch_managed(&self, mode: BrowserMode) -> Result<BrowserSession> {
        let path = self.browser_path().ok_or_else(|| {
            Error::Browser("no Chromium-family browser found; set browser.pathOverride".into())
        })?;
        let port = find_free_port().await?;
        let profile_dir = self.paths.new_profile_dir();
        std::fs::create_dir_all(&profile_dir)?;

        info!(browser = %path, port, headless = mode.headless, "Launching managed browser");
        let child = Command::new(&path)
            .args(managed_browser_args(port, &profile_dir, mode.headless))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let _ = std::fs::remove_dir_all(&profile_dir);
                Error::Browser(format!("failed to launch {}: {}", path, e))
            })?;

        let cdp = self.attach(port).await?;
        Ok(BrowserSession {
            mode,
            attached_system: false,
            debug_port: port,
            process: Some(child),
            cdp,
            profile_dir: Some(profile_dir),
            auth_page: None,
        })
    }

    async fn attach(&self, port: u16) -> Result<CdpClient> {
        let ws_url = wait_for_cdp_ready(port, self.config.browser.connect_timeout_secs).await?;
        let cdp = CdpClient::connect(&ws_url).await?;
        debug!(port, "CDP browser connection established");
        Ok(cdp)
    }

    fn browser_path(&self) -> Option<String> {
        if let Some(path) = &self.config.browser.path_override {
            return Some(path.clone());
        }
        find_system_browser()
    }

    fn live_session(&mut self) -> Result<&mut BrowserSession> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::Browser("no browser session; acquire one first".into()))
    }

    /// The shared authenticated page, transparently re-created when it
    /// has been closed externally.
    pub async fn auth_page(&mut self) -> Result<Arc<Page>> {
        if let Some(page) = self.session.as_ref().and_then(|s| s.auth_page.clone()) {
            if page.is_open().await {
                return Ok(page);
            }
        }
        let page = self.open_page().await?;
        self.live_session()?.auth_page = Some(page.clone());
        Ok(page)
    }

    pub fn is_auth_page(&self, page: &Page) -> bool {
        self.session
            .as_ref()
            .and_then(|s| s.auth_page.as_ref())
            .map(|p| p.target_id == page.target_id)
            .unwrap_or(false)
    }

    /// Open a fresh page target on the current handle.
    pub async fn open_page(&mut self) -> Result<Arc<Page>> {
        let (port, target_id) = {
            let session = self.live_session()?;
            let target_id = session.cdp.create_target("about:blank").await?;
            (session.debug_port, target_id)
        };
        let ws_url = get_target_ws_url(port, &target_id).await?;
        let cdp = CdpClient::connect(&ws_url).await?;
        for domain in ["Page", "Runtime", "Network", "DOM"] {
            cdp.enable_domain(domain).await?;
        }
        Ok(Arc::new(Page { cdp, target_id }))
    }

    /// Close a page target. Errors are logged, not propagated.
    pub async fn close_page(&mut self, page: &Page) {
        if let Some(session) = &self.session {
            if let Err(e) = session.cdp.close_target(&page.target_id).await {
                debug!("Closing page target failed (may already be gone): {}", e);
            }
        }
    }

    /// Best-effort teardown: close the browser, kill an owned process,
    /// remove the owned profile directory, drop the shared page.
    pub async fn close(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.auth_page = None;
        if let Err(e) = session.cdp.send_command("Browser.close", json!({})).await {
            debug!("CDP Browser.close failed (may already be closed): {}", e);
        }
        if let Some(mut child) = session.process.take() {
            let _ = child.kill().await;
        }
        if let Some(dir) = session.profile_dir.take() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(dir = %dir.display(), "Failed to remove profile dir: {}", e);
            }
        }
        info!("Browser session closed");
    }
}

/// Flags for a detached system-browser launch: isolated profile, debug
/// port, nothing else touched.
fn system_browser_args(port: u16, profile_dir: &std::path::Path) -> Vec<String> {
    vec![
        format!("--remote-debugging-port={}", port),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "about:blank".to_string(),
    ]
}

/// Flags for a managed launch: sandboxing off for portability,
/// throttling/telemetry features off, GPU off only when headless.
fn managed_browser_args(port: u16, profile_dir: &std::path::Path, headless: bool) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", port),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-sandbox".to_string(),
        "--disable-setuid-sandbox".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-sync".to_string(),
        "--metrics-recording-only".to_string(),
        "--password-store=basic".to_string(),
    ];
    if headless {
        args.push("--headless=new".to_string());
        args.push("--disable-gpu".to_string());
    }
    args.push("about:blank".to_string());
    args
}

/// Discover a system browser, in a fixed preference order per platform.
/// Absence is not fatal; the caller decides what to do.
pub fn find_system_browser() -> Option<String> {
    let candidates: Vec<&str> = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "microsoft-edge",
            "brave-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ]
    };

    for candidate in candidates {
        if std::path::Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok()
        {
            return Some(candidate.to_string());
        }
    }
    None
}

/// Free TCP port for the debug endpoint, assigned by the OS.
async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::Browser(format!("failed to bind to find free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::Browser(format!("failed to get local addr: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll /json/version until the debug endpoint answers with its
/// WebSocket URL, up to `timeout_secs`.
async fn wait_for_cdp_ready(port: u16, timeout_secs: u64) -> Result<String> {
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Timeout(format!(
                "debug endpoint not ready after {}s on port {}",
                timeout_secs, port
            )));
        }
        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Resolve a targetId to its WebSocket debugger URL via /json/list.
/// Retries a few times since a new target may not appear immediately.
async fn get_target_ws_url(port: u16, target_id: &str) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let Ok(resp) = reqwest::get(&url).await else {
            continue;
        };
        let Ok(targets) = resp.json::<Vec<Value>>().await else {
            continue;
        };
        for target in &targets {
            if target.get("id").and_then(|v| v.as_str()) == Some(target_id)
                || target.get("targetId").and_then(|v| v.as_str()) == Some(target_id)
            {
                if let Some(ws_url) = target.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }
    }
    Err(Error::Browser(format!(
        "no WebSocket URL found for target '{}'",
        target_id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_equality_drives_relaunch() {
        let a = BrowserMode { headless: true, system: false };
        let b = BrowserMode { headless: false, system: false };
        let c = BrowserMode { headless: false, system: true };
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(a, BrowserMode { headless: true, system: false });
    }

    #[test]
    fn test_managed_args_headless_gates_gpu() {
        let dir = std::path::Path::new("/tmp/p");
        let headless = managed_browser_args(9222, dir, true);
        assert!(headless.contains(&"--headless=new".to_string()));
        assert!(headless.contains(&"--disable-gpu".to_string()));
        let visible = managed_browser_args(9222, dir, false);
        assert!(!visible.iter().any(|a| a.starts_with("--headless")));
        assert!(!visible.contains(&"--disable-gpu".to_string()));
    }

    #[test]
    fn test_managed_args_harden() {
        let args = managed_browser_args(9222, std::path::Path::new("/tmp/p"), true);
        assert!(args.contains(&"--no-sandbox".to_string()));
        assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/p".to_string()));
    }

    #[test]
    fn test_system_args_isolated_profile() {
        let args = system_browser_args(9333, std::path::Path::new("/tmp/profile"));
        assert!(args.contains(&"--remote-debugging-port=9333".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
        // System launches keep the user's browser untouched otherwise.
        assert!(!args.contains(&"--no-sandbox".to_string()));
    }

    #[test]
    fn test_wait_until_parse() {
        assert_eq!(WaitUntil::parse("load"), WaitUntil::Load);
        assert_eq!(WaitUntil::parse("domcontentloaded"), WaitUntil::DomContentLoaded);
        assert_eq!(WaitUntil::parse("networkidle0"), WaitUntil::NetworkIdle0);
        assert_eq!(WaitUntil::parse("anything-else"), WaitUntil::NetworkIdle2);
    }

    #[tokio::test]
    async fn test_manager_starts_with_no_session() {
        let mgr = SessionManager::new(
            Config::default(),
            Paths::with_base(std::env::temp_dir().join("authshot-mgr-test")),
        );
        assert!(mgr.current_mode().is_none());
        assert_eq!(mgr.describe(), "no browser");
    }

    #[tokio::test]
    async fn test_close_without_session_is_noop() {
        let mut mgr = SessionManager::new(
            Config::default(),
            Paths::with_base(std::env::temp_dir().join("authshot-mgr-test")),
        );
        mgr.close().await;
        assert!(mgr.current_mode().is_none());
    }
}
