//! Login-wait state machine.
//!
//! Drives the shared page through a bounded wait for a human-completed
//! login. Exactly one completion signal resolves the wait; the losing
//! watchers are cancelled by the `select!`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use authshot_core::config::LoginConfig;
use authshot_core::Result;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::cookies::CookieStore;
use super::session::{Page, WaitUntil};

/// URL substrings that mark a page as still part of a login flow.
const LOGIN_URL_MARKERS: &[&str] = &[
    "login", "signin", "sign-in", "sign_in", "signon", "auth", "account", "sso", "oauth",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginResolution {
    IndicatorMatched,
    NavigationAway,
    SignalFile,
    TimedOut,
}

impl LoginResolution {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::IndicatorMatched => "success indicator matched",
            Self::NavigationAway => "navigation away from login page",
            Self::SignalFile => "signal-login-complete received",
            Self::TimedOut => "wait timed out",
        }
    }
}

#[derive(Debug)]
pub struct LoginOutcome {
    pub final_url: String,
    pub cookie_count: usize,
    pub resolution: LoginResolution,
}

/// A caller-supplied success indicator is either a URL fragment to
/// substring-match or an element selector to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorKind {
    UrlFragment,
    Selector,
}

pub fn classify_indicator(indicator: &str) -> IndicatorKind {
    let looks_like_selector = indicator.starts_with('#')
        || indicator.starts_with('.')
        || indicator.starts_with('[')
        || indicator.contains(" > ");
    if looks_like_selector {
        IndicatorKind::Selector
    } else {
        IndicatorKind::UrlFragment
    }
}

pub fn is_login_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    LOGIN_URL_MARKERS.iter().any(|m| lower.contains(m))
}

/// Run the full login wait on the shared page. The page stays open
/// afterward; cookies are saved keyed by the original `url`, not the
/// final post-redirect URL.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    page: &Page,
    store: &CookieStore,
    config: &LoginConfig,
    nav_timeout: Duration,
    signal_file: PathBuf,
    url: &str,
    wait_minutes: f64,
    indicator: Option<&str>,
) -> Result<LoginOutcome> {
    let stored = store.load(url);
    if !stored.is_empty() {
        debug!(count = stored.len(), "Applying stored cookies before login navigation");
        page.cdp.set_cookies(&stored).await?;
    }

    page.navigate(url, WaitUntil::NetworkIdle2, nav_timeout).await?;

    let deadline = Instant::now() + Duration::from_secs_f64(wait_minutes * 60.0);
    let poll = Duration::from_millis(config.poll_interval_ms);

    let resolution = match indicator {
        Some(ind) => match classify_indicator(ind) {
            IndicatorKind::UrlFragment => poll_for_url_fragment(page, ind, deadline, poll).await,
            IndicatorKind::Selector => poll_for_selector(page, ind, deadline, poll).await,
        },
        None => {
            let nav_events = page.cdp.subscribe_event("Page.frameNavigated").await;
            race_completion(
                nav_events,
                &signal_file,
                deadline,
                Duration::from_millis(config.redirect_settle_ms),
                poll,
            )
            .await
        }
    };

    let final_url = page
        .cdp
        .current_url()
        .await
        .unwrap_or_else(|_| url.to_string());
    let cookies = page.cdp.get_cookies().await.unwrap_or_default();
    if let Err(e) = store.save(url, &cookies) {
        warn!("Failed to persist cookies after login wait: {}", e);
    }
    info!(resolution = resolution.describe(), final_url = %final_url, cookies = cookies.len(), "Login wait resolved");

    Ok(LoginOutcome {
        final_url,
        cookie_count: cookies.len(),
        resolution,
    })
}

/// Poll `check` until it reports success or the deadline passes. Sleeps
/// are capped at the deadline so the wait runs its full length.
async fn poll_until<F, Fut>(mut check: F, deadline: Instant, poll: Duration) -> LoginResolution
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    loop {
        if check().await {
            return LoginResolution::IndicatorMatched;
        }
        let now = Instant::now();
        if now >= deadline {
            return LoginResolution::TimedOut;
        }
        tokio::time::sleep_until(deadline.min(now + poll)).await;
    }
}

async fn poll_for_url_fragment(
    page: &Page,
    fragment: &str,
    deadline: Instant,
    poll: Duration,
) -> LoginResolution {
    let cdp = &page.cdp;
    poll_until(
        move || async move { matches!(cdp.current_url().await, Ok(url) if url.contains(fragment)) },
        deadline,
        poll,
    )
    .await
}

async fn poll_for_selector(
    page: &Page,
    selector: &str,
    deadline: Instant,
    poll: Duration,
) -> LoginResolution {
    // Embed the selector as a JS string literal so quoting survives.
    let literal = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    let expr = format!("document.querySelector({}) !== null", literal);
    let cdp = &page.cdp;
    let expr = &expr;
    poll_until(
        move || async move { matches!(cdp.evaluate(expr).await, Ok(Value::Bool(true))) },
        deadline,
        poll,
    )
    .await
}

/// Race the three heuristic watchers: first to fire wins, the rest are
/// cancelled when the `select!` returns.
async fn race_completion(
    nav_events: mpsc::Receiver<Value>,
    signal_file: &Path,
    deadline: Instant,
    redirect_settle: Duration,
    poll: Duration,
) -> LoginResolution {
    tokio::select! {
        res = navigation_watcher(nav_events, redirect_settle) => res,
        _ = signal_file_watcher(signal_file, poll) => LoginResolution::SignalFile,
        _ = tokio::time::sleep_until(deadline) => LoginResolution::TimedOut,
    }
}

/// Resolves when the main frame lands on a URL that no longer looks
/// like a login page, after a settle delay to skip redirect hops.
async fn navigation_watcher(
    mut nav_events: mpsc::Receiver<Value>,
    redirect_settle: Duration,
) -> LoginResolution {
    loop {
        let Some(params) = nav_events.recv().await else {
            // Event stream gone (page closed); leave it to the deadline.
            std::future::pending::<()>().await;
            unreachable!();
        };
        let frame = &params["frame"];
        let is_main_frame = frame.get("parentId").is_none();
        let url = frame.get("url").and_then(|v| v.as_str()).unwrap_or("");
        if is_main_frame && !url.is_empty() && !is_login_url(url) {
            debug!(url, "Navigation away from login page, settling");
            tokio::time::sleep(redirect_settle).await;
            return LoginResolution::NavigationAway;
        }
    }
}

/// Resolves when the well-known marker file appears; consumes it.
async fn signal_file_watcher(signal_file: &Path, poll: Duration) {
    loop {
        if signal_file.exists() {
            if let Err(e) = std::fs::remove_file(signal_file) {
                warn!("Failed to remove login signal file: {}", e);
            }
            return;
        }
        tokio::time::sleep(poll).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_indicator() {
        assert_eq!(classify_indicator("#dashboard"), IndicatorKind::Selector);
        assert_eq!(classify_indicator(".user-avatar"), IndicatorKind::Selector);
        assert_eq!(classify_indicator("[data-user]"), IndicatorKind::Selector);
        assert_eq!(classify_indicator("nav > .profile"), IndicatorKind::Selector);
        assert_eq!(classify_indicator("/dashboard"), IndicatorKind::UrlFragment);
        assert_eq!(classify_indicator("home"), IndicatorKind::UrlFragment);
    }

    #[test]
    fn test_is_login_url() {
        assert!(is_login_url("https://example.com/login"));
        assert!(is_login_url("https://accounts.example.com/signin?next=/"));
        assert!(is_login_url("https://example.com/oauth/authorize"));
        assert!(!is_login_url("https://example.com/dashboard"));
        assert!(!is_login_url("https://example.com/"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_resolves_timed_out_at_deadline() {
        let (_tx, rx) = mpsc::channel(8);
        let dir = tempfile::TempDir::new().unwrap();
        let signal = dir.path().join("never-written");
        let deadline = Instant::now() + Duration::from_millis(1200);
        let res = race_completion(
            rx,
            &signal,
            deadline,
            Duration::from_millis(100),
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(res, LoginResolution::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_signal_file_wins_and_is_consumed() {
        let (_tx, rx) = mpsc::channel(8);
        let dir = tempfile::TempDir::new().unwrap();
        let signal = dir.path().join("marker");
        std::fs::write(&signal, "done").unwrap();
        let deadline = Instant::now() + Duration::from_secs(60);
        let res = race_completion(
            rx,
            &signal,
            deadline,
            Duration::from_millis(100),
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(res, LoginResolution::SignalFile);
        assert!(!signal.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_race_navigation_away_wins() {
        let (tx, rx) = mpsc::channel(8);
        // Redirect hop to another login URL must not resolve the wait.
        tx.send(json!({"frame": {"url": "https://sso.example.com/auth/step2"}}))
            .await
            .unwrap();
        tx.send(json!({"frame": {"url": "https://example.com/dashboard"}}))
            .await
            .unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let signal = dir.path().join("never-written");
        let deadline = Instant::now() + Duration::from_secs(60);
        let res = race_completion(
            rx,
            &signal,
            deadline,
            Duration::from_millis(100),
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(res, LoginResolution::NavigationAway);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subframe_navigation_does_not_resolve() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(json!({"frame": {"parentId": "frame-1", "url": "https://example.com/widget"}}))
            .await
            .unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let signal = dir.path().join("never-written");
        let deadline = Instant::now() + Duration::from_millis(500);
        let res = race_completion(
            rx,
            &signal,
            deadline,
            Duration::from_millis(100),
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(res, LoginResolution::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_runs_to_the_full_deadline() {
        let start = Instant::now();
        let deadline = start + Duration::from_secs(10);
        let res = poll_until(|| async { false }, deadline, Duration::from_millis(900)).await;
        assert_eq!(res, LoginResolution::TimedOut);
        assert!(Instant::now() >= deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_succeeds_on_a_later_attempt() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let deadline = Instant::now() + Duration::from_secs(60);
        let res = poll_until(
            move || async move { calls.fetch_add(1, Ordering::SeqCst) == 3 },
            deadline,
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(res, LoginResolution::IndicatorMatched);
        assert!(Instant::now() < deadline);
    }

    #[test]
    fn test_resolution_describe() {
        assert_eq!(LoginResolution::TimedOut.describe(), "wait timed out");
        assert_eq!(
            LoginResolution::SignalFile.describe(),
            "signal-login-complete received"
        );
    }
}
