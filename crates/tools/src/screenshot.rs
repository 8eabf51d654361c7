//! Screenshot tools: full page / viewport capture and single-element
//! capture. Fresh pages get saved cookies, a desktop user agent, and
//! automation-hardening overrides; the shared authenticated page is
//! reused as-is when asked for.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use authshot_core::{Error, Result};
use serde_json::{json, Value};
use tracing::warn;

use crate::browser::session::{Page, WaitUntil};
use crate::{require_url, Tool, ToolContext, ToolSchema};

const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Masks the most common automation tells before page scripts run.
const HARDENING_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
window.chrome = window.chrome || { runtime: {} };
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
"#;

struct ImageFormat {
    format: &'static str,
    quality: Option<u32>,
    mime: &'static str,
}

fn parse_image_format(params: &Value) -> Result<ImageFormat> {
    let (format, mime) = match params.get("format").and_then(|v| v.as_str()).unwrap_or("png") {
        "png" => ("png", "image/png"),
        "jpeg" => ("jpeg", "image/jpeg"),
        "webp" => ("webp", "image/webp"),
        other => {
            return Err(Error::Validation(format!(
                "unsupported format '{}', expected png, jpeg or webp",
                other
            )))
        }
    };
    let quality = match params.get("quality") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let q = v
                .as_u64()
                .ok_or_else(|| Error::Validation("'quality' must be an integer".into()))?;
            if !(1..=100).contains(&q) {
                return Err(Error::Validation("'quality' must be between 1 and 100".into()));
            }
            if format == "png" {
                return Err(Error::Validation("'quality' does not apply to png".into()));
            }
            Some(q as u32)
        }
    };
    Ok(ImageFormat { format, quality, mime })
}

/// Whether the shared page already shows the requested URL. An unknown
/// live location always re-navigates.
fn page_already_on(live_url: &str, requested: &str) -> bool {
    !live_url.is_empty() && live_url == requested
}

/// Cookie load, viewport, user agent and hardening for a page this call
/// owns (never applied to the shared authenticated page).
async fn prepare_fresh_page(
    ctx: &ToolContext,
    page: &Page,
    url: &str,
    width: u32,
    height: u32,
    use_saved_auth: bool,
) -> Result<()> {
    if use_saved_auth {
        let stored = ctx.cookies.load(url);
        if !stored.is_empty() {
            page.cdp.set_cookies(&stored).await?;
        }
    }
    page.cdp.set_viewport(width, height).await?;
    page.cdp.set_user_agent(DESKTOP_USER_AGENT).await?;
    page.cdp.add_init_script(HARDENING_SCRIPT).await?;
    Ok(())
}

pub struct ScreenshotPageTool;

#[async_trait]
impl Tool for ScreenshotPageTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "screenshot-page",
            description: "Capture a screenshot of a web page, optionally reusing the authenticated page and saved cookies from a previous login-and-wait call.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "Page URL to capture"
                    },
                    "fullPage": {
                        "type": "boolean",
                        "description": "Capture the full scrollable page instead of the viewport (default: true)"
                    },
                    "width": { "type": "integer", "description": "Viewport width (default: 1920)" },
                    "height": { "type": "integer", "description": "Viewport height (default: 1080)" },
                    "format": {
                        "type": "string",
                        "enum": ["png", "jpeg", "webp"],
                        "description": "Image encoding (default: png)"
                    },
                    "quality": {
                        "type": "integer",
                        "description": "Encoding quality 1-100, jpeg/webp only"
                    },
                    "waitFor": {
                        "type": "string",
                        "enum": ["load", "domcontentloaded", "networkidle0", "networkidle2"],
                        "description": "Navigation readiness condition (default: networkidle2)"
                    },
                    "delay": {
                        "type": "integer",
                        "description": "Extra settle delay in ms after navigation (default: 0)"
                    },
                    "useSavedAuth": {
                        "type": "boolean",
                        "description": "Load saved cookies before navigating and persist them after (default: true)"
                    },
                    "reuseAuthPage": {
                        "type": "boolean",
                        "description": "Reuse the shared authenticated page from login-and-wait instead of opening a fresh one (default: false)"
                    },
                    "useDefaultBrowser": {
                        "type": "boolean",
                        "description": "Attach to the system default browser; only takes effect with visibleBrowser (default: false)"
                    },
                    "visibleBrowser": {
                        "type": "boolean",
                        "description": "Run the browser visibly instead of headless (default: false)"
                    }
                },
                "required": ["url"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_url(params)?;
        parse_image_format(params)?;
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let url = require_url(&params)?;
        let image = parse_image_format(&params)?;
        let full_page = params["fullPage"].as_bool().unwrap_or(true);
        let width = params["width"].as_u64().unwrap_or(ctx.config.screenshot.width as u64) as u32;
        let height = params["height"].as_u64().unwrap_or(ctx.config.screenshot.height as u64) as u32;
        let wait = WaitUntil::parse(params["waitFor"].as_str().unwrap_or("networkidle2"));
        let delay_ms = params["delay"].as_u64().unwrap_or(0);
        let use_saved_auth = params["useSavedAuth"].as_bool().unwrap_or(true);
        let reuse_auth_page = params["reuseAuthPage"].as_bool().unwrap_or(false);
        let visible = params["visibleBrowser"].as_bool().unwrap_or(false);
        let system = params["useDefaultBrowser"].as_bool().unwrap_or(false) && visible;
        let nav_timeout = Duration::from_secs(ctx.config.browser.nav_timeout_secs);

        let (page, browser_desc) = {
            let mut mgr = ctx.session.lock().await;
            mgr.acquire(!visible, system).await?;
            let page = if reuse_auth_page {
                mgr.auth_page().await?
            } else {
                mgr.open_page().await?
            };
            (page, mgr.describe())
        };

        let result = self
            .capture(&ctx, &page, &url, &image, full_page, width, height, wait, delay_ms, use_saved_auth, reuse_auth_page, nav_timeout)
            .await;

        // A fresh page is closed whatever happened; the shared page
        // stays open for subsequent reuse.
        if !reuse_auth_page {
            ctx.session.lock().await.close_page(&page).await;
        }

        let data = result?;
        Ok(json!({
            "text": format!(
                "Captured {} screenshot of {} via {} ({}x{}, {}).",
                if full_page { "full-page" } else { "viewport" },
                url,
                browser_desc,
                width,
                height,
                image.format,
            ),
            "image": { "data": data, "mimeType": image.mime }
        }))
    }
}

impl ScreenshotPageTool {
    #[allow(clippy::too_many_arguments)]
    async fn capture(
        &self,
        ctx: &ToolContext,
        page: &Arc<Page>,
        url: &str,
        image: &ImageFormat,
        full_page: bool,
        width: u32,
        height: u32,
        wait: WaitUntil,
        delay_ms: u64,
        use_saved_auth: bool,
        reuse_auth_page: bool,
        nav_timeout: Duration,
    ) -> Result<String> {
        if reuse_auth_page {
            // Judged by the live document location; a login redirect
            // moves the page without any navigation being requested.
            let live_url = page.cdp.current_url().await.unwrap_or_default();
            if !page_already_on(&live_url, url) {
                page.navigate(url, wait, nav_timeout).await?;
            }
        } else {
            prepare_fresh_page(ctx, page, url, width, height, use_saved_auth).await?;
            page.navigate(url, wait, nav_timeout).await?;
        }

        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let data = page
            .cdp
            .capture_screenshot(image.format, image.quality, full_page, None)
            .await?;

        if !reuse_auth_page && use_saved_auth {
            match page.cdp.get_cookies().await {
                Ok(cookies) => {
                    if let Err(e) = ctx.cookies.save(url, &cookies) {
                        warn!("Failed to persist cookies after screenshot: {}", e);
                    }
                }
                Err(e) => warn!("Failed to read cookies after screenshot: {}", e),
            }
        }
        Ok(data)
    }
}

pub struct ScreenshotElementTool;

#[async_trait]
impl Tool for ScreenshotElementTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "screenshot-element",
            description: "Capture a screenshot of a single element matched by a CSS selector, cropped to its bounding box.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "Page URL to load"
                    },
                    "selector": {
                        "type": "string",
                        "description": "CSS selector of the element to capture"
                    },
                    "waitForSelector": {
                        "type": "boolean",
                        "description": "Wait for the selector to appear before capturing (default: true)"
                    },
                    "format": {
                        "type": "string",
                        "enum": ["png", "jpeg", "webp"],
                        "description": "Image encoding (default: png)"
                    },
                    "quality": {
                        "type": "integer",
                        "description": "Encoding quality 1-100, jpeg/webp only"
                    },
                    "padding": {
                        "type": "integer",
                        "description": "Inline padding in px injected on the element before capture (default: 0)"
                    },
                    "useSavedAuth": {
                        "type": "boolean",
                        "description": "Load saved cookies before navigating (default: true)"
                    },
                    "useDefaultBrowser": {
                        "type": "boolean",
                        "description": "Attach to the system default browser; only takes effect with visibleBrowser (default: false)"
                    },
                    "visibleBrowser": {
                        "type": "boolean",
                        "description": "Run the browser visibly instead of headless (default: false)"
                    }
                },
                "required": ["url", "selector"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_url(params)?;
        parse_image_format(params)?;
        let selector = params.get("selector").and_then(|v| v.as_str()).unwrap_or("");
        if selector.trim().is_empty() {
            return Err(Error::Validation("'selector' is required".into()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let url = require_url(&params)?;
        let image = parse_image_format(&params)?;
        let selector = params["selector"].as_str().unwrap_or_default().to_string();
        let wait_for_selector = params["waitForSelector"].as_bool().unwrap_or(true);
        let padding = params["padding"].as_u64().unwrap_or(0);
        let use_saved_auth = params["useSavedAuth"].as_bool().unwrap_or(true);
        let visible = params["visibleBrowser"].as_bool().unwrap_or(false);
        let system = params["useDefaultBrowser"].as_bool().unwrap_or(false) && visible;
        let nav_timeout = Duration::from_secs(ctx.config.browser.nav_timeout_secs);

        let page = {
            let mut mgr = ctx.session.lock().await;
            mgr.acquire(!visible, system).await?;
            mgr.open_page().await?
        };

        let result = self
            .capture(&ctx, &page, &url, &selector, &image, wait_for_selector, padding, use_saved_auth, nav_timeout)
            .await;

        // Element pages are never shared; always closed.
        ctx.session.lock().await.close_page(&page).await;

        let data = result?;
        Ok(json!({
            "text": format!("Captured element '{}' on {} ({}).", selector, url, image.format),
            "image": { "data": data, "mimeType": image.mime }
        }))
    }
}

impl ScreenshotElementTool {
    #[allow(clippy::too_many_arguments)]
    async fn capture(
        &self,
        ctx: &ToolContext,
        page: &Arc<Page>,
        url: &str,
        selector: &str,
        image: &ImageFormat,
        wait_for_selector: bool,
        padding: u64,
        use_saved_auth: bool,
        nav_timeout: Duration,
    ) -> Result<String> {
        let (width, height) = (ctx.config.screenshot.width, ctx.config.screenshot.height);
        prepare_fresh_page(ctx, page, url, width, height, use_saved_auth).await?;
        page.navigate(url, WaitUntil::NetworkIdle2, nav_timeout).await?;

        let literal = serde_json::to_string(selector)?;
        if wait_for_selector {
            let probe = format!("document.querySelector({}) !== null", literal);
            let deadline = std::time::Instant::now() + Duration::from_secs(10);
            loop {
                if page.cdp.evaluate(&probe).await? == Value::Bool(true) {
                    break;
                }
                if std::time::Instant::now() >= deadline {
                    break; // the rect lookup below reports not-found
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }

        // Page-coordinate bounding box, with optional inline padding
        // injected on the element first.
        let rect_expr = format!(
            r#"(() => {{
                const el = document.querySelector({literal});
                if (!el) return null;
                const pad = {padding};
                if (pad > 0) el.style.padding = pad + 'px';
                const r = el.getBoundingClientRect();
                return {{
                    x: r.x + window.scrollX,
                    y: r.y + window.scrollY,
                    width: r.width,
                    height: r.height
                }};
            }})()"#
        );
        let rect = page.cdp.evaluate(&rect_expr).await?;
        if rect.is_null() {
            return Err(Error::NotFound(format!(
                "no element matched selector '{}'",
                selector
            )));
        }
        let clip = json!({
            "x": rect["x"],
            "y": rect["y"],
            "width": rect["width"],
            "height": rect["height"],
            "scale": 1,
        });

        page.cdp
            .capture_screenshot(image.format, image.quality, true, Some(clip))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_defaults_to_png() {
        let image = parse_image_format(&json!({})).unwrap();
        assert_eq!(image.format, "png");
        assert_eq!(image.mime, "image/png");
        assert_eq!(image.quality, None);
    }

    #[test]
    fn test_format_rejects_unknown() {
        assert!(parse_image_format(&json!({"format": "bmp"})).is_err());
    }

    #[test]
    fn test_quality_range_enforced() {
        assert!(parse_image_format(&json!({"format": "jpeg", "quality": 0})).is_err());
        assert!(parse_image_format(&json!({"format": "jpeg", "quality": 101})).is_err());
        let ok = parse_image_format(&json!({"format": "jpeg", "quality": 80})).unwrap();
        assert_eq!(ok.quality, Some(80));
        assert_eq!(ok.mime, "image/jpeg");
    }

    #[test]
    fn test_quality_not_allowed_for_png() {
        assert!(parse_image_format(&json!({"format": "png", "quality": 80})).is_err());
    }

    #[test]
    fn test_reuse_compares_live_location() {
        // After a login the page sits on the post-redirect URL; asking
        // for the login URL again must re-navigate.
        assert!(!page_already_on(
            "https://example.com/dashboard",
            "https://example.com/login"
        ));
        assert!(page_already_on(
            "https://example.com/login",
            "https://example.com/login"
        ));
        assert!(!page_already_on("", "https://example.com/login"));
    }

    #[test]
    fn test_page_validate() {
        let tool = ScreenshotPageTool;
        assert!(tool.validate(&json!({"url": "https://example.com"})).is_ok());
        assert!(tool.validate(&json!({"url": "nope"})).is_err());
        assert!(tool
            .validate(&json!({"url": "https://example.com", "quality": 200, "format": "webp"}))
            .is_err());
    }

    #[test]
    fn test_element_validate_requires_selector() {
        let tool = ScreenshotElementTool;
        assert!(tool.validate(&json!({"url": "https://example.com"})).is_err());
        assert!(tool
            .validate(&json!({"url": "https://example.com", "selector": "  "}))
            .is_err());
        assert!(tool
            .validate(&json!({"url": "https://example.com", "selector": "#main"}))
            .is_ok());
    }
}
