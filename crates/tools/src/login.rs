//! Login tools: `login-and-wait` drives the shared page through the
//! login-wait state machine; `signal-login-complete` writes the marker
//! file its watcher consumes.

use async_trait::async_trait;
use authshot_core::{Error, Result};
use serde_json::{json, Value};
use tracing::info;

use crate::browser::login;
use crate::{require_url, Tool, ToolContext, ToolSchema};

pub struct LoginAndWaitTool;

#[async_trait]
impl Tool for LoginAndWaitTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "login-and-wait",
            description: "Open a visible browser at a login page, wait for a human to complete the login (detected via a success indicator, navigation away from the login page, or the signal-login-complete tool), then persist the session cookies for later screenshot calls.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "Login page URL to open"
                    },
                    "waitMinutes": {
                        "type": "number",
                        "description": "Maximum minutes to wait for login completion (default: 3)"
                    },
                    "successIndicator": {
                        "type": "string",
                        "description": "Optional deterministic completion signal: a URL fragment to match (e.g. '/dashboard') or a CSS selector to appear (e.g. '#user-menu')"
                    },
                    "useDefaultBrowser": {
                        "type": "boolean",
                        "description": "Attach to the system default browser instead of a managed instance (default: true)"
                    }
                },
                "required": ["url"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_url(params)?;
        if let Some(minutes) = params.get("waitMinutes") {
            let minutes = minutes
                .as_f64()
                .ok_or_else(|| Error::Validation("'waitMinutes' must be a number".into()))?;
            if minutes <= 0.0 {
                return Err(Error::Validation("'waitMinutes' must be positive".into()));
            }
        }
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let url = require_url(&params)?;
        let wait_minutes = params["waitMinutes"]
            .as_f64()
            .unwrap_or(ctx.config.login.default_wait_minutes);
        let indicator = params["successIndicator"].as_str().map(|s| s.to_string());
        let use_default = params["useDefaultBrowser"].as_bool().unwrap_or(true);

        // Login is always visible; a human has to type into the page.
        let (page, browser_desc) = {
            let mut mgr = ctx.session.lock().await;
            mgr.acquire(false, use_default).await?;
            let page = mgr.auth_page().await?;
            (page, mgr.describe())
        };

        info!(url = %url, wait_minutes, "Starting login wait");
        let outcome = login::run(
            &page,
            &ctx.cookies,
            &ctx.config.login,
            std::time::Duration::from_secs(ctx.config.browser.nav_timeout_secs),
            ctx.paths.login_signal_file(),
            &url,
            wait_minutes,
            indicator.as_deref(),
        )
        .await?;

        // The page stays open as the shared authenticated page.
        Ok(json!({
            "text": format!(
                "Login wait finished via {} ({}).\nStarted at: {}\nEnded at: {}\nCookies saved for {}: {}",
                browser_desc,
                outcome.resolution.describe(),
                url,
                outcome.final_url,
                crate::browser::cookies::CookieStore::identity_of(&url),
                outcome.cookie_count,
            )
        }))
    }
}

pub struct SignalLoginCompleteTool;

#[async_trait]
impl Tool for SignalLoginCompleteTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "signal-login-complete",
            description: "Tell a pending login-and-wait call that the login has been completed manually. Writes the marker file its watcher polls for.",
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        }
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, _params: Value) -> Result<Value> {
        let marker = ctx.paths.login_signal_file();
        std::fs::write(&marker, "complete")?;
        Ok(json!({
            "text": format!(
                "Login completion signaled. A pending login-and-wait call will pick up {} within its next poll.",
                marker.display()
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_validate_requires_url() {
        let tool = LoginAndWaitTool;
        assert!(tool.validate(&json!({})).is_err());
        assert!(tool.validate(&json!({"url": "not a url"})).is_err());
        assert!(tool.validate(&json!({"url": "https://example.com/login"})).is_ok());
    }

    #[test]
    fn test_login_validate_rejects_bad_wait() {
        let tool = LoginAndWaitTool;
        let params = json!({"url": "https://example.com", "waitMinutes": -1});
        assert!(tool.validate(&params).is_err());
        let params = json!({"url": "https://example.com", "waitMinutes": "three"});
        assert!(tool.validate(&params).is_err());
        let params = json!({"url": "https://example.com", "waitMinutes": 0.02});
        assert!(tool.validate(&params).is_ok());
    }
}
