pub mod browser;
pub mod cookies;
pub mod login;
pub mod registry;
pub mod screenshot;

use std::sync::Arc;

use async_trait::async_trait;
use authshot_core::{Config, Paths, Result};
use serde_json::Value;
use tokio::sync::Mutex;

use browser::cookies::CookieStore;
use browser::session::SessionManager;

pub use registry::ToolRegistry;

/// Shared state handed to every tool invocation. The session manager is
/// the only mutation point for the process-wide browser handle; tools
/// never reach for it as ambient state.
#[derive(Clone)]
pub struct ToolContext {
    pub config: Config,
    pub paths: Paths,
    pub cookies: CookieStore,
    pub session: Arc<Mutex<SessionManager>>,
}

impl ToolContext {
    pub fn new(config: Config, paths: Paths) -> Self {
        let cookies = CookieStore::new(paths.cookies_dir());
        let session = Arc::new(Mutex::new(SessionManager::new(
            config.clone(),
            paths.clone(),
        )));
        Self {
            config,
            paths,
            cookies,
            session,
        }
    }

    /// Best-effort teardown of the shared browser session. Called on
    /// server shutdown; errors are logged inside, never propagated.
    pub async fn shutdown(&self) {
        self.session.lock().await.close().await;
    }
}

pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    fn validate(&self, params: &Value) -> Result<()>;
    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value>;
}

/// Reject URLs the `url` crate cannot parse before any browser action.
pub(crate) fn require_url(params: &Value) -> Result<String> {
    let raw = params
        .get("url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| authshot_core::Error::Validation("'url' is required".into()))?;
    url::Url::parse(raw)
        .map_err(|e| authshot_core::Error::Validation(format!("invalid url '{}': {}", raw, e)))?;
    Ok(raw.to_string())
}
