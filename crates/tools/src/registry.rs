use std::collections::HashMap;
use std::sync::Arc;

use authshot_core::{Error, Result};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::cookies::ClearAuthCookiesTool;
use crate::login::{LoginAndWaitTool, SignalLoginCompleteTool};
use crate::screenshot::{ScreenshotElementTool, ScreenshotPageTool};
use crate::{Tool, ToolContext};

#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LoginAndWaitTool));
        registry.register(Arc::new(SignalLoginCompleteTool));
        registry.register(Arc::new(ScreenshotPageTool));
        registry.register(Arc::new(ScreenshotElementTool));
        registry.register(Arc::new(ClearAuthCookiesTool));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        debug!(name = schema.name, "Registering tool");
        self.tools.insert(schema.name.to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool descriptors in MCP tools/list shape.
    pub fn tool_descriptors(&self) -> Vec<Value> {
        self.tool_names()
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                let schema = tool.schema();
                json!({
                    "name": schema.name,
                    "description": schema.description,
                    "inputSchema": schema.parameters,
                })
            })
            .collect()
    }

    pub async fn execute(&self, name: &str, ctx: ToolContext, params: Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::Tool(format!("Unknown tool: {}", name)))?;

        if let Err(e) = tool.validate(&params) {
            warn!(tool = name, error = %e, "Tool validation failed");
            return Err(e);
        }

        debug!(tool = name, "Executing tool");
        tool.execute(ctx, params).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_new_empty() {
        let reg = ToolRegistry::new();
        assert!(reg.tool_names().is_empty());
        assert!(reg.get("login-and-wait").is_none());
    }

    #[test]
    fn test_registry_with_defaults_has_all_tools() {
        let reg = ToolRegistry::with_defaults();
        let names = reg.tool_names();
        assert_eq!(
            names,
            vec![
                "clear-auth-cookies",
                "login-and-wait",
                "screenshot-element",
                "screenshot-page",
                "signal-login-complete",
            ]
        );
    }

    #[test]
    fn test_registry_descriptors_shape() {
        let reg = ToolRegistry::with_defaults();
        let descriptors = reg.tool_descriptors();
        assert_eq!(descriptors.len(), 5);
        for d in &descriptors {
            assert!(d["name"].is_string());
            assert!(d["description"].is_string());
            assert_eq!(d["inputSchema"]["type"], "object");
        }
    }

    #[tokio::test]
    async fn test_execute_unknown_tool_errors() {
        let reg = ToolRegistry::with_defaults();
        let ctx = ToolContext::new(
            authshot_core::Config::default(),
            authshot_core::Paths::with_base(std::env::temp_dir().join("authshot-reg-test")),
        );
        let err = reg.execute("no-such-tool", ctx, json!({})).await.unwrap_err();
        assert!(err.to_string().contains("no-such-tool"));
    }

    #[tokio::test]
    async fn test_execute_validates_before_browser_work() {
        let reg = ToolRegistry::with_defaults();
        let ctx = ToolContext::new(
            authshot_core::Config::default(),
            authshot_core::Paths::with_base(std::env::temp_dir().join("authshot-reg-test")),
        );
        // Malformed URL is rejected without any browser being launched.
        let err = reg
            .execute("screenshot-page", ctx, json!({"url": "not-a-url"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
