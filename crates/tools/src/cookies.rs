//! `clear-auth-cookies`: drop stored cookie records, one site or all.

use async_trait::async_trait;
use authshot_core::Result;
use serde_json::{json, Value};

use crate::browser::cookies::{ClearOutcome, CookieStore};
use crate::{require_url, Tool, ToolContext, ToolSchema};

pub struct ClearAuthCookiesTool;

#[async_trait]
impl Tool for ClearAuthCookiesTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "clear-auth-cookies",
            description: "Delete saved authentication cookies. With a url, clears the record for that site only; without, clears every stored record.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "Site whose cookies should be cleared; omit to clear all sites"
                    }
                },
                "required": []
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        if params.get("url").and_then(|v| v.as_str()).is_some() {
            require_url(params)?;
        }
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        match params.get("url").and_then(|v| v.as_str()) {
            Some(url) => {
                let identity = CookieStore::identity_of(url);
                let text = match ctx.cookies.clear(url)? {
                    ClearOutcome::Deleted => {
                        format!("Cleared saved cookies for {}", identity)
                    }
                    ClearOutcome::NotFound => {
                        format!("No saved cookies found for {}", identity)
                    }
                };
                Ok(json!({"text": text}))
            }
            None => {
                let count = ctx.cookies.clear_all()?;
                Ok(json!({"text": format!("Cleared {} saved cookie record(s)", count)}))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_missing_url() {
        let tool = ClearAuthCookiesTool;
        assert!(tool.validate(&json!({})).is_ok());
    }

    #[test]
    fn test_validate_rejects_malformed_url() {
        let tool = ClearAuthCookiesTool;
        assert!(tool.validate(&json!({"url": "::: nope"})).is_err());
        assert!(tool.validate(&json!({"url": "https://example.com"})).is_ok());
    }
}
