//! MCP server over stdio: newline-delimited JSON-RPC 2.0.
//!
//! Handles `initialize`, `tools/list` and `tools/call`; tool failures
//! become `isError` results rather than protocol errors, so a handler
//! can never crash the process. End-of-input or Ctrl-C triggers
//! best-effort teardown of the shared browser session.

use authshot_core::{Config, Paths};
use authshot_tools::{ToolContext, ToolRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    /// Absent for notifications, which get no response.
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

impl JsonRpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i64, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(json!({"code": code, "message": message})),
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let ctx = ToolContext::new(config, paths);
    let registry = ToolRegistry::with_defaults();

    info!("authshot MCP server listening on stdio");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        if let Some(response) = handle_line(&registry, &ctx, &line).await {
                            let payload = serde_json::to_string(&response)?;
                            stdout.write_all(payload.as_bytes()).await?;
                            stdout.write_all(b"\n").await?;
                            stdout.flush().await?;
                        }
                    }
                    None => {
                        info!("stdin closed, shutting down");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    ctx.shutdown().await;
    Ok(())
}

async fn handle_line(
    registry: &ToolRegistry,
    ctx: &ToolContext,
    line: &str,
) -> Option<JsonRpcResponse> {
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            warn!("Discarding unparseable request: {}", e);
            return Some(JsonRpcResponse::err(
                Value::Null,
                -32700,
                format!("parse error: {}", e),
            ));
        }
    };

    debug!(method = %request.method, "MCP ← request");
    let id = request.id.clone()?; // notifications get no response

    Some(match request.method.as_str() {
        "initialize" => JsonRpcResponse::ok(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": "authshot",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ),
        "ping" => JsonRpcResponse::ok(id, json!({})),
        "tools/list" => JsonRpcResponse::ok(id, json!({"tools": registry.tool_descriptors()})),
        "tools/call" => {
            let name = request.params["name"].as_str().unwrap_or_default().to_string();
            let arguments = request.params.get("arguments").cloned().unwrap_or(json!({}));
            let result = registry.execute(&name, ctx.clone(), arguments).await;
            JsonRpcResponse::ok(id, call_result_to_mcp(result))
        }
        other => JsonRpcResponse::err(id, -32601, format!("method not found: {}", other)),
    })
}

/// Map a tool result onto MCP content blocks. Errors become isError
/// results; an "image" payload becomes an image content block.
fn call_result_to_mcp(result: authshot_core::Result<Value>) -> Value {
    match result {
        Ok(value) => {
            let mut content = Vec::new();
            if let Some(text) = value.get("text").and_then(|v| v.as_str()) {
                content.push(json!({"type": "text", "text": text}));
            }
            if let Some(image) = value.get("image") {
                content.push(json!({
                    "type": "image",
                    "data": image["data"],
                    "mimeType": image["mimeType"],
                }));
            }
            if content.is_empty() {
                content.push(json!({"type": "text", "text": value.to_string()}));
            }
            json!({"content": content, "isError": false})
        }
        Err(e) => json!({
            "content": [{"type": "text", "text": e.to_string()}],
            "isError": true,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authshot_core::Error;

    fn test_ctx() -> ToolContext {
        ToolContext::new(
            Config::default(),
            Paths::with_base(std::env::temp_dir().join("authshot-server-test")),
        )
    }

    #[tokio::test]
    async fn test_initialize_handshake() {
        let registry = ToolRegistry::with_defaults();
        let ctx = test_ctx();
        let response = handle_line(
            &registry,
            &ctx,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
        )
        .await
        .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "authshot");
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let registry = ToolRegistry::with_defaults();
        let ctx = test_ctx();
        let response = handle_line(
            &registry,
            &ctx,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_tools_list_shape() {
        let registry = ToolRegistry::with_defaults();
        let ctx = test_ctx();
        let response = handle_line(
            &registry,
            &ctx,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        )
        .await
        .unwrap();
        let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 5);
        assert!(tools.iter().any(|t| t["name"] == "login-and-wait"));
    }

    #[tokio::test]
    async fn test_unknown_method_is_rpc_error() {
        let registry = ToolRegistry::with_defaults();
        let ctx = test_ctx();
        let response = handle_line(
            &registry,
            &ctx,
            r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#,
        )
        .await
        .unwrap();
        assert_eq!(response.error.unwrap()["code"], -32601);
    }

    #[tokio::test]
    async fn test_tool_failure_is_is_error_result() {
        let registry = ToolRegistry::with_defaults();
        let ctx = test_ctx();
        let response = handle_line(
            &registry,
            &ctx,
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"screenshot-page","arguments":{"url":"not-a-url"}}}"#,
        )
        .await
        .unwrap();
        // Validation failure comes back as a tool result, not an RPC error.
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"].as_str().unwrap().contains("invalid url"));
    }

    #[test]
    fn test_image_result_maps_to_content_block() {
        let value = json!({
            "text": "done",
            "image": {"data": "aGk=", "mimeType": "image/png"},
        });
        let mapped = call_result_to_mcp(Ok(value));
        assert_eq!(mapped["isError"], false);
        assert_eq!(mapped["content"][0]["type"], "text");
        assert_eq!(mapped["content"][1]["type"], "image");
        assert_eq!(mapped["content"][1]["mimeType"], "image/png");
    }

    #[test]
    fn test_not_found_error_carries_selector() {
        let mapped = call_result_to_mcp(Err(Error::NotFound(
            "no element matched selector '#missing'".into(),
        )));
        assert_eq!(mapped["isError"], true);
        assert!(mapped["content"][0]["text"].as_str().unwrap().contains("#missing"));
    }
}
