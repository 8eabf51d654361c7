//! Low-level Chrome DevTools Protocol (CDP) client over WebSocket.
//!
//! Talks to a Chromium-family instance via its debugging WebSocket
//! endpoint. Supports sending commands, receiving responses, and
//! subscribing to events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use authshot_core::{Error, Result};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

const COMMAND_TIMEOUT_SECS: u64 = 30;

/// A CDP WebSocket client bound to one target (browser or page).
pub struct CdpClient {
    /// Sender to write messages to the WebSocket.
    ws_tx: mpsc::Sender<String>,
    /// Pending command responses, keyed by request ID.
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    /// Auto-incrementing command ID.
    next_id: AtomicU64,
    /// Event listeners (domain.event -> channels).
    event_listeners: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>>,
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a CDP WebSocket endpoint.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url).await.map_err(|e| {
            Error::Browser(format!("failed to connect to CDP endpoint {}: {}", ws_url, e))
        })?;

        let (mut ws_sink, mut ws_read) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        let event_listeners: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let events_clone = event_listeners.clone();

        // Writer task: owns the sink, forwards messages from the channel.
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        // Reader task: dispatches responses to waiting callers and events
        // to subscribers.
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        let Ok(val) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                            let mut pending = pending_clone.lock().await;
                            if let Some(tx) = pending.remove(&id) {
                                let _ = tx.send(val);
                            }
                        } else if let Some(method) = val.get("method").and_then(|v| v.as_str()) {
                            let params = val.get("params").cloned().unwrap_or(Value::Null);
                            let mut listeners = events_clone.lock().await;
                            dispatch_event(&mut listeners, method, &params);
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            event_listeners,
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// Send a CDP command and wait for the response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let msg = json!({ "id": id, "method": method, "params": params });

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| Error::Browser(format!("failed to send CDP command: {}", e)))?;

        let timeout = std::time::Duration::from_secs(COMMAND_TIMEOUT_SECS);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(err) = response.get("error") {
                    Err(Error::Browser(format!("CDP error from '{}': {}", method, err)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(Error::Browser("CDP response channel closed".into())),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                Err(Error::Timeout(format!(
                    "CDP command '{}' timed out after {}s",
                    method, COMMAND_TIMEOUT_SECS
                )))
            }
        }
    }

    /// Subscribe to a CDP event. Returns a receiver of event params.
    pub async fn subscribe_event(&self, method: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(64);
        let mut listeners = self.event_listeners.lock().await;
        listeners.entry(method.to_string()).or_default().push(tx);
        rx
    }

    /// Enable a CDP domain (e.g. "Page", "Runtime", "Network", "DOM").
    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.send_command(&format!("{}.enable", domain), json!({})).await?;
        Ok(())
    }

    /// Start a navigation. Completion is observed via Page events.
    pub async fn navigate(&self, url: &str) -> Result<Value> {
        self.send_command("Page.navigate", json!({"url": url})).await
    }

    /// Evaluate JavaScript in the page, returning the value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            return Err(Error::Browser(format!("page script threw: {}", details)));
        }
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Current document URL.
    pub async fn current_url(&self) -> Result<String> {
        let value = self.evaluate("window.location.href").await?;
        value
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Browser("location.href was not a string".into()))
    }

    /// Capture a screenshot, optionally clipped, returning base64 data.
    pub async fn capture_screenshot(
        &self,
        format: &str,
        quality: Option<u32>,
        full_page: bool,
        clip: Option<Value>,
    ) -> Result<String> {
        let mut params = json!({"format": format});
        if let Some(q) = quality {
            params["quality"] = json!(q);
        }
        if full_page {
            params["captureBeyondViewport"] = json!(true);
        }
        if let Some(clip) = clip {
            params["clip"] = clip;
        }
        let result = self.send_command("Page.captureScreenshot", params).await?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Browser("no screenshot data returned".into()))
    }

    /// All cookies visible to this target, as returned by the engine.
    pub async fn get_cookies(&self) -> Result<Vec<Value>> {
        let result = self.send_command("Network.getCookies", json!({})).await?;
        Ok(result
            .get("cookies")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    /// Install a cookie list, reduced to the fields `Network.setCookies`
    /// accepts as parameters.
    pub async fn set_cookies(&self, cookies: &[Value]) -> Result<()> {
        let params: Vec<Value> = cookies.iter().map(cookie_param).collect();
        self.send_command("Network.setCookies", json!({"cookies": params}))
            .await?;
        Ok(())
    }

    /// Set viewport/device metrics.
    pub async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        self.send_command(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1,
                "mobile": false,
            }),
        )
        .await?;
        Ok(())
    }

    /// Override the user agent string for this target.
    pub async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.send_command(
            "Network.setUserAgentOverride",
            json!({"userAgent": user_agent}),
        )
        .await?;
        Ok(())
    }

    /// Register a script evaluated in every new document before page
    /// scripts run (automation-hardening overrides).
    pub async fn add_init_script(&self, source: &str) -> Result<()> {
        self.send_command(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({"source": source}),
        )
        .await?;
        Ok(())
    }

    // ─── Target management (browser-level connection) ─────────────────

    /// Create a new page target (tab) with the given URL.
    pub async fn create_target(&self, url: &str) -> Result<String> {
        let result = self
            .send_command("Target.createTarget", json!({"url": url}))
            .await?;
        result
            .get("targetId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Browser("no targetId returned from createTarget".into()))
    }

    /// Close a target by its targetId.
    pub async fn close_target(&self, target_id: &str) -> Result<()> {
        self.send_command("Target.closeTarget", json!({"targetId": target_id}))
            .await?;
        Ok(())
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self._reader_handle.abort();
        self._writer_handle.abort();
    }
}

/// Fan an event out to its subscribers, evicting any whose receiver has
/// been dropped so the listener list stays bounded on a long-lived
/// connection.
fn dispatch_event(
    listeners: &mut HashMap<String, Vec<mpsc::Sender<Value>>>,
    method: &str,
    params: &Value,
) {
    if let Some(senders) = listeners.get_mut(method) {
        senders.retain(|tx| {
            !matches!(
                tx.try_send(params.clone()),
                Err(mpsc::error::TrySendError::Closed(_))
            )
        });
        if senders.is_empty() {
            listeners.remove(method);
        }
    }
}

/// Fields of `Network.getCookies` output that `Network.setCookies`
/// accepts; the rest (`size`, `session`, ...) are response-only.
const COOKIE_PARAM_FIELDS: &[&str] = &[
    "name",
    "value",
    "domain",
    "path",
    "secure",
    "httpOnly",
    "sameSite",
    "expires",
    "priority",
    "sameParty",
    "sourceScheme",
    "sourcePort",
];

fn cookie_param(cookie: &Value) -> Value {
    let mut param = serde_json::Map::new();
    if let Some(obj) = cookie.as_object() {
        for &field in COOKIE_PARAM_FIELDS {
            if let Some(v) = obj.get(field) {
                param.insert(field.to_string(), v.clone());
            }
        }
    }
    Value::Object(param)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_evicts_dropped_subscribers() {
        let mut listeners: HashMap<String, Vec<mpsc::Sender<Value>>> = HashMap::new();
        let (live_tx, mut live_rx) = mpsc::channel(4);
        let (dead_tx, dead_rx) = mpsc::channel::<Value>(4);
        listeners.insert("Page.frameNavigated".into(), vec![dead_tx, live_tx]);
        drop(dead_rx);

        dispatch_event(&mut listeners, "Page.frameNavigated", &json!({"seq": 1}));
        assert_eq!(listeners["Page.frameNavigated"].len(), 1);
        assert_eq!(live_rx.recv().await, Some(json!({"seq": 1})));

        drop(live_rx);
        dispatch_event(&mut listeners, "Page.frameNavigated", &json!({"seq": 2}));
        assert!(!listeners.contains_key("Page.frameNavigated"));
    }

    #[tokio::test]
    async fn test_dispatch_keeps_full_but_open_subscribers() {
        let mut listeners: HashMap<String, Vec<mpsc::Sender<Value>>> = HashMap::new();
        let (tx, mut rx) = mpsc::channel::<Value>(1);
        listeners.insert("Page.loadEventFired".into(), vec![tx]);

        dispatch_event(&mut listeners, "Page.loadEventFired", &json!({"seq": 1}));
        // Second event is dropped (channel full) but the subscriber stays.
        dispatch_event(&mut listeners, "Page.loadEventFired", &json!({"seq": 2}));
        assert_eq!(listeners["Page.loadEventFired"].len(), 1);
        assert_eq!(rx.recv().await, Some(json!({"seq": 1})));
    }

    #[test]
    fn test_cookie_param_keeps_only_settable_fields() {
        let cookie = json!({
            "name": "sid",
            "value": "abc",
            "domain": ".example.com",
            "path": "/",
            "secure": true,
            "httpOnly": true,
            "sameSite": "Lax",
            "expires": 1999999999.0,
            "size": 7,
            "session": false,
        });
        let param = cookie_param(&cookie);
        assert_eq!(param["name"], "sid");
        assert_eq!(param["domain"], ".example.com");
        assert_eq!(param["sameSite"], "Lax");
        assert!(param.get("size").is_none());
        assert!(param.get("session").is_none());
    }
}
