//! Remote tool server client.
//!
//! Speaks MCP's streamable HTTP transport: every JSON-RPC message is a POST
//! and the server answers with a JSON body, an SSE stream carrying the
//! reply, or `202 Accepted` for notifications. Each registry fetch opens
//! its own session (`initialize`, then `notifications/initialized`) and the
//! tools it hands out keep using that session. Nothing is cached across
//! requests.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use salesdesk_core::error::ToolError;
use salesdesk_core::tool::{Tool, ToolProvider, ToolRegistry, ToolResult};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on catalog pages, in case a server keeps returning cursors.
const MAX_PAGES: usize = 32;

/// Version offered in `initialize`; the server's answer wins.
const PROTOCOL_VERSION: &str = "2025-06-18";

const SESSION_HEADER: &str = "Mcp-Session-Id";
const VERSION_HEADER: &str = "MCP-Protocol-Version";

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    protocol_version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListToolsResult {
    tools: Vec<RemoteToolSpec>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteToolSpec {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "empty_schema")]
    input_schema: serde_json::Value,
}

fn empty_schema() -> serde_json::Value {
    json!({"type": "object", "properties": {}})
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolResult {
    #[serde(default)]
    content: Vec<ContentItem>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    structured_content: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentItem {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

/// One initialized session with the tool server, shared by the registry
/// fetch that opened it and the tools it returned.
struct McpSession {
    http: reqwest::Client,
    url: String,
    session_id: Option<String>,
    protocol_version: String,
    next_id: AtomicU64,
}

impl McpSession {
    /// Run the `initialize` handshake and capture the session id, if the
    /// server assigns one.
    async fn open(http: reqwest::Client, url: String) -> Result<Self, String> {
        let mut session = Self {
            http,
            url,
            session_id: None,
            protocol_version: PROTOCOL_VERSION.to_string(),
            next_id: AtomicU64::new(1),
        };

        let id = session.next_id();
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "salesdesk", "version": env!("CARGO_PKG_VERSION")},
        });
        let response = session
            .post("initialize", &request_body(id, "initialize", params))
            .await?;
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let init: InitializeResult = read_result("initialize", id, response).await?;

        session.session_id = session_id;
        session.protocol_version = init.protocol_version;
        session.notify("notifications/initialized").await?;
        debug!(
            url = %session.url,
            session = session.session_id.as_deref().unwrap_or("-"),
            version = %session.protocol_version,
            "Tool server session opened"
        );
        Ok(session)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, String> {
        let id = self.next_id();
        let response = self.post(method, &request_body(id, method, params)).await?;
        read_result(method, id, response).await
    }

    /// Notifications expect no reply; `202` and `200` are both fine.
    async fn notify(&self, method: &str) -> Result<(), String> {
        self.post(method, &json!({"jsonrpc": "2.0", "method": method}))
            .await
            .map(drop)
    }

    async fn post(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, String> {
        let mut request = self
            .http
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .header(VERSION_HEADER, &self.protocol_version)
            .json(body);
        if let Some(id) = &self.session_id {
            request = request.header(SESSION_HEADER, id);
        }

        let response = request.send().await.map_err(|e| format!("{method}: {e}"))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND && self.session_id.is_some() {
            return Err(format!("{method}: tool server session expired"));
        }
        if !status.is_success() {
            return Err(format!("{method}: HTTP {}", status.as_u16()));
        }
        Ok(response)
    }
}

fn request_body(id: u64, method: &str, params: serde_json::Value) -> serde_json::Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
}

/// Decode the reply to request `id` from either a JSON or an SSE body.
async fn read_result<T: DeserializeOwned>(
    method: &str,
    id: u64,
    response: reqwest::Response,
) -> Result<T, String> {
    if response.status() == StatusCode::ACCEPTED {
        return Err(format!("{method}: server accepted the request without a reply"));
    }
    let is_event_stream = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("text/event-stream"));

    let message = if is_event_stream {
        read_event_stream(response, id)
            .await
            .map_err(|e| format!("{method}: {e}"))?
    } else {
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| format!("{method}: invalid response: {e}"))?
    };

    let rpc: RpcResponse<T> = serde_json::from_value(message)
        .map_err(|e| format!("{method}: invalid response: {e}"))?;
    match (rpc.result, rpc.error) {
        (_, Some(err)) => Err(format!("{method}: {} (code {})", err.message, err.code)),
        (Some(result), None) => Ok(result),
        (None, None) => Err(format!("{method}: empty response")),
    }
}

/// Read SSE events until the JSON-RPC message answering `id` shows up.
/// Server notifications and pings on the same stream are skipped.
async fn read_event_stream(response: reqwest::Response, id: u64) -> Result<serde_json::Value, String> {
    let mut body = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| format!("event stream: {e}"))?;
        buffer.extend(chunk.iter().filter(|&&b| b != b'\r'));

        while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
            let event = String::from_utf8_lossy(&buffer[..pos]).into_owned();
            buffer.drain(..pos + 2);
            if let Some(message) = reply_in_event(&event, id) {
                return Ok(message);
            }
        }
    }

    reply_in_event(&String::from_utf8_lossy(&buffer), id)
        .ok_or_else(|| "event stream ended without a reply".to_string())
}

fn reply_in_event(event: &str, id: u64) -> Option<serde_json::Value> {
    let mut data = Vec::new();
    let mut kind = None;
    for line in event.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data.push(value.trim());
        } else if let Some(value) = line.strip_prefix("event:") {
            kind = Some(value.trim());
        }
    }
    if data.is_empty() || kind.is_some_and(|k| !k.eq_ignore_ascii_case("message")) {
        return None;
    }

    let message: serde_json::Value = serde_json::from_str(&data.join("\n")).ok()?;
    (message.get("id").and_then(serde_json::Value::as_u64) == Some(id)).then_some(message)
}

/// Builds each exchange's registry from a remote tool server.
pub struct RemoteToolProvider {
    http: reqwest::Client,
    url: String,
}

impl RemoteToolProvider {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ToolError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::RegistryUnavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ToolProvider for RemoteToolProvider {
    async fn registry(&self) -> Result<ToolRegistry, ToolError> {
        let unavailable = |e: String| {
            warn!(url = %self.url, error = %e, "Tool registry fetch failed");
            ToolError::RegistryUnavailable(e)
        };
        let session = Arc::new(
            McpSession::open(self.http.clone(), self.url.clone())
                .await
                .map_err(unavailable)?,
        );

        let mut registry = ToolRegistry::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let params = match &cursor {
                Some(c) => json!({"cursor": c}),
                None => json!({}),
            };
            let page: ListToolsResult = session
                .call("tools/list", params)
                .await
                .map_err(unavailable)?;

            for spec in page.tools {
                registry.register(Box::new(RemoteTool {
                    session: Arc::clone(&session),
                    description: spec.description.clone().unwrap_or_default(),
                    spec,
                }));
            }

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(url = %self.url, tools = registry.len(), "Fetched tool registry");
        Ok(registry)
    }
}

struct RemoteTool {
    session: Arc<McpSession>,
    spec: RemoteToolSpec,
    description: String,
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.spec.input_schema.clone()
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let result: CallToolResult = self
            .session
            .call(
                "tools/call",
                json!({"name": self.spec.name, "arguments": arguments}),
            )
            .await
            .map_err(|reason| ToolError::ExecutionFailed {
                tool_name: self.spec.name.clone(),
                reason,
            })?;

        let text: Vec<String> = result
            .content
            .into_iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } => Some(text),
                ContentItem::Other => None,
            })
            .collect();

        let output = if text.is_empty() {
            result
                .structured_content
                .map(|v| v.to_string())
                .unwrap_or_default()
        } else {
            text.join("\n")
        };

        Ok(ToolResult {
            call_id: String::new(),
            success: !result.is_error,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, header};
    use axum::response::{IntoResponse, Response};
    use axum::{Json, Router, routing::post};
    use salesdesk_core::tool::ToolCall;
    use std::sync::Mutex;

    /// Methods seen by the fake server, with the session header they carried.
    type Seen = Arc<Mutex<Vec<(String, Option<String>)>>>;

    fn reply(id: &serde_json::Value, result: serde_json::Value) -> serde_json::Value {
        json!({"jsonrpc": "2.0", "id": id, "result": result})
    }

    /// A streamable HTTP server: JSON for `initialize` and `tools/call`,
    /// SSE for `tools/list`, 202 for notifications. Requests after the
    /// handshake must carry the session it handed out.
    async fn rpc(
        State(seen): State<Seen>,
        headers: HeaderMap,
        Json(req): Json<serde_json::Value>,
    ) -> Response {
        let method = req["method"].as_str().unwrap_or_default().to_string();
        let session = headers
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        seen.lock().unwrap().push((method.clone(), session.clone()));
        let id = req["id"].clone();

        if method == "initialize" {
            let body = reply(
                &id,
                json!({"protocolVersion": "2025-03-26", "capabilities": {"tools": {}}, "serverInfo": {"name": "sales-tools"}}),
            );
            return ([("mcp-session-id", "sess-1")], Json(body)).into_response();
        }
        if session.as_deref() != Some("sess-1") {
            return axum::http::StatusCode::NOT_FOUND.into_response();
        }
        if id.is_null() {
            return axum::http::StatusCode::ACCEPTED.into_response();
        }

        match method.as_str() {
            "tools/list" => {
                let result = if req["params"]["cursor"].is_null() {
                    json!({
                        "tools": [{
                            "name": "get_order_by_id",
                            "description": "Get an order by id",
                            "inputSchema": {"type": "object", "properties": {"order_id": {"type": "integer"}}}
                        }],
                        "nextCursor": "page-2"
                    })
                } else {
                    json!({"tools": [{"name": "get_accounts"}]})
                };
                let log = json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {"level": "info"}});
                let body = format!(
                    ": keepalive\r\n\r\nevent: ping\r\ndata: {{}}\r\n\r\nevent: message\r\ndata: {log}\r\n\r\nevent: message\r\ndata: {}\r\n\r\n",
                    reply(&id, result)
                );
                ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
            }
            "tools/call" if req["params"]["name"] == "get_order_by_id" => Json(reply(
                &id,
                json!({"content": [{"type": "text", "text": format!("order {}", req["params"]["arguments"]["order_id"])}]}),
            ))
            .into_response(),
            "tools/call" => Json(reply(
                &id,
                json!({"content": [{"type": "text", "text": "no such account"}], "isError": true}),
            ))
            .into_response(),
            _ => Json(json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "Method not found"}}))
                .into_response(),
        }
    }

    async fn serve() -> (String, Seen) {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route("/mcp", post(rpc))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/mcp"), seen)
    }

    async fn provider() -> (RemoteToolProvider, Seen) {
        let (url, seen) = serve().await;
        (RemoteToolProvider::new(url, Duration::from_secs(5)).unwrap(), seen)
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments,
        }
    }

    #[tokio::test]
    async fn registry_follows_pages_over_event_stream() {
        let (provider, _) = provider().await;
        let registry = provider.registry().await.unwrap();
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["get_accounts", "get_order_by_id"]);
    }

    #[tokio::test]
    async fn handshake_precedes_requests_and_session_is_reused() {
        let (provider, seen) = provider().await;
        let registry = provider.registry().await.unwrap();
        registry
            .execute(&call("get_order_by_id", json!({"order_id": 7})))
            .await
            .unwrap();

        let seen = seen.lock().unwrap().clone();
        let methods: Vec<&str> = seen.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(
            methods,
            vec![
                "initialize",
                "notifications/initialized",
                "tools/list",
                "tools/list",
                "tools/call"
            ]
        );
        assert_eq!(seen[0].1, None);
        assert!(seen[1..].iter().all(|(_, s)| s.as_deref() == Some("sess-1")));
    }

    #[tokio::test]
    async fn every_registry_fetch_opens_a_fresh_session() {
        let (provider, seen) = provider().await;
        provider.registry().await.unwrap();
        provider.registry().await.unwrap();

        let handshakes = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == "initialize")
            .count();
        assert_eq!(handshakes, 2);
    }

    #[tokio::test]
    async fn remote_tool_returns_text_content() {
        let (provider, _) = provider().await;
        let registry = provider.registry().await.unwrap();
        let result = registry
            .execute(&call("get_order_by_id", json!({"order_id": 100})))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "order 100");
    }

    #[tokio::test]
    async fn remote_tool_error_is_unsuccessful_result() {
        let (provider, _) = provider().await;
        let registry = provider.registry().await.unwrap();
        let result = registry
            .execute(&call("get_accounts", json!({})))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.output, "no such account");
    }

    #[tokio::test]
    async fn unreachable_server_is_registry_unavailable() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider =
            RemoteToolProvider::new(format!("http://{addr}/mcp"), Duration::from_secs(2)).unwrap();
        let err = provider.registry().await.err().unwrap();
        assert!(matches!(err, ToolError::RegistryUnavailable(_)));
    }

    #[test]
    fn event_with_other_id_is_not_the_reply() {
        let event = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":4,\"result\":{}}";
        assert!(reply_in_event(event, 3).is_none());
        assert_eq!(reply_in_event(event, 4).unwrap()["id"], 4);
    }
}
