// MCP server implementation

use crate::error::{AgentToolsError, McpError, Result, TransportError};
use crate::tools::ToolRegistry;
use crate::transport::FramedTransport;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;

pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-06-18", "2025-11-25"];
const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const SERVER_ERROR: i64 = -32000;

/// MCP server state
pub struct McpServer {
    /// Tool registry
    tool_registry: ToolRegistry,
    /// Initialized flag
    initialized: RwLock<bool>,
}

impl McpServer {
    /// Create a new MCP server around a tool registry
    pub fn new(tool_registry: ToolRegistry) -> Self {
        Self {
            tool_registry,
            initialized: RwLock::new(false),
        }
    }

    /// Handle initialize request
    pub async fn handle_initialize(
        &self,
        protocol_version: &str,
        _client_capabilities: &Value,
    ) -> Result<Value> {
        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&protocol_version) {
            return Err(McpError::InvalidProtocolVersion(protocol_version.to_string()).into());
        }

        Ok(json!({
            "protocolVersion": protocol_version,
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {
                "tools": {
                    "listChanged": false,
                },
            },
            "tools": self.tool_registry.list_tools(),
        }))
    }

    /// Handle initialized notification
    pub async fn handle_initialized(&self) {
        *self.initialized.write().await = true;
        tracing::info!("session initialized");
    }

    /// Handle tool call, wrapping the tool result as MCP text content
    pub async fn handle_tool_call(&self, tool_name: &str, arguments: &Value) -> Result<Value> {
        let result = self.tool_registry.execute_tool(tool_name, arguments).await?;
        let text = serde_json::to_string_pretty(&result)?;
        Ok(json!({
            "content": [{ "type": "text", "text": text }],
            "isError": !result.success,
        }))
    }

    /// Handle shutdown request
    pub async fn handle_shutdown(&self) {
        *self.initialized.write().await = false;
        tracing::info!("session shut down");
    }

    /// List tools in MCP schema format
    pub fn list_tools(&self) -> Value {
        self.tool_registry.list_tools()
    }

    /// Check if server is initialized
    pub async fn is_initialized(&self) -> bool {
        *self.initialized.read().await
    }

    /// Parse and handle one raw inbound message
    pub async fn handle_raw_message(&self, raw: &str) -> Option<Value> {
        match serde_json::from_str::<Value>(raw) {
            Ok(message) => self.handle_jsonrpc_message(message).await,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable JSON-RPC message");
                Some(jsonrpc_error_response(None, PARSE_ERROR, "Parse error"))
            }
        }
    }

    /// Handle one JSON-RPC message; notifications yield `None`
    pub async fn handle_jsonrpc_message(&self, message: Value) -> Option<Value> {
        let id = message.get("id").cloned();
        let is_notification = id.is_none();

        let result = self.dispatch(&message).await;
        if is_notification {
            if let Err((code, error)) = &result {
                tracing::debug!(code, error = %error, "dropping error for notification");
            }
            return None;
        }

        Some(match result {
            Ok(value) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": value,
            }),
            Err((code, error)) => jsonrpc_error_response(id, code, &error),
        })
    }

    async fn dispatch(&self, message: &Value) -> std::result::Result<Value, (i64, String)> {
        if let Some(version) = message.get("jsonrpc").and_then(|v| v.as_str()) {
            if version != "2.0" {
                let error = McpError::InvalidJsonRpc(format!("unsupported version {}", version));
                return Err((INVALID_REQUEST, error.to_string()));
            }
        }

        let method = message.get("method").and_then(|m| m.as_str());
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        match method {
            Some("initialize") => {
                let protocol_version = params
                    .get("protocolVersion")
                    .and_then(|v| v.as_str())
                    .unwrap_or(DEFAULT_PROTOCOL_VERSION);
                let client_capabilities = params.get("capabilities").unwrap_or(&Value::Null);
                self.handle_initialize(protocol_version, client_capabilities)
                    .await
                    .map_err(to_rpc_error)
            }
            Some("initialized") | Some("notifications/initialized") => {
                self.handle_initialized().await;
                Ok(Value::Null)
            }
            Some("tools/list") => {
                self.require_initialized().await?;
                Ok(json!({ "tools": self.list_tools() }))
            }
            Some("tools/call") => {
                self.require_initialized().await?;
                let Some(name) = params.get("name").and_then(|n| n.as_str()) else {
                    return Err((INVALID_PARAMS, "Invalid params: Missing tool name".to_string()));
                };
                let arguments = params.get("arguments").unwrap_or(&Value::Null);
                self.handle_tool_call(name, arguments)
                    .await
                    .map_err(to_rpc_error)
            }
            Some("shutdown") => {
                self.require_initialized().await?;
                self.handle_shutdown().await;
                Ok(Value::Null)
            }
            other => Err((
                METHOD_NOT_FOUND,
                format!("Method not found: {:?}", other.unwrap_or("(missing)")),
            )),
        }
    }

    async fn require_initialized(&self) -> std::result::Result<(), (i64, String)> {
        if self.is_initialized().await {
            Ok(())
        } else {
            Err((SERVER_ERROR, McpError::NotInitialized.to_string()))
        }
    }
}

fn to_rpc_error(error: AgentToolsError) -> (i64, String) {
    if !error.is_protocol_error() {
        tracing::error!(error = %error, "request failed");
    }
    match error {
        AgentToolsError::Mcp(e @ McpError::ToolNotFound(_)) => (INVALID_PARAMS, e.to_string()),
        AgentToolsError::Mcp(e) => (SERVER_ERROR, e.to_string()),
        other => (SERVER_ERROR, other.to_string()),
    }
}

fn jsonrpc_error_response(id: Option<Value>, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message,
        },
    })
}

/// Serve requests from `transport` one at a time until the peer closes it.
pub async fn run_server<R, W>(server: &McpServer, transport: &mut FramedTransport<R, W>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let raw = match transport.read_message().await {
            Ok(raw) => raw,
            Err(AgentToolsError::Transport(TransportError::ConnectionClosed)) => {
                tracing::info!("client closed the connection");
                return Ok(());
            }
            Err(AgentToolsError::Transport(TransportError::InvalidMessage(e))) => {
                tracing::warn!(error = %e, "discarding malformed frame");
                let reply = jsonrpc_error_response(None, PARSE_ERROR, "Parse error");
                transport.write_message(&reply.to_string()).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        let Some(response) = server.handle_raw_message(&raw).await else {
            continue;
        };
        let response = serde_json::to_string(&response)?;
        transport.write_message(&response).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    fn server(dir: &TempDir) -> McpServer {
        let registry = ToolRegistry::new(&Config::for_root(dir.path())).unwrap();
        McpServer::new(registry)
    }

    async fn initialized(dir: &TempDir) -> McpServer {
        let server = server(dir);
        server.handle_initialized().await;
        server
    }

    #[tokio::test]
    async fn test_initialize_rejects_unknown_version() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);
        assert!(server.handle_initialize("1999-01-01", &Value::Null).await.is_err());
        let caps = server.handle_initialize("2025-06-18", &Value::Null).await.unwrap();
        assert_eq!(caps["protocolVersion"], "2025-06-18");
        assert_eq!(caps["serverInfo"]["name"], "emergent-mcp");
    }

    #[tokio::test]
    async fn test_tools_require_initialization() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);
        let resp = server
            .handle_jsonrpc_message(json!({"jsonrpc":"2.0","id":1,"method":"tools/list"}))
            .await
            .unwrap();
        assert_eq!(resp["error"]["code"], SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_error_codes() {
        let dir = TempDir::new().unwrap();
        let server = initialized(&dir).await;

        let resp = server.handle_raw_message("{nope").await.unwrap();
        assert_eq!(resp["error"]["code"], PARSE_ERROR);
        assert!(resp["id"].is_null());

        let resp = server
            .handle_jsonrpc_message(json!({"jsonrpc":"1.0","id":2,"method":"tools/list"}))
            .await
            .unwrap();
        assert_eq!(resp["error"]["code"], INVALID_REQUEST);

        let resp = server
            .handle_jsonrpc_message(json!({"jsonrpc":"2.0","id":3,"method":"resources/list"}))
            .await
            .unwrap();
        assert_eq!(resp["error"]["code"], METHOD_NOT_FOUND);

        let resp = server
            .handle_jsonrpc_message(json!({"jsonrpc":"2.0","id":4,"method":"tools/call","params":{}}))
            .await
            .unwrap();
        assert_eq!(resp["error"]["code"], INVALID_PARAMS);

        let resp = server
            .handle_jsonrpc_message(json!({
                "jsonrpc":"2.0","id":5,"method":"tools/call",
                "params":{"name":"format_disk","arguments":{}}
            }))
            .await
            .unwrap();
        assert_eq!(resp["error"]["code"], INVALID_PARAMS);
        assert!(resp["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Tool not found: format_disk"));
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);
        assert!(server
            .handle_jsonrpc_message(json!({"jsonrpc":"2.0","method":"notifications/initialized"}))
            .await
            .is_none());
        assert!(server.is_initialized().await);
        assert!(server
            .handle_jsonrpc_message(json!({"jsonrpc":"2.0","method":"no/such"}))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_tool_call_wraps_result_as_text() {
        let dir = TempDir::new().unwrap();
        let server = initialized(&dir).await;

        let resp = server
            .handle_jsonrpc_message(json!({
                "jsonrpc":"2.0","id":7,"method":"tools/call",
                "params":{"name":"write_code","arguments":{"filePath":"a.txt","content":"hi"}}
            }))
            .await
            .unwrap();
        let result = &resp["result"];
        assert_eq!(result["isError"], false);
        let text = result["content"][0]["text"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["success"], true);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "hi");

        let resp = server
            .handle_jsonrpc_message(json!({
                "jsonrpc":"2.0","id":8,"method":"tools/call",
                "params":{"name":"write_code","arguments":{"filePath":"/etc/passwd","content":"x"}}
            }))
            .await
            .unwrap();
        assert_eq!(resp["result"]["isError"], true);
    }

    #[tokio::test]
    async fn test_run_server_processes_until_eof() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir);
        let (client, remote) = tokio::io::duplex(64 * 1024);
        let (remote_read, remote_write) = tokio::io::split(remote);
        let (client_read, client_write) = tokio::io::split(client);
        let mut client = FramedTransport::new(client_read, client_write);

        let serve = async {
            let mut transport = FramedTransport::new(remote_read, remote_write);
            run_server(&server, &mut transport).await
        };
        let drive = async {
            client
                .write_message(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
                .await
                .unwrap();
            let reply: Value = serde_json::from_str(&client.read_message().await.unwrap()).unwrap();
            assert_eq!(reply["id"], 1);
            assert_eq!(reply["result"]["protocolVersion"], DEFAULT_PROTOCOL_VERSION);
            client.shutdown().await.unwrap();
        };

        let (served, ()) = tokio::join!(serve, drive);
        assert!(served.is_ok());
    }

    #[tokio::test]
    async fn test_run_server_survives_invalid_utf8_frame() {
        use tokio::io::AsyncWriteExt;

        let dir = TempDir::new().unwrap();
        let server = server(&dir);
        let (client, remote) = tokio::io::duplex(64 * 1024);
        let (remote_read, remote_write) = tokio::io::split(remote);
        let (client_read, mut client_write) = tokio::io::split(client);
        let mut replies = FramedTransport::new(client_read, tokio::io::sink());

        let serve = async {
            let mut transport = FramedTransport::new(remote_read, remote_write);
            run_server(&server, &mut transport).await
        };
        let drive = async {
            client_write
                .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"\xff\"}\n")
                .await
                .unwrap();
            let reply: Value = serde_json::from_str(&replies.read_message().await.unwrap()).unwrap();
            assert_eq!(reply["error"]["code"], PARSE_ERROR);

            client_write
                .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"initialize\"}\n")
                .await
                .unwrap();
            let reply: Value = serde_json::from_str(&replies.read_message().await.unwrap()).unwrap();
            assert_eq!(reply["id"], 2);
            assert!(reply.get("result").is_some());
            client_write.shutdown().await.unwrap();
        };

        let (served, ()) = tokio::join!(serve, drive);
        assert!(served.is_ok());
    }
}
