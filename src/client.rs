// Tool client: lazily connects to a tool server and calls tools by name

use crate::config::Config;
use crate::error::{AgentToolsError, Result, TransportError};
use crate::server::SUPPORTED_PROTOCOL_VERSIONS;
use crate::tools::ToolResult;
use crate::transport::{FramedTransport, Framing};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

const CLIENT_PROTOCOL_VERSION: &str = "2025-06-18";
const CHILD_EXIT_GRACE: Duration = Duration::from_secs(5);

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An open channel to a tool server, plus the child process when one was spawned
pub struct Connection {
    transport: FramedTransport<BoxedReader, BoxedWriter>,
    child: Option<Child>,
}

impl Connection {
    pub fn new(reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            transport: FramedTransport::with_framing(reader, writer, Framing::Newline),
            child: None,
        }
    }

    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    async fn notify(&mut self, method: &str, params: Value) -> Result<()> {
        let message = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        self.transport.write_message(&message.to_string()).await
    }

    async fn request(&mut self, id: u64, method: &str, params: Value) -> Result<Value> {
        let message = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        self.transport.write_message(&message.to_string()).await?;

        loop {
            let raw = self.transport.read_message().await?;
            let reply: Value = serde_json::from_str(&raw).map_err(|e| {
                TransportError::InvalidMessage(format!("unparseable reply: {}", e))
            })?;
            if reply.get("id").and_then(Value::as_u64) != Some(id) {
                tracing::debug!(reply = %raw, "skipping unrelated message");
                continue;
            }

            if let Some(error) = reply.get("error") {
                return Err(TransportError::Rpc {
                    code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }
                .into());
            }
            return Ok(reply.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    async fn close(mut self) {
        if let Err(e) = self.transport.shutdown().await {
            tracing::debug!(error = %e, "closing client transport");
        }
        let Some(mut child) = self.child.take() else {
            return;
        };
        match tokio::time::timeout(CHILD_EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "tool server exited"),
            Ok(Err(e)) => tracing::warn!(error = %e, "waiting for tool server"),
            Err(_) => {
                tracing::warn!("tool server did not exit, killing it");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "killing tool server");
                }
            }
        }
    }
}

/// Opens a fresh [`Connection`] to a tool server
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connection>;
}

/// Spawns `<program> serve` with the given configuration and talks over its pipes
pub struct ProcessConnector {
    program: PathBuf,
    config: Config,
}

impl ProcessConnector {
    pub fn new(program: impl Into<PathBuf>, config: Config) -> Self {
        Self {
            program: program.into(),
            config,
        }
    }

    /// Use `--server-command` when set, otherwise this executable
    pub fn from_config(config: &Config) -> Result<Self> {
        let program = match &config.server_command {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };
        Ok(Self::new(program, config.clone()))
    }
}

#[async_trait]
impl Connector for ProcessConnector {
    async fn connect(&self) -> Result<Connection> {
        let config = &self.config;
        let mut child = Command::new(&self.program)
            .arg("--project-root")
            .arg(&config.project_root)
            .arg("--backup-dir")
            .arg(&config.backup_dir)
            .arg("--max-file-size")
            .arg(config.max_file_size.to_string())
            .arg("--command-timeout")
            .arg(config.command_timeout.to_string())
            .arg("--test-timeout")
            .arg(config.test_timeout.to_string())
            .arg("--max-output-bytes")
            .arg(config.max_output_bytes.to_string())
            .arg("serve")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(TransportError::InvalidMessage("tool server pipes unavailable".into()).into());
        };
        tracing::debug!(program = %self.program.display(), pid = ?child.id(), "spawned tool server");

        Ok(Connection::new(Box::new(stdout), Box::new(stdin)).with_child(child))
    }
}

enum State {
    Disconnected,
    Connected(Connection),
}

/// Client half of the tool protocol.
///
/// Connects on first use. A channel failure drops it back to disconnected;
/// the next call connects again.
pub struct ToolClient<C> {
    connector: C,
    state: State,
    next_id: u64,
}

impl<C: Connector> ToolClient<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            state: State::Disconnected,
            next_id: 1,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected(_))
    }

    /// Tool catalogue advertised by the server
    pub async fn list_tools(&mut self) -> Result<Vec<Value>> {
        let result = self.request("tools/list", json!({})).await?;
        match result.get("tools") {
            Some(Value::Array(tools)) => Ok(tools.clone()),
            _ => Err(TransportError::InvalidMessage("tools/list reply has no tools".into()).into()),
        }
    }

    /// Invoke a tool; handler failures come back as `success: false`
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<ToolResult> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        let text = result
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::InvalidMessage("tools/call reply has no text content".into()))?;
        Ok(serde_json::from_str(text)?)
    }

    /// Shut the session down and close the channel
    pub async fn disconnect(&mut self) {
        let State::Connected(mut connection) = std::mem::replace(&mut self.state, State::Disconnected)
        else {
            return;
        };
        let id = self.take_id();
        if let Err(e) = connection.request(id, "shutdown", json!({})).await {
            tracing::debug!(error = %e, "shutdown request failed");
        }
        connection.close().await;
    }

    async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        self.ensure_connected().await?;
        let id = self.take_id();
        let State::Connected(connection) = &mut self.state else {
            return Err(TransportError::Disconnected.into());
        };

        let result = connection.request(id, method, params).await;
        if let Err(e) = &result {
            if is_channel_failure(e) {
                tracing::warn!(error = %e, method, "tool server channel failed");
                if let State::Connected(connection) =
                    std::mem::replace(&mut self.state, State::Disconnected)
                {
                    connection.close().await;
                }
            }
        }
        result
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let mut connection = self.connector.connect().await?;
        let id = self.take_id();
        let params = json!({
            "protocolVersion": CLIENT_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let handshake = async {
            let reply = connection.request(id, "initialize", params).await?;
            let version = reply.get("protocolVersion").and_then(Value::as_str).unwrap_or_default();
            if !SUPPORTED_PROTOCOL_VERSIONS.contains(&version) {
                return Err(TransportError::InvalidMessage(format!(
                    "server negotiated unsupported protocol version {:?}",
                    version
                ))
                .into());
            }
            connection.notify("notifications/initialized", json!({})).await
        };

        match handshake.await {
            Ok(()) => {
                tracing::debug!("connected to tool server");
                self.state = State::Connected(connection);
                Ok(())
            }
            Err(e) => {
                connection.close().await;
                Err(e)
            }
        }
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

fn is_channel_failure(error: &AgentToolsError) -> bool {
    matches!(
        error,
        AgentToolsError::Transport(
            TransportError::Io(_) | TransportError::ConnectionClosed | TransportError::InvalidMessage(_)
        )
    )
}
