// Error types for the emergent-mcp crate

use thiserror::Error;

/// Main error type for the emergent-mcp application
#[derive(Error, Debug)]
pub enum AgentToolsError {
    /// File I/O and path validation errors
    #[error("File I/O error: {0}")]
    FileIo(#[from] FileIoError),

    /// External command errors
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Operation log or backup persistence errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MCP protocol errors
    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    /// Transport layer errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// File I/O operation errors
#[derive(Error, Debug)]
pub enum FileIoError {
    /// File not found
    #[error("File not found: {0}")]
    NotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid or unsafe path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Read error
    #[error("Read error: {0}")]
    ReadError(String),

    /// Write error
    #[error("Write error: {0}")]
    WriteError(String),

    /// The file manager could not prepare its backup directory
    #[error("Initialization error: {0}")]
    Initialization(String),
}

/// Errors raised while running an external command.
///
/// Every variant produced after the process was spawned keeps whatever
/// output had been captured at the time of failure.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Command matched the blocklist and was never spawned
    #[error("Command blocked for safety: matches '{0}'")]
    Blocked(String),

    /// Process could not be started
    #[error("Failed to spawn command: {0}")]
    Spawn(String),

    /// Wall-clock timeout expired and the process was killed
    #[error("Command timed out after {timeout_secs}s")]
    TimedOut {
        timeout_secs: u64,
        stdout: String,
        stderr: String,
    },

    /// Combined stdout/stderr exceeded the byte cap
    #[error("Command output exceeded {limit} bytes")]
    OutputLimit {
        limit: usize,
        stdout: String,
        stderr: String,
    },

    /// Process exited unsuccessfully
    #[error("Command exited with status {code}")]
    NonZeroExit {
        code: i32,
        stdout: String,
        stderr: String,
    },
}

impl ExecutionError {
    /// Partial output captured before the failure, as `(stdout, stderr)`
    pub fn partial_output(&self) -> (&str, &str) {
        match self {
            ExecutionError::TimedOut { stdout, stderr, .. }
            | ExecutionError::OutputLimit { stdout, stderr, .. }
            | ExecutionError::NonZeroExit { stdout, stderr, .. } => (stdout, stderr),
            ExecutionError::Blocked(_) | ExecutionError::Spawn(_) => ("", ""),
        }
    }
}

/// Operation log or backup write failures
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to persist operation log {path}: {reason}")]
    Log { path: String, reason: String },

    #[error("Failed to load operation log {path}: {reason}")]
    LoadLog { path: String, reason: String },

    #[error("Failed to write backup {path}: {reason}")]
    Backup { path: String, reason: String },
}

/// MCP protocol errors
#[derive(Error, Debug)]
pub enum McpError {
    /// Invalid protocol version
    #[error("Unsupported protocol version: {0}")]
    InvalidProtocolVersion(String),

    /// Invalid JSON-RPC message
    #[error("Invalid JSON-RPC message: {0}")]
    InvalidJsonRpc(String),

    /// Tool not found
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Invalid tool parameters
    #[error("Invalid tool parameters: {0}")]
    InvalidToolParameters(String),

    /// Request arrived before the initialize handshake
    #[error("Server not initialized. Call 'initialize' first.")]
    NotInitialized,
}

/// Transport layer errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Client is not connected
    #[error("Not connected to a tool server")]
    Disconnected,

    /// The peer answered with a JSON-RPC error
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// IO error in transport
    #[error("Transport IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AgentToolsError>;

impl FileIoError {
    /// Map a std::io::Error to a more specific FileIoError based on the error kind
    pub fn from_io_error(operation: &str, path: &str, error: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match error.kind() {
            ErrorKind::NotFound => {
                FileIoError::NotFound(format!("{} not found: {}", operation, path))
            }
            ErrorKind::PermissionDenied => FileIoError::PermissionDenied(format!(
                "Permission denied when {}: {}",
                operation, path
            )),
            ErrorKind::InvalidInput => FileIoError::InvalidPath(format!(
                "Invalid input for {}: {} ({})",
                operation, path, error
            )),
            ErrorKind::InvalidData => FileIoError::ReadError(format!(
                "Failed to {} {}: not valid UTF-8",
                operation, path
            )),
            _ => FileIoError::WriteError(format!("Failed to {} {}: {}", operation, path, error)),
        }
    }
}

impl AgentToolsError {
    /// True for errors that signal a client/server contract violation
    /// rather than a data-dependent runtime condition.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, AgentToolsError::Mcp(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_from_io_error_maps_kinds() {
        let e = FileIoError::from_io_error("read file", "/x", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(e, FileIoError::NotFound(_)));

        let e = FileIoError::from_io_error(
            "read file",
            "/x",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(e, FileIoError::PermissionDenied(_)));
    }

    #[test]
    fn test_partial_output_is_preserved() {
        let e = ExecutionError::TimedOut {
            timeout_secs: 1,
            stdout: "partial".to_string(),
            stderr: String::new(),
        };
        assert_eq!(e.partial_output(), ("partial", ""));
        assert_eq!(ExecutionError::Blocked("mkfs".into()).partial_output(), ("", ""));
    }

    #[test]
    fn test_protocol_error_classification() {
        let e: AgentToolsError = McpError::ToolNotFound("nope".into()).into();
        assert!(e.is_protocol_error());
        let e: AgentToolsError = FileIoError::NotFound("x".into()).into();
        assert!(!e.is_protocol_error());
    }
}
