// Tool registry and MCP tool definitions

use crate::config::Config;
use crate::error::{AgentToolsError, ExecutionError, McpError, Result};
use crate::operations::analyze_project::analyze_project;
use crate::operations::command::CommandExecutor;
use crate::operations::file_manager::FileManager;
use crate::operations::git::{git_operation, GitOperation, GitOptions};
use crate::operations::path_guard::PathGuard;
use crate::operations::read_files::read_files;
use crate::operations::test_code::detect_test_command;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;

/// Outcome of a tool invocation as seen by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(e) => Self::fail(format!("Failed to serialize result: {}", e)),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn fail_with(error: impl Into<String>, data: Value) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReadFilesArgs {
    pub patterns: Vec<String>,
    pub base_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WriteCodeArgs {
    pub file_path: String,
    pub content: String,
    pub create_backup: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExecuteCommandArgs {
    pub command: String,
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AnalyzeProjectArgs {
    pub root_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GitOperationsArgs {
    pub operation: GitOperation,
    #[serde(default)]
    pub options: GitOptions,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TestCodeArgs {
    pub test_command: Option<String>,
    pub cwd: Option<String>,
}

/// A validated tool invocation: one variant per tool in the closed catalogue
#[derive(Debug, Clone)]
pub enum ToolCall {
    ReadFiles(ReadFilesArgs),
    WriteCode(WriteCodeArgs),
    ExecuteCommand(ExecuteCommandArgs),
    AnalyzeProject(AnalyzeProjectArgs),
    GitOperations(GitOperationsArgs),
    TestCode(TestCodeArgs),
}

pub const TOOL_NAMES: &[&str] = &[
    "read_files",
    "write_code",
    "execute_command",
    "analyze_project",
    "git_operations",
    "test_code",
];

impl ToolCall {
    /// Resolve `name` and decode `arguments` into that tool's argument type.
    ///
    /// An unknown name is `ToolNotFound`; arguments of the wrong shape are
    /// `InvalidToolParameters`. Missing arguments are treated as `{}`.
    pub fn parse(name: &str, arguments: &Value) -> std::result::Result<Self, McpError> {
        let arguments = match arguments {
            Value::Null => Value::Object(Default::default()),
            Value::Object(_) => arguments.clone(),
            _ => {
                return Err(McpError::InvalidToolParameters(
                    "Arguments must be an object".to_string(),
                ))
            }
        };

        match name {
            "read_files" => decode(name, arguments).map(ToolCall::ReadFiles),
            "write_code" => decode(name, arguments).map(ToolCall::WriteCode),
            "execute_command" => decode(name, arguments).map(ToolCall::ExecuteCommand),
            "analyze_project" => decode(name, arguments).map(ToolCall::AnalyzeProject),
            "git_operations" => decode(name, arguments).map(ToolCall::GitOperations),
            "test_code" => decode(name, arguments).map(ToolCall::TestCode),
            _ => Err(McpError::ToolNotFound(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::ReadFiles(_) => "read_files",
            ToolCall::WriteCode(_) => "write_code",
            ToolCall::ExecuteCommand(_) => "execute_command",
            ToolCall::AnalyzeProject(_) => "analyze_project",
            ToolCall::GitOperations(_) => "git_operations",
            ToolCall::TestCode(_) => "test_code",
        }
    }
}

fn decode<T: DeserializeOwned>(tool: &str, arguments: Value) -> std::result::Result<T, McpError> {
    serde_json::from_value(arguments)
        .map_err(|e| McpError::InvalidToolParameters(format!("{}: {}", tool, e)))
}

/// Tool registry: the fixed catalogue plus the state its handlers share
pub struct ToolRegistry {
    files: Mutex<FileManager>,
    guard: PathGuard,
    executor: CommandExecutor,
    test_timeout: Duration,
    git_timeout: Duration,
    max_file_size: u64,
}

impl ToolRegistry {
    /// Build a registry from configuration, initializing the file manager
    pub fn new(config: &Config) -> Result<Self> {
        let mut files = FileManager::new(&config.project_root, &config.backup_dir)?;
        files.initialize()?;
        Ok(Self::with_file_manager(files, config))
    }

    /// Build a registry around an already-initialized file manager
    pub fn with_file_manager(files: FileManager, config: &Config) -> Self {
        Self {
            guard: files.guard().clone(),
            files: Mutex::new(files),
            executor: CommandExecutor::new(config.command_timeout(), config.max_output_bytes),
            test_timeout: config.test_timeout(),
            git_timeout: config.command_timeout(),
            max_file_size: config.max_file_size,
        }
    }

    /// Shared access to the file manager for rollback and history
    pub fn file_manager(&self) -> &Mutex<FileManager> {
        &self.files
    }

    /// Get all tools in MCP format
    pub fn list_tools(&self) -> Value {
        serde_json::json!([
            {
                "name": "read_files",
                "description": "Read project files matching glob patterns. Skips node_modules, dist and .git; oversized files are summarized.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "patterns": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Glob patterns to match (e.g. [\"src/**/*.rs\"])"
                        },
                        "baseDir": {
                            "type": "string",
                            "description": "Base directory (default: project root)",
                            "default": "."
                        }
                    },
                    "required": ["patterns"]
                }
            },
            {
                "name": "write_code",
                "description": "Write content to a file, creating parent directories. Existing content is backed up and the change is recorded for rollback.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "filePath": {
                            "type": "string",
                            "description": "Path of the file to write"
                        },
                        "content": {
                            "type": "string",
                            "description": "New file content"
                        },
                        "createBackup": {
                            "type": "boolean",
                            "description": "Snapshot the existing file before overwriting (default: true)",
                            "default": true
                        }
                    },
                    "required": ["filePath", "content"]
                }
            },
            {
                "name": "execute_command",
                "description": "Run a shell command with a timeout and output cap. Destructive commands are blocked.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "command": {
                            "type": "string",
                            "description": "Command to execute"
                        },
                        "cwd": {
                            "type": "string",
                            "description": "Working directory (default: project root)",
                            "default": "."
                        }
                    },
                    "required": ["command"]
                }
            },
            {
                "name": "analyze_project",
                "description": "Summarize project structure: file types, directory layout, languages and frameworks.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "rootDir": {
                            "type": "string",
                            "description": "Project root directory",
                            "default": "."
                        }
                    }
                }
            },
            {
                "name": "git_operations",
                "description": "Git operations: status, commit, diff, log.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "operation": {
                            "type": "string",
                            "enum": ["status", "commit", "diff", "log"],
                            "description": "Git operation to run"
                        },
                        "options": {
                            "type": "object",
                            "description": "Operation options: message (commit), files (diff), maxCount (log), cwd",
                            "properties": {
                                "message": { "type": "string" },
                                "files": { "type": "array", "items": { "type": "string" } },
                                "maxCount": { "type": "number" },
                                "cwd": { "type": "string" }
                            }
                        }
                    },
                    "required": ["operation"]
                }
            },
            {
                "name": "test_code",
                "description": "Run the project's tests. Detects the test command when none is given.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "testCommand": {
                            "type": "string",
                            "description": "Custom test command"
                        },
                        "cwd": {
                            "type": "string",
                            "description": "Working directory",
                            "default": "."
                        }
                    }
                }
            }
        ])
    }

    /// Execute a tool by name.
    ///
    /// Only an unknown tool name is an `Err`; every other failure, including
    /// malformed arguments, comes back as `ToolResult { success: false, .. }`.
    pub async fn execute_tool(&self, name: &str, arguments: &Value) -> Result<ToolResult> {
        let call = match ToolCall::parse(name, arguments) {
            Ok(call) => call,
            Err(e @ McpError::ToolNotFound(_)) => return Err(e.into()),
            Err(e) => return Ok(ToolResult::fail(e.to_string())),
        };

        tracing::debug!(tool = call.name(), "dispatching tool call");
        Ok(self.dispatch(call).await)
    }

    /// Run a validated call; handlers never fail the call itself
    pub async fn dispatch(&self, call: ToolCall) -> ToolResult {
        let tool = call.name();
        let result = match call {
            ToolCall::ReadFiles(args) => self.read_files(args),
            ToolCall::WriteCode(args) => self.write_code(args).await,
            ToolCall::ExecuteCommand(args) => self.execute_command(args).await,
            ToolCall::AnalyzeProject(args) => self.analyze_project(args),
            ToolCall::GitOperations(args) => self.git_operations(args).await,
            ToolCall::TestCode(args) => self.test_code(args).await,
        };

        if let Some(error) = &result.error {
            tracing::warn!(tool, error = %error, "tool call failed");
        }
        result
    }

    fn read_files(&self, args: ReadFilesArgs) -> ToolResult {
        let base_dir = args.base_dir.as_deref().unwrap_or(".");
        match read_files(&self.guard, &args.patterns, base_dir, self.max_file_size) {
            Ok(result) => ToolResult::ok(result),
            Err(e) => ToolResult::fail(format!("Failed to read files: {}", e)),
        }
    }

    async fn write_code(&self, args: WriteCodeArgs) -> ToolResult {
        let backup = args.create_backup.unwrap_or(true);
        let mut files = self.files.lock().await;
        match files.write_file(&args.file_path, &args.content, backup) {
            Ok(outcome) => ToolResult::ok(outcome),
            Err(e) => ToolResult::fail(format!("Failed to write file: {}", e)),
        }
    }

    async fn execute_command(&self, args: ExecuteCommandArgs) -> ToolResult {
        let cwd = match self.working_dir(args.cwd.as_deref()) {
            Ok(cwd) => cwd,
            Err(e) => return ToolResult::fail(format!("Failed to execute command: {}", e)),
        };

        match self.executor.execute(&args.command, &cwd).await {
            Ok(output) => ToolResult::ok(json!({
                "stdout": output.stdout,
                "stderr": output.stderr,
                "command": args.command,
            })),
            Err(e) => {
                let (stdout, stderr) = e.partial_output();
                ToolResult::fail_with(
                    format!("Failed to execute command: {}", e),
                    json!({ "stdout": stdout, "stderr": stderr }),
                )
            }
        }
    }

    fn analyze_project(&self, args: AnalyzeProjectArgs) -> ToolResult {
        let root = args.root_dir.as_deref().unwrap_or(".");
        match analyze_project(&self.guard, root) {
            Ok(analysis) => ToolResult::ok(analysis),
            Err(e) => ToolResult::fail(format!("Failed to analyze project: {}", e)),
        }
    }

    async fn git_operations(&self, args: GitOperationsArgs) -> ToolResult {
        if args.operation == GitOperation::Commit
            && !matches!(args.options.message.as_deref(), Some(m) if !m.trim().is_empty())
        {
            return ToolResult::fail("Commit message required");
        }

        let repo = match self.working_dir(args.options.cwd.as_deref()) {
            Ok(repo) => repo,
            Err(e) => return ToolResult::fail(format!("Git operation failed: {}", e)),
        };

        match git_operation(args.operation, &args.options, &repo, self.git_timeout).await {
            Ok(data) => ToolResult::ok(data),
            Err(e) => ToolResult::fail(format!("Git operation failed: {}", describe(&e))),
        }
    }

    async fn test_code(&self, args: TestCodeArgs) -> ToolResult {
        let cwd = match self.working_dir(args.cwd.as_deref()) {
            Ok(cwd) => cwd,
            Err(e) => return ToolResult::fail(format!("Failed to run tests: {}", e)),
        };
        let command = args
            .test_command
            .unwrap_or_else(|| detect_test_command(&cwd));

        let executor = CommandExecutor {
            timeout: self.test_timeout,
            ..self.executor
        };
        match executor.execute(&command, &cwd).await {
            Ok(output) => ToolResult::ok(json!({
                "output": output.stdout,
                "errors": output.stderr,
                "command": command,
            })),
            Err(e) => {
                let (stdout, stderr) = e.partial_output();
                ToolResult::fail_with(
                    format!("Failed to run tests: {}", e),
                    json!({ "output": stdout, "errors": stderr, "command": command }),
                )
            }
        }
    }

    /// Validate an optional working directory, defaulting to the project root
    fn working_dir(&self, cwd: Option<&str>) -> Result<PathBuf> {
        let dir = self.guard.validate(cwd.unwrap_or("."))?;
        if !dir.is_dir() {
            return Err(crate::error::FileIoError::NotFound(format!(
                "Directory not found: {}",
                dir.display()
            ))
            .into());
        }
        Ok(dir)
    }
}

/// Error text with the failed subprocess's explanation appended: stderr,
/// or stdout when stderr is empty (`git commit` with nothing to commit)
fn describe(error: &AgentToolsError) -> String {
    match error {
        AgentToolsError::Execution(e @ ExecutionError::NonZeroExit { stdout, stderr, .. }) => {
            match [stderr, stdout].into_iter().find(|s| !s.is_empty()) {
                Some(detail) => format!("{}: {}", e, detail),
                None => e.to_string(),
            }
        }
        other => other.to_string(),
    }
}
