// Shell command execution under a blocklist, timeout, and output cap

use crate::error::ExecutionError;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

/// Substrings that reject a command before it is spawned
pub const BLOCKED_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf ~",
    "rm -fr /",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    ":(){",
    ":(){ :|:& };:",
    "fork bomb",
];

#[derive(Debug, Clone, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Stateless runner for `sh -c <command>`
#[derive(Debug, Clone, Copy)]
pub struct CommandExecutor {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl CommandExecutor {
    pub fn new(timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            timeout,
            max_output_bytes,
        }
    }

    /// Return the blocklist entry `command` matches, if any
    pub fn blocked_pattern(command: &str) -> Option<&'static str> {
        BLOCKED_PATTERNS
            .iter()
            .copied()
            .find(|pattern| command.contains(pattern))
    }

    /// Run `command` in `cwd`, returning trimmed stdout/stderr.
    ///
    /// The process runs in its own process group so that a timeout or an
    /// output overflow kills everything it started.
    pub async fn execute(&self, command: &str, cwd: &Path) -> Result<CommandOutput, ExecutionError> {
        if let Some(pattern) = Self::blocked_pattern(command) {
            tracing::warn!(command, pattern, "blocked command");
            return Err(ExecutionError::Blocked(pattern.to_string()));
        }

        let mut child = Command::new(resolve_shell())
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::Spawn(format!("{} (cwd {}): {}", command, cwd.display(), e)))?;

        tracing::debug!(command, cwd = %cwd.display(), "command spawned");

        let mut stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| ExecutionError::Spawn("stdout not captured".to_string()))?;
        let mut stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| ExecutionError::Spawn("stderr not captured".to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut stdout_open = true;
        let mut stderr_open = true;

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        while stdout_open || stderr_open {
            tokio::select! {
                read = stdout_pipe.read_buf(&mut stdout), if stdout_open => {
                    stdout_open = matches!(read, Ok(n) if n > 0);
                }
                read = stderr_pipe.read_buf(&mut stderr), if stderr_open => {
                    stderr_open = matches!(read, Ok(n) if n > 0);
                }
                _ = &mut deadline => {
                    kill_group(&mut child).await;
                    return Err(ExecutionError::TimedOut {
                        timeout_secs: self.timeout.as_secs(),
                        stdout: lossy_trim(&stdout),
                        stderr: lossy_trim(&stderr),
                    });
                }
            }

            if stdout.len() + stderr.len() > self.max_output_bytes {
                kill_group(&mut child).await;
                return Err(ExecutionError::OutputLimit {
                    limit: self.max_output_bytes,
                    stdout: lossy_trim(&stdout),
                    stderr: lossy_trim(&stderr),
                });
            }
        }

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| ExecutionError::Spawn(e.to_string()))?,
            _ = &mut deadline => {
                kill_group(&mut child).await;
                return Err(ExecutionError::TimedOut {
                    timeout_secs: self.timeout.as_secs(),
                    stdout: lossy_trim(&stdout),
                    stderr: lossy_trim(&stderr),
                });
            }
        };

        let stdout = lossy_trim(&stdout);
        let stderr = lossy_trim(&stderr);

        if !status.success() {
            return Err(ExecutionError::NonZeroExit {
                code: status.code().unwrap_or(-1),
                stdout,
                stderr,
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }
}

async fn kill_group(child: &mut Child) {
    if let Some(pid) = child.id() {
        if let Ok(pid) = i32::try_from(pid) {
            let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }
    let _ = child.kill().await;
}

fn lossy_trim(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// Resolve the shell binary to use
fn resolve_shell() -> &'static str {
    if Path::new("/bin/sh").exists() {
        "/bin/sh"
    } else {
        "sh"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    fn executor() -> CommandExecutor {
        CommandExecutor::new(Duration::from_secs(10), 1024 * 1024)
    }

    #[tokio::test]
    async fn test_execute_captures_and_trims_output() {
        let dir = TempDir::new().unwrap();
        let out = executor()
            .execute("echo '  hi  '; echo oops >&2", dir.path())
            .await
            .unwrap();
        assert_eq!(out.stdout, "hi");
        assert_eq!(out.stderr, "oops");
    }

    #[tokio::test]
    async fn test_execute_runs_in_cwd() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let out = executor().execute("ls", dir.path()).await.unwrap();
        assert!(out.stdout.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_blocked_commands_never_spawn() {
        let dir = TempDir::new().unwrap();
        let witness = dir.path().join("witness");
        let cmd = format!("touch {} && rm -rf /", witness.display());
        let err = executor().execute(&cmd, dir.path()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Blocked(_)));
        assert!(!witness.exists());

        for cmd in ["mkfs.ext4 /dev/sdb1", "dd if=/dev/zero of=/dev/sda", ":(){ :|:& };:"] {
            assert!(CommandExecutor::blocked_pattern(cmd).is_some(), "{cmd}");
        }
        assert!(CommandExecutor::blocked_pattern("git add src/lib.rs").is_none());
    }

    #[tokio::test]
    async fn test_timeout_kills_and_returns_partial_output() {
        let dir = TempDir::new().unwrap();
        let exec = CommandExecutor::new(Duration::from_millis(500), 1024);
        let started = Instant::now();
        let err = exec
            .execute("echo started; sleep 30; echo never", dir.path())
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            ExecutionError::TimedOut { stdout, .. } => assert_eq!(stdout, "started"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_output_cap_is_an_error() {
        let dir = TempDir::new().unwrap();
        let exec = CommandExecutor::new(Duration::from_secs(10), 64);
        let err = exec
            .execute("yes overflow | head -c 10000", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::OutputLimit { limit: 64, .. }));
    }

    #[tokio::test]
    async fn test_non_zero_exit_keeps_output() {
        let dir = TempDir::new().unwrap();
        let err = executor()
            .execute("echo partial; echo bad >&2; exit 3", dir.path())
            .await
            .unwrap_err();
        match err {
            ExecutionError::NonZeroExit { code, stdout, stderr } => {
                assert_eq!(code, 3);
                assert_eq!(stdout, "partial");
                assert_eq!(stderr, "bad");
            }
            other => panic!("expected non-zero exit, got {other:?}"),
        }
    }
}
