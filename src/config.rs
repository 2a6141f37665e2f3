// Runtime configuration shared by the server and the client-side subcommands

use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the persisted operation log inside the backup directory
pub const HISTORY_FILE: &str = "history.json";

#[derive(Args, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Project root; relative tool paths resolve against it
    #[arg(long, env = "PROJECT_ROOT", default_value = ".", global = true)]
    pub project_root: PathBuf,

    /// Directory holding backups and the operation log
    #[arg(long, env = "BACKUP_DIR", default_value = ".emergent-backups", global = true)]
    pub backup_dir: PathBuf,

    /// Files larger than this are not inlined by read_files
    #[arg(long, env = "MAX_FILE_SIZE", default_value_t = 1_048_576, global = true)]
    pub max_file_size: u64,

    /// Wall-clock timeout for execute_command, in seconds
    #[arg(long, env = "COMMAND_TIMEOUT_SECS", default_value_t = 30, global = true)]
    pub command_timeout: u64,

    /// Wall-clock timeout for test_code, in seconds
    #[arg(long, env = "TEST_TIMEOUT_SECS", default_value_t = 120, global = true)]
    pub test_timeout: u64,

    /// Combined stdout+stderr cap for command execution, in bytes
    #[arg(long, env = "MAX_OUTPUT_BYTES", default_value_t = 1_048_576, global = true)]
    pub max_output_bytes: usize,

    /// Server executable the client spawns (defaults to this binary)
    #[arg(long, env = "EMERGENT_MCP_SERVER", global = true)]
    pub server_command: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            backup_dir: PathBuf::from(".emergent-backups"),
            max_file_size: 1_048_576,
            command_timeout: 30,
            test_timeout: 120,
            max_output_bytes: 1_048_576,
            server_command: None,
        }
    }
}

impl Config {
    /// Config rooted at `root`, with the backup directory inside it
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let project_root = root.into();
        Self {
            backup_dir: project_root.join(".emergent-backups"),
            project_root,
            ..Self::default()
        }
    }

    /// Backup directory resolved against the project root
    pub fn resolved_backup_dir(&self) -> PathBuf {
        resolve_against(&self.project_root, &self.backup_dir)
    }

    pub fn history_path(&self) -> PathBuf {
        self.resolved_backup_dir().join(HISTORY_FILE)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout)
    }
}

/// Join `path` onto `base` unless it is already absolute
pub fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_dir_resolves_under_root() {
        let mut config = Config::default();
        config.project_root = PathBuf::from("/work/project");
        assert_eq!(
            config.resolved_backup_dir(),
            PathBuf::from("/work/project/.emergent-backups")
        );
        assert_eq!(
            config.history_path(),
            PathBuf::from("/work/project/.emergent-backups/history.json")
        );
    }

    #[test]
    fn test_absolute_backup_dir_is_kept() {
        let mut config = Config::for_root("/work/project");
        config.backup_dir = PathBuf::from("/var/tmp/backups");
        assert_eq!(config.resolved_backup_dir(), PathBuf::from("/var/tmp/backups"));
    }
}
