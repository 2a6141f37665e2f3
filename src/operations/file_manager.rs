// Safe file mutation: path validation, automatic backups, operation log, rollback

use crate::config::HISTORY_FILE;
use crate::error::{AgentToolsError, FileIoError, Result};
use crate::operations::backup::BackupStore;
use crate::operations::history::{FileOperation, OperationKind, OperationLog};
use crate::operations::path_guard::PathGuard;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Result of probing a path for existing content.
///
/// `Present` holds the raw bytes; content need not be UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileState {
    Present(Vec<u8>),
    Absent,
    Denied(String),
}

/// What a successful write did
#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub path: String,
    pub operation: OperationKind,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,
}

/// Orchestrates PathGuard, BackupStore and OperationLog.
///
/// The log is owned exclusively by this type. Every mutation appends one
/// record and flushes the whole log to `<backup dir>/history.json` before
/// returning; a failed flush is logged and the mutation stands.
pub struct FileManager {
    guard: PathGuard,
    backups: BackupStore,
    log: OperationLog,
}

impl FileManager {
    /// Create a manager rooted at `project_root`; call [`initialize`](Self::initialize) before use
    pub fn new(project_root: impl AsRef<Path>, backup_dir: impl AsRef<Path>) -> Result<Self> {
        let guard = PathGuard::new(project_root)?;
        let backup_dir = crate::config::resolve_against(guard.base(), backup_dir.as_ref());
        let history_path = backup_dir.join(HISTORY_FILE);
        Ok(Self {
            guard,
            backups: BackupStore::new(backup_dir),
            log: OperationLog::new(history_path),
        })
    }

    /// Create the backup directory and load any persisted operation log
    pub fn initialize(&mut self) -> Result<()> {
        self.backups.ensure_dir()?;

        match OperationLog::load(self.log.path()) {
            Ok(log) => {
                tracing::debug!(records = log.len(), path = %log.path().display(), "operation log loaded");
                self.log = log;
            }
            Err(e) => {
                tracing::warn!(error = %e, "starting with an empty operation log");
                self.log = OperationLog::new(self.log.path());
            }
        }
        Ok(())
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    /// Probe `path` without treating absence as an error
    pub fn probe(path: &Path) -> Result<FileState> {
        match fs::read(path) {
            Ok(content) => Ok(FileState::Present(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(FileState::Absent),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                Ok(FileState::Denied(path.display().to_string()))
            }
            Err(e) => Err(FileIoError::from_io_error("read file", &path.display().to_string(), e).into()),
        }
    }

    pub fn read_file(&self, path: &str) -> Result<String> {
        let resolved = self.guard.validate(path)?;
        fs::read_to_string(&resolved).map_err(|e| {
            FileIoError::from_io_error("read file", &resolved.display().to_string(), e).into()
        })
    }

    /// Write `content` to `path`, snapshotting any prior content first
    pub fn write_file(&mut self, path: &str, content: &str, backup: bool) -> Result<WriteOutcome> {
        let resolved = self.guard.validate(path)?;

        let previous = match Self::probe(&resolved)? {
            FileState::Present(previous) => Some(previous),
            FileState::Absent => None,
            FileState::Denied(p) => {
                return Err(FileIoError::PermissionDenied(format!(
                    "Permission denied when reading existing file: {}",
                    p
                ))
                .into())
            }
        };

        let backup_id = match (&previous, backup) {
            (Some(previous), true) => self.snapshot(&resolved, previous),
            _ => None,
        };

        write_atomic(&resolved, content)?;

        let operation = match previous {
            Some(previous) => FileOperation::update(&resolved, content, lossy(previous)),
            None => FileOperation::create(&resolved, content),
        };
        let kind = operation.kind;
        self.record(operation);

        tracing::info!(path = %resolved.display(), operation = %kind, "file written");
        Ok(WriteOutcome {
            path: resolved.display().to_string(),
            operation: kind,
            size: content.len(),
            backup: backup_id.map(|id| self.backups.dir().join(id).display().to_string()),
        })
    }

    /// Delete `path` after snapshotting it
    pub fn delete_file(&mut self, path: &str) -> Result<()> {
        let resolved = self.guard.validate(path)?;

        let previous = match Self::probe(&resolved)? {
            FileState::Present(previous) => previous,
            FileState::Absent => {
                return Err(FileIoError::NotFound(resolved.display().to_string()).into())
            }
            FileState::Denied(p) => {
                return Err(FileIoError::PermissionDenied(format!(
                    "Permission denied when reading file to delete: {}",
                    p
                ))
                .into())
            }
        };

        self.snapshot(&resolved, &previous);
        fs::remove_file(&resolved).map_err(|e| {
            FileIoError::from_io_error("remove file", &resolved.display().to_string(), e)
        })?;
        self.record(FileOperation::delete(&resolved, lossy(previous)));

        tracing::info!(path = %resolved.display(), "file deleted");
        Ok(())
    }

    /// Undo up to `steps` operations, most recent first.
    ///
    /// A step that fails is logged and dropped from the log; the returned
    /// list holds only the operations actually undone, in undo order.
    pub fn rollback(&mut self, steps: usize) -> Vec<FileOperation> {
        let mut undone = Vec::new();
        let mut popped = 0;

        for _ in 0..steps {
            let Some(operation) = self.log.pop() else {
                break;
            };
            popped += 1;

            match self.undo(&operation) {
                Ok(()) => {
                    tracing::info!(path = %operation.path, operation = %operation.kind, "operation undone");
                    undone.push(operation);
                }
                Err(e) => {
                    tracing::error!(
                        path = %operation.path,
                        operation = %operation.kind,
                        error = %e,
                        "failed to undo operation, skipping"
                    );
                }
            }
        }

        if popped > 0 {
            self.flush();
        }
        undone
    }

    /// Read-only view of the log, most-recent-last
    pub fn history(&self, limit: Option<usize>) -> Vec<FileOperation> {
        self.log.tail(limit)
    }

    fn undo(&self, operation: &FileOperation) -> Result<()> {
        let path = self.guard.check(Path::new(&operation.path))?;
        match operation.kind {
            OperationKind::Create => fs::remove_file(&path).map_err(|e| {
                FileIoError::from_io_error("remove created file", &operation.path, e).into()
            }),
            OperationKind::Update => {
                let previous = prior_content(operation)?;
                if !path.exists() {
                    return Err(FileIoError::NotFound(format!(
                        "updated file no longer exists: {}",
                        operation.path
                    ))
                    .into());
                }
                write_atomic(&path, previous)
            }
            OperationKind::Delete => {
                let previous = prior_content(operation)?;
                write_atomic(&path, previous)
            }
        }
    }

    /// Backup failures are reported but never block the mutation
    fn snapshot(&self, path: &Path, content: &[u8]) -> Option<String> {
        match self.backups.snapshot(path, content) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "backup failed");
                None
            }
        }
    }

    fn record(&mut self, operation: FileOperation) {
        self.log.push(operation);
        self.flush();
    }

    fn flush(&self) {
        if let Err(e) = self.log.persist() {
            tracing::error!(error = %e, "operation log not persisted");
        }
    }
}

/// Log records hold text; invalid UTF-8 is replaced, the backup keeps the bytes
fn lossy(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

fn prior_content(operation: &FileOperation) -> Result<&str> {
    operation.previous_content.as_deref().ok_or_else(|| {
        AgentToolsError::from(FileIoError::ReadError(format!(
            "no prior content recorded for {} of {}",
            operation.kind, operation.path
        )))
    })
}

/// Create parent directories, write to a sibling temp file, then rename
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let display = path.display().to_string();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            FileIoError::WriteError(format!(
                "Failed to create parent directories for {}: {}",
                display, e
            ))
        })?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    fs::write(&temp_path, content)
        .map_err(|e| FileIoError::from_io_error("write to temp file", &display, e))?;
    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        FileIoError::from_io_error("rename temp file", &display, e)
    })?;
    Ok(())
}
