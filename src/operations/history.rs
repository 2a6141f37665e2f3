// Operation log: the ordered record of file mutations that drives rollback

use crate::error::{PersistenceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// One record per mutating action.
///
/// Create records never carry `previous_content`; Update and Delete records
/// carry it whenever the target existed before the operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOperation {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_content: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl FileOperation {
    pub fn create(path: &Path, content: &str) -> Self {
        Self {
            kind: OperationKind::Create,
            path: path.display().to_string(),
            content: Some(content.to_string()),
            previous_content: None,
            timestamp: Utc::now(),
        }
    }

    pub fn update(path: &Path, content: &str, previous: String) -> Self {
        Self {
            kind: OperationKind::Update,
            path: path.display().to_string(),
            content: Some(content.to_string()),
            previous_content: Some(previous),
            timestamp: Utc::now(),
        }
    }

    pub fn delete(path: &Path, previous: String) -> Self {
        Self {
            kind: OperationKind::Delete,
            path: path.display().to_string(),
            content: None,
            previous_content: Some(previous),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only in memory, rewritten as a whole on disk after every change.
///
/// Insertion order is chronological order; rollback pops from the tail.
#[derive(Debug)]
pub struct OperationLog {
    path: PathBuf,
    operations: Vec<FileOperation>,
}

impl OperationLog {
    /// An empty log that persists to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            operations: Vec::new(),
        }
    }

    /// Load the persisted log at `path`; a missing file yields an empty log
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let operations = match fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data).map_err(|e| PersistenceError::LoadLog {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(PersistenceError::LoadLog {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
                .into())
            }
        };
        Ok(Self { path, operations })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn push(&mut self, operation: FileOperation) {
        self.operations.push(operation);
    }

    pub fn pop(&mut self) -> Option<FileOperation> {
        self.operations.pop()
    }

    /// At most `limit` trailing records, most-recent-last
    pub fn tail(&self, limit: Option<usize>) -> Vec<FileOperation> {
        let start = match limit {
            Some(n) => self.operations.len().saturating_sub(n),
            None => 0,
        };
        self.operations[start..].to_vec()
    }

    /// Rewrite the persisted copy: temp file, then atomic rename
    pub fn persist(&self) -> Result<()> {
        let to_err = |reason: String| PersistenceError::Log {
            path: self.path.display().to_string(),
            reason,
        };

        let data = serde_json::to_string_pretty(&self.operations).map_err(|e| to_err(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| to_err(e.to_string()))?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, data).map_err(|e| to_err(e.to_string()))?;
        fs::rename(&temp_path, &self.path).map_err(|e| to_err(e.to_string()))?;
        Ok(())
    }
}
