// Content-hashed snapshots taken before destructive mutations

use crate::error::{FileIoError, PersistenceError, Result};
use chrono::{SecondsFormat, Utc};
use std::fs;
use std::path::{Path, PathBuf};

const BACKUP_EXTENSION: &str = "backup";
const HASH_PREFIX_LEN: usize = 8;

/// Write-once store of file snapshots.
///
/// Snapshots are named `<basename>.<timestamp>.<hash8>.backup` and are never
/// pruned. They are a forensic trail; rollback uses the content inlined in
/// the operation log.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the backup directory and any missing parents
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            FileIoError::Initialization(format!(
                "Cannot create backup directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;
        Ok(())
    }

    /// Persist `content` as a snapshot of `path`, returning the backup identifier
    pub fn snapshot(&self, path: &Path, content: &[u8]) -> Result<String> {
        self.ensure_dir()?;

        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let id = backup_name(&basename, &filesystem_timestamp(), &hash_prefix(content));
        let target = self.dir.join(&id);

        fs::write(&target, content).map_err(|e| PersistenceError::Backup {
            path: target.display().to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!(backup = %target.display(), source = %path.display(), "snapshot written");
        Ok(id)
    }

    /// All backup identifiers, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(FileIoError::from_io_error(
                    "list backups",
                    &self.dir.display().to_string(),
                    e,
                )
                .into())
            }
        };

        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().to_str().map(|s| s.to_string()))
            .filter(|name| name.ends_with(&format!(".{}", BACKUP_EXTENSION)))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Read a snapshot by identifier
    pub fn get(&self, id: &str) -> Result<String> {
        if id.contains('/') || id.contains("..") {
            return Err(FileIoError::InvalidPath(format!("Invalid backup identifier: {}", id)).into());
        }
        let path = self.dir.join(id);
        fs::read_to_string(&path)
            .map_err(|e| FileIoError::from_io_error("read backup", &path.display().to_string(), e).into())
    }
}

fn backup_name(basename: &str, timestamp: &str, hash: &str) -> String {
    format!("{}.{}.{}.{}", basename, timestamp, hash, BACKUP_EXTENSION)
}

/// ISO-8601 UTC timestamp with `:` and `.` replaced by `-`
fn filesystem_timestamp() -> String {
    Utc::now()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// Short content hash used for traceability only
fn hash_prefix(content: &[u8]) -> String {
    let digest = format!("{:x}", md5::compute(content));
    digest[..HASH_PREFIX_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_snapshot_naming_and_content() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path().join("nested/backups"));

        let id = store.snapshot(Path::new("/work/src/main.rs"), b"hello").unwrap();

        // md5("hello") = 5d41402abc4b2a76b9719d911017c592
        assert!(id.starts_with("main.rs."), "{id}");
        assert!(id.ends_with(".5d41402a.backup"), "{id}");
        let timestamp = id
            .trim_start_matches("main.rs.")
            .trim_end_matches(".5d41402a.backup");
        assert!(!timestamp.contains(':'));
        assert!(!timestamp.contains('.'));
        assert!(timestamp.ends_with('Z'));

        assert_eq!(store.get(&id).unwrap(), "hello");
    }

    #[test]
    fn test_list_only_returns_backups() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path());
        store.snapshot(Path::new("a.txt"), b"one").unwrap();
        store.snapshot(Path::new("b.txt"), b"two").unwrap();
        fs::write(dir.path().join("history.json"), "[]").unwrap();

        let ids = store.list().unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids[0].starts_with("a.txt."));
        assert!(ids[1].starts_with("b.txt."));
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path().join("absent"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_get_rejects_path_like_ids() {
        let dir = TempDir::new().unwrap();
        let store = BackupStore::new(dir.path());
        assert!(store.get("../history.json").is_err());
    }
}
