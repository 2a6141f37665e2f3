// Read project files selected by glob patterns

use crate::error::{FileIoError, Result};
use crate::operations::path_guard::PathGuard;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Directories never scanned by the read-only project tools
pub const SKIPPED_DIRS: &[&str] = &["node_modules", "dist", ".git"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadFilesResult {
    pub files: Vec<String>,
    pub contents: BTreeMap<String, String>,
    pub total_files: usize,
}

/// Read every file under `base_dir` matching any of `patterns`.
///
/// Paths in the result are relative to `base_dir`. Files larger than
/// `max_file_size` are listed with a size placeholder instead of content.
pub fn read_files(
    guard: &PathGuard,
    patterns: &[String],
    base_dir: &str,
    max_file_size: u64,
) -> Result<ReadFilesResult> {
    let base = guard.validate(base_dir)?;
    if !base.is_dir() {
        return Err(FileIoError::NotFound(format!("Directory not found: {}", base.display())).into());
    }

    let matcher = build_globset(patterns)?;
    let mut contents = BTreeMap::new();

    for entry in walker(&base).build() {
        let entry = entry
            .map_err(|e| FileIoError::ReadError(format!("Error walking directory: {}", e)))?;
        let entry_path = entry.path();
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }

        let relative = match entry_path.strip_prefix(&base) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        if !matcher.is_match(relative) {
            continue;
        }

        let resolved = guard.check(entry_path)?;
        let key = relative.to_string_lossy().replace('\\', "/");
        let size = fs::metadata(&resolved)
            .map_err(|e| FileIoError::from_io_error("stat file", &key, e))?
            .len();

        let text = if size > max_file_size {
            format!("[File too large: {} bytes]", size)
        } else {
            match fs::read(&resolved) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => return Err(FileIoError::from_io_error("read file", &key, e).into()),
            }
        };
        contents.insert(key, text);
    }

    let files: Vec<String> = contents.keys().cloned().collect();
    Ok(ReadFilesResult {
        total_files: files.len(),
        files,
        contents,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| {
                FileIoError::InvalidPath(format!("Invalid glob pattern {}: {}", pattern, e))
            })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| FileIoError::InvalidPath(format!("Invalid glob patterns: {}", e)).into())
}

/// Walker honoring ignore files and skipping dependency/build directories
pub fn walker(root: &Path) -> WalkBuilder {
    let mut builder = WalkBuilder::new(root);
    builder.require_git(false).filter_entry(|entry| {
        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
        !(is_dir
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| SKIPPED_DIRS.contains(&name)))
    });
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathGuard) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        fs::write(dir.path().join("src/main.ts"), "main").unwrap();
        fs::write(dir.path().join("src/nested/util.ts"), "util").unwrap();
        fs::write(dir.path().join("src/readme.md"), "docs").unwrap();
        fs::write(dir.path().join("node_modules/pkg/index.ts"), "dep").unwrap();
        let guard = PathGuard::new(dir.path()).unwrap();
        (dir, guard)
    }

    #[test]
    fn test_read_files_by_pattern() {
        let (dir, guard) = setup();
        let result = read_files(
            &guard,
            &["src/**/*.ts".to_string()],
            &dir.path().to_string_lossy(),
            1024,
        )
        .unwrap();

        assert_eq!(result.files, vec!["src/main.ts", "src/nested/util.ts"]);
        assert_eq!(result.total_files, 2);
        assert_eq!(result.contents["src/nested/util.ts"], "util");
    }

    #[test]
    fn test_read_files_skips_dependency_dirs() {
        let (dir, guard) = setup();
        let result = read_files(&guard, &["**/*.ts".to_string()], &dir.path().to_string_lossy(), 1024).unwrap();
        assert!(result.files.iter().all(|f| !f.starts_with("node_modules")));
        assert_eq!(result.total_files, 2);
    }

    #[test]
    fn test_large_files_are_summarized() {
        let (dir, guard) = setup();
        fs::write(dir.path().join("big.txt"), "x".repeat(100)).unwrap();
        let result = read_files(&guard, &["*.txt".to_string()], &dir.path().to_string_lossy(), 10).unwrap();
        assert_eq!(result.contents["big.txt"], "[File too large: 100 bytes]");
    }

    #[test]
    fn test_invalid_glob_errors() {
        let (dir, guard) = setup();
        assert!(read_files(&guard, &["[".to_string()], &dir.path().to_string_lossy(), 10).is_err());
    }

    #[test]
    fn test_denied_base_dir_rejected() {
        let (_dir, guard) = setup();
        assert!(read_files(&guard, &["*".to_string()], "/proc", 10).is_err());
    }
}
