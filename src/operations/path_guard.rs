// Path safety policy applied before any file access

use crate::error::{FileIoError, Result};
use std::path::{Component, Path, PathBuf};

/// System directories that tools may never touch
pub const DENIED_ROOTS: &[&str] = &["/etc", "/sys", "/proc", "/root"];

/// Validates candidate paths against traversal and sensitive-directory rules.
///
/// Relative paths are resolved against `base`. Validation never corrects a
/// path: it either returns the normalized absolute path or an
/// `InvalidPath` error naming the reason.
#[derive(Debug, Clone)]
pub struct PathGuard {
    base: PathBuf,
}

impl PathGuard {
    /// Create a guard resolving relative paths against `base`
    pub fn new(base: impl AsRef<Path>) -> Result<Self> {
        let base = std::path::absolute(base.as_ref()).map_err(|e| {
            FileIoError::InvalidPath(format!(
                "Cannot resolve base directory {}: {}",
                base.as_ref().display(),
                e
            ))
        })?;
        Ok(Self {
            base: normalize(&base),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Validate `path`, returning its absolute normalized form
    pub fn validate(&self, path: &str) -> Result<PathBuf> {
        if path.trim().is_empty() {
            return Err(FileIoError::InvalidPath("Path must not be empty".to_string()).into());
        }

        // Only a leading `~` is expanded; `$` is an ordinary file name character.
        let expanded = shellexpand::tilde(path);
        self.check(Path::new(expanded.as_ref()))
    }

    /// Apply the policy to a path that needs no home expansion
    pub fn check(&self, path: &Path) -> Result<PathBuf> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        };
        let normalized = normalize(&absolute);

        if normalized
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(FileIoError::InvalidPath(format!(
                "Path traversal not allowed: {}",
                path.display()
            ))
            .into());
        }

        if let Some(root) = denied_root(&normalized) {
            return Err(FileIoError::InvalidPath(format!(
                "Access denied: {} is under {}",
                normalized.display(),
                root
            ))
            .into());
        }

        // A symlink inside an allowed directory must not lead into a denied one.
        if let Some(real) = canonical_existing_prefix(&normalized) {
            if let Some(root) = denied_root(&real) {
                return Err(FileIoError::InvalidPath(format!(
                    "Access denied: {} resolves under {}",
                    normalized.display(),
                    root
                ))
                .into());
            }
        }

        Ok(normalized)
    }
}

/// Lexically normalize an absolute path.
///
/// `..` pops the previous normal component; a `..` with nothing left to pop
/// is kept so the caller can reject it.
fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

fn denied_root(path: &Path) -> Option<&'static str> {
    DENIED_ROOTS
        .iter()
        .copied()
        .find(|root| path.starts_with(root))
}

/// Canonicalize the deepest ancestor of `path` that exists, re-attaching the
/// missing tail.
fn canonical_existing_prefix(path: &Path) -> Option<PathBuf> {
    let mut existing = path;
    let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
    loop {
        if let Ok(real) = std::fs::canonicalize(existing) {
            let mut out = real;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return Some(out);
        }
        tail.push(existing.file_name()?);
        existing = existing.parent()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_relative_path_resolves_against_base() {
        let dir = TempDir::new().unwrap();
        let guard = PathGuard::new(dir.path()).unwrap();
        let resolved = guard.validate("out/a.txt").unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("out/a.txt"));
    }

    #[test]
    fn test_dollar_names_are_literal() {
        let dir = TempDir::new().unwrap();
        let guard = PathGuard::new(dir.path()).unwrap();
        let resolved = guard.validate("app/routes/$postId.tsx").unwrap();
        assert_eq!(resolved, dir.path().join("app/routes/$postId.tsx"));

        let resolved = guard.validate("app/$HOME.txt").unwrap();
        assert_eq!(resolved, dir.path().join("app/$HOME.txt"));
    }

    #[test]
    fn test_inner_parent_segments_are_normalized() {
        let dir = TempDir::new().unwrap();
        let guard = PathGuard::new(dir.path()).unwrap();
        let resolved = guard.validate("src/../lib/./x.rs").unwrap();
        assert!(resolved.ends_with("lib/x.rs"));
        assert!(!resolved.to_string_lossy().contains(".."));
    }

    #[test]
    fn test_denied_roots_rejected() {
        let guard = PathGuard::new("/tmp").unwrap();
        for p in ["/etc/passwd", "/sys/kernel", "/proc/self/environ", "/root/.ssh/id_rsa"] {
            let err = guard.validate(p).unwrap_err();
            assert!(err.to_string().contains("Access denied"), "{p}: {err}");
        }
    }

    #[test]
    fn test_escape_into_denied_root_rejected() {
        let guard = PathGuard::new("/tmp").unwrap();
        assert!(guard.validate("../../../etc/shadow").is_err());
        assert!(guard.validate("/tmp/../etc/hosts").is_err());
    }

    #[test]
    fn test_denylist_is_component_wise() {
        let guard = PathGuard::new("/tmp").unwrap();
        assert!(guard.validate("/etcetera/notes.txt").is_ok());
        assert!(guard.validate("/tmp/rootfs/file").is_ok());
    }

    #[test]
    fn test_parent_above_filesystem_root_rejected() {
        let parts: PathBuf = [Component::RootDir, Component::ParentDir]
            .iter()
            .collect();
        assert!(normalize(&parts)
            .components()
            .any(|c| matches!(c, Component::ParentDir)));
    }

    #[test]
    fn test_empty_path_rejected() {
        let guard = PathGuard::new("/tmp").unwrap();
        assert!(guard.validate("  ").is_err());
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_into_denied_root_rejected() {
        let dir = TempDir::new().unwrap();
        let link = dir.path().join("sneaky");
        std::os::unix::fs::symlink("/etc", &link).unwrap();
        let guard = PathGuard::new(dir.path()).unwrap();
        assert!(guard.validate("sneaky/hosts").is_err());
    }
}
