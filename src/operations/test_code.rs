// Test runner detection

use crate::operations::analyze_project::read_package_json;
use std::path::Path;

const FALLBACK_TEST_COMMAND: &str = "npm test";

/// Pick the test command for `dir`: `package.json` scripts.test, then
/// `cargo test` for Cargo projects, then `npm test`.
pub fn detect_test_command(dir: &Path) -> String {
    if let Some(script) = read_package_json(dir)
        .as_ref()
        .and_then(|manifest| manifest.pointer("/scripts/test"))
        .and_then(|v| v.as_str())
    {
        return script.to_string();
    }

    if dir.join("Cargo.toml").is_file() {
        return "cargo test".to_string();
    }

    FALLBACK_TEST_COMMAND.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_package_json_script_wins() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"scripts":{"test":"vitest run"}}"#).unwrap();
        fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        assert_eq!(detect_test_command(dir.path()), "vitest run");
    }

    #[test]
    fn test_cargo_project() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        assert_eq!(detect_test_command(dir.path()), "cargo test");
    }

    #[test]
    fn test_fallback() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), "{not json").unwrap();
        assert_eq!(detect_test_command(dir.path()), FALLBACK_TEST_COMMAND);
    }
}
