// Project structure summary: file types, layout, languages, frameworks

use crate::error::{FileIoError, Result};
use crate::operations::path_guard::PathGuard;
use crate::operations::read_files::walker;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

const NO_EXTENSION: &str = "no-extension";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAnalysis {
    pub total_files: usize,
    pub file_types: BTreeMap<String, usize>,
    pub structure: BTreeMap<String, Vec<String>>,
    pub languages: Vec<String>,
    pub frameworks: Vec<String>,
}

pub fn analyze_project(guard: &PathGuard, root_dir: &str) -> Result<ProjectAnalysis> {
    let root = guard.validate(root_dir)?;
    if !root.is_dir() {
        return Err(FileIoError::NotFound(format!("Directory not found: {}", root.display())).into());
    }

    let mut file_types: BTreeMap<String, usize> = BTreeMap::new();
    let mut structure: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut languages = BTreeSet::new();
    let mut total_files = 0;

    for entry in walker(&root).build() {
        let entry = entry
            .map_err(|e| FileIoError::ReadError(format!("Error walking directory: {}", e)))?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(&root) else {
            continue;
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".log") {
            continue;
        }

        total_files += 1;

        let ext = relative
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| NO_EXTENSION.to_string());
        if let Some(language) = language_for(&ext) {
            languages.insert(language.to_string());
        }
        *file_types.entry(ext).or_insert(0) += 1;

        let dir = match relative.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_string_lossy().replace('\\', "/"),
            _ => ".".to_string(),
        };
        structure.entry(dir).or_default().push(name);
    }

    for files in structure.values_mut() {
        files.sort();
    }

    Ok(ProjectAnalysis {
        total_files,
        file_types,
        structure,
        languages: languages.into_iter().collect(),
        frameworks: detect_frameworks(&root),
    })
}

fn language_for(ext: &str) -> Option<&'static str> {
    match ext {
        ".js" => Some("JavaScript"),
        ".ts" => Some("TypeScript"),
        ".py" => Some("Python"),
        ".go" => Some("Go"),
        ".rs" => Some("Rust"),
        ".java" => Some("Java"),
        _ => None,
    }
}

fn detect_frameworks(root: &Path) -> Vec<String> {
    let mut frameworks = Vec::new();

    if let Some(manifest) = read_package_json(root) {
        let has_dep = |name: &str| {
            ["dependencies", "devDependencies"]
                .iter()
                .any(|section| manifest.get(section).and_then(|d| d.get(name)).is_some())
        };
        for (dep, framework) in [
            ("react", "React"),
            ("vue", "Vue"),
            ("next", "Next.js"),
            ("express", "Express"),
        ] {
            if has_dep(dep) {
                frameworks.push(framework.to_string());
            }
        }
    }

    if let Ok(requirements) = fs::read_to_string(root.join("requirements.txt")) {
        let packages: BTreeSet<String> = requirements
            .lines()
            .map(|line| {
                line.split(|c: char| "=<>~![; ".contains(c))
                    .next()
                    .unwrap_or("")
                    .trim()
                    .to_lowercase()
            })
            .filter(|name| !name.is_empty() && !name.starts_with('#'))
            .collect();
        for (package, framework) in [("fastapi", "FastAPI"), ("django", "Django"), ("flask", "Flask")] {
            if packages.contains(package) {
                frameworks.push(framework.to_string());
            }
        }
    }

    frameworks
}

/// Parsed `package.json`, if present and valid
pub fn read_package_json(root: &Path) -> Option<serde_json::Value> {
    let data = fs::read_to_string(root.join("package.json")).ok()?;
    match serde_json::from_str(&data) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(error = %e, root = %root.display(), "ignoring invalid package.json");
            None
        }
    }
}
