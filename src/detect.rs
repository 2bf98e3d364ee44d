//! Toolchain detection
//!
//! Inspects the repository once per invocation to determine language,
//! package manager, Makefile targets, and workspace root. Pure read: the
//! result is never cached across processes, and unreadable state degrades
//! to defaults instead of failing.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;

/// How far up the tree the workspace-root walk will go.
const WORKSPACE_WALK_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Nodejs,
    Go,
    Rust,
}

impl Language {
    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Nodejs => "nodejs",
            Language::Go => "go",
            Language::Rust => "rust",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "python" | "py" => Some(Language::Python),
            "nodejs" | "node" | "javascript" | "typescript" => Some(Language::Nodejs),
            "go" | "golang" => Some(Language::Go),
            "rust" => Some(Language::Rust),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Pip,
    Poetry,
    Pipenv,
    Uv,
    Npm,
    Yarn,
    Pnpm,
    Bun,
    GoTool,
    Cargo,
}

impl PackageManager {
    pub fn name(&self) -> &'static str {
        match self {
            PackageManager::Pip => "pip",
            PackageManager::Poetry => "poetry",
            PackageManager::Pipenv => "pipenv",
            PackageManager::Uv => "uv",
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
            PackageManager::Pnpm => "pnpm",
            PackageManager::Bun => "bun",
            PackageManager::GoTool => "go",
            PackageManager::Cargo => "cargo",
        }
    }
}

/// Snapshot of everything detection learned about the repository.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedEnvironment {
    pub primary: Language,
    pub additional: Vec<Language>,
    /// 100 explicit override, 95 marker file, 50 fallback.
    pub confidence: u8,
    pub package_manager: PackageManager,
    pub lock_file: Option<String>,
    pub makefile_targets: Vec<String>,
    pub workspace_root: Option<PathBuf>,
}

/// Marker files per language, in detection priority order.
const LANGUAGE_MARKERS: &[(Language, &[&str])] = &[
    (
        Language::Python,
        &["pyproject.toml", "Pipfile", "requirements.txt"],
    ),
    (Language::Nodejs, &["package.json"]),
    (Language::Go, &["go.mod"]),
    (Language::Rust, &["Cargo.toml"]),
];

/// Lockfiles per language, in package-manager priority order.
const LOCKFILES: &[(Language, &[(&str, PackageManager)])] = &[
    (
        Language::Python,
        &[
            ("poetry.lock", PackageManager::Poetry),
            ("Pipfile.lock", PackageManager::Pipenv),
            ("uv.lock", PackageManager::Uv),
        ],
    ),
    (
        Language::Nodejs,
        &[
            ("pnpm-lock.yaml", PackageManager::Pnpm),
            ("yarn.lock", PackageManager::Yarn),
            ("bun.lockb", PackageManager::Bun),
            ("package-lock.json", PackageManager::Npm),
        ],
    ),
    (Language::Go, &[("go.sum", PackageManager::GoTool)]),
    (Language::Rust, &[("Cargo.lock", PackageManager::Cargo)]),
];

/// Detect the toolchain for a repository.
///
/// Deterministic given filesystem state; no network, no mutation.
pub fn detect(repo_root: &Path, config: &Config) -> DetectedEnvironment {
    // Explicit override wins outright
    let (primary, additional, confidence) = match config
        .language
        .as_deref()
        .and_then(Language::from_name)
    {
        Some(lang) => (lang, detected_languages(repo_root, Some(lang)), 100),
        None => {
            let found = detected_languages(repo_root, None);
            match found.split_first() {
                Some((first, rest)) => (*first, rest.to_vec(), 95),
                // Deliberate backward-compatibility default, not a guess
                None => (Language::Nodejs, Vec::new(), 50),
            }
        }
    };

    let (package_manager, lock_file) = resolve_package_manager(repo_root, primary);

    DetectedEnvironment {
        primary,
        additional,
        confidence,
        package_manager,
        lock_file,
        makefile_targets: makefile_targets(repo_root),
        workspace_root: find_workspace_root(repo_root),
    }
}

/// All languages with a marker file present, in priority order.
/// When `exclude` is set, that language is filtered out (it is the
/// explicitly overridden primary).
fn detected_languages(repo_root: &Path, exclude: Option<Language>) -> Vec<Language> {
    let mut found = Vec::new();
    for (language, markers) in LANGUAGE_MARKERS {
        if Some(*language) == exclude {
            continue;
        }
        if markers.iter().any(|m| repo_root.join(m).exists()) {
            found.push(*language);
        }
    }
    found
}

/// Lockfile-driven package-manager resolution with a fixed priority list.
fn resolve_package_manager(repo_root: &Path, language: Language) -> (PackageManager, Option<String>) {
    for (lang, entries) in LOCKFILES {
        if *lang != language {
            continue;
        }
        for (lockfile, manager) in *entries {
            if repo_root.join(lockfile).exists() {
                return (*manager, Some(lockfile.to_string()));
            }
        }
    }

    // No lockfile: each language has a by-default manager
    let fallback = match language {
        Language::Python => PackageManager::Pip,
        Language::Nodejs => PackageManager::Npm,
        Language::Go => PackageManager::GoTool,
        Language::Rust => PackageManager::Cargo,
    };
    (fallback, None)
}

/// Extract target names from a Makefile with a conservative line scan.
///
/// Skips comments, variable assignments, pattern rules (`%`), indented
/// recipe lines, and dot-targets. Absence or unreadable content yields an
/// empty list, never an error.
pub fn makefile_targets(repo_root: &Path) -> Vec<String> {
    let content = match fs::read_to_string(repo_root.join("Makefile")) {
        Ok(content) => content,
        Err(_) => return Vec::new(),
    };

    let mut targets = Vec::new();
    for line in content.lines() {
        if line.starts_with('\t') || line.starts_with('#') {
            continue;
        }
        let Some((head, _)) = line.split_once(':') else {
            continue;
        };
        let name = head.trim();
        if name.is_empty()
            || name.starts_with('.')
            || name.contains('%')
            || name.contains('=')
            || name.contains(' ')
            || name.contains('$')
        {
            continue;
        }
        // `foo := bar` splits at ':' leaving a clean name; reject assignments
        if line[head.len()..].starts_with(":=")
            || line[head.len() + 1..].trim_start().starts_with('=')
        {
            continue;
        }
        if !targets.contains(&name.to_string()) {
            targets.push(name.to_string());
        }
    }
    targets
}

/// Files whose presence marks a workspace root.
const WORKSPACE_MARKERS: &[&str] = &["pnpm-workspace.yaml", ".yarnrc.yml", "go.work"];

/// Walk parent directories (bounded) looking for a workspace marker.
/// First match wins; any traversal error yields `None`.
pub fn find_workspace_root(repo_root: &Path) -> Option<PathBuf> {
    let start = repo_root.canonicalize().ok()?;
    let mut current = start.as_path();

    for _ in 0..WORKSPACE_WALK_DEPTH {
        if is_workspace_root(current) {
            return Some(current.to_path_buf());
        }
        current = current.parent()?;
    }
    None
}

fn is_workspace_root(dir: &Path) -> bool {
    if WORKSPACE_MARKERS.iter().any(|m| dir.join(m).exists()) {
        return true;
    }

    // package.json with a "workspaces" key
    if let Ok(content) = fs::read_to_string(dir.join("package.json")) {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&content) {
            if json.get("workspaces").is_some() {
                return true;
            }
        }
    }

    // Cargo.toml with a [workspace] section
    if let Ok(content) = fs::read_to_string(dir.join("Cargo.toml")) {
        if let Ok(value) = content.parse::<toml::Table>() {
            if value.contains_key("workspace") {
                return true;
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) {
        fs::write(dir.path().join(name), "").unwrap();
    }

    #[test]
    fn test_package_json_only_is_nodejs_npm() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();

        let env = detect(dir.path(), &Config::default());
        assert_eq!(env.primary, Language::Nodejs);
        assert_eq!(env.package_manager, PackageManager::Npm);
        assert_eq!(env.confidence, 95);
        assert!(env.lock_file.is_none());
        assert!(env.additional.is_empty());
    }

    #[test]
    fn test_no_marker_falls_back_to_nodejs_50() {
        let dir = TempDir::new().unwrap();
        let env = detect(dir.path(), &Config::default());
        assert_eq!(env.primary, Language::Nodejs);
        assert_eq!(env.confidence, 50);
    }

    #[test]
    fn test_explicit_override_is_confidence_100() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "Cargo.toml");
        let mut config = Config::default();
        config.language = Some("python".to_string());

        let env = detect(dir.path(), &config);
        assert_eq!(env.primary, Language::Python);
        assert_eq!(env.confidence, 100);
        // Marker-detected languages still show up as additional
        assert_eq!(env.additional, vec![Language::Rust]);
    }

    #[test]
    fn test_multiple_markers_first_by_priority_wins() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "go.mod");
        touch(&dir, "pyproject.toml");

        let env = detect(dir.path(), &Config::default());
        assert_eq!(env.primary, Language::Python);
        assert_eq!(env.additional, vec![Language::Go]);
    }

    #[test]
    fn test_python_lockfile_priority() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "pyproject.toml");
        touch(&dir, "uv.lock");
        touch(&dir, "poetry.lock");

        let env = detect(dir.path(), &Config::default());
        assert_eq!(env.package_manager, PackageManager::Poetry);
        assert_eq!(env.lock_file.as_deref(), Some("poetry.lock"));
    }

    #[test]
    fn test_nodejs_pnpm_lockfile() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        touch(&dir, "pnpm-lock.yaml");

        let env = detect(dir.path(), &Config::default());
        assert_eq!(env.package_manager, PackageManager::Pnpm);
    }

    #[test]
    fn test_makefile_targets_conservative_scan() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("Makefile"),
            "# comment\n\
             VAR := value\n\
             OTHER = x\n\
             .PHONY: lint test\n\
             lint:\n\
             \tlint-recipe: not-a-target\n\
             %.o: %.c\n\
             test: lint\n\
             \techo run\n",
        )
        .unwrap();

        let targets = makefile_targets(dir.path());
        assert_eq!(targets, vec!["lint", "test"]);
    }

    #[test]
    fn test_makefile_absent_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(makefile_targets(dir.path()).is_empty());
    }

    #[test]
    fn test_workspace_root_found_in_parent() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pnpm-workspace.yaml"), "packages: []").unwrap();
        let nested = dir.path().join("packages/app");
        fs::create_dir_all(&nested).unwrap();

        let root = find_workspace_root(&nested).unwrap();
        assert_eq!(root, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_workspace_root_package_json_workspaces_key() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"name": "root", "workspaces": ["packages/*"]}"#,
        )
        .unwrap();

        assert!(find_workspace_root(dir.path()).is_some());
    }

    #[test]
    fn test_workspace_root_absent() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"name": "leaf"}"#).unwrap();
        // A plain package.json without workspaces does not mark a root; the
        // bounded walk may still hit an unrelated marker above the temp dir,
        // so only assert the temp dir itself is not reported.
        if let Some(root) = find_workspace_root(dir.path()) {
            assert_ne!(root, dir.path().canonicalize().unwrap());
        }
    }

    #[test]
    fn test_detection_is_deterministic() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "go.mod");
        touch(&dir, "go.sum");

        let a = detect(dir.path(), &Config::default());
        let b = detect(dir.path(), &Config::default());
        assert_eq!(a.primary, b.primary);
        assert_eq!(a.package_manager, b.package_manager);
        assert_eq!(a.makefile_targets, b.makefile_targets);
    }
}
