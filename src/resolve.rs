//! Command resolution
//!
//! Turns an abstract verification task ("lint", "test", ...) into one
//! concrete shell command for the detected environment via a fixed
//! priority chain:
//!
//! 1. config-supplied literal command override
//! 2. Makefile target (explicit mapping, alias, then literal name)
//! 3. package-manager-adapted command from a static lookup table
//! 4. first native tool candidate present on PATH
//! 5. not-found (optional tasks silently, required tasks with suggestions)
//!
//! Resolution is side-effect-free besides the PATH probe and deterministic
//! for identical inputs.

use serde::Serialize;

use crate::config::Config;
use crate::detect::{Language, PackageManager};

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Format,
    Lint,
    Typecheck,
    Test,
    Build,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Format => "format",
            Task::Lint => "lint",
            Task::Typecheck => "typecheck",
            Task::Test => "test",
            Task::Build => "build",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "format" | "fmt" => Some(Task::Format),
            "lint" => Some(Task::Lint),
            "typecheck" | "types" => Some(Task::Typecheck),
            "test" | "tests" => Some(Task::Test),
            "build" => Some(Task::Build),
            _ => None,
        }
    }

    /// Whether an unresolvable task is acceptable for a language.
    ///
    /// Optionality is a static property of the task, not a per-call-site
    /// judgment: e.g. Python projects have no build step, and Go has no
    /// separate type checker (the compiler covers it).
    pub fn is_optional_for(&self, language: Language) -> bool {
        matches!(
            (self, language),
            (Task::Build, Language::Python)
                | (Task::Typecheck, Language::Python)
                | (Task::Typecheck, Language::Nodejs)
                | (Task::Typecheck, Language::Go)
        )
    }
}

// ============================================================================
// Resolved commands
// ============================================================================

/// Which tier of the priority chain produced a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandSource {
    Config,
    Makefile,
    PackageManager,
    Native,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedCommand {
    pub task: Task,
    pub command: Option<String>,
    pub source: CommandSource,
    pub package_manager: Option<PackageManager>,
    pub optional: bool,
    /// Populated only for required tasks that could not be resolved.
    pub suggestions: Vec<String>,
}

pub struct ResolveRequest<'a> {
    pub task: Task,
    pub language: Language,
    pub package_manager: PackageManager,
    pub makefile_targets: &'a [String],
    pub config: &'a Config,
}

// ============================================================================
// PATH probing
// ============================================================================

/// Seam for checking whether a binary exists on PATH, so resolution stays
/// deterministic under test.
pub trait BinaryProbe {
    fn is_available(&self, binary: &str) -> bool;
}

/// Probes the real PATH by scanning its directories for the executable.
/// A filesystem scan, not a subprocess, so it cannot hang.
pub struct SystemProbe;

impl BinaryProbe for SystemProbe {
    fn is_available(&self, binary: &str) -> bool {
        let Some(path_var) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&path_var).any(|dir| {
            let candidate = dir.join(binary);
            if candidate.is_file() {
                return true;
            }
            if cfg!(windows) {
                return dir.join(format!("{}.exe", binary)).is_file();
            }
            false
        })
    }
}

// ============================================================================
// Static command tables
// ============================================================================

/// Package-manager-adapted commands: `(language, manager, task) -> command`.
///
/// Languages whose package manager doubles as the build tool (Go, Rust) are
/// fully covered here; Python-without-a-runner (plain pip) deliberately has
/// no entries so resolution falls through to the PATH-probed native tier.
fn package_manager_command(
    language: Language,
    manager: PackageManager,
    task: Task,
) -> Option<&'static str> {
    use Language::*;
    use PackageManager::*;
    use Task::*;

    let command = match (language, manager, task) {
        (Nodejs, Npm, Format) => "npm run format",
        (Nodejs, Npm, Lint) => "npm run lint",
        (Nodejs, Npm, Typecheck) => "npm run typecheck",
        (Nodejs, Npm, Test) => "npm test",
        (Nodejs, Npm, Build) => "npm run build",

        (Nodejs, Yarn, Format) => "yarn format",
        (Nodejs, Yarn, Lint) => "yarn lint",
        (Nodejs, Yarn, Typecheck) => "yarn typecheck",
        (Nodejs, Yarn, Test) => "yarn test",
        (Nodejs, Yarn, Build) => "yarn build",

        (Nodejs, Pnpm, Format) => "pnpm run format",
        (Nodejs, Pnpm, Lint) => "pnpm run lint",
        (Nodejs, Pnpm, Typecheck) => "pnpm run typecheck",
        (Nodejs, Pnpm, Test) => "pnpm test",
        (Nodejs, Pnpm, Build) => "pnpm run build",

        (Nodejs, Bun, Format) => "bun run format",
        (Nodejs, Bun, Lint) => "bun run lint",
        (Nodejs, Bun, Typecheck) => "bun run typecheck",
        (Nodejs, Bun, Test) => "bun test",
        (Nodejs, Bun, Build) => "bun run build",

        (Python, Poetry, Format) => "poetry run black --check .",
        (Python, Poetry, Lint) => "poetry run ruff check .",
        (Python, Poetry, Typecheck) => "poetry run mypy .",
        (Python, Poetry, Test) => "poetry run pytest",

        (Python, Pipenv, Format) => "pipenv run black --check .",
        (Python, Pipenv, Lint) => "pipenv run ruff check .",
        (Python, Pipenv, Typecheck) => "pipenv run mypy .",
        (Python, Pipenv, Test) => "pipenv run pytest",

        (Python, Uv, Format) => "uv run black --check .",
        (Python, Uv, Lint) => "uv run ruff check .",
        (Python, Uv, Typecheck) => "uv run mypy .",
        (Python, Uv, Test) => "uv run pytest",

        (Go, GoTool, Format) => "gofmt -l .",
        (Go, GoTool, Lint) => "go vet ./...",
        (Go, GoTool, Test) => "go test ./...",
        (Go, GoTool, Build) => "go build ./...",

        (Rust, Cargo, Format) => "cargo fmt -- --check",
        (Rust, Cargo, Lint) => "cargo clippy -- -D warnings",
        (Rust, Cargo, Typecheck) => "cargo check",
        (Rust, Cargo, Test) => "cargo test",
        (Rust, Cargo, Build) => "cargo build",

        _ => return None,
    };
    Some(command)
}

/// Native tool candidates per `(language, task)`, in preference order:
/// `(binary to probe, command to run)`.
fn native_candidates(language: Language, task: Task) -> &'static [(&'static str, &'static str)] {
    use Language::*;
    use Task::*;

    match (language, task) {
        (Python, Format) => &[
            ("black", "black --check ."),
            ("ruff", "ruff format --check ."),
        ],
        (Python, Lint) => &[
            ("ruff", "ruff check ."),
            ("flake8", "flake8"),
            ("pylint", "pylint ."),
        ],
        (Python, Typecheck) => &[("mypy", "mypy ."), ("pyright", "pyright")],
        (Python, Test) => &[("pytest", "pytest")],
        (Nodejs, Format) => &[("prettier", "prettier --check .")],
        (Nodejs, Lint) => &[("eslint", "eslint .")],
        (Nodejs, Typecheck) => &[("tsc", "tsc --noEmit")],
        (Go, Format) => &[("gofmt", "gofmt -l .")],
        (Go, Lint) => &[("golangci-lint", "golangci-lint run")],
        _ => &[],
    }
}

/// Static install hint for an unresolvable required task.
fn install_hint(task: Task, language: Language) -> Option<&'static str> {
    use Language::*;
    use Task::*;

    let hint = match (task, language) {
        (Format, Python) => "pip install black",
        (Lint, Python) => "pip install ruff",
        (Test, Python) => "pip install pytest",
        (Format, Nodejs) => "npm install --save-dev prettier",
        (Lint, Nodejs) => "npm install --save-dev eslint",
        (Test, Nodejs) => "add a \"test\" script to package.json",
        (Build, Nodejs) => "add a \"build\" script to package.json",
        (Lint, Go) => "go install github.com/golangci/golangci-lint/cmd/golangci-lint@latest",
        (Lint, Rust) => "rustup component add clippy",
        (Format, Rust) => "rustup component add rustfmt",
        _ => return None,
    };
    Some(hint)
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolve a task against the real PATH.
pub fn resolve(request: &ResolveRequest) -> ResolvedCommand {
    resolve_with(request, &SystemProbe)
}

/// Resolve a task with an injected binary probe.
pub fn resolve_with(request: &ResolveRequest, probe: &dyn BinaryProbe) -> ResolvedCommand {
    let task = request.task;

    // 1. Config override
    if let Some(command) = request.config.command_override(task.as_str()) {
        return ResolvedCommand {
            task,
            command: Some(command.to_string()),
            source: CommandSource::Config,
            package_manager: None,
            optional: false,
            suggestions: Vec::new(),
        };
    }

    // 2. Makefile target
    if request.config.prefer_makefile {
        if let Some(target) = makefile_target_for(task, request) {
            return ResolvedCommand {
                task,
                command: Some(format!("make {}", target)),
                source: CommandSource::Makefile,
                package_manager: None,
                optional: false,
                suggestions: Vec::new(),
            };
        }
    }

    // 3. Package-manager-adapted command
    if let Some(command) = package_manager_command(request.language, request.package_manager, task)
    {
        return ResolvedCommand {
            task,
            command: Some(command.to_string()),
            source: CommandSource::PackageManager,
            package_manager: Some(request.package_manager),
            optional: false,
            suggestions: Vec::new(),
        };
    }

    // 4. Native tool present on PATH
    for (binary, command) in native_candidates(request.language, task) {
        if probe.is_available(binary) {
            return ResolvedCommand {
                task,
                command: Some(command.to_string()),
                source: CommandSource::Native,
                package_manager: None,
                optional: false,
                suggestions: Vec::new(),
            };
        }
    }

    // 5. Not found
    let optional = task.is_optional_for(request.language);
    let suggestions = if optional {
        Vec::new()
    } else {
        not_found_suggestions(task, request)
    };

    ResolvedCommand {
        task,
        command: None,
        source: CommandSource::NotFound,
        package_manager: None,
        optional,
        suggestions,
    }
}

/// Makefile tier: explicit mapping, then alias reverse-mapping, then the
/// literal task name against the scanned target list.
fn makefile_target_for(task: Task, request: &ResolveRequest) -> Option<String> {
    let config = request.config;

    if let Some(target) = config.makefile_targets.get(task.as_str()) {
        return Some(target.clone());
    }

    for (target, aliased_task) in &config.makefile_aliases {
        if aliased_task == task.as_str() && request.makefile_targets.contains(target) {
            return Some(target.clone());
        }
    }

    if request
        .makefile_targets
        .iter()
        .any(|t| t == task.as_str())
    {
        return Some(task.as_str().to_string());
    }

    None
}

fn not_found_suggestions(task: Task, request: &ResolveRequest) -> Vec<String> {
    let mut suggestions = Vec::new();

    // Nearby Makefile targets (substring match against the task name)
    let task_name = task.as_str();
    let nearby: Vec<&str> = request
        .makefile_targets
        .iter()
        .filter(|t| t.contains(task_name) || task_name.contains(t.as_str()))
        .map(|t| t.as_str())
        .collect();
    if !nearby.is_empty() {
        suggestions.push(format!(
            "Similar Makefile targets exist: {}",
            nearby.join(", ")
        ));
    }

    suggestions.push(format!(
        "Override in {}: [commands] {} = \"<your command>\"",
        crate::config::REPO_CONFIG_FILE,
        task_name
    ));

    if let Some(hint) = install_hint(task, request.language) {
        suggestions.push(format!("Install a {} tool: {}", task_name, hint));
    }

    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProbe(Vec<&'static str>);

    impl BinaryProbe for FakeProbe {
        fn is_available(&self, binary: &str) -> bool {
            self.0.contains(&binary)
        }
    }

    fn request<'a>(
        task: Task,
        language: Language,
        package_manager: PackageManager,
        makefile_targets: &'a [String],
        config: &'a Config,
    ) -> ResolveRequest<'a> {
        ResolveRequest {
            task,
            language,
            package_manager,
            makefile_targets,
            config,
        }
    }

    #[test]
    fn test_config_override_wins() {
        let mut config = Config::default();
        config
            .commands
            .insert("lint".to_string(), "make custom-lint".to_string());
        let targets = vec!["lint".to_string()];
        let req = request(
            Task::Lint,
            Language::Rust,
            PackageManager::Cargo,
            &targets,
            &config,
        );

        let resolved = resolve_with(&req, &FakeProbe(vec![]));
        assert_eq!(resolved.source, CommandSource::Config);
        assert_eq!(resolved.command.as_deref(), Some("make custom-lint"));
    }

    #[test]
    fn test_makefile_literal_target() {
        let config = Config::default();
        let targets = vec!["lint".to_string(), "deploy".to_string()];
        let req = request(
            Task::Lint,
            Language::Go,
            PackageManager::GoTool,
            &targets,
            &config,
        );

        let resolved = resolve_with(&req, &FakeProbe(vec![]));
        assert_eq!(resolved.source, CommandSource::Makefile);
        assert_eq!(resolved.command.as_deref(), Some("make lint"));
    }

    #[test]
    fn test_makefile_alias_reverse_mapping() {
        let mut config = Config::default();
        config
            .makefile_aliases
            .insert("check-style".to_string(), "lint".to_string());
        let targets = vec!["check-style".to_string()];
        let req = request(
            Task::Lint,
            Language::Python,
            PackageManager::Pip,
            &targets,
            &config,
        );

        let resolved = resolve_with(&req, &FakeProbe(vec![]));
        assert_eq!(resolved.source, CommandSource::Makefile);
        assert_eq!(resolved.command.as_deref(), Some("make check-style"));
    }

    #[test]
    fn test_prefer_makefile_false_skips_targets() {
        let mut config = Config::default();
        config.prefer_makefile = false;
        let targets = vec!["test".to_string()];
        let req = request(
            Task::Test,
            Language::Rust,
            PackageManager::Cargo,
            &targets,
            &config,
        );

        let resolved = resolve_with(&req, &FakeProbe(vec![]));
        assert_eq!(resolved.source, CommandSource::PackageManager);
        assert_eq!(resolved.command.as_deref(), Some("cargo test"));
    }

    #[test]
    fn test_package_manager_adaptation() {
        let config = Config::default();
        let req = request(
            Task::Test,
            Language::Nodejs,
            PackageManager::Yarn,
            &[],
            &config,
        );

        let resolved = resolve_with(&req, &FakeProbe(vec![]));
        assert_eq!(resolved.source, CommandSource::PackageManager);
        assert_eq!(resolved.command.as_deref(), Some("yarn test"));
        assert_eq!(resolved.package_manager, Some(PackageManager::Yarn));
    }

    #[test]
    fn test_native_tier_first_available_candidate() {
        let config = Config::default();
        let req = request(
            Task::Lint,
            Language::Python,
            PackageManager::Pip,
            &[],
            &config,
        );

        // ruff missing, flake8 present -> second candidate wins
        let resolved = resolve_with(&req, &FakeProbe(vec!["flake8"]));
        assert_eq!(resolved.source, CommandSource::Native);
        assert_eq!(resolved.command.as_deref(), Some("flake8"));
    }

    #[test]
    fn test_python_build_not_found_is_optional() {
        let config = Config::default();
        let req = request(
            Task::Build,
            Language::Python,
            PackageManager::Pip,
            &[],
            &config,
        );

        let resolved = resolve_with(&req, &FakeProbe(vec![]));
        assert_eq!(resolved.source, CommandSource::NotFound);
        assert!(resolved.optional);
        assert!(resolved.command.is_none());
        assert!(resolved.suggestions.is_empty());
    }

    #[test]
    fn test_required_not_found_carries_suggestions() {
        let config = Config::default();
        let targets = vec!["lint-all".to_string(), "deploy".to_string()];
        let req = request(
            Task::Lint,
            Language::Python,
            PackageManager::Pip,
            &targets,
            &config,
        );

        let resolved = resolve_with(&req, &FakeProbe(vec![]));
        assert_eq!(resolved.source, CommandSource::NotFound);
        assert!(!resolved.optional);
        assert!(resolved
            .suggestions
            .iter()
            .any(|s| s.contains("lint-all")));
        assert!(resolved
            .suggestions
            .iter()
            .any(|s| s.contains("branchpilot.toml")));
        assert!(resolved.suggestions.iter().any(|s| s.contains("ruff")));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut config = Config::default();
        config
            .makefile_aliases
            .insert("verify".to_string(), "test".to_string());
        let targets = vec!["verify".to_string()];
        let req = request(
            Task::Test,
            Language::Go,
            PackageManager::GoTool,
            &targets,
            &config,
        );
        let probe = FakeProbe(vec!["gofmt"]);

        let first = resolve_with(&req, &probe);
        let second = resolve_with(&req, &probe);
        assert_eq!(first, second);
    }
}
