//! Workflow configuration
//!
//! Loaded from `branchpilot.toml` at the repository root, falling back to
//! ~/.config/branchpilot/config.toml, then to defaults. A corrupt file is
//! backed up and replaced by defaults rather than aborting the run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-repository config file.
pub const REPO_CONFIG_FILE: &str = "branchpilot.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Explicit language override (detection confidence 100 when set).
    pub language: Option<String>,
    /// Prefer Makefile targets over package-manager commands.
    pub prefer_makefile: bool,
    /// Explicit task -> Makefile target mapping.
    pub makefile_targets: HashMap<String, String>,
    /// Reverse mapping: Makefile target name -> task it fulfills.
    pub makefile_aliases: HashMap<String, String>,
    /// Ordered verification tasks to run before push.
    pub tasks: Vec<String>,
    /// Tasks to skip even if listed in `tasks`.
    pub skip_tasks: Vec<String>,
    /// Stop local verification at the first failing task.
    pub stop_on_first_failure: bool,
    /// Literal command overrides per task (highest resolution priority).
    pub commands: HashMap<String, String>,
    /// Hard deadline for each local verification command, in seconds.
    pub task_timeout_secs: u64,
    pub ci: CiConfig,
    pub auto_fix: AutoFixConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CiConfig {
    /// Overall polling deadline, in seconds.
    pub timeout_secs: u64,
    /// Sleep between poll cycles, in seconds.
    pub poll_interval_secs: u64,
    /// Terminate on the first hard failure instead of waiting for all checks.
    pub fail_fast: bool,
    /// Grant flapping checks extra cycles before counting them terminal.
    pub retry_flaky: bool,
    /// Extra cycles granted to each flapping check.
    pub flaky_grace_cycles: u32,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 1800,
            poll_interval_secs: 30,
            fail_fast: true,
            retry_flaky: false,
            flaky_grace_cycles: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoFixConfig {
    pub enabled: bool,
    /// Attempt cap per (error type, check name).
    pub max_attempts: u32,
    /// Abort (and roll back) when a fix touches more lines than this.
    pub max_changed_lines: u32,
    /// Re-run local verification before committing a fix.
    pub require_tests: bool,
    /// Merge the fix PR automatically. Off unless explicitly configured.
    pub auto_merge: bool,
}

impl Default for AutoFixConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 2,
            max_changed_lines: 100,
            require_tests: true,
            auto_merge: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            language: None,
            prefer_makefile: true,
            makefile_targets: HashMap::new(),
            makefile_aliases: HashMap::new(),
            tasks: default_tasks(),
            skip_tasks: Vec::new(),
            stop_on_first_failure: true,
            commands: HashMap::new(),
            task_timeout_secs: 900,
            ci: CiConfig::default(),
            auto_fix: AutoFixConfig::default(),
        }
    }
}

fn default_tasks() -> Vec<String> {
    ["format", "lint", "typecheck", "test", "build"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Config {
    /// Get the user-level config directory path.
    fn user_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("branchpilot"))
    }

    fn user_config_path() -> Option<PathBuf> {
        Self::user_config_dir().map(|p| p.join("config.toml"))
    }

    /// Load config for a repository: repo-root file first, then the
    /// user-level file, then defaults.
    pub fn load(repo_root: &Path) -> Self {
        let repo_path = repo_root.join(REPO_CONFIG_FILE);
        if let Some(config) = Self::load_file(&repo_path) {
            return config;
        }
        if let Some(path) = Self::user_config_path() {
            if let Some(config) = Self::load_file(&path) {
                return config;
            }
        }
        Self::default()
    }

    fn load_file(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(config) => Some(config),
            Err(err) => {
                preserve_corrupt_config(path, &content);
                eprintln!(
                    "  Warning: Config file {} was corrupted ({}). A backup was saved and defaults were loaded.",
                    path.display(),
                    err
                );
                None
            }
        }
    }

    /// The effective ordered task list (tasks minus skip_tasks).
    pub fn effective_tasks(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| !self.skip_tasks.contains(t))
            .cloned()
            .collect()
    }

    /// Literal command override for a task, if configured.
    pub fn command_override(&self, task: &str) -> Option<&str> {
        self.commands.get(task).map(|s| s.as_str())
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("toml.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}
