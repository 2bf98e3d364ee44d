//! Local verification
//!
//! Resolves and runs the configured verification tasks before push. An
//! unresolvable required task is reported as a skip with suggestions and
//! the run continues; a failing command stops the run when
//! `stop_on_first_failure` is set. Every command carries its own timeout.

use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::detect::DetectedEnvironment;
use crate::resolve::{
    resolve_with, BinaryProbe, CommandSource, ResolveRequest, ResolvedCommand, SystemProbe, Task,
};
use crate::suggest::KnownCommands;
use crate::util::{run_shell_with_timeout, truncate_output};

/// Cap on captured output kept per task for reporting.
const MAX_TASK_OUTPUT: usize = 1800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Passed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            TaskStatus::Passed => "+",
            TaskStatus::Failed => "●",
            TaskStatus::Skipped => "·",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task: Task,
    pub command: Option<String>,
    pub source: CommandSource,
    pub status: TaskStatus,
    /// Combined stdout/stderr (truncated)
    pub output: String,
    pub duration_ms: u64,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    pub outcomes: Vec<TaskOutcome>,
}

impl VerificationReport {
    /// True when no task failed (skips do not count against success).
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.status != TaskStatus::Failed)
    }

    pub fn failed_tasks(&self) -> Vec<Task> {
        self.outcomes
            .iter()
            .filter(|o| o.status == TaskStatus::Failed)
            .map(|o| o.task)
            .collect()
    }
}

/// Run all configured verification tasks against the real PATH.
pub fn run(repo_root: &Path, env: &DetectedEnvironment, config: &Config) -> VerificationReport {
    run_with(repo_root, env, config, &SystemProbe)
}

/// Run all configured verification tasks with an injected binary probe.
pub fn run_with(
    repo_root: &Path,
    env: &DetectedEnvironment,
    config: &Config,
    probe: &dyn BinaryProbe,
) -> VerificationReport {
    let timeout = Duration::from_secs(config.task_timeout_secs);
    let mut report = VerificationReport::default();

    for task_name in config.effective_tasks() {
        let Some(task) = Task::from_name(&task_name) else {
            continue;
        };
        let resolved = resolve_task(task, env, config, probe);

        let outcome = match &resolved.command {
            None => TaskOutcome {
                task,
                command: None,
                source: resolved.source,
                status: TaskStatus::Skipped,
                output: String::new(),
                duration_ms: 0,
                suggestions: resolved.suggestions.clone(),
            },
            Some(command) => execute(repo_root, task, &resolved, command, timeout),
        };

        let failed = outcome.status == TaskStatus::Failed;
        report.outcomes.push(outcome);

        if failed && config.stop_on_first_failure {
            break;
        }
    }

    report
}

fn execute(
    repo_root: &Path,
    task: Task,
    resolved: &ResolvedCommand,
    command: &str,
    timeout: Duration,
) -> TaskOutcome {
    let start = std::time::Instant::now();

    match run_shell_with_timeout(repo_root, command, timeout) {
        Ok(run) => {
            let mut output = truncate_output(&run.combined_output(), MAX_TASK_OUTPUT);
            let status = if run.success() {
                TaskStatus::Passed
            } else {
                if run.timed_out {
                    output = format!("Timed out after {}s\n{}", timeout.as_secs(), output);
                }
                TaskStatus::Failed
            };
            TaskOutcome {
                task,
                command: Some(command.to_string()),
                source: resolved.source,
                status,
                output,
                duration_ms: start.elapsed().as_millis() as u64,
                suggestions: Vec::new(),
            }
        }
        // The shell itself could not start; treat like an absent tool
        Err(e) => TaskOutcome {
            task,
            command: Some(command.to_string()),
            source: resolved.source,
            status: TaskStatus::Skipped,
            output: format!("Skipped: {}", e),
            duration_ms: start.elapsed().as_millis() as u64,
            suggestions: Vec::new(),
        },
    }
}

fn resolve_task(
    task: Task,
    env: &DetectedEnvironment,
    config: &Config,
    probe: &dyn BinaryProbe,
) -> ResolvedCommand {
    resolve_with(
        &ResolveRequest {
            task,
            language: env.primary,
            package_manager: env.package_manager,
            makefile_targets: &env.makefile_targets,
            config,
        },
        probe,
    )
}

/// Resolve every task once so suggestion templates can be parameterized by
/// the project's own commands.
pub fn known_commands(
    env: &DetectedEnvironment,
    config: &Config,
    probe: &dyn BinaryProbe,
) -> KnownCommands {
    let resolve = |task| resolve_task(task, env, config, probe).command;
    KnownCommands {
        format: resolve(Task::Format),
        lint: resolve(Task::Lint),
        typecheck: resolve(Task::Typecheck),
        test: resolve(Task::Test),
        build: resolve(Task::Build),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect;
    use tempfile::TempDir;

    struct NoTools;

    impl BinaryProbe for NoTools {
        fn is_available(&self, _binary: &str) -> bool {
            false
        }
    }

    fn python_env(dir: &TempDir) -> DetectedEnvironment {
        std::fs::write(dir.path().join("requirements.txt"), "").unwrap();
        detect::detect(dir.path(), &Config::default())
    }

    #[cfg(unix)]
    #[test]
    fn test_passing_and_failing_commands() {
        let dir = TempDir::new().unwrap();
        let env = python_env(&dir);

        let mut config = Config::default();
        config.tasks = vec!["lint".to_string(), "test".to_string()];
        config.stop_on_first_failure = false;
        config.commands.insert("lint".to_string(), "true".to_string());
        config.commands.insert("test".to_string(), "false".to_string());

        let report = run_with(dir.path(), &env, &config, &NoTools);
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].status, TaskStatus::Passed);
        assert_eq!(report.outcomes[1].status, TaskStatus::Failed);
        assert!(!report.passed());
        assert_eq!(report.failed_tasks(), vec![Task::Test]);
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_on_first_failure() {
        let dir = TempDir::new().unwrap();
        let env = python_env(&dir);

        let mut config = Config::default();
        config.tasks = vec!["lint".to_string(), "test".to_string()];
        config.commands.insert("lint".to_string(), "false".to_string());
        config.commands.insert("test".to_string(), "true".to_string());

        let report = run_with(dir.path(), &env, &config, &NoTools);
        // test never ran
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].status, TaskStatus::Failed);
    }

    #[test]
    fn test_optional_unresolved_task_is_silent_skip() {
        let dir = TempDir::new().unwrap();
        let env = python_env(&dir);

        let mut config = Config::default();
        config.tasks = vec!["build".to_string()];

        let report = run_with(dir.path(), &env, &config, &NoTools);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].status, TaskStatus::Skipped);
        assert!(report.outcomes[0].suggestions.is_empty());
        assert!(report.passed());
    }

    #[test]
    fn test_required_unresolved_task_skips_with_suggestions() {
        let dir = TempDir::new().unwrap();
        let env = python_env(&dir);

        let mut config = Config::default();
        config.tasks = vec!["lint".to_string()];

        let report = run_with(dir.path(), &env, &config, &NoTools);
        assert_eq!(report.outcomes[0].status, TaskStatus::Skipped);
        assert!(!report.outcomes[0].suggestions.is_empty());
        // Skips never fail the run on their own
        assert!(report.passed());
    }

    #[cfg(unix)]
    #[test]
    fn test_known_commands_resolution() {
        let dir = TempDir::new().unwrap();
        let env = python_env(&dir);

        let mut config = Config::default();
        config
            .commands
            .insert("format".to_string(), "black --check .".to_string());

        let known = known_commands(&env, &config, &NoTools);
        assert_eq!(known.format.as_deref(), Some("black --check ."));
        assert!(known.lint.is_none());
        assert!(known.build.is_none());
    }
}
