//! Auto-fix orchestration
//!
//! Applies deterministic fixes for auto-fixable CI failures: run the fix
//! command on the PR branch, bound the damage by changed-line count,
//! optionally re-verify, then commit to a dedicated fix branch and open a
//! fix PR. Every abort path discards all working-tree changes first, so
//! the tree is never left partially applied.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::checks::FailureDetail;
use crate::classify::ErrorType;
use crate::config::Config;
use crate::detect::DetectedEnvironment;
use crate::git_ops;
use crate::github::GithubClient;
use crate::util::run_shell_with_timeout;
use crate::verify;

#[derive(Debug, Clone)]
pub struct AutoFixResult {
    pub success: bool,
    pub reason: Option<String>,
    pub pr_number: Option<u64>,
    pub changed_lines: Option<usize>,
    pub attempts: u32,
    pub error_type: ErrorType,
    pub verification_failed: bool,
    pub rolled_back: bool,
}

impl AutoFixResult {
    fn rejected(error_type: ErrorType, attempts: u32, reason: &str) -> Self {
        Self {
            success: false,
            reason: Some(reason.to_string()),
            pr_number: None,
            changed_lines: None,
            attempts,
            error_type,
            verification_failed: false,
            rolled_back: false,
        }
    }
}

/// A fix committed to a local branch, awaiting push + PR.
#[derive(Debug)]
pub struct StagedFix {
    pub branch: String,
    pub commit_sha: String,
    pub changed_lines: usize,
    pub attempts: u32,
    pub error_type: ErrorType,
    pub check_name: String,
}

/// Local outcome of a fix attempt, before anything touches the network.
#[derive(Debug)]
pub enum FixOutcome {
    Aborted(AutoFixResult),
    Staged(StagedFix),
}

/// Orchestrates fix attempts for one pipeline run.
///
/// The per-(error type, check name) attempt counters live here and reset
/// with each new orchestrator, i.e. once per pipeline run.
pub struct AutoFixer<'a> {
    repo_root: PathBuf,
    config: &'a Config,
    attempts: HashMap<(ErrorType, String), u32>,
}

impl<'a> AutoFixer<'a> {
    pub fn new(repo_root: &Path, config: &'a Config) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            config,
            attempts: HashMap::new(),
        }
    }

    /// Full fix attempt: local preparation, then push and fix PR.
    pub async fn attempt_fix(
        &mut self,
        detail: &FailureDetail,
        pr_number: u64,
        pr_branch: &str,
        env: &DetectedEnvironment,
        github: &GithubClient,
    ) -> Result<AutoFixResult> {
        let staged = match self.prepare_fix(detail, pr_branch, env)? {
            FixOutcome::Aborted(result) => return Ok(result),
            FixOutcome::Staged(staged) => staged,
        };

        git_ops::push_branch(&self.repo_root, &staged.branch)?;

        let title = format!("Fix {} in `{}`", staged.error_type.name(), staged.check_name);
        let body = format!(
            "Automated fix for the failing `{}` check on PR #{}.\n\n\
             {} changed line(s), verified locally before commit.",
            staged.check_name, pr_number, staged.changed_lines
        );
        let fix_pr = github
            .create_pull_request(pr_branch, &staged.branch, &title, &body)
            .await
            .context("Failed to open fix PR")?;

        if self.config.auto_fix.auto_merge {
            github.merge_pull_request(fix_pr.number).await?;
        }

        Ok(AutoFixResult {
            success: true,
            reason: None,
            pr_number: Some(fix_pr.number),
            changed_lines: Some(staged.changed_lines),
            attempts: staged.attempts,
            error_type: staged.error_type,
            verification_failed: false,
            rolled_back: false,
        })
    }

    /// Local phase: validate, apply the fix command, enforce bounds, and
    /// commit to a dedicated fix branch. Never touches the network.
    pub fn prepare_fix(
        &mut self,
        detail: &FailureDetail,
        pr_branch: &str,
        env: &DetectedEnvironment,
    ) -> Result<FixOutcome> {
        let error_type = detail.error_type;
        let key = (error_type, detail.check_name.clone());
        let prior_attempts = *self.attempts.get(&key).unwrap_or(&0);

        if !self.config.auto_fix.enabled {
            return Ok(FixOutcome::Aborted(AutoFixResult::rejected(
                error_type,
                prior_attempts,
                "auto-fix is disabled",
            )));
        }

        let fix_command = match &detail.suggested_fix {
            Some(s) if s.auto_fixable => match &s.command {
                Some(command) => command.clone(),
                None => {
                    return Ok(FixOutcome::Aborted(AutoFixResult::rejected(
                        error_type,
                        prior_attempts,
                        "no fix command available",
                    )))
                }
            },
            _ => {
                return Ok(FixOutcome::Aborted(AutoFixResult::rejected(
                    error_type,
                    prior_attempts,
                    "failure is not auto-fixable",
                )))
            }
        };

        if prior_attempts >= self.config.auto_fix.max_attempts {
            return Ok(FixOutcome::Aborted(AutoFixResult::rejected(
                error_type,
                prior_attempts,
                "attempt cap reached for this check",
            )));
        }
        let attempts = prior_attempts + 1;
        self.attempts.insert(key, attempts);

        // Single-invocation-per-working-directory assumption: anything
        // already in the tree means another process (or the user) is mid-
        // change, so fail fast instead of interleaving.
        if !git_ops::is_clean(&self.repo_root)? {
            return Ok(FixOutcome::Aborted(AutoFixResult::rejected(
                error_type,
                attempts,
                "working tree is not clean",
            )));
        }

        let original_branch = git_ops::current_branch(&self.repo_root)?;
        if original_branch != pr_branch {
            git_ops::checkout_branch(&self.repo_root, pr_branch)?;
        }

        let restore = |rolled_back: bool| -> Result<()> {
            if rolled_back {
                git_ops::discard_all_changes(&self.repo_root)?;
            }
            if original_branch != pr_branch {
                git_ops::checkout_branch(&self.repo_root, &original_branch)?;
            }
            Ok(())
        };

        let timeout = Duration::from_secs(self.config.task_timeout_secs);
        let run = match run_shell_with_timeout(&self.repo_root, &fix_command, timeout) {
            Ok(run) => run,
            Err(e) => {
                restore(true)?;
                return Ok(FixOutcome::Aborted(AutoFixResult {
                    rolled_back: true,
                    ..AutoFixResult::rejected(
                        error_type,
                        attempts,
                        &format!("fix command could not run: {}", e),
                    )
                }));
            }
        };
        if run.timed_out {
            restore(true)?;
            return Ok(FixOutcome::Aborted(AutoFixResult {
                rolled_back: true,
                ..AutoFixResult::rejected(error_type, attempts, "fix command timed out")
            }));
        }

        let changed_lines = git_ops::changed_line_count(&self.repo_root)?;

        if changed_lines == 0 {
            restore(true)?;
            return Ok(FixOutcome::Aborted(AutoFixResult {
                rolled_back: true,
                ..AutoFixResult::rejected(error_type, attempts, "fix command changed nothing")
            }));
        }

        if changed_lines > self.config.auto_fix.max_changed_lines as usize {
            restore(true)?;
            return Ok(FixOutcome::Aborted(AutoFixResult {
                success: false,
                reason: Some(format!(
                    "fix changed {} lines, above the {}-line bound",
                    changed_lines, self.config.auto_fix.max_changed_lines
                )),
                pr_number: None,
                changed_lines: Some(changed_lines),
                attempts,
                error_type,
                verification_failed: false,
                rolled_back: true,
            }));
        }

        if self.config.auto_fix.require_tests {
            let report = verify::run(&self.repo_root, env, self.config);
            if !report.passed() {
                restore(true)?;
                return Ok(FixOutcome::Aborted(AutoFixResult {
                    success: false,
                    reason: Some("local verification failed after applying fix".to_string()),
                    pr_number: None,
                    changed_lines: Some(changed_lines),
                    attempts,
                    error_type,
                    verification_failed: true,
                    rolled_back: true,
                }));
            }
        }

        let fix_branch =
            git_ops::generate_fix_branch_name(&detail.check_name, error_type.name());
        git_ops::create_and_checkout_branch(&self.repo_root, &fix_branch)?;
        git_ops::stage_all(&self.repo_root)?;
        let commit_sha = git_ops::commit(
            &self.repo_root,
            &format!("Fix {} reported by `{}`", error_type.name(), detail.check_name),
        )?;

        // Leave the tree on the branch the caller started from
        if original_branch != fix_branch {
            git_ops::checkout_branch(&self.repo_root, &original_branch)?;
        }

        Ok(FixOutcome::Staged(StagedFix {
            branch: fix_branch,
            commit_sha,
            changed_lines,
            attempts,
            error_type,
            check_name: detail.check_name.clone(),
        }))
    }
}
