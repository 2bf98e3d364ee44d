//! Pipeline state machine for the verify-and-ship process
//!
//! Tracks progress through: detect -> verify -> push -> PR -> checks ->
//! fix, and wires the stages together. All user-facing printing stays in
//! the CLI layer; the pipeline reports through state and progress
//! callbacks and returned values.

use anyhow::{Context, Result};
use std::path::Path;

use crate::autofix::AutoFixer;
use crate::checks::{self, CheckResult, PollOptions, ProgressUpdate};
use crate::config::Config;
use crate::detect::{self, DetectedEnvironment};
use crate::github::{GithubClient, PullRequest};
use crate::resolve::SystemProbe;
use crate::verify::{self, VerificationReport};

/// The current state of the ship pipeline
#[derive(Debug, Clone, Default)]
pub enum PipelineState {
    /// No active pipeline
    #[default]
    Idle,

    /// Inspecting the repository toolchain
    Detecting,

    /// Running local verification tasks
    Verifying,

    /// Pushing the feature branch
    Pushing { branch: String },

    /// Opening the pull request
    OpeningPr { branch: String },

    /// Polling remote checks
    WaitingChecks { pr_number: u64 },

    /// Attempting an automated fix for a failed check
    Fixing { check_name: String },

    /// Pipeline finished
    Complete { pr_url: String },

    /// Something went wrong
    Error { message: String, can_retry: bool },
}

impl PipelineState {
    /// Human-readable status for display
    pub fn status_text(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Ready",
            PipelineState::Detecting => "Detecting toolchain...",
            PipelineState::Verifying => "Verifying locally...",
            PipelineState::Pushing { .. } => "Pushing branch...",
            PipelineState::OpeningPr { .. } => "Opening PR...",
            PipelineState::WaitingChecks { .. } => "Waiting for checks...",
            PipelineState::Fixing { .. } => "Applying fix...",
            PipelineState::Complete { .. } => "Complete!",
            PipelineState::Error { .. } => "Error",
        }
    }

    /// Check if the pipeline is in an active state
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            PipelineState::Idle | PipelineState::Complete { .. } | PipelineState::Error { .. }
        )
    }
}

/// Options for one ship run.
#[derive(Debug, Clone)]
pub struct ShipOptions {
    /// Base branch the PR targets.
    pub base: String,
    pub title: String,
    pub body: String,
}

/// Everything a completed ship run produced.
#[derive(Debug)]
pub struct ShipReport {
    pub environment: DetectedEnvironment,
    pub verification: VerificationReport,
    pub pr: PullRequest,
    pub check_result: CheckResult,
    pub fixes: Vec<crate::autofix::AutoFixResult>,
}

/// Outcome of a ship run that did not hit a transport error.
#[derive(Debug)]
pub enum ShipOutcome {
    /// Local verification failed; nothing was pushed.
    VerificationFailed {
        environment: DetectedEnvironment,
        verification: VerificationReport,
    },
    Shipped(ShipReport),
}

/// Run the full feature-branch-to-merge pipeline.
pub async fn ship(
    repo_root: &Path,
    config: &Config,
    options: &ShipOptions,
    on_state: &mut dyn FnMut(&PipelineState),
    on_progress: &mut dyn FnMut(&ProgressUpdate),
) -> Result<ShipOutcome> {
    on_state(&PipelineState::Detecting);
    let env = detect::detect(repo_root, config);

    on_state(&PipelineState::Verifying);
    let verification = verify::run(repo_root, &env, config);
    if !verification.passed() {
        return Ok(ShipOutcome::VerificationFailed {
            environment: env,
            verification,
        });
    }

    let branch = crate::git_ops::current_branch(repo_root)?;
    on_state(&PipelineState::Pushing {
        branch: branch.clone(),
    });
    crate::git_ops::push_branch(repo_root, &branch)?;

    on_state(&PipelineState::OpeningPr {
        branch: branch.clone(),
    });
    let client = GithubClient::for_repo(repo_root)?;
    let pr = client
        .create_pull_request(&options.base, &branch, &options.title, &options.body)
        .await
        .context("Failed to open PR")?;

    on_state(&PipelineState::WaitingChecks {
        pr_number: pr.number,
    });
    let check_result = wait_for_pr_checks(&client, &pr, &env, config, on_progress).await?;

    let mut fixes = Vec::new();
    if !check_result.success && config.auto_fix.enabled {
        let mut fixer = AutoFixer::new(repo_root, config);
        for detail in &check_result.summary.failure_details {
            let fixable = detail
                .suggested_fix
                .as_ref()
                .map(|s| s.auto_fixable)
                .unwrap_or(false);
            if !fixable {
                continue;
            }
            on_state(&PipelineState::Fixing {
                check_name: detail.check_name.clone(),
            });
            let fix = fixer
                .attempt_fix(detail, pr.number, &pr.head_ref, &env, &client)
                .await?;
            fixes.push(fix);
        }
    }

    on_state(&PipelineState::Complete {
        pr_url: pr.html_url.clone(),
    });

    Ok(ShipOutcome::Shipped(ShipReport {
        environment: env,
        verification,
        pr,
        check_result,
        fixes,
    }))
}

/// Poll an existing PR's checks until a terminal decision.
pub async fn watch(
    repo_root: &Path,
    config: &Config,
    pr_number: u64,
    on_progress: &mut dyn FnMut(&ProgressUpdate),
) -> Result<CheckResult> {
    let env = detect::detect(repo_root, config);
    let client = GithubClient::for_repo(repo_root)?;
    let pr = client.get_pull_request(pr_number).await?;
    wait_for_pr_checks(&client, &pr, &env, config, on_progress).await
}

/// Attempt automated fixes for an existing PR's current failures.
pub async fn fix(
    repo_root: &Path,
    config: &Config,
    pr_number: u64,
) -> Result<Vec<crate::autofix::AutoFixResult>> {
    let env = detect::detect(repo_root, config);
    let client = GithubClient::for_repo(repo_root)?;
    let pr = client.get_pull_request(pr_number).await?;

    let runs = checks::dedupe_runs(client.list_check_runs(&pr.head_sha).await?);
    let known = verify::known_commands(&env, config, &SystemProbe);
    let summary = checks::build_summary(
        &runs,
        &known,
        chrono::Utc::now(),
        std::time::Instant::now(),
    );

    let mut fixer = AutoFixer::new(repo_root, config);
    let mut results = Vec::new();
    for detail in &summary.failure_details {
        let fix = fixer
            .attempt_fix(detail, pr.number, &pr.head_ref, &env, &client)
            .await?;
        results.push(fix);
    }
    Ok(results)
}

async fn wait_for_pr_checks(
    client: &GithubClient,
    pr: &PullRequest,
    env: &DetectedEnvironment,
    config: &Config,
    on_progress: &mut dyn FnMut(&ProgressUpdate),
) -> Result<CheckResult> {
    let known = verify::known_commands(env, config, &SystemProbe);
    let poll_options = PollOptions::from(&config.ci);

    let sha = pr.head_sha.clone();
    let fetch = move || {
        let sha = sha.clone();
        async move { client.list_check_runs(&sha).await }
    };

    checks::wait_for_checks_with(fetch, &known, &poll_options, on_progress).await
}
