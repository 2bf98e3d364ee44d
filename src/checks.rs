//! Check polling
//!
//! Polls a PR's remote check-run set until a pass/fail/timeout decision can
//! be made. Each cycle builds an immutable summary snapshot, computes a
//! delta against the previous snapshot, and applies fail-fast / retry-flaky
//! / timeout policy. The only state carried between cycles is the previous
//! summary and the flake tracker, both threaded explicitly through the
//! loop; cancellation at any suspension point is safe because nothing is
//! persisted.
//!
//! A CI failure is data (a `CheckResult` with `success: false`); a
//! transport error is an exception (`anyhow::Error`). Callers must not
//! conflate the two.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::{Duration, Instant};

use crate::classify::{self, ErrorType};
use crate::config::CiConfig;
use crate::suggest::{self, KnownCommands, Suggestion};
use crate::util::truncate_output;

// ============================================================================
// Check runs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
}

impl CheckStatus {
    /// Map an API status string; unknown values are treated as queued.
    pub fn from_api(value: &str) -> Self {
        match value {
            "completed" => CheckStatus::Completed,
            "in_progress" => CheckStatus::InProgress,
            _ => CheckStatus::Queued,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    Skipped,
    TimedOut,
    ActionRequired,
}

impl CheckConclusion {
    /// Map an API conclusion string; unknown values map to `None` (treated
    /// as still pending, like the API's own `null`).
    pub fn from_api(value: &str) -> Option<Self> {
        match value {
            "success" => Some(CheckConclusion::Success),
            "failure" => Some(CheckConclusion::Failure),
            "neutral" => Some(CheckConclusion::Neutral),
            "cancelled" => Some(CheckConclusion::Cancelled),
            "skipped" => Some(CheckConclusion::Skipped),
            "timed_out" => Some(CheckConclusion::TimedOut),
            "action_required" => Some(CheckConclusion::ActionRequired),
            _ => None,
        }
    }
}

/// One named CI task's state for a specific commit. Identified by name
/// within a (PR, head SHA) scope; re-runs replace, never append.
#[derive(Debug, Clone)]
pub struct CheckRun {
    pub name: String,
    pub status: CheckStatus,
    pub conclusion: Option<CheckConclusion>,
    pub annotations_count: u32,
    pub url: String,
    /// Combined output title/summary/text from the provider.
    pub output: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Which summary bucket a run falls into. The four buckets partition the
/// run set, so `total == passed + failed + pending + skipped` by
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Passed,
    Failed,
    Pending,
    Skipped,
}

impl CheckRun {
    fn bucket(&self) -> Bucket {
        if self.status != CheckStatus::Completed {
            return Bucket::Pending;
        }
        match self.conclusion {
            Some(CheckConclusion::Success) | Some(CheckConclusion::Neutral) => Bucket::Passed,
            Some(CheckConclusion::Skipped) => Bucket::Skipped,
            Some(CheckConclusion::Failure)
            | Some(CheckConclusion::Cancelled)
            | Some(CheckConclusion::TimedOut)
            | Some(CheckConclusion::ActionRequired) => Bucket::Failed,
            None => Bucket::Pending,
        }
    }

    fn is_failed(&self) -> bool {
        self.bucket() == Bucket::Failed
    }
}

/// Collapse provider re-runs: one run per name, latest `started_at` wins.
pub fn dedupe_runs(mut runs: Vec<CheckRun>) -> Vec<CheckRun> {
    let mut latest: HashMap<String, CheckRun> = HashMap::new();
    for run in runs.drain(..) {
        match latest.get(&run.name) {
            Some(existing) if existing.started_at >= run.started_at => {}
            _ => {
                latest.insert(run.name.clone(), run);
            }
        }
    }
    let mut deduped: Vec<CheckRun> = latest.into_values().collect();
    deduped.sort_by(|a, b| a.name.cmp(&b.name));
    deduped
}

// ============================================================================
// Summaries
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallStatus {
    Success,
    Failure,
    Pending,
}

/// Diagnostics for one failed check, derived fresh each poll (annotations
/// can change across re-runs, so this is never cached from a prior cycle).
#[derive(Debug, Clone)]
pub struct FailureDetail {
    pub check_name: String,
    pub error_type: ErrorType,
    pub summary: String,
    pub affected_files: Vec<String>,
    pub annotations: Vec<String>,
    pub suggested_fix: Option<Suggestion>,
    pub url: String,
}

/// Immutable snapshot of the full check set, recomputed wholesale each
/// poll cycle.
#[derive(Debug, Clone)]
pub struct CheckSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pending: usize,
    pub skipped: usize,
    pub overall: OverallStatus,
    pub failure_details: Vec<FailureDetail>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    /// Names per bucket, kept for delta computation between cycles.
    pub passed_names: Vec<String>,
    pub failed_names: Vec<String>,
}

/// Build a summary snapshot from the current (deduplicated) run set.
pub fn build_summary(
    runs: &[CheckRun],
    known: &KnownCommands,
    started_at: DateTime<Utc>,
    poll_started: Instant,
) -> CheckSummary {
    let mut passed_names = Vec::new();
    let mut failed_names = Vec::new();
    let mut pending = 0;
    let mut skipped = 0;
    let mut failure_details = Vec::new();

    for run in runs {
        match run.bucket() {
            Bucket::Passed => passed_names.push(run.name.clone()),
            Bucket::Pending => pending += 1,
            Bucket::Skipped => skipped += 1,
            Bucket::Failed => {
                failed_names.push(run.name.clone());
                failure_details.push(failure_detail(run, known));
            }
        }
    }

    let passed = passed_names.len();
    let failed = failed_names.len();
    let total = runs.len();
    let overall = if failed > 0 {
        OverallStatus::Failure
    } else if pending > 0 {
        OverallStatus::Pending
    } else {
        OverallStatus::Success
    };

    // Completion time is only meaningful once nothing is pending
    let (completed_at, duration) = if pending == 0 {
        (Some(Utc::now()), Some(poll_started.elapsed()))
    } else {
        (None, None)
    };

    CheckSummary {
        total,
        passed,
        failed,
        pending,
        skipped,
        overall,
        failure_details,
        started_at,
        completed_at,
        duration,
        passed_names,
        failed_names,
    }
}

fn failure_detail(run: &CheckRun, known: &KnownCommands) -> FailureDetail {
    let error_type = classify::classify(&run.name, &run.output);
    let suggestion = suggest::suggestion_for(&run.output, error_type, known);

    FailureDetail {
        check_name: run.name.clone(),
        error_type,
        summary: truncate_output(&run.output, 400),
        affected_files: classify::affected_files(&run.output),
        annotations: classify::annotation_lines(&run.output),
        suggested_fix: Some(suggestion),
        url: run.url.clone(),
    }
}

// ============================================================================
// Progress updates
// ============================================================================

/// Per-cycle delta against the previous snapshot. Emitted once per cycle
/// through `on_progress` and never retained.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub timestamp: DateTime<Utc>,
    pub elapsed: Duration,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pending: usize,
    pub new_failures: Vec<String>,
    pub new_passes: Vec<String>,
}

/// Compute the delta between the previous and current snapshots.
pub fn progress_between(
    previous: Option<&CheckSummary>,
    current: &CheckSummary,
    elapsed: Duration,
) -> ProgressUpdate {
    let prev_failed: HashSet<&str> = previous
        .map(|s| s.failed_names.iter().map(|n| n.as_str()).collect())
        .unwrap_or_default();
    let prev_passed: HashSet<&str> = previous
        .map(|s| s.passed_names.iter().map(|n| n.as_str()).collect())
        .unwrap_or_default();

    let new_failures = current
        .failed_names
        .iter()
        .filter(|n| !prev_failed.contains(n.as_str()))
        .cloned()
        .collect();
    let new_passes = current
        .passed_names
        .iter()
        .filter(|n| !prev_passed.contains(n.as_str()))
        .cloned()
        .collect();

    ProgressUpdate {
        timestamp: Utc::now(),
        elapsed,
        total: current.total,
        passed: current.passed,
        failed: current.failed,
        pending: current.pending,
        new_failures,
        new_passes,
    }
}

// ============================================================================
// Flake tracking
// ============================================================================

/// Tracks conclusions observed per check name within one polling session.
///
/// A name seen with two distinct conclusions is flapping; with
/// `retry_flaky` each flapping check is granted a bounded number of silent
/// grace cycles before its failure counts as terminal.
#[derive(Debug, Default)]
pub struct FlakeTracker {
    observed: HashMap<String, HashSet<CheckConclusion>>,
    grace_left: HashMap<String, u32>,
    retries_used: u32,
}

impl FlakeTracker {
    pub fn observe(&mut self, runs: &[CheckRun]) {
        for run in runs {
            if let Some(conclusion) = run.conclusion {
                self.observed
                    .entry(run.name.clone())
                    .or_default()
                    .insert(conclusion);
            }
        }
    }

    pub fn is_flapping(&self, name: &str) -> bool {
        self.observed.get(name).map(|c| c.len() >= 2).unwrap_or(false)
    }

    /// Consume one grace cycle for a flapping check. Returns true while
    /// grace remains (the failure stays silent this cycle).
    fn consume_grace(&mut self, name: &str, max_cycles: u32) -> bool {
        let left = self.grace_left.entry(name.to_string()).or_insert(max_cycles);
        if *left == 0 {
            return false;
        }
        *left -= 1;
        self.retries_used += 1;
        true
    }

    pub fn retries_used(&self) -> u32 {
        self.retries_used
    }
}

// ============================================================================
// Decisions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Succeeded,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct PollOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub fail_fast: bool,
    pub retry_flaky: bool,
    pub flaky_grace_cycles: u32,
}

impl From<&CiConfig> for PollOptions {
    fn from(ci: &CiConfig) -> Self {
        Self {
            timeout: Duration::from_secs(ci.timeout_secs),
            poll_interval: Duration::from_secs(ci.poll_interval_secs),
            fail_fast: ci.fail_fast,
            retry_flaky: ci.retry_flaky,
            flaky_grace_cycles: ci.flaky_grace_cycles,
        }
    }
}

/// Terminal result of a polling session.
#[derive(Debug)]
pub struct CheckResult {
    pub success: bool,
    pub outcome: PollOutcome,
    pub summary: CheckSummary,
    pub duration: Duration,
    pub retries_used: u32,
}

/// Evaluate the decision rules for one cycle, in order. `None` means keep
/// polling.
fn decide(
    summary: &CheckSummary,
    runs: &[CheckRun],
    elapsed: Duration,
    opts: &PollOptions,
    flake: &mut FlakeTracker,
) -> Option<PollOutcome> {
    // Never wait for checks that will never exist
    if summary.total == 0 {
        return Some(PollOutcome::Succeeded);
    }

    // Partition failures into terminal vs. in-grace
    let mut terminal_failures = 0;
    for run in runs.iter().filter(|r| r.is_failed()) {
        let in_grace = opts.retry_flaky
            && flake.is_flapping(&run.name)
            && flake.consume_grace(&run.name, opts.flaky_grace_cycles);
        if !in_grace {
            terminal_failures += 1;
        }
    }

    if terminal_failures > 0 && opts.fail_fast {
        return Some(PollOutcome::Failed);
    }

    if summary.pending == 0 {
        if summary.failed == 0 {
            return Some(PollOutcome::Succeeded);
        }
        // All complete with failures: terminal unless every failure is
        // still in its grace window awaiting a re-run
        if terminal_failures > 0 {
            return Some(PollOutcome::Failed);
        }
    }

    if elapsed >= opts.timeout {
        // Resumable result, not an error: re-invocation re-fetches ground
        // truth rather than resuming stale local state
        return Some(PollOutcome::TimedOut);
    }

    None
}

// ============================================================================
// Polling loop
// ============================================================================

/// Poll using an injected fetch step until a terminal decision.
///
/// `fetch` returns the full current check-run set for the PR's head SHA;
/// transport errors propagate immediately. No sleep happens before the
/// first fetch, and a decision reachable from the first snapshot returns
/// without sleeping at all.
pub async fn wait_for_checks_with<F, Fut>(
    mut fetch: F,
    known: &KnownCommands,
    opts: &PollOptions,
    on_progress: &mut dyn FnMut(&ProgressUpdate),
) -> Result<CheckResult>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<CheckRun>>>,
{
    let poll_started = Instant::now();
    let started_at = Utc::now();
    let mut flake = FlakeTracker::default();
    let mut previous: Option<CheckSummary> = None;

    loop {
        let runs = dedupe_runs(fetch().await?);
        flake.observe(&runs);

        let summary = build_summary(&runs, known, started_at, poll_started);
        let elapsed = poll_started.elapsed();

        let update = progress_between(previous.as_ref(), &summary, elapsed);
        on_progress(&update);

        if let Some(outcome) = decide(&summary, &runs, elapsed, opts, &mut flake) {
            return Ok(CheckResult {
                success: outcome == PollOutcome::Succeeded,
                outcome,
                summary,
                duration: poll_started.elapsed(),
                retries_used: flake.retries_used(),
            });
        }

        previous = Some(summary);
        tokio::time::sleep(opts.poll_interval).await;
    }
}
