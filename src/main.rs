use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use branchpilot::checks::{PollOutcome, ProgressUpdate};
use branchpilot::config::Config;
use branchpilot::pipeline::{self, PipelineState, ShipOptions, ShipOutcome};
use branchpilot::resolve::{self, ResolveRequest, SystemProbe, Task};
use branchpilot::verify::{self, TaskStatus};
use branchpilot::{detect, git_ops};

#[derive(Parser, Debug)]
#[command(
    name = "branchpilot",
    about = "Feature-branch-to-merge automation: verify, push, PR, watch CI, auto-fix",
    version
)]
struct Args {
    /// Path to the repository (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    path: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Show the detected toolchain and the command each task resolves to
    Inspect,

    /// Run local verification tasks
    Verify,

    /// Verify, push, open a PR, and wait for checks
    Ship {
        /// Base branch the PR targets
        #[arg(long, default_value = "main")]
        base: String,

        /// PR title (defaults to the branch name)
        #[arg(long)]
        title: Option<String>,

        /// PR body
        #[arg(long, default_value = "")]
        body: String,
    },

    /// Poll an existing PR's checks until they settle
    Watch {
        /// Pull request number
        #[arg(long)]
        pr: u64,
    },

    /// Attempt automated fixes for an existing PR's failing checks
    Fix {
        /// Pull request number
        #[arg(long)]
        pr: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let repo_root = args.path.canonicalize()?;
    let config = Config::load(&repo_root);

    match args.command {
        CliCommand::Inspect => inspect(&repo_root, &config),
        CliCommand::Verify => run_verify(&repo_root, &config),
        CliCommand::Ship { base, title, body } => {
            run_ship(&repo_root, &config, base, title, body).await
        }
        CliCommand::Watch { pr } => run_watch(&repo_root, &config, pr).await,
        CliCommand::Fix { pr } => run_fix(&repo_root, &config, pr).await,
    }
}

fn inspect(repo_root: &std::path::Path, config: &Config) -> Result<()> {
    let env = detect::detect(repo_root, config);

    println!();
    println!("  Toolchain");
    println!(
        "    language         {} (confidence {})",
        env.primary.name(),
        env.confidence
    );
    if !env.additional.is_empty() {
        let names: Vec<&str> = env.additional.iter().map(|l| l.name()).collect();
        println!("    also present     {}", names.join(", "));
    }
    println!("    package manager  {}", env.package_manager.name());
    if let Some(lock) = &env.lock_file {
        println!("    lockfile         {}", lock);
    }
    if !env.makefile_targets.is_empty() {
        println!("    make targets     {}", env.makefile_targets.join(", "));
    }
    if let Some(root) = &env.workspace_root {
        println!("    workspace root   {}", root.display());
    }

    println!();
    println!("  Task resolution");
    for task in [
        Task::Format,
        Task::Lint,
        Task::Typecheck,
        Task::Test,
        Task::Build,
    ] {
        let resolved = resolve::resolve_with(
            &ResolveRequest {
                task,
                language: env.primary,
                package_manager: env.package_manager,
                makefile_targets: &env.makefile_targets,
                config,
            },
            &SystemProbe,
        );
        match resolved.command {
            Some(command) => println!("    {:9} -> {}", task.as_str(), command),
            None if resolved.optional => println!("    {:9} -> (optional, none)", task.as_str()),
            None => {
                println!("    {:9} -> not found", task.as_str());
                for suggestion in resolved.suggestions {
                    println!("               tip: {}", suggestion);
                }
            }
        }
    }
    println!();

    Ok(())
}

fn run_verify(repo_root: &std::path::Path, config: &Config) -> Result<()> {
    let env = detect::detect(repo_root, config);
    eprintln!("  Verifying ({} project)...", env.primary.name());

    let report = verify::run(repo_root, &env, config);
    print_verification(&report);

    if report.passed() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn print_verification(report: &verify::VerificationReport) {
    for outcome in &report.outcomes {
        let label = outcome.command.as_deref().unwrap_or("(unresolved)");
        println!(
            "  {} {:9} {}",
            outcome.status.icon(),
            outcome.task.as_str(),
            label
        );
        if outcome.status == TaskStatus::Failed && !outcome.output.is_empty() {
            for line in outcome.output.lines().take(20) {
                println!("      {}", line);
            }
        }
        for suggestion in &outcome.suggestions {
            println!("      tip: {}", suggestion);
        }
    }
}

async fn run_ship(
    repo_root: &std::path::Path,
    config: &Config,
    base: String,
    title: Option<String>,
    body: String,
) -> Result<()> {
    let branch = git_ops::current_branch(repo_root)?;
    let options = ShipOptions {
        base,
        title: title.unwrap_or_else(|| branch.clone()),
        body,
    };

    let outcome = pipeline::ship(
        repo_root,
        config,
        &options,
        &mut print_state,
        &mut print_progress,
    )
    .await?;

    match outcome {
        ShipOutcome::VerificationFailed { verification, .. } => {
            eprintln!("  Local verification failed; nothing was pushed.");
            print_verification(&verification);
            std::process::exit(1);
        }
        ShipOutcome::Shipped(report) => {
            println!();
            println!("  PR #{}: {}", report.pr.number, report.pr.html_url);
            print_check_result(&report.check_result);
            for fix in &report.fixes {
                match (fix.success, fix.pr_number) {
                    (true, Some(number)) => println!(
                        "  + fix PR #{} opened ({} lines)",
                        number,
                        fix.changed_lines.unwrap_or(0)
                    ),
                    _ => println!(
                        "  · fix skipped: {}",
                        fix.reason.as_deref().unwrap_or("unknown")
                    ),
                }
            }
            if !report.check_result.success {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn run_watch(repo_root: &std::path::Path, config: &Config, pr: u64) -> Result<()> {
    let result = pipeline::watch(repo_root, config, pr, &mut print_progress).await?;
    print_check_result(&result);
    if result.success {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

async fn run_fix(repo_root: &std::path::Path, config: &Config, pr: u64) -> Result<()> {
    let results = pipeline::fix(repo_root, config, pr).await?;
    if results.is_empty() {
        println!("  No failing checks to fix.");
        return Ok(());
    }
    for fix in &results {
        match (fix.success, fix.pr_number) {
            (true, Some(number)) => println!(
                "  + {}: fix PR #{} ({} lines)",
                fix.error_type.name(),
                number,
                fix.changed_lines.unwrap_or(0)
            ),
            _ => println!(
                "  · {}: {}",
                fix.error_type.name(),
                fix.reason.as_deref().unwrap_or("not fixed")
            ),
        }
    }
    Ok(())
}

fn print_state(state: &PipelineState) {
    eprintln!("  {}", state.status_text());
}

fn print_progress(update: &ProgressUpdate) {
    let elapsed = update.elapsed.as_secs();
    eprintln!(
        "  [{:>4}s] {} passed, {} failed, {} pending (of {})",
        elapsed, update.passed, update.failed, update.pending, update.total
    );
    for name in &update.new_failures {
        eprintln!("      ● {} failed", name);
    }
    for name in &update.new_passes {
        eprintln!("      + {} passed", name);
    }
}

fn print_check_result(result: &branchpilot::checks::CheckResult) {
    let summary = &result.summary;
    match result.outcome {
        PollOutcome::Succeeded => println!(
            "  + checks passed ({} total, {} skipped) in {}s",
            summary.total,
            summary.skipped,
            result.duration.as_secs()
        ),
        PollOutcome::Failed => println!(
            "  ● checks failed: {}/{} failing",
            summary.failed, summary.total
        ),
        PollOutcome::TimedOut => println!(
            "  · timed out after {}s with {} pending; re-run `watch` to resume",
            result.duration.as_secs(),
            summary.pending
        ),
    }

    for detail in &summary.failure_details {
        println!("    ● {} ({})", detail.check_name, detail.error_type.name());
        if !detail.affected_files.is_empty() {
            println!("      files: {}", detail.affected_files.join(", "));
        }
        if let Some(suggestion) = &detail.suggested_fix {
            if let Some(command) = &suggestion.command {
                let mode = if suggestion.auto_fixable {
                    "auto-fixable"
                } else {
                    "manual"
                };
                println!("      fix ({}): {}", mode, command);
            }
        }
        if !detail.url.is_empty() {
            println!("      {}", detail.url);
        }
    }
}
