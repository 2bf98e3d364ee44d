//! Remediation suggestions
//!
//! Maps a classified failure to one remediation command plus an
//! auto-fixability verdict. Auto-fixable is reserved for deterministic
//! formatter/linter transforms of tools we recognize; everything else is
//! a manual suggestion or nothing at all.

use serde::Serialize;

use crate::classify::ErrorType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub command: Option<String>,
    pub auto_fixable: bool,
    pub execution_strategy: ExecutionStrategy,
    /// 0-100; present only when a concrete tool was recognized.
    pub confidence: Option<u8>,
}

impl Suggestion {
    fn manual(command: Option<String>) -> Self {
        Self {
            command,
            auto_fixable: false,
            execution_strategy: ExecutionStrategy::Manual,
            confidence: None,
        }
    }

    fn automatic(command: String, confidence: u8) -> Self {
        Self {
            command: Some(command),
            auto_fixable: true,
            execution_strategy: ExecutionStrategy::Automatic,
            confidence: Some(confidence),
        }
    }
}

/// Commands already resolved for this invocation, used to parameterize
/// remediation templates.
#[derive(Debug, Clone, Default)]
pub struct KnownCommands {
    pub format: Option<String>,
    pub lint: Option<String>,
    pub typecheck: Option<String>,
    pub test: Option<String>,
    pub build: Option<String>,
}

/// Formatter tools with a deterministic write-mode transform:
/// `(signature, fix command)`.
const FORMAT_FIXERS: &[(&str, &str)] = &[
    ("prettier", "prettier --write ."),
    ("black", "black ."),
    ("ruff format", "ruff format ."),
    ("gofmt", "gofmt -w ."),
    ("rustfmt", "cargo fmt"),
    ("cargo fmt", "cargo fmt"),
];

/// Linter tools with a deterministic `--fix` transform.
const LINT_FIXERS: &[(&str, &str)] = &[
    ("eslint", "eslint . --fix"),
    ("ruff", "ruff check --fix ."),
];

/// Produce one remediation suggestion for a classified failure.
pub fn suggestion_for(
    raw_text: &str,
    error_type: ErrorType,
    known: &KnownCommands,
) -> Suggestion {
    let lowered = raw_text.to_lowercase();

    match error_type {
        ErrorType::FormatError => {
            // Prefer deriving the fix from the already-resolved format
            // command so the fix matches the project's own tool invocation.
            if let Some(resolved) = known.format.as_deref() {
                if let Some(fix) = write_mode_variant(resolved) {
                    return Suggestion::automatic(fix, 90);
                }
            }
            for (signature, fix) in FORMAT_FIXERS {
                if lowered.contains(signature) {
                    return Suggestion::automatic(fix.to_string(), 80);
                }
            }
            Suggestion::manual(known.format.clone())
        }
        ErrorType::LintingError => {
            if let Some(resolved) = known.lint.as_deref() {
                if let Some(fix) = fix_mode_variant(resolved) {
                    return Suggestion::automatic(fix, 90);
                }
            }
            for (signature, fix) in LINT_FIXERS {
                if lowered.contains(signature) {
                    return Suggestion::automatic(fix.to_string(), 80);
                }
            }
            Suggestion::manual(known.lint.clone())
        }
        ErrorType::TestFailure => Suggestion::manual(known.test.clone()),
        ErrorType::TypeError => Suggestion::manual(known.typecheck.clone()),
        ErrorType::BuildError => Suggestion::manual(known.build.clone()),
        // Never suggest running anything for leaked credentials
        ErrorType::SecurityIssue => Suggestion::manual(None),
        ErrorType::Unknown => Suggestion::manual(None),
    }
}

/// Derive the write-mode variant of a resolved format-check command for a
/// recognized tool. Unknown tools yield `None` (no blind flag appending).
fn write_mode_variant(resolved: &str) -> Option<String> {
    if resolved.contains("prettier") {
        return Some(swap_or_append(resolved, "--check", "--write"));
    }
    if resolved.contains("black") || resolved.contains("ruff format") {
        return Some(resolved.replace(" --check", ""));
    }
    if resolved.contains("gofmt") {
        return Some(swap_or_append(resolved, "-l", "-w"));
    }
    if resolved.contains("cargo fmt") || resolved.contains("rustfmt") {
        return Some("cargo fmt".to_string());
    }
    None
}

/// Derive the `--fix` variant of a resolved lint command for a recognized
/// tool.
fn fix_mode_variant(resolved: &str) -> Option<String> {
    if resolved.contains("eslint") || resolved.contains("ruff") {
        if resolved.contains("--fix") {
            return Some(resolved.to_string());
        }
        return Some(format!("{} --fix", resolved));
    }
    None
}

fn swap_or_append(command: &str, check_flag: &str, fix_flag: &str) -> String {
    if command.contains(check_flag) {
        command.replace(check_flag, fix_flag)
    } else {
        format!("{} {}", command, fix_flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_derives_from_known_command() {
        let known = KnownCommands {
            format: Some("prettier --check .".to_string()),
            ..Default::default()
        };
        let s = suggestion_for("code style issues", ErrorType::FormatError, &known);
        assert!(s.auto_fixable);
        assert_eq!(s.execution_strategy, ExecutionStrategy::Automatic);
        assert_eq!(s.command.as_deref(), Some("prettier --write ."));
        assert_eq!(s.confidence, Some(90));
    }

    #[test]
    fn test_format_error_black_drops_check_flag() {
        let known = KnownCommands {
            format: Some("poetry run black --check .".to_string()),
            ..Default::default()
        };
        let s = suggestion_for("would be reformatted", ErrorType::FormatError, &known);
        assert!(s.auto_fixable);
        assert_eq!(s.command.as_deref(), Some("poetry run black ."));
    }

    #[test]
    fn test_format_error_ruff_format_drops_check_flag() {
        let known = KnownCommands {
            format: Some("uv run ruff format --check .".to_string()),
            ..Default::default()
        };
        let s = suggestion_for("1 file would be reformatted", ErrorType::FormatError, &known);
        assert!(s.auto_fixable);
        assert_eq!(s.command.as_deref(), Some("uv run ruff format ."));
    }

    #[test]
    fn test_format_error_detects_tool_from_text() {
        let s = suggestion_for(
            "gofmt reported differences",
            ErrorType::FormatError,
            &KnownCommands::default(),
        );
        assert!(s.auto_fixable);
        assert_eq!(s.command.as_deref(), Some("gofmt -w ."));
        assert_eq!(s.confidence, Some(80));
    }

    #[test]
    fn test_format_error_unrecognized_tool_is_manual() {
        let known = KnownCommands {
            format: Some("make format-check".to_string()),
            ..Default::default()
        };
        let s = suggestion_for("style drift detected", ErrorType::FormatError, &known);
        assert!(!s.auto_fixable);
        assert_eq!(s.execution_strategy, ExecutionStrategy::Manual);
        assert_eq!(s.command.as_deref(), Some("make format-check"));
    }

    #[test]
    fn test_lint_error_appends_fix() {
        let known = KnownCommands {
            lint: Some("ruff check .".to_string()),
            ..Default::default()
        };
        let s = suggestion_for("ruff found issues", ErrorType::LintingError, &known);
        assert!(s.auto_fixable);
        assert_eq!(s.command.as_deref(), Some("ruff check . --fix"));
    }

    #[test]
    fn test_lint_error_clippy_is_not_auto_fixable() {
        let known = KnownCommands {
            lint: Some("cargo clippy -- -D warnings".to_string()),
            ..Default::default()
        };
        let s = suggestion_for("clippy warnings", ErrorType::LintingError, &known);
        assert!(!s.auto_fixable);
        assert_eq!(s.execution_strategy, ExecutionStrategy::Manual);
    }

    #[test]
    fn test_test_failure_suggests_local_run() {
        let known = KnownCommands {
            test: Some("cargo test".to_string()),
            ..Default::default()
        };
        let s = suggestion_for("assertion failed", ErrorType::TestFailure, &known);
        assert!(!s.auto_fixable);
        assert_eq!(s.command.as_deref(), Some("cargo test"));
    }

    #[test]
    fn test_security_issue_never_suggests_commands() {
        let known = KnownCommands {
            lint: Some("eslint .".to_string()),
            ..Default::default()
        };
        let s = suggestion_for("AKIA leaked", ErrorType::SecurityIssue, &known);
        assert!(!s.auto_fixable);
        assert!(s.command.is_none());
    }

    #[test]
    fn test_unknown_is_manual_and_empty() {
        let s = suggestion_for("???", ErrorType::Unknown, &KnownCommands::default());
        assert!(!s.auto_fixable);
        assert!(s.command.is_none());
        assert!(s.confidence.is_none());
    }
}
