//! Failure classification
//!
//! Maps one failed check's raw output to a closed error-type taxonomy via
//! an ordered rule list. Rule order decides precedence, not match position
//! in the text, and the classifier is total: arbitrary untrusted text
//! always classifies, falling through to `Unknown`.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    SecurityIssue,
    TestFailure,
    TypeError,
    LintingError,
    BuildError,
    FormatError,
    Unknown,
}

impl ErrorType {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorType::SecurityIssue => "security issue",
            ErrorType::TestFailure => "test failure",
            ErrorType::TypeError => "type error",
            ErrorType::LintingError => "linting error",
            ErrorType::BuildError => "build error",
            ErrorType::FormatError => "format error",
            ErrorType::Unknown => "unknown failure",
        }
    }
}

/// One classification rule: lowercase substring signatures (any match) plus
/// optional regex signatures for patterns substrings cannot express.
struct Rule {
    error_type: ErrorType,
    substrings: &'static [&'static str],
    regexes: &'static [&'static str],
}

/// Ordered rule table. First matching rule wins regardless of where in the
/// text its signature appears.
const RULES: &[Rule] = &[
    Rule {
        error_type: ErrorType::SecurityIssue,
        substrings: &[
            "security vulnerability",
            "vulnerability found",
            "vulnerabilities found",
            "cve-",
            "secret detected",
            "leaked secret",
            "detected a secret",
            "gitleaks",
            "trufflehog",
            "audit found",
            "ghsa-",
        ],
        // AWS access key ids and GitHub token prefixes
        regexes: &[r"AKIA[0-9A-Z]{16}", r"gh[pousr]_[A-Za-z0-9]{20,}"],
    },
    Rule {
        error_type: ErrorType::TestFailure,
        substrings: &[
            "test failed",
            "tests failed",
            "failed test",
            "assertion failed",
            "assertionerror",
            "test suite failed",
            "failures:",
            "--- fail",
            "fail:",
            "✗",
            "expect(received)",
            "pytest",
            "panicked at",
        ],
        regexes: &[r"(?m)^\s*\d+ (failed|failing)"],
    },
    Rule {
        error_type: ErrorType::TypeError,
        substrings: &[
            "type error",
            "typeerror",
            "mypy",
            "mismatched types",
            "type mismatch",
            "incompatible type",
            "is not assignable to",
            "has no attribute",
        ],
        // tsc diagnostics like `error TS2345:`
        regexes: &[r"error TS\d{4,5}"],
    },
    Rule {
        error_type: ErrorType::LintingError,
        substrings: &[
            "eslint",
            "ruff",
            "flake8",
            "pylint",
            "clippy",
            "golangci-lint",
            "lint error",
            "lint failed",
            "linting failed",
            "problems (",
        ],
        regexes: &[r"(?m)^.+:\d+:\d+:\s+[EWF]\d{3,4}\b"],
    },
    Rule {
        error_type: ErrorType::BuildError,
        substrings: &[
            "build failed",
            "compilation failed",
            "could not compile",
            "cannot find module",
            "cannot find package",
            "undefined reference",
            "linker error",
            "module not found",
            "failed to compile",
        ],
        regexes: &[r"error\[E\d{4}\]"],
    },
    Rule {
        error_type: ErrorType::FormatError,
        substrings: &[
            "prettier",
            "rustfmt",
            "gofmt",
            "would be reformatted",
            "would reformat",
            "code style issues found",
            "not formatted",
            "formatting check failed",
            "diff in",
            "incorrectly formatted",
        ],
        regexes: &[],
    },
];

fn compiled_regexes() -> &'static Vec<(ErrorType, Vec<Regex>)> {
    static COMPILED: OnceLock<Vec<(ErrorType, Vec<Regex>)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .map(|rule| {
                let regexes = rule
                    .regexes
                    .iter()
                    .filter_map(|pattern| Regex::new(pattern).ok())
                    .collect();
                (rule.error_type, regexes)
            })
            .collect()
    })
}

/// Classify a failed check from its name and raw output.
pub fn classify(check_name: &str, raw_text: &str) -> ErrorType {
    let haystack = format!("{}\n{}", check_name, raw_text);
    let lowered = haystack.to_lowercase();
    let compiled = compiled_regexes();

    for (rule, (error_type, regexes)) in RULES.iter().zip(compiled) {
        debug_assert_eq!(rule.error_type, *error_type);
        if rule.substrings.iter().any(|sig| lowered.contains(sig)) {
            return rule.error_type;
        }
        if regexes.iter().any(|re| re.is_match(&haystack)) {
            return rule.error_type;
        }
    }

    ErrorType::Unknown
}

/// Cap on extracted file paths per failure.
const MAX_AFFECTED_FILES: usize = 20;

/// Extract file paths mentioned in check output.
///
/// Scans for path tokens with a recognized source extension, deduplicates
/// preserving first-seen order, and strips trailing `:line:col` markers.
pub fn affected_files(raw_text: &str) -> Vec<String> {
    static PATH_TOKEN: OnceLock<Regex> = OnceLock::new();
    let re = PATH_TOKEN.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9_./-]+\.(?:py|rs|go|js|jsx|ts|tsx|mjs|cjs)\b").expect("static path regex")
    });

    let mut files = Vec::new();
    for token in re.find_iter(raw_text) {
        let path = token.as_str().trim_start_matches("./").to_string();
        if !files.contains(&path) {
            files.push(path);
            if files.len() >= MAX_AFFECTED_FILES {
                break;
            }
        }
    }
    files
}

/// Cap on extracted annotation lines per failure.
const MAX_ANNOTATION_LINES: usize = 10;

/// Extract annotation-style lines (lines naming a source location) from
/// check output. The consumed API subset only carries an annotation count,
/// so these stand in for the provider's annotation objects.
pub fn annotation_lines(raw_text: &str) -> Vec<String> {
    static LOCATION: OnceLock<Regex> = OnceLock::new();
    let re = LOCATION.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9_./-]+\.(?:py|rs|go|js|jsx|ts|tsx|mjs|cjs):\d+")
            .expect("static location regex")
    });

    raw_text
        .lines()
        .filter(|line| re.is_match(line))
        .map(|line| line.trim().to_string())
        .take(MAX_ANNOTATION_LINES)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_order_beats_text_position() {
        // Test-failure signature appears first in the text, but the
        // security rule has higher precedence.
        let text = "3 tests failed\nAKIAIOSFODNN7EXAMPLE found in config";
        assert_eq!(classify("ci", text), ErrorType::SecurityIssue);
    }

    #[test]
    fn test_test_failure_signatures() {
        assert_eq!(
            classify("ci", "FAIL: TestLogin (0.32s)\n--- FAIL"),
            ErrorType::TestFailure
        );
        assert_eq!(
            classify("unit", "2 failed, 10 passed in 3.2s"),
            ErrorType::TestFailure
        );
    }

    #[test]
    fn test_type_error_signatures() {
        assert_eq!(
            classify("typecheck", "src/app.ts(4,7): error TS2345: Argument of type 'string'"),
            ErrorType::TypeError
        );
        assert_eq!(
            classify("ci", "error[E0308]: mismatched types"),
            ErrorType::TypeError
        );
    }

    #[test]
    fn test_lint_signatures() {
        assert_eq!(
            classify("lint", "app.py:10:1: E302 expected 2 blank lines"),
            ErrorType::LintingError
        );
        assert_eq!(
            classify("style", "✖ 3 problems (2 errors, 1 warning) eslint"),
            ErrorType::LintingError
        );
    }

    #[test]
    fn test_build_error_signatures() {
        assert_eq!(
            classify("build", "error: could not compile `app` due to previous errors"),
            ErrorType::BuildError
        );
        assert_eq!(
            classify("ci", "Module not found: Error: Can't resolve './missing'"),
            ErrorType::BuildError
        );
    }

    #[test]
    fn test_format_error_signatures() {
        assert_eq!(
            classify("format", "src/main.py would be reformatted"),
            ErrorType::FormatError
        );
        assert_eq!(
            classify("style", "Run prettier --write to fix code style issues"),
            ErrorType::FormatError
        );
    }

    #[test]
    fn test_check_name_participates() {
        // Nothing in the output, but the check name carries the signal
        assert_eq!(classify("eslint", "exit status 1"), ErrorType::LintingError);
    }

    #[test]
    fn test_unknown_is_total_default() {
        assert_eq!(classify("mystery", "something odd happened"), ErrorType::Unknown);
        assert_eq!(classify("", ""), ErrorType::Unknown);
        // Arbitrary bytes never panic
        assert_eq!(classify("x", "\u{0000}\u{fffd}🤖"), ErrorType::Unknown);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let text = "eslint: 4 problems (4 errors, 0 warnings)";
        assert_eq!(classify("ci", text), classify("ci", text));
    }

    #[test]
    fn test_affected_files_extraction() {
        let text = "src/app.py:10:1: E302\n./lib/util.py:44:8: F401\nsrc/app.py:12:1: E303";
        assert_eq!(affected_files(text), vec!["src/app.py", "lib/util.py"]);
    }

    #[test]
    fn test_affected_files_mixed_languages() {
        let text = "error in pkg/server.go and web/index.tsx plus src/main.rs";
        assert_eq!(
            affected_files(text),
            vec!["pkg/server.go", "web/index.tsx", "src/main.rs"]
        );
    }

    #[test]
    fn test_affected_files_empty() {
        assert!(affected_files("no paths here").is_empty());
    }

    #[test]
    fn test_annotation_lines_keep_located_lines() {
        let text = "collecting...\nsrc/app.py:10: error: bad type\nall done\nlib/x.ts:4: warning";
        assert_eq!(
            annotation_lines(text),
            vec!["src/app.py:10: error: bad type", "lib/x.ts:4: warning"]
        );
    }
}
