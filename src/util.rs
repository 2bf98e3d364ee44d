//! Shared helpers: output truncation and bounded subprocess execution.
//!
//! Every external process the pipeline spawns goes through
//! `run_shell_with_timeout` so a hung tool can never stall a whole run.

use std::io::{BufReader, Read};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

/// Truncate a string to `max` characters, unicode-safe.
pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Truncate captured command output for reporting, marking the cut.
pub fn truncate_output(s: &str, max: usize) -> String {
    let trimmed = s.trim();
    let char_count = trimmed.chars().count();
    if char_count <= max {
        trimmed.to_string()
    } else {
        let snippet: String = trimmed.chars().take(max).collect();
        format!("{}\n… (truncated)", snippet)
    }
}

#[derive(Debug)]
pub struct CommandRunResult {
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandRunResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.map(|s| s.success()).unwrap_or(false)
    }

    /// Combined stdout/stderr, in that order.
    pub fn combined_output(&self) -> String {
        let mut combined = String::new();
        if !self.stdout.is_empty() {
            combined.push_str(&self.stdout);
        }
        if !self.stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&self.stderr);
        }
        combined
    }
}

/// Run a resolved shell command line in `dir`, killing it after `timeout`.
pub fn run_shell_with_timeout(
    dir: &Path,
    command_line: &str,
    timeout: Duration,
) -> Result<CommandRunResult> {
    let mut command = shell_command(command_line);
    command.current_dir(dir);
    run_command_with_timeout(&mut command, timeout)
}

/// Build a platform shell invocation for a command line.
fn shell_command(command_line: &str) -> Command {
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command_line]);
        cmd
    }

    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command_line]);
        cmd
    }
}

/// Run a prepared command with a hard deadline.
///
/// Output is drained on separate threads so a chatty child cannot deadlock
/// against a full pipe while we wait on it.
pub fn run_command_with_timeout(
    command: &mut Command,
    timeout: Duration,
) -> Result<CommandRunResult> {
    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("Failed to start command")?;

    let stdout = child.stdout.take().context("Failed to capture stdout")?;
    let stderr = child.stderr.take().context("Failed to capture stderr")?;

    let stdout_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let mut reader = BufReader::new(stdout);
        let _ = reader.read_to_end(&mut buf);
        buf
    });
    let stderr_handle = thread::spawn(move || {
        let mut buf = Vec::new();
        let mut reader = BufReader::new(stderr);
        let _ = reader.read_to_end(&mut buf);
        buf
    });

    let start = Instant::now();
    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    timed_out = true;
                    let _ = child.kill();
                    match child.wait() {
                        Ok(status) => break Some(status),
                        Err(_) => break None,
                    }
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(anyhow::anyhow!("Failed to wait for command: {}", e)),
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandRunResult {
        status,
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_unicode_safe() {
        let input = "ééééé";
        assert_eq!(truncate(input, 4), "é...");
    }

    #[test]
    fn test_truncate_small_max() {
        let input = "こんにちは";
        assert_eq!(truncate(input, 3), "こんに");
        assert_eq!(truncate(input, 0), "");
    }

    #[test]
    fn test_truncate_output_unicode_safe() {
        let input = "错误: 失败 😊";
        let out = truncate_output(input, 5);
        assert_eq!(out, "错误: 失\n… (truncated)");
    }

    #[test]
    fn test_truncate_output_no_truncation() {
        assert_eq!(truncate_output("ok", 10), "ok");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_shell_captures_output() {
        let dir = std::env::temp_dir();
        let result = run_shell_with_timeout(&dir, "echo hello", Duration::from_secs(10)).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
        assert!(!result.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn test_run_shell_times_out() {
        let dir = std::env::temp_dir();
        let result = run_shell_with_timeout(&dir, "sleep 5", Duration::from_millis(100)).unwrap();
        assert!(result.timed_out);
        assert!(!result.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_shell_nonzero_exit() {
        let dir = std::env::temp_dir();
        let result = run_shell_with_timeout(&dir, "exit 3", Duration::from_secs(10)).unwrap();
        assert!(!result.success());
        assert!(!result.timed_out);
    }
}
