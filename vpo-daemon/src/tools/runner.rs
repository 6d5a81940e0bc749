//! Child process execution with streamed stderr and timeouts.
//!
//! External tools report progress on stderr. The runner streams it
//! line-by-line to the caller's handler while keeping a bounded tail for
//! error reporting, and kills the child when the per-operation budget
//! expires.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ToolError;

/// How many trailing stderr lines are retained for diagnostics.
const STDERR_TAIL_LINES: usize = 40;

/// Result of one tool invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Last lines of stderr, for error messages and fallback detection.
    pub stderr_tail: Vec<String>,
}

impl CommandOutput {
    pub fn tail_text(&self) -> String {
        self.stderr_tail.join("\n")
    }
}

/// Spawn `program` with `args`, streaming stderr lines into `on_line`.
///
/// On timeout the child is killed, and the output reports `timed_out`.
pub async fn run_tool(
    program: &Path,
    args: &[String],
    timeout: Option<Duration>,
    mut on_line: impl FnMut(&str),
) -> Result<CommandOutput, ToolError> {
    debug!(
        "Running {} {}",
        program.display(),
        args.join(" ")
    );

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ToolError::Parse("child stderr not captured".to_string()))?;
    let mut lines = BufReader::new(stderr).lines();

    let deadline = timeout.map(|t| Instant::now() + t);
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

    // Drain stderr until EOF, enforcing the deadline while the tool runs.
    loop {
        let next_line = async { lines.next_line().await };
        let line = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, next_line).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!("Tool exceeded its time budget, killing: {}", program.display());
                    let _ = child.kill().await;
                    return Ok(CommandOutput {
                        success: false,
                        exit_code: None,
                        timed_out: true,
                        stderr_tail: tail.into_iter().collect(),
                    });
                }
            },
            None => next_line.await?,
        };

        match line {
            Some(line) => {
                on_line(&line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            None => break,
        }
    }

    // Stderr closed; the process should exit promptly.
    let status = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!("Tool hung after closing stderr, killing: {}", program.display());
                let _ = child.kill().await;
                return Ok(CommandOutput {
                    success: false,
                    exit_code: None,
                    timed_out: true,
                    stderr_tail: tail.into_iter().collect(),
                });
            }
        },
        None => child.wait().await?,
    };

    Ok(CommandOutput {
        success: status.success(),
        exit_code: status.code(),
        timed_out: false,
        stderr_tail: tail.into_iter().collect(),
    })
}

/// Capture stdout of a short-lived tool (ffprobe JSON output).
pub async fn run_tool_capture_stdout(
    program: &Path,
    args: &[String],
    timeout: Option<Duration>,
) -> Result<(CommandOutput, Vec<u8>), ToolError> {
    debug!("Running {} {}", program.display(), args.join(" "));

    let run = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match timeout {
        Some(t) => match tokio::time::timeout(t, run).await {
            Ok(output) => output?,
            Err(_) => {
                return Ok((
                    CommandOutput {
                        success: false,
                        exit_code: None,
                        timed_out: true,
                        stderr_tail: Vec::new(),
                    },
                    Vec::new(),
                ))
            }
        },
        None => run.await?,
    };

    let stderr_tail = String::from_utf8_lossy(&output.stderr)
        .lines()
        .rev()
        .take(STDERR_TAIL_LINES)
        .map(str::to_string)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    Ok((
        CommandOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            timed_out: false,
            stderr_tail,
        },
        output.stdout,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh() -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    #[tokio::test]
    async fn captures_stderr_lines_in_order() {
        let mut seen = Vec::new();
        let output = run_tool(
            &sh(),
            &["-c".to_string(), "echo one >&2; echo two >&2".to_string()],
            None,
            |line| seen.push(line.to_string()),
        )
        .await
        .unwrap();

        assert!(output.success);
        assert_eq!(seen, vec!["one", "two"]);
        assert_eq!(output.stderr_tail, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_raised() {
        let output = run_tool(
            &sh(),
            &["-c".to_string(), "echo boom >&2; exit 3".to_string()],
            None,
            |_| {},
        )
        .await
        .unwrap();

        assert!(!output.success);
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.tail_text(), "boom");
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let started = std::time::Instant::now();
        let output = run_tool(
            &sh(),
            &["-c".to_string(), "sleep 30".to_string()],
            Some(Duration::from_millis(200)),
            |_| {},
        )
        .await
        .unwrap();

        assert!(output.timed_out);
        assert!(!output.success);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn stdout_capture_returns_bytes() {
        let (output, stdout) = run_tool_capture_stdout(
            &sh(),
            &["-c".to_string(), "printf '{\"ok\":true}'".to_string()],
            Some(Duration::from_secs(10)),
        )
        .await
        .unwrap();

        assert!(output.success);
        assert_eq!(stdout, b"{\"ok\":true}");
    }
}
