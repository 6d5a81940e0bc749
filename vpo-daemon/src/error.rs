//! Error types for the daemon's tool and workflow layers.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from external tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No installed tool can realize the selected plan.
    #[error("no tool available: {0}")]
    Unavailable(String),

    /// Tool exited non-zero or produced unusable output.
    #[error("{tool} failed: {message}")]
    Failure { tool: String, message: String },

    /// Tool exceeded its per-operation budget.
    #[error("{tool} timed out after {seconds} seconds")]
    Timeout { tool: String, seconds: u64 },

    /// Disk-space check, backup, atomic rename or temp cleanup failed.
    #[error("filesystem error at {path}: {message}")]
    Filesystem { path: PathBuf, message: String },

    #[error("tool output unparseable: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ToolError {
    pub fn failure(tool: &str, message: impl Into<String>) -> Self {
        ToolError::Failure {
            tool: tool.to_string(),
            message: message.into(),
        }
    }

    /// True for timeouts (a distinct flavor of tool failure).
    pub fn is_timeout(&self) -> bool {
        matches!(self, ToolError::Timeout { .. })
    }
}

/// A phase aborted: the file has been rolled back (or never touched).
#[derive(Debug, Error)]
#[error("phase '{phase_name}' failed in {op}: {message}", op = .operation.as_deref().unwrap_or("setup"))]
pub struct PhaseExecutionError {
    pub phase_name: String,
    /// The operation that failed, None for phase-level failures
    /// (backup creation, mtime capture).
    pub operation: Option<String>,
    pub message: String,
}

impl PhaseExecutionError {
    pub fn new(phase_name: &str, operation: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            phase_name: phase_name.to_string(),
            operation: operation.map(str::to_string),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_error_formats_with_operation() {
        let err = PhaseExecutionError::new("normalize", Some("transcode"), "ffmpeg exited 1");
        let text = err.to_string();
        assert!(text.contains("normalize"));
        assert!(text.contains("transcode"));
        assert!(text.contains("ffmpeg exited 1"));

        let err = PhaseExecutionError::new("normalize", None, "backup failed");
        assert!(err.to_string().contains("setup"));
    }

    #[test]
    fn timeout_is_distinguishable() {
        let err = ToolError::Timeout {
            tool: "ffmpeg".to_string(),
            seconds: 3600,
        };
        assert!(err.is_timeout());
        assert!(!ToolError::failure("ffmpeg", "boom").is_timeout());
    }
}
