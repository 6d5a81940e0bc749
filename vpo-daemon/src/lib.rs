//! vpo-daemon - Library Orchestrator Daemon
//!
//! Drives the whole pipeline: workers claim jobs from the durable queue,
//! scan jobs keep the catalog fresh, process jobs evaluate policies and
//! apply the resulting plans through external tools (ffprobe,
//! mkvpropedit, mkvmerge, ffmpeg) with backup, rollback and statistics
//! capture.

pub mod error;
pub mod plugin;
pub mod queue;
pub mod tools;
pub mod workflow;

pub use error::{PhaseExecutionError, ToolError};
