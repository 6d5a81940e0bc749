//! Metadata-only rewrites via ffmpeg for non-matroska containers.
//!
//! ffmpeg cannot edit tags in place, so this copies every stream into a
//! temp file with updated dispositions/metadata and swaps it in. Slower
//! than mkvpropedit but container-agnostic.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use vpo_policy::plan::{ActionType, Plan};

use crate::error::ToolError;

use super::runner::run_tool;
use super::{replace_with_temp, temp_output_path, PlanCapability, ToolOutcome};

const METADATA_TIMEOUT: Duration = Duration::from_secs(1800);

#[derive(Debug, Clone)]
pub struct FfmpegMetadataExecutor {
    tool_path: PathBuf,
    temp_directory: Option<PathBuf>,
}

impl FfmpegMetadataExecutor {
    pub fn new(tool_path: PathBuf, temp_directory: Option<PathBuf>) -> Self {
        Self {
            tool_path,
            temp_directory,
        }
    }

    /// Build the argument list: map everything, copy codecs, rewrite
    /// dispositions and stream metadata. Stream specifiers use input
    /// indices directly since nothing is dropped or reordered.
    pub fn build_args(plan: &Plan, output: &std::path::Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-i".to_string(),
            plan.file_path.to_string_lossy().into_owned(),
            "-map".to_string(),
            "0".to_string(),
            "-c".to_string(),
            "copy".to_string(),
        ];

        for action in &plan.actions {
            let Some(index) = action.track_index else {
                continue;
            };
            match action.action_type {
                ActionType::SetDefault => {
                    args.push(format!("-disposition:{index}"));
                    args.push("default".to_string());
                }
                ActionType::ClearDefault => {
                    args.push(format!("-disposition:{index}"));
                    args.push("0".to_string());
                }
                ActionType::SetForced => {
                    let flag = action.desired_value.as_bool().unwrap_or(false);
                    args.push(format!("-disposition:{index}"));
                    args.push(if flag { "forced" } else { "0" }.to_string());
                }
                ActionType::SetLanguage => {
                    let language = action.desired_value.as_str().unwrap_or("und");
                    args.push(format!("-metadata:s:{index}"));
                    args.push(format!("language={language}"));
                }
                ActionType::SetTitle => {
                    let title = action.desired_value.as_str().unwrap_or("");
                    args.push(format!("-metadata:s:{index}"));
                    args.push(format!("title={title}"));
                }
                ActionType::Reorder => {}
            }
        }

        args.push(output.to_string_lossy().into_owned());
        args
    }

    pub async fn execute(&self, plan: &Plan, keep_backup: bool) -> Result<ToolOutcome, ToolError> {
        let temp = temp_output_path(&plan.file_path, self.temp_directory.as_deref());
        let args = Self::build_args(plan, &temp);

        let result = run_tool(&self.tool_path, &args, Some(METADATA_TIMEOUT), |_| {}).await;
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                return Err(e);
            }
        };

        if output.timed_out {
            let _ = std::fs::remove_file(&temp);
            return Err(ToolError::Timeout {
                tool: "ffmpeg".to_string(),
                seconds: METADATA_TIMEOUT.as_secs(),
            });
        }
        if !output.success {
            let _ = std::fs::remove_file(&temp);
            return Err(ToolError::failure(
                "ffmpeg",
                format!("exit code {:?}: {}", output.exit_code, output.tail_text()),
            ));
        }

        let backup_path = match replace_with_temp(
            &temp,
            &plan.file_path,
            &plan.file_path,
            keep_backup,
            "ffmpeg",
        ) {
            Ok(backup) => backup,
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                return Err(e);
            }
        };

        info!(
            "Rewrote metadata for {} ({} actions)",
            plan.file_path.display(),
            plan.actions.len()
        );

        Ok(ToolOutcome {
            output_path: None,
            backup_path,
        })
    }
}

impl PlanCapability for FfmpegMetadataExecutor {
    fn tool_name(&self) -> &'static str {
        "ffmpeg"
    }

    fn can_handle(&self, plan: &Plan, _container: &str) -> bool {
        plan.is_metadata_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::Path;
    use vpo_policy::plan::PlannedAction;

    #[test]
    fn args_copy_all_streams_and_rewrite_language() {
        let plan = Plan {
            file_id: "1".to_string(),
            file_path: PathBuf::from("/m/a.mp4"),
            policy_version: 1,
            actions: vec![PlannedAction {
                action_type: ActionType::SetLanguage,
                track_index: Some(1),
                track_id: None,
                current_value: json!("fre"),
                desired_value: json!("fra"),
            }],
            track_dispositions: Vec::new(),
            tracks_kept: 2,
            tracks_removed: 0,
            requires_remux: false,
            container_change: None,
        };

        let args = FfmpegMetadataExecutor::build_args(&plan, Path::new("/m/.vpo_temp_a.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-map 0 -c copy"));
        assert!(joined.contains("-metadata:s:1 language=fra"));
        assert!(joined.ends_with("/m/.vpo_temp_a.mp4"));
    }
}
