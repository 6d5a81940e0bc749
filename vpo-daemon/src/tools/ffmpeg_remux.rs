//! Container-agnostic remuxing via ffmpeg.
//!
//! The fallback remuxer when mkvmerge is unavailable or the file is not
//! matroska, and the only path into mp4. Stream selection always goes
//! through explicit `-map` arguments so output stream numbering is under
//! our control; disposition and metadata arguments address output
//! positions.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use vpo_policy::plan::{ActionType, Plan};

use crate::error::ToolError;

use super::runner::run_tool;
use super::{replace_with_temp, temp_output_path, PlanCapability, ToolOutcome};

const REMUX_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct FfmpegRemuxExecutor {
    tool_path: PathBuf,
    temp_directory: Option<PathBuf>,
}

impl FfmpegRemuxExecutor {
    pub fn new(tool_path: PathBuf, temp_directory: Option<PathBuf>) -> Self {
        Self {
            tool_path,
            temp_directory,
        }
    }

    fn destination(plan: &Plan) -> PathBuf {
        match &plan.container_change {
            Some(change) if change.target_format == "mp4" => plan.file_path.with_extension("mp4"),
            Some(change) if change.target_format == "matroska" => {
                plan.file_path.with_extension("mkv")
            }
            _ => plan.file_path.clone(),
        }
    }

    /// Output order: the reorder action's order when present, kept input
    /// order otherwise.
    fn output_order(plan: &Plan) -> Vec<i64> {
        plan.desired_track_order()
            .unwrap_or_else(|| plan.kept_indices())
    }

    /// Build the remux argument list.
    pub fn build_args(plan: &Plan, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-i".to_string(),
            plan.file_path.to_string_lossy().into_owned(),
        ];

        let order = Self::output_order(plan);

        // Explicit per-stream mapping: anything unmapped is dropped, and
        // output positions equal positions in this list.
        for index in &order {
            args.push("-map".to_string());
            args.push(format!("0:{index}"));
        }

        args.push("-c".to_string());
        args.push("copy".to_string());

        for action in &plan.actions {
            let Some(index) = action.track_index else {
                continue;
            };
            let Some(position) = order.iter().position(|i| i == &index) else {
                continue;
            };
            match action.action_type {
                ActionType::SetDefault => {
                    args.push(format!("-disposition:{position}"));
                    args.push("default".to_string());
                }
                ActionType::ClearDefault => {
                    args.push(format!("-disposition:{position}"));
                    args.push("0".to_string());
                }
                ActionType::SetForced => {
                    let flag = action.desired_value.as_bool().unwrap_or(false);
                    args.push(format!("-disposition:{position}"));
                    args.push(if flag { "forced" } else { "0" }.to_string());
                }
                ActionType::SetLanguage => {
                    let language = action.desired_value.as_str().unwrap_or("und");
                    args.push(format!("-metadata:s:{position}"));
                    args.push(format!("language={language}"));
                }
                ActionType::SetTitle => {
                    let title = action.desired_value.as_str().unwrap_or("");
                    args.push(format!("-metadata:s:{position}"));
                    args.push(format!("title={title}"));
                }
                ActionType::Reorder => {}
            }
        }

        if matches!(&plan.container_change, Some(c) if c.target_format == "mp4") {
            args.push("-movflags".to_string());
            args.push("+faststart".to_string());
        }

        args.push(output.to_string_lossy().into_owned());
        args
    }

    pub async fn execute(&self, plan: &Plan, keep_backup: bool) -> Result<ToolOutcome, ToolError> {
        let destination = Self::destination(plan);
        let temp = temp_output_path(&destination, self.temp_directory.as_deref());
        let args = Self::build_args(plan, &temp);

        let result = run_tool(&self.tool_path, &args, Some(REMUX_TIMEOUT), |_| {}).await;
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
                seconds: REMUX_TIMEOUT.as_secs(),
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
            &destination,
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

        info!("Remuxed {} via ffmpeg", destination.display());

        Ok(ToolOutcome {
            output_path: (destination != plan.file_path).then_some(destination),
            backup_path,
        })
    }
}

impl PlanCapability for FfmpegRemuxExecutor {
    fn tool_name(&self) -> &'static str {
        "ffmpeg"
    }

    fn can_handle(&self, plan: &Plan, _container: &str) -> bool {
        // ffmpeg remuxes anything except conversions into matroska,
        // which are mkvmerge's job.
        !matches!(&plan.container_change, Some(c) if c.target_format == "matroska")
    }
}
