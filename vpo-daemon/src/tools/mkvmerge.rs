//! Matroska remuxing via mkvmerge.
//!
//! Handles track removal, reordering, flag/metadata rewrites and
//! conversion into matroska. Writes to a temp sibling, validates, then
//! swaps the result into place.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use vpo_common::TrackType;
use vpo_policy::evaluator::normalize_container;
use vpo_policy::plan::{ActionType, DispositionAction, Plan};

use crate::error::ToolError;

use super::runner::run_tool;
use super::{replace_with_temp, temp_output_path, PlanCapability, ToolOutcome};

const REMUX_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct MkvmergeExecutor {
    tool_path: PathBuf,
    temp_directory: Option<PathBuf>,
}

impl MkvmergeExecutor {
    pub fn new(tool_path: PathBuf, temp_directory: Option<PathBuf>) -> Self {
        Self {
            tool_path,
            temp_directory,
        }
    }

    /// Destination path: unchanged for in-place remux, `.mkv` sibling for
    /// container conversion.
    fn destination(plan: &Plan) -> PathBuf {
        match &plan.container_change {
            Some(change) if change.target_format == "matroska" => {
                plan.file_path.with_extension("mkv")
            }
            _ => plan.file_path.clone(),
        }
    }

    /// Build the mkvmerge argument list. Track IDs are zero-based input
    /// stream positions; attachments are addressed by their own one-based
    /// numbering.
    pub fn build_args(plan: &Plan, output: &std::path::Path) -> Vec<String> {
        let mut args = vec!["-o".to_string(), output.to_string_lossy().into_owned()];

        // Track selection per kind, from the dispositions.
        let kept_of = |kind: TrackType| -> Vec<i64> {
            plan.track_dispositions
                .iter()
                .filter(|d| d.track_type == kind && d.action == DispositionAction::Keep)
                .map(|d| d.track_index)
                .collect()
        };
        let removed_of = |kind: TrackType| -> usize {
            plan.track_dispositions
                .iter()
                .filter(|d| d.track_type == kind && d.action == DispositionAction::Remove)
                .count()
        };

        if removed_of(TrackType::Audio) > 0 {
            let kept = kept_of(TrackType::Audio);
            if kept.is_empty() {
                args.push("--no-audio".to_string());
            } else {
                args.push("--audio-tracks".to_string());
                args.push(join_ids(&kept));
            }
        }
        if removed_of(TrackType::Subtitle) > 0 {
            let kept = kept_of(TrackType::Subtitle);
            if kept.is_empty() {
                args.push("--no-subtitles".to_string());
            } else {
                args.push("--subtitle-tracks".to_string());
                args.push(join_ids(&kept));
            }
        }
        if removed_of(TrackType::Attachment) > 0 {
            // Attachments number from one, in attachment order.
            let attachment_positions: Vec<i64> = plan
                .track_dispositions
                .iter()
                .filter(|d| d.track_type == TrackType::Attachment)
                .enumerate()
                .filter(|(_, d)| d.action == DispositionAction::Keep)
                .map(|(position, _)| position as i64 + 1)
                .collect();
            if attachment_positions.is_empty() {
                args.push("--no-attachments".to_string());
            } else {
                args.push("--attachments".to_string());
                args.push(join_ids(&attachment_positions));
            }
        }

        // Per-track flag and metadata rewrites.
        for action in &plan.actions {
            let Some(index) = action.track_index else {
                continue;
            };
            match action.action_type {
                ActionType::SetDefault => {
                    args.push("--default-track-flag".to_string());
                    args.push(format!("{index}:1"));
                }
                ActionType::ClearDefault => {
                    args.push("--default-track-flag".to_string());
                    args.push(format!("{index}:0"));
                }
                ActionType::SetForced => {
                    let flag = action.desired_value.as_bool().unwrap_or(false);
                    args.push("--forced-display-flag".to_string());
                    args.push(format!("{index}:{}", flag as u8));
                }
                ActionType::SetLanguage => {
                    let language = action.desired_value.as_str().unwrap_or("und");
                    args.push("--language".to_string());
                    args.push(format!("{index}:{language}"));
                }
                ActionType::SetTitle => {
                    let title = action.desired_value.as_str().unwrap_or("");
                    args.push("--track-name".to_string());
                    args.push(format!("{index}:{title}"));
                }
                ActionType::Reorder => {}
            }
        }

        // Output order for kept tracks.
        if let Some(order) = plan.desired_track_order() {
            args.push("--track-order".to_string());
            args.push(
                order
                    .iter()
                    .map(|id| format!("0:{id}"))
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }

        args.push(plan.file_path.to_string_lossy().into_owned());
        args
    }

    pub async fn execute(&self, plan: &Plan, keep_backup: bool) -> Result<ToolOutcome, ToolError> {
        let destination = Self::destination(plan);
        let temp = temp_output_path(&destination, self.temp_directory.as_deref());
        let args = Self::build_args(plan, &temp);

        let output = run_tool(&self.tool_path, &args, Some(REMUX_TIMEOUT), |_| {}).await;
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                return Err(e);
            }
        };

        if output.timed_out {
            let _ = std::fs::remove_file(&temp);
            return Err(ToolError::Timeout {
                tool: "mkvmerge".to_string(),
                seconds: REMUX_TIMEOUT.as_secs(),
            });
        }
        // mkvmerge exit code 1 means warnings only; 2 and above is failure.
        if !output.success && output.exit_code != Some(1) {
            let _ = std::fs::remove_file(&temp);
            return Err(ToolError::failure(
                "mkvmerge",
                format!("exit code {:?}: {}", output.exit_code, output.tail_text()),
            ));
        }

        let backup_path = match replace_with_temp(
            &temp,
            &destination,
            &plan.file_path,
            keep_backup,
            "mkvmerge",
        ) {
            Ok(backup) => backup,
            Err(e) => {
                let _ = std::fs::remove_file(&temp);
                return Err(e);
            }
        };

        info!(
            "Remuxed {} ({} tracks removed)",
            destination.display(),
            plan.tracks_removed
        );

        Ok(ToolOutcome {
            output_path: (destination != plan.file_path).then_some(destination),
            backup_path,
        })
    }
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

impl PlanCapability for MkvmergeExecutor {
    fn tool_name(&self) -> &'static str {
        "mkvmerge"
    }

    fn can_handle(&self, plan: &Plan, container: &str) -> bool {
        match &plan.container_change {
            Some(change) => change.target_format == "matroska",
            None => normalize_container(container) == "matroska",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vpo_policy::plan::{ContainerChange, PlannedAction, TrackDisposition};

    fn disposition(index: i64, kind: TrackType, action: DispositionAction) -> TrackDisposition {
        TrackDisposition {
            track_index: index,
            track_type: kind,
            codec: None,
            language: None,
            title: None,
            channels: None,
            resolution: None,
            action,
            reason: String::new(),
        }
    }

    fn remux_plan() -> Plan {
        Plan {
            file_id: "1".to_string(),
            file_path: PathBuf::from("/m/a.mkv"),
            policy_version: 1,
            actions: Vec::new(),
            track_dispositions: vec![
                disposition(0, TrackType::Video, DispositionAction::Keep),
                disposition(1, TrackType::Audio, DispositionAction::Keep),
                disposition(2, TrackType::Audio, DispositionAction::Remove),
                disposition(3, TrackType::Subtitle, DispositionAction::Remove),
            ],
            tracks_kept: 2,
            tracks_removed: 2,
            requires_remux: true,
            container_change: None,
        }
    }

    #[test]
    fn args_select_kept_tracks() {
        let plan = remux_plan();
        let args = MkvmergeExecutor::build_args(&plan, std::path::Path::new("/m/.vpo_temp_a.mkv"));
        let joined = args.join(" ");

        assert!(joined.starts_with("-o /m/.vpo_temp_a.mkv"));
        assert!(joined.contains("--audio-tracks 1"));
        assert!(joined.contains("--no-subtitles"));
        assert!(joined.ends_with("/m/a.mkv"));
    }

    #[test]
    fn args_carry_flags_and_order() {
        let mut plan = remux_plan();
        plan.actions = vec![
            PlannedAction {
                action_type: ActionType::SetDefault,
                track_index: Some(1),
                track_id: None,
                current_value: json!(false),
                desired_value: json!(true),
            },
            PlannedAction {
                action_type: ActionType::Reorder,
                track_index: None,
                track_id: None,
                current_value: json!([0, 1]),
                desired_value: json!([1, 0]),
            },
        ];

        let args = MkvmergeExecutor::build_args(&plan, std::path::Path::new("/tmp/out.mkv"));
        let joined = args.join(" ");
        assert!(joined.contains("--default-track-flag 1:1"));
        assert!(joined.contains("--track-order 0:1,0:0"));
    }

    #[test]
    fn conversion_targets_mkv_extension() {
        let mut plan = remux_plan();
        plan.file_path = PathBuf::from("/m/a.mp4");
        plan.container_change = Some(ContainerChange {
            source_format: "mp4".to_string(),
            target_format: "matroska".to_string(),
        });

        assert_eq!(MkvmergeExecutor::destination(&plan), PathBuf::from("/m/a.mkv"));
    }

    #[test]
    fn attachment_selection_is_one_based() {
        let mut plan = remux_plan();
        plan.track_dispositions = vec![
            disposition(0, TrackType::Video, DispositionAction::Keep),
            disposition(4, TrackType::Attachment, DispositionAction::Remove),
            disposition(5, TrackType::Attachment, DispositionAction::Keep),
        ];

        let args = MkvmergeExecutor::build_args(&plan, std::path::Path::new("/tmp/out.mkv"));
        let joined = args.join(" ");
        assert!(joined.contains("--attachments 2"));
    }
}
