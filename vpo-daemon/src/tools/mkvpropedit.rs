//! Matroska metadata fast path via mkvpropedit.
//!
//! Edits flags, language and title in place without rewriting the
//! container. Only usable for metadata-only plans on matroska files.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use vpo_policy::evaluator::normalize_container;
use vpo_policy::plan::{ActionType, Plan};

use crate::error::ToolError;

use super::runner::run_tool;
use super::{backup_sibling, PlanCapability, ToolOutcome};

const EDIT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct MkvpropeditExecutor {
    tool_path: PathBuf,
}

impl MkvpropeditExecutor {
    pub fn new(tool_path: PathBuf) -> Self {
        Self { tool_path }
    }

    /// Build the mkvpropedit argument list for a plan.
    ///
    /// Track selectors are `track:@N` with N one-based in file order.
    pub fn build_args(plan: &Plan) -> Vec<String> {
        let mut args = vec![plan.file_path.to_string_lossy().into_owned()];

        for action in &plan.actions {
            let Some(index) = action.track_index else {
                continue;
            };
            args.push("--edit".to_string());
            args.push(format!("track:@{}", index + 1));

            match action.action_type {
                ActionType::SetDefault => {
                    args.push("--set".to_string());
                    args.push("flag-default=1".to_string());
                }
                ActionType::ClearDefault => {
                    args.push("--set".to_string());
                    args.push("flag-default=0".to_string());
                }
                ActionType::SetForced => {
                    let flag = action.desired_value.as_bool().unwrap_or(false);
                    args.push("--set".to_string());
                    args.push(format!("flag-forced={}", flag as u8));
                }
                ActionType::SetLanguage => {
                    let language = action.desired_value.as_str().unwrap_or("und");
                    args.push("--set".to_string());
                    args.push(format!("language={language}"));
                }
                ActionType::SetTitle => {
                    let title = action.desired_value.as_str().unwrap_or("");
                    args.push("--set".to_string());
                    args.push(format!("name={title}"));
                }
                ActionType::Reorder => {
                    // Reordering needs a remux; never routed here.
                }
            }
        }

        args
    }

    pub async fn execute(&self, plan: &Plan, keep_backup: bool) -> Result<ToolOutcome, ToolError> {
        let backup_path = if keep_backup {
            let backup = backup_sibling(&plan.file_path);
            std::fs::copy(&plan.file_path, &backup).map_err(|e| ToolError::Filesystem {
                path: backup.clone(),
                message: format!("backup copy failed: {e}"),
            })?;
            Some(backup)
        } else {
            None
        };

        let args = Self::build_args(plan);
        let output = run_tool(&self.tool_path, &args, Some(EDIT_TIMEOUT), |_| {}).await?;

        if output.timed_out {
            return Err(ToolError::Timeout {
                tool: "mkvpropedit".to_string(),
                seconds: EDIT_TIMEOUT.as_secs(),
            });
        }
        if !output.success {
            return Err(ToolError::failure(
                "mkvpropedit",
                format!("exit code {:?}: {}", output.exit_code, output.tail_text()),
            ));
        }

        info!(
            "Applied {} metadata edits to {}",
            plan.actions.len(),
            plan.file_path.display()
        );

        Ok(ToolOutcome {
            output_path: None,
            backup_path,
        })
    }
}

impl PlanCapability for MkvpropeditExecutor {
    fn tool_name(&self) -> &'static str {
        "mkvpropedit"
    }

    fn can_handle(&self, plan: &Plan, container: &str) -> bool {
        plan.is_metadata_only() && normalize_container(container) == "matroska"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use vpo_policy::plan::PlannedAction;

    fn metadata_plan(actions: Vec<PlannedAction>) -> Plan {
        Plan {
            file_id: "1".to_string(),
            file_path: PathBuf::from("/m/a.mkv"),
            policy_version: 1,
            actions,
            track_dispositions: Vec::new(),
            tracks_kept: 3,
            tracks_removed: 0,
            requires_remux: false,
            container_change: None,
        }
    }

    fn action(action_type: ActionType, index: i64, desired: serde_json::Value) -> PlannedAction {
        PlannedAction {
            action_type,
            track_index: Some(index),
            track_id: None,
            current_value: json!(null),
            desired_value: desired,
        }
    }

    #[test]
    fn args_address_tracks_one_based() {
        let plan = metadata_plan(vec![
            action(ActionType::ClearDefault, 1, json!(false)),
            action(ActionType::SetDefault, 2, json!(true)),
            action(ActionType::SetLanguage, 2, json!("eng")),
        ]);

        let args = MkvpropeditExecutor::build_args(&plan);
        assert_eq!(args[0], "/m/a.mkv");

        let joined = args.join(" ");
        assert!(joined.contains("--edit track:@2 --set flag-default=0"));
        assert!(joined.contains("--edit track:@3 --set flag-default=1"));
        assert!(joined.contains("--edit track:@3 --set language=eng"));
    }

    #[test]
    fn can_handle_requires_matroska_and_metadata_only() {
        let executor = MkvpropeditExecutor::new(PathBuf::from("/usr/bin/mkvpropedit"));
        let plan = metadata_plan(vec![action(ActionType::SetDefault, 0, json!(true))]);

        assert!(executor.can_handle(&plan, "matroska"));
        assert!(executor.can_handle(&plan, "mkv"));
        assert!(!executor.can_handle(&plan, "mp4"));

        let mut remux_plan = metadata_plan(vec![]);
        remux_plan.requires_remux = true;
        assert!(!executor.can_handle(&remux_plan, "matroska"));
    }
}
