//! The plan model: ordered actions plus track dispositions.
//!
//! A `Plan` is an immutable value describing exactly what an executor
//! must do to one file. Actions carry both the current and the desired
//! value so executors can verify state and dry-runs can render diffs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One atomic intent within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ClearDefault,
    SetDefault,
    SetTitle,
    SetLanguage,
    SetForced,
    Reorder,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::ClearDefault => "clear_default",
            ActionType::SetDefault => "set_default",
            ActionType::SetTitle => "set_title",
            ActionType::SetLanguage => "set_language",
            ActionType::SetForced => "set_forced",
            ActionType::Reorder => "reorder",
        }
    }

    /// Execution-safe ordering rank: default-clears before default-sets,
    /// per-track metadata next, file-level reorder last.
    pub fn rank(&self) -> u8 {
        match self {
            ActionType::ClearDefault => 0,
            ActionType::SetDefault => 1,
            ActionType::SetTitle | ActionType::SetLanguage | ActionType::SetForced => 2,
            ActionType::Reorder => 3,
        }
    }
}

/// One planned action. `track_index` is None for file-level actions
/// (reorder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub action_type: ActionType,
    pub track_index: Option<i64>,
    /// Catalog row id when known (audit convenience).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub track_id: Option<i64>,
    pub current_value: Value,
    pub desired_value: Value,
}

/// Kept/removed decision for one input track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispositionAction {
    #[serde(rename = "KEEP")]
    Keep,
    #[serde(rename = "REMOVE")]
    Remove,
}

/// Disposition row for one input track under the filter pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDisposition {
    pub track_index: i64,
    pub track_type: vpo_common::TrackType,
    pub codec: Option<String>,
    pub language: Option<String>,
    pub title: Option<String>,
    pub channels: Option<i64>,
    pub resolution: Option<String>,
    pub action: DispositionAction,
    pub reason: String,
}

/// Requested container change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerChange {
    pub source_format: String,
    pub target_format: String,
}

/// The evaluator's output: a totally ordered action list plus per-track
/// dispositions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub file_id: String,
    pub file_path: PathBuf,
    pub policy_version: i64,
    pub actions: Vec<PlannedAction>,
    pub track_dispositions: Vec<TrackDisposition>,
    pub tracks_kept: i64,
    pub tracks_removed: i64,
    pub requires_remux: bool,
    pub container_change: Option<ContainerChange>,
}

impl Plan {
    /// True when the plan touches only per-track metadata (no removal,
    /// reorder or container change).
    pub fn is_metadata_only(&self) -> bool {
        self.tracks_removed == 0 && !self.requires_remux && self.container_change.is_none()
    }

    /// Total number of changes this plan represents.
    pub fn change_count(&self) -> i64 {
        self.actions.len() as i64 + self.tracks_removed
    }

    /// Indices of kept tracks in input order.
    pub fn kept_indices(&self) -> Vec<i64> {
        self.track_dispositions
            .iter()
            .filter(|d| d.action == DispositionAction::Keep)
            .map(|d| d.track_index)
            .collect()
    }

    /// Indices of removed tracks in input order.
    pub fn removed_indices(&self) -> Vec<i64> {
        self.track_dispositions
            .iter()
            .filter(|d| d.action == DispositionAction::Remove)
            .map(|d| d.track_index)
            .collect()
    }

    /// The desired output order from the reorder action, if any.
    pub fn desired_track_order(&self) -> Option<Vec<i64>> {
        self.actions
            .iter()
            .find(|a| a.action_type == ActionType::Reorder)
            .and_then(|a| serde_json::from_value(a.desired_value.clone()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_ranks_order_clears_before_sets() {
        assert!(ActionType::ClearDefault.rank() < ActionType::SetDefault.rank());
        assert!(ActionType::SetDefault.rank() < ActionType::SetLanguage.rank());
        assert!(ActionType::SetLanguage.rank() < ActionType::Reorder.rank());
    }

    #[test]
    fn action_serializes_snake_case() {
        let action = PlannedAction {
            action_type: ActionType::SetDefault,
            track_index: Some(1),
            track_id: None,
            current_value: serde_json::json!(false),
            desired_value: serde_json::json!(true),
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"set_default\""));
        assert!(!json.contains("track_id"));
    }

    #[test]
    fn disposition_action_uses_uppercase_wire_form() {
        let json = serde_json::to_string(&DispositionAction::Remove).unwrap();
        assert_eq!(json, "\"REMOVE\"");
    }
}
