//! External tool wrappers and dispatch.
//!
//! Four capabilities sit behind this module: the ffprobe introspector,
//! the matroska metadata editor (mkvpropedit), the matroska remuxer
//! (mkvmerge) and the container-agnostic remuxer/transcoder (ffmpeg).
//! Availability is probed once at startup into a typed map that is
//! passed down explicitly; there is no global tool cache.

pub mod command;
pub mod ffmpeg_metadata;
pub mod ffmpeg_remux;
pub mod mkvmerge;
pub mod mkvpropedit;
pub mod probe;
pub mod progress;
pub mod runner;
pub mod transcode;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use vpo_policy::evaluator::normalize_container;
use vpo_policy::Plan;

use crate::error::ToolError;

pub use ffmpeg_metadata::FfmpegMetadataExecutor;
pub use ffmpeg_remux::FfmpegRemuxExecutor;
pub use mkvmerge::MkvmergeExecutor;
pub use mkvpropedit::MkvpropeditExecutor;
pub use probe::FfprobeIntrospector;
pub use transcode::TranscodeExecutor;

/// The tools the orchestrator knows how to drive.
pub const KNOWN_TOOLS: [&str; 4] = ["ffprobe", "ffmpeg", "mkvmerge", "mkvpropedit"];

/// Which external tools are installed, by name.
#[derive(Debug, Clone, Default)]
pub struct ToolAvailability {
    tools: BTreeMap<String, PathBuf>,
}

impl ToolAvailability {
    /// Probe PATH for every known tool.
    pub fn detect() -> Self {
        let mut tools = BTreeMap::new();
        for name in KNOWN_TOOLS {
            if let Some(path) = find_in_path(name) {
                debug!("Found {name} at {}", path.display());
                tools.insert(name.to_string(), path);
            }
        }
        info!(
            "External tools available: [{}]",
            tools.keys().cloned().collect::<Vec<_>>().join(", ")
        );
        Self { tools }
    }

    /// Availability map with explicit entries (tests, containers).
    pub fn from_entries(entries: impl IntoIterator<Item = (String, PathBuf)>) -> Self {
        Self {
            tools: entries.into_iter().collect(),
        }
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn path(&self, name: &str) -> Option<&Path> {
        self.tools.get(name).map(PathBuf::as_path)
    }

    /// Path of a tool, or a ToolError naming the missing capability.
    pub fn require(&self, name: &str) -> Result<&Path, ToolError> {
        self.path(name)
            .ok_or_else(|| ToolError::Unavailable(format!("{name} is not installed")))
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Successful tool invocation outcome.
#[derive(Debug, Clone, Default)]
pub struct ToolOutcome {
    /// New primary path when the operation changed it (container
    /// conversion), None when the file was modified in place.
    pub output_path: Option<PathBuf>,
    /// Backup retained by the tool, if any.
    pub backup_path: Option<PathBuf>,
}

/// The capability protocol every plan executor satisfies.
pub trait PlanCapability {
    fn tool_name(&self) -> &'static str;
    /// Whether this executor can realize the given plan for a file in
    /// the given container.
    fn can_handle(&self, plan: &Plan, container: &str) -> bool;
}

/// The executor chosen for one plan.
#[derive(Debug)]
pub enum SelectedExecutor {
    Mkvpropedit(MkvpropeditExecutor),
    Mkvmerge(MkvmergeExecutor),
    FfmpegRemux(FfmpegRemuxExecutor),
    FfmpegMetadata(FfmpegMetadataExecutor),
}

impl SelectedExecutor {
    pub fn name(&self) -> &'static str {
        match self {
            SelectedExecutor::Mkvpropedit(e) => e.tool_name(),
            SelectedExecutor::Mkvmerge(e) => e.tool_name(),
            SelectedExecutor::FfmpegRemux(e) => e.tool_name(),
            SelectedExecutor::FfmpegMetadata(e) => e.tool_name(),
        }
    }

    /// Run the plan. `keep_backup=false` when the phase owns backup
    /// lifecycle.
    pub async fn execute(&self, plan: &Plan, keep_backup: bool) -> Result<ToolOutcome, ToolError> {
        match self {
            SelectedExecutor::Mkvpropedit(e) => e.execute(plan, keep_backup).await,
            SelectedExecutor::Mkvmerge(e) => e.execute(plan, keep_backup).await,
            SelectedExecutor::FfmpegRemux(e) => e.execute(plan, keep_backup).await,
            SelectedExecutor::FfmpegMetadata(e) => e.execute(plan, keep_backup).await,
        }
    }
}

/// Select the executor for a plan given the current container.
///
/// Container conversion takes priority; removal/reorder needs a remuxer
/// (mkvmerge on matroska, ffmpeg otherwise); metadata-only edits use the
/// matroska fast path when possible.
pub fn select_executor(
    plan: &Plan,
    container: &str,
    tools: &ToolAvailability,
    temp_directory: Option<&Path>,
) -> Option<SelectedExecutor> {
    let container = normalize_container(container);

    if let Some(change) = &plan.container_change {
        return match change.target_format.as_str() {
            "mp4" => tools.path("ffmpeg").map(|p| {
                SelectedExecutor::FfmpegRemux(FfmpegRemuxExecutor::new(
                    p.to_path_buf(),
                    temp_directory.map(Path::to_path_buf),
                ))
            }),
            "matroska" => tools.path("mkvmerge").map(|p| {
                SelectedExecutor::Mkvmerge(MkvmergeExecutor::new(
                    p.to_path_buf(),
                    temp_directory.map(Path::to_path_buf),
                ))
            }),
            _ => None,
        };
    }

    if plan.tracks_removed > 0 || plan.requires_remux {
        if container == "matroska" {
            if let Some(p) = tools.path("mkvmerge") {
                return Some(SelectedExecutor::Mkvmerge(MkvmergeExecutor::new(
                    p.to_path_buf(),
                    temp_directory.map(Path::to_path_buf),
                )));
            }
        }
        return tools.path("ffmpeg").map(|p| {
            SelectedExecutor::FfmpegRemux(FfmpegRemuxExecutor::new(
                p.to_path_buf(),
                temp_directory.map(Path::to_path_buf),
            ))
        });
    }

    // Metadata-only changes.
    if container == "matroska" {
        if let Some(p) = tools.path("mkvpropedit") {
            return Some(SelectedExecutor::Mkvpropedit(MkvpropeditExecutor::new(
                p.to_path_buf(),
            )));
        }
    }
    tools.path("ffmpeg").map(|p| {
        SelectedExecutor::FfmpegMetadata(FfmpegMetadataExecutor::new(
            p.to_path_buf(),
            temp_directory.map(Path::to_path_buf),
        ))
    })
}

/// Rename that falls back to copy+remove when crossing filesystems.
pub fn rename_or_copy(from: &Path, to: &Path) -> Result<(), ToolError> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc_exdev()) => {
            std::fs::copy(from, to).map_err(|e| ToolError::Filesystem {
                path: to.to_path_buf(),
                message: format!("cross-device copy failed: {e}"),
            })?;
            std::fs::remove_file(from).map_err(|e| ToolError::Filesystem {
                path: from.to_path_buf(),
                message: format!("source cleanup failed: {e}"),
            })?;
            Ok(())
        }
        Err(e) => Err(ToolError::Filesystem {
            path: to.to_path_buf(),
            message: format!("rename failed: {e}"),
        }),
    }
}

#[cfg(unix)]
fn libc_exdev() -> i32 {
    18 // EXDEV
}

#[cfg(not(unix))]
fn libc_exdev() -> i32 {
    17 // ERROR_NOT_SAME_DEVICE maps differently; Windows reports 17
}

/// Temp output sibling for a destination path (`.vpo_temp_<basename>`),
/// optionally placed in a configured temp directory.
pub fn temp_output_path(output: &Path, temp_directory: Option<&Path>) -> PathBuf {
    let basename = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let temp_name = format!(".vpo_temp_{basename}");
    match temp_directory {
        Some(dir) => dir.join(temp_name),
        None => output.with_file_name(temp_name),
    }
}

/// Move a verified temp output into place.
///
/// In-place rewrites optionally keep a `.vpo-backup` sibling; container
/// conversions land at a new destination and either retain or remove the
/// original. Returns the backup path when one was kept.
pub(crate) fn replace_with_temp(
    temp: &Path,
    destination: &Path,
    original: &Path,
    keep_backup: bool,
    tool: &str,
) -> Result<Option<PathBuf>, ToolError> {
    validate_output(temp, tool)?;

    if destination == original {
        let backup = if keep_backup {
            let backup = backup_sibling(original);
            std::fs::copy(original, &backup).map_err(|e| ToolError::Filesystem {
                path: backup.clone(),
                message: format!("backup copy failed: {e}"),
            })?;
            Some(backup)
        } else {
            None
        };
        rename_or_copy(temp, destination)?;
        return Ok(backup);
    }

    rename_or_copy(temp, destination)?;
    if keep_backup {
        let backup = backup_sibling(original);
        rename_or_copy(original, &backup)?;
        Ok(Some(backup))
    } else {
        std::fs::remove_file(original).map_err(|e| ToolError::Filesystem {
            path: original.to_path_buf(),
            message: format!("original cleanup failed: {e}"),
        })?;
        Ok(None)
    }
}

/// `<file>.<ext>.vpo-backup` sibling path.
pub fn backup_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".vpo-backup");
    path.with_file_name(name)
}

/// Verify a finished tool output is non-empty before it replaces anything.
pub fn validate_output(path: &Path, tool: &str) -> Result<(), ToolError> {
    let metadata = std::fs::metadata(path).map_err(|e| ToolError::Filesystem {
        path: path.to_path_buf(),
        message: format!("output missing: {e}"),
    })?;
    if metadata.len() == 0 {
        return Err(ToolError::failure(tool, "produced an empty output file"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use vpo_policy::plan::ContainerChange;

    fn plan(removed: i64, remux: bool, container_change: Option<ContainerChange>) -> Plan {
        Plan {
            file_id: "1".to_string(),
            file_path: PathBuf::from("/m/a.mkv"),
            policy_version: 1,
            actions: Vec::new(),
            track_dispositions: Vec::new(),
            tracks_kept: 2,
            tracks_removed: removed,
            requires_remux: remux || removed > 0 || container_change.is_some(),
            container_change,
        }
    }

    fn all_tools() -> ToolAvailability {
        ToolAvailability::from_entries(KNOWN_TOOLS.map(|t| (t.to_string(), PathBuf::from(format!("/usr/bin/{t}")))))
    }

    fn only(names: &[&str]) -> ToolAvailability {
        ToolAvailability::from_entries(
            names
                .iter()
                .map(|t| (t.to_string(), PathBuf::from(format!("/usr/bin/{t}")))),
        )
    }

    #[test]
    fn mp4_conversion_selects_ffmpeg() {
        let plan = plan(
            0,
            false,
            Some(ContainerChange {
                source_format: "matroska".to_string(),
                target_format: "mp4".to_string(),
            }),
        );
        let selected = select_executor(&plan, "matroska", &all_tools(), None).unwrap();
        assert_eq!(selected.name(), "ffmpeg");
    }

    #[test]
    fn matroska_conversion_selects_mkvmerge() {
        let plan = plan(
            0,
            false,
            Some(ContainerChange {
                source_format: "mp4".to_string(),
                target_format: "matroska".to_string(),
            }),
        );
        let selected = select_executor(&plan, "mp4", &all_tools(), None).unwrap();
        assert_eq!(selected.name(), "mkvmerge");
    }

    #[test]
    fn removal_in_matroska_prefers_mkvmerge() {
        let plan = plan(1, true, None);
        let selected = select_executor(&plan, "matroska", &all_tools(), None).unwrap();
        assert_eq!(selected.name(), "mkvmerge");

        // Without mkvmerge, ffmpeg remux takes over.
        let selected = select_executor(&plan, "matroska", &only(&["ffmpeg"]), None).unwrap();
        assert_eq!(selected.name(), "ffmpeg");
    }

    #[test]
    fn metadata_only_uses_fast_path_in_matroska() {
        let plan = plan(0, false, None);
        let selected = select_executor(&plan, "mkv", &all_tools(), None).unwrap();
        assert_eq!(selected.name(), "mkvpropedit");

        let selected = select_executor(&plan, "mp4", &all_tools(), None).unwrap();
        assert_eq!(selected.name(), "ffmpeg");
    }

    #[test]
    fn no_tools_means_no_executor() {
        let plan = plan(1, true, None);
        assert!(select_executor(&plan, "matroska", &only(&[]), None).is_none());
    }

    #[test]
    fn temp_path_is_hidden_sibling() {
        let temp = temp_output_path(Path::new("/m/movie.mkv"), None);
        assert_eq!(temp, PathBuf::from("/m/.vpo_temp_movie.mkv"));

        let temp = temp_output_path(Path::new("/m/movie.mkv"), Some(Path::new("/tmp/vpo")));
        assert_eq!(temp, PathBuf::from("/tmp/vpo/.vpo_temp_movie.mkv"));
    }

    #[test]
    fn missing_tool_is_a_clear_error() {
        let tools = only(&["ffmpeg"]);
        let err = tools.require("mkvmerge").unwrap_err();
        assert!(err.to_string().contains("mkvmerge"));
    }
}
