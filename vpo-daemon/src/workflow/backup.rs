//! Backup and rollback for phase execution.
//!
//! Every phase starts by copying the file to a `.vpo-backup` sibling.
//! On failure the backup is copied back over the working file, leaving it
//! byte-identical to its pre-phase state; on success the backup is
//! removed.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::tools::backup_sibling;

use super::PhaseExecutionState;

/// Create the phase backup. Returns None on failure (the phase must then
/// abort before modifying anything).
pub(crate) fn create_backup(file_path: &Path) -> Option<PathBuf> {
    let backup_path = backup_sibling(file_path);
    match std::fs::copy(file_path, &backup_path) {
        Ok(_) => Some(backup_path),
        Err(e) => {
            warn!("Failed to create backup: {e}");
            None
        }
    }
}

/// Restore the working file from its backup.
pub(crate) fn rollback_phase(state: &PhaseExecutionState) -> bool {
    let Some(backup_path) = &state.backup_path else {
        warn!("No backup available for rollback");
        return false;
    };
    if !backup_path.exists() {
        warn!("Backup file not found: {}", backup_path.display());
        return false;
    }

    match std::fs::copy(backup_path, &state.file_path) {
        Ok(_) => {
            info!("Restored {} from backup", state.file_path.display());
            true
        }
        Err(e) => {
            error!("Failed to restore from backup: {e}");
            false
        }
    }
}

/// Attempt rollback after a failure. Best-effort: when even the restore
/// fails, the backup is left in place for operator recovery.
pub(crate) fn handle_phase_failure(state: &PhaseExecutionState, message: &str) {
    error!("Phase '{}' failed: {message}", state.phase.name);

    if state.file_modified && state.backup_path.is_some() {
        info!("Attempting rollback...");
        if rollback_phase(state) {
            info!("Rollback successful");
            cleanup_backup(state);
        } else {
            error!(
                "Rollback failed - backup left at {:?} for manual recovery",
                state.backup_path
            );
        }
    } else {
        cleanup_backup(state);
    }
}

/// Remove the backup after successful completion.
pub(crate) fn cleanup_backup(state: &PhaseExecutionState) {
    let Some(backup_path) = &state.backup_path else {
        return;
    };
    if !backup_path.exists() {
        return;
    }
    match std::fs::remove_file(backup_path) {
        Ok(()) => debug!("Removed backup file: {}", backup_path.display()),
        Err(e) => warn!("Failed to remove backup file: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpo_policy::types::PhaseDefinition;

    fn state_for(path: PathBuf) -> PhaseExecutionState {
        PhaseExecutionState::new(
            path,
            PhaseDefinition {
                name: "test".to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn backup_and_rollback_restore_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("movie.mkv");
        std::fs::write(&file, b"original contents").unwrap();

        let mut state = state_for(file.clone());
        state.backup_path = create_backup(&file);
        assert!(state.backup_path.is_some());
        assert_eq!(
            state.backup_path.as_ref().unwrap().file_name().unwrap(),
            "movie.mkv.vpo-backup"
        );

        // Simulate a partial mutation, then roll back.
        std::fs::write(&file, b"corrupted").unwrap();
        state.file_modified = true;
        assert!(rollback_phase(&state));
        assert_eq!(std::fs::read(&file).unwrap(), b"original contents");
    }

    #[test]
    fn cleanup_removes_backup() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("movie.mkv");
        std::fs::write(&file, b"data").unwrap();

        let mut state = state_for(file.clone());
        state.backup_path = create_backup(&file);
        let backup = state.backup_path.clone().unwrap();
        assert!(backup.exists());

        cleanup_backup(&state);
        assert!(!backup.exists());
    }

    #[test]
    fn rollback_without_backup_reports_failure() {
        let state = state_for(PathBuf::from("/nonexistent/file.mkv"));
        assert!(!rollback_phase(&state));
    }

    #[test]
    fn failure_handler_restores_modified_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("movie.mkv");
        std::fs::write(&file, b"before").unwrap();

        let mut state = state_for(file.clone());
        state.backup_path = create_backup(&file);
        std::fs::write(&file, b"after").unwrap();
        state.file_modified = true;

        handle_phase_failure(&state, "tool exploded");
        assert_eq!(std::fs::read(&file).unwrap(), b"before");
    }
}
