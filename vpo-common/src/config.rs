//! Daemon configuration loading.
//!
//! Settings come from a TOML file with serde defaults for every field, so
//! an empty file (or no file at all) yields a runnable configuration.
//! Policy-level knobs live in the policy document itself, not here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Orchestrator daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Path to the catalog database file.
    pub database_path: PathBuf,

    /// Directory trees scanned by scan jobs.
    pub library_roots: Vec<PathBuf>,

    /// Number of concurrent workers.
    pub worker_count: usize,

    /// Seconds a worker sleeps between empty queue polls.
    pub poll_interval_secs: u64,

    /// Heartbeat update cadence while a job runs.
    pub heartbeat_interval_secs: u64,

    /// Age after which a running job's heartbeat counts as stale.
    pub heartbeat_stale_secs: u64,

    /// Supervisor pass cadence (reaping + retention).
    pub supervisor_interval_secs: u64,

    /// Days to keep terminal jobs before retention deletes them.
    pub job_retention_days: u64,

    /// Overrides temp file placement for remux/transcode outputs.
    pub temp_directory: Option<PathBuf>,

    /// Default tracing filter, overridable via RUST_LOG.
    pub log_filter: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("vpo.db"),
            library_roots: Vec::new(),
            worker_count: 2,
            poll_interval_secs: 2,
            heartbeat_interval_secs: 10,
            heartbeat_stale_secs: 120,
            supervisor_interval_secs: 60,
            job_retention_days: 30,
            temp_directory: None,
            log_filter: "info".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: DaemonConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            warn!("Config file {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::Config("worker_count must be at least 1".to_string()));
        }
        if self.heartbeat_stale_secs <= self.heartbeat_interval_secs {
            return Err(Error::Config(
                "heartbeat_stale_secs must exceed heartbeat_interval_secs".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = DaemonConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker_count, 2);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "worker_count = 4").unwrap();
        writeln!(file, "database_path = \"/tmp/library.db\"").unwrap();

        let config = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.database_path, PathBuf::from("/tmp/library.db"));
        assert_eq!(config.poll_interval_secs, 2);
    }

    #[test]
    fn zero_workers_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "worker_count = 0").unwrap();
        assert!(DaemonConfig::load(file.path()).is_err());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = DaemonConfig::load_or_default(Path::new("/nonexistent/vpo.toml")).unwrap();
        assert_eq!(config.worker_count, 2);
    }

    #[test]
    fn unknown_keys_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "wrker_count = 4").unwrap();
        assert!(DaemonConfig::load(file.path()).is_err());
    }
}
