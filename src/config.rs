//! Coordinator configuration, loadable from TOML with sensible defaults.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{OpLogError, Result};

/// Tunables for a `TransactionCoordinator`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// How often `stop(wait)` polls the active-transaction set while
    /// draining, in milliseconds. Spec §5 calls for "a bounded interval
    /// (~half a second)".
    #[serde(default = "default_stop_wait_poll_interval_ms")]
    pub stop_wait_poll_interval_ms: u64,

    /// Whether `begin_transaction` binds to the calling thread (§5).
    #[serde(default = "default_thread_affine")]
    pub thread_affine: bool,

    /// Whether `start` tolerates `StoreOpenStatus::Corrupt` by deleting
    /// the offending logs and proceeding, rather than refusing to start.
    #[serde(default = "default_recover_corrupt")]
    pub recover_corrupt: bool,
}

fn default_stop_wait_poll_interval_ms() -> u64 {
    500
}

fn default_thread_affine() -> bool {
    true
}

fn default_recover_corrupt() -> bool {
    false
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            stop_wait_poll_interval_ms: default_stop_wait_poll_interval_ms(),
            thread_affine: default_thread_affine(),
            recover_corrupt: default_recover_corrupt(),
        }
    }
}

impl CoordinatorConfig {
    /// Loads configuration from a TOML file, falling back to defaults if
    /// the file does not exist.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|e| OpLogError::invalid(format!("invalid config at {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(OpLogError::io_at(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let cfg = CoordinatorConfig::load_from_file(&dir.path().join("missing.toml")).unwrap();
        assert!(cfg.thread_affine);
        assert_eq!(cfg.stop_wait_poll_interval_ms, 500);
    }

    #[test]
    fn partial_toml_fills_in_remaining_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("opslog.toml");
        fs::write(&path, "thread_affine = false\n").unwrap();
        let cfg = CoordinatorConfig::load_from_file(&path).unwrap();
        assert!(!cfg.thread_affine);
        assert!(!cfg.recover_corrupt);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("opslog.toml");
        fs::write(&path, "not_a_real_field = 1\n").unwrap();
        assert!(CoordinatorConfig::load_from_file(&path).is_err());
    }
}
