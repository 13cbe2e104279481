//! File layout for trace control and coverage output.
//!
//! Both files are named after the uid that owns the traced process so that
//! several apps can trace side by side in one data directory:
//!
//! ```text
//! <data_dir>/<prefix><uid>_config.in      gate: tracing may start while it exists
//! <data_dir>/<prefix><uid>_coverage.dat   append-only coverage log
//! ```

use std::path::{Path, PathBuf};

use crate::TraceConfig;

/// Resolved gate and coverage file paths for one uid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracePaths {
    pub uid: u32,
    pub gate: PathBuf,
    pub coverage: PathBuf,
}

impl TracePaths {
    /// Paths for an explicit uid
    pub fn for_uid(trace: &TraceConfig, uid: u32) -> Self {
        Self {
            uid,
            gate: gate_path(&trace.data_dir, &trace.file_prefix, uid),
            coverage: coverage_path(&trace.data_dir, &trace.file_prefix, uid),
        }
    }

    /// Paths for the real uid of this process
    pub fn current(trace: &TraceConfig) -> Self {
        Self::for_uid(trace, current_uid())
    }

    /// Whether the gate file is present
    pub fn gate_exists(&self) -> bool {
        self.gate.exists()
    }
}

/// Real uid of the calling process
pub fn current_uid() -> u32 {
    nix::unistd::getuid().as_raw()
}

/// `<data_dir>/<prefix><uid>_config.in`
pub fn gate_path(data_dir: impl AsRef<Path>, prefix: &str, uid: u32) -> PathBuf {
    data_dir.as_ref().join(format!("{prefix}{uid}_config.in"))
}

/// `<data_dir>/<prefix><uid>_coverage.dat`
pub fn coverage_path(data_dir: impl AsRef<Path>, prefix: &str, uid: u32) -> PathBuf {
    data_dir.as_ref().join(format!("{prefix}{uid}_coverage.dat"))
}
