//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated data directory for gate and coverage files
//! - A `Config` pointing at it
//! - Gate file creation/removal and coverage file inspection
//!
//! # Usage
//!
//! ```ignore
//! use minitrace_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     env.enable_gate().unwrap();
//!     // run a tracer built from env.config ...
//!     let lines = env.coverage_lines();
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::{Config, TracePaths};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with its own data directory
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Data directory holding gate and coverage files
    pub data_dir: PathBuf,
    /// Config whose `trace.data_dir` is `data_dir`
    pub config: Config,
    /// Uid used to name the files
    pub uid: u32,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment for the current uid
    pub fn new() -> anyhow::Result<Self> {
        Self::with_uid(crate::path::current_uid())
    }

    /// Create a new isolated test environment naming files after `uid`
    pub fn with_uid(uid: u32) -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let data_dir = temp_dir.path().join("data");
        std::fs::create_dir_all(&data_dir)?;

        let mut config = Config::default();
        config.trace.data_dir = data_dir.clone();

        Ok(Self {
            _temp_dir: temp_dir,
            data_dir,
            config,
            uid,
            test_id,
        })
    }

    /// Gate and coverage paths of this environment
    pub fn paths(&self) -> TracePaths {
        TracePaths::for_uid(&self.config.trace, self.uid)
    }

    /// Create the gate file so that tracing may start
    pub fn enable_gate(&self) -> anyhow::Result<PathBuf> {
        let gate = self.paths().gate;
        std::fs::write(&gate, b"")?;
        Ok(gate)
    }

    /// Remove the gate file if present
    pub fn disable_gate(&self) -> anyhow::Result<()> {
        let gate = self.paths().gate;
        if gate.exists() {
            std::fs::remove_file(gate)?;
        }
        Ok(())
    }

    /// Whether a coverage file has been written
    pub fn has_coverage_file(&self) -> bool {
        self.paths().coverage.exists()
    }

    /// Coverage file contents, empty if it does not exist
    pub fn coverage_contents(&self) -> String {
        std::fs::read_to_string(self.paths().coverage).unwrap_or_default()
    }

    /// Coverage file split into lines
    pub fn coverage_lines(&self) -> Vec<String> {
        self.coverage_contents()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_data_dir() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.data_dir.exists());
        assert_eq!(env.config.trace.data_dir, env.data_dir);
    }

    #[test]
    fn test_environments_are_isolated() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();
        assert_ne!(env1.data_dir, env2.data_dir);
        assert_ne!(env1.test_id, env2.test_id);
    }

    #[test]
    fn test_gate_toggle() {
        let env = TestEnvironment::with_uid(42).unwrap();
        assert!(!env.paths().gate_exists());
        let gate = env.enable_gate().unwrap();
        assert!(gate.ends_with("mini_trace_42_config.in"));
        assert!(env.paths().gate_exists());
        env.disable_gate().unwrap();
        assert!(!env.paths().gate_exists());
        env.disable_gate().unwrap();
    }

    #[test]
    fn test_missing_coverage_reads_empty() {
        let env = TestEnvironment::new().unwrap();
        assert!(!env.has_coverage_file());
        assert!(env.coverage_lines().is_empty());
    }
}
