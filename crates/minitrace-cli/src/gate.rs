//! Gate file management for `minitrace enable` / `disable` / `status`.
//!
//! The traced process only checks whether its gate file exists and can be
//! opened, so enabling is just creating an empty file it can read.

use std::fs;
use std::os::unix::fs::PermissionsExt;

use anyhow::{Context, Result};
use minitrace_config::{log_cli_debug, log_cli_info, TracePaths};
use serde::Serialize;

/// Create the gate file so the next `start` of the traced process succeeds
pub fn enable(paths: &TracePaths) -> Result<bool> {
    if paths.gate_exists() {
        log_cli_debug!("Gate already present", uid = paths.uid);
        return Ok(false);
    }

    if let Some(parent) = paths.gate.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(&paths.gate, b"")
        .with_context(|| format!("Failed to create gate file {}", paths.gate.display()))?;
    fs::set_permissions(&paths.gate, fs::Permissions::from_mode(0o644))
        .with_context(|| format!("Failed to set permissions on {}", paths.gate.display()))?;
    hand_over(paths)?;

    log_cli_info!("Gate created", uid = paths.uid);
    Ok(true)
}

/// Give the gate file to the traced uid when running as root
fn hand_over(paths: &TracePaths) -> Result<()> {
    let me = nix::unistd::getuid();
    if !me.is_root() || paths.uid == me.as_raw() {
        return Ok(());
    }
    nix::unistd::chown(
        &paths.gate,
        Some(nix::unistd::Uid::from_raw(paths.uid)),
        None,
    )
    .with_context(|| format!("Failed to hand {} to uid {}", paths.gate.display(), paths.uid))?;
    Ok(())
}

/// Remove the gate file; a running session keeps going until it is stopped
pub fn disable(paths: &TracePaths) -> Result<bool> {
    match fs::remove_file(&paths.gate) {
        Ok(()) => {
            log_cli_info!("Gate removed", uid = paths.uid);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e)
            .with_context(|| format!("Failed to remove gate file {}", paths.gate.display())),
    }
}

/// Remove the coverage file so the next session starts a fresh log
pub fn clear(paths: &TracePaths) -> Result<bool> {
    match fs::remove_file(&paths.coverage) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e)
            .with_context(|| format!("Failed to remove {}", paths.coverage.display())),
    }
}

/// What `minitrace status` reports
#[derive(Debug, Serialize)]
pub struct Status {
    pub uid: u32,
    pub gate: String,
    pub enabled: bool,
    pub coverage: String,
    /// Size of the coverage file, if it exists
    pub coverage_bytes: Option<u64>,
}

pub fn status(paths: &TracePaths) -> Status {
    Status {
        uid: paths.uid,
        gate: paths.gate.display().to_string(),
        enabled: paths.gate_exists(),
        coverage: paths.coverage.display().to_string(),
        coverage_bytes: fs::metadata(&paths.coverage).ok().map(|m| m.len()),
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Uid:      {}", self.uid)?;
        writeln!(
            f,
            "Gate:     {} ({})",
            self.gate,
            if self.enabled { "enabled" } else { "disabled" }
        )?;
        match self.coverage_bytes {
            Some(bytes) => write!(f, "Coverage: {} ({} bytes)", self.coverage, bytes),
            None => write!(f, "Coverage: {} (missing)", self.coverage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minitrace_config::testing::TestEnvironment;

    #[test]
    fn test_enable_then_disable() {
        let env = TestEnvironment::new().unwrap();
        let paths = env.paths();

        assert!(enable(&paths).unwrap());
        assert!(paths.gate_exists());
        assert!(!enable(&paths).unwrap());

        assert!(disable(&paths).unwrap());
        assert!(!paths.gate_exists());
        assert!(!disable(&paths).unwrap());
    }

    #[test]
    fn test_enable_creates_data_dir() {
        let env = TestEnvironment::new().unwrap();
        let mut config = env.config.clone();
        config.trace.data_dir = env.data_dir.join("nested/dir");
        let paths = TracePaths::for_uid(&config.trace, env.uid);

        assert!(enable(&paths).unwrap());
        assert!(paths.gate.exists());
        let mode = fs::metadata(&paths.gate).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn test_status_reports_files() {
        let env = TestEnvironment::new().unwrap();
        let paths = env.paths();

        let before = status(&paths);
        assert!(!before.enabled);
        assert_eq!(before.coverage_bytes, None);
        assert!(before.to_string().contains("(disabled)"));

        env.enable_gate().unwrap();
        fs::write(&paths.coverage, "Start\t1\t2\n").unwrap();
        let after = status(&paths);
        assert!(after.enabled);
        assert_eq!(after.coverage_bytes, Some(10));
        assert!(after.to_string().contains("(10 bytes)"));
    }

    #[test]
    fn test_clear_removes_coverage() {
        let env = TestEnvironment::new().unwrap();
        let paths = env.paths();
        assert!(!clear(&paths).unwrap());
        fs::write(&paths.coverage, "Start\t1\t2\n").unwrap();
        assert!(clear(&paths).unwrap());
        assert!(!env.has_coverage_file());
    }
}
