//! Integration tests for minitrace-config
//!
//! These tests verify config parsing and file layout with real file system operations.

use std::path::PathBuf;
use tempfile::tempdir;

use minitrace_config::{Config, TracePaths};

/// Test config loading from a real TOML file
#[test]
fn test_load_config_from_file() {
    let temp = tempdir().unwrap();
    let config_path = temp.path().join("config.toml");

    let config_content = r#"
[trace]
data_dir = "/sdcard/minitrace"
file_prefix = "cov_"
instrumentation_key = "CoverageTracer"

[filter]
framework_prefix = "/apex/"
"#;
    std::fs::write(&config_path, config_content).unwrap();

    let config = Config::from_file(&config_path).unwrap();

    assert_eq!(config.trace.data_dir, PathBuf::from("/sdcard/minitrace"));
    assert_eq!(config.trace.file_prefix, "cov_");
    assert_eq!(config.trace.instrumentation_key, "CoverageTracer");
    assert_eq!(config.filter.framework_prefix, "/apex/");
}

/// Malformed TOML surfaces as a parse error rather than defaults
#[test]
fn test_invalid_toml_is_an_error() {
    let temp = tempdir().unwrap();
    let config_path = temp.path().join("config.toml");
    std::fs::write(&config_path, "[trace\ndata_dir = ").unwrap();

    let err = Config::from_file(&config_path).unwrap_err();
    assert!(matches!(err, minitrace_config::ConfigError::Toml(_)));
}

#[test]
fn test_missing_file_is_io_error() {
    let temp = tempdir().unwrap();
    let err = Config::from_file(&temp.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, minitrace_config::ConfigError::Io(_)));
}

/// Paths follow the configured directory and prefix
#[test]
fn test_paths_follow_config() {
    let config: Config = toml::from_str(
        r#"
[trace]
data_dir = "/var/cov"
file_prefix = "t_"
"#,
    )
    .unwrap();

    let paths = TracePaths::for_uid(&config.trace, 1000);
    assert_eq!(paths.gate, PathBuf::from("/var/cov/t_1000_config.in"));
    assert_eq!(paths.coverage, PathBuf::from("/var/cov/t_1000_coverage.dat"));
}

/// Default TOML round-trips through the parser
#[test]
fn test_default_toml_parses() {
    let toml_str = Config::default_toml();
    let parsed: Config = toml::from_str(&toml_str).unwrap();
    assert_eq!(parsed.trace.file_prefix, "mini_trace_");
    assert_eq!(parsed.filter.framework_prefix, "/system/framework/");
}
