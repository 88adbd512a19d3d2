use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use sheetops::transaction::RollbackMode;
use sheetops::{CliArgs, OrchestratorConfig};

fn write_config(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write config");
    path
}

fn with_file(path: PathBuf) -> CliArgs {
    CliArgs {
        config: Some(path),
        ..CliArgs::default()
    }
}

#[test]
fn defaults_without_a_file() {
    let config = OrchestratorConfig::from_args(CliArgs::default()).unwrap();
    assert_eq!(config, OrchestratorConfig::default());
    assert_eq!(config.call_timeout(), Some(Duration::from_secs(30)));
    assert_eq!(config.max_batch_bytes(), Some(8 * 1024 * 1024));
    assert_eq!(config.policy().max_cells, 50_000);
    assert!(config.policy().single_destructive_class);
    assert_eq!(config.rollback_mode, RollbackMode::Compensating);
}

#[test]
fn yaml_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        "sheetops.yaml",
        "max_cells: 2000\nwrite_capacity: 10\nrollback_mode: structural\ndiff_full_max_cells: 50\n",
    );
    let config = OrchestratorConfig::from_args(with_file(path)).unwrap();
    assert_eq!(config.max_cells, 2000);
    assert_eq!(config.write_capacity, 10);
    assert_eq!(config.read_capacity, 60);
    assert_eq!(config.rollback_mode, RollbackMode::Structural);
    assert_eq!(config.diff_thresholds().full_max_cells, 50);
}

#[test]
fn json_file_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        "sheetops.json",
        r#"{"resolver_cache_ttl_ms": 5000, "header_min_confidence": 0.5}"#,
    );
    let config = OrchestratorConfig::from_args(with_file(path)).unwrap();
    let resolver = config.resolver();
    assert_eq!(resolver.cache_ttl, Duration::from_secs(5));
    assert_eq!(resolver.min_confidence, 0.5);
}

#[test]
fn cli_values_win_over_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "sheetops.yml", "max_cells: 2000\nmax_delete_rows: 5\n");
    let args = CliArgs {
        max_cells: Some(300),
        ..with_file(path)
    };
    let config = OrchestratorConfig::from_args(args).unwrap();
    assert_eq!(config.max_cells, 300);
    assert_eq!(config.max_delete_rows, 5);
}

#[test]
fn mixed_destructive_flag_relaxes_the_policy() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "sheetops.yaml", "single_destructive_class: true\n");
    let args = CliArgs {
        allow_mixed_destructive: true,
        ..with_file(path)
    };
    let config = OrchestratorConfig::from_args(args).unwrap();
    assert!(!config.policy().single_destructive_class);
}

#[test]
fn zero_disables_timeout_and_batch_ceiling() {
    let config = OrchestratorConfig::from_args(CliArgs {
        call_timeout_ms: Some(0),
        max_batch_bytes: Some(0),
        ..CliArgs::default()
    })
    .unwrap();
    assert_eq!(config.call_timeout(), None);
    assert_eq!(config.max_batch_bytes(), None);
    assert_eq!(config.transaction().max_batch_bytes, None);
}

#[test]
fn inverted_diff_thresholds_are_rejected() {
    let err = OrchestratorConfig::from_args(CliArgs {
        diff_full_max_cells: Some(20_000),
        ..CliArgs::default()
    })
    .unwrap_err();
    assert!(err.to_string().contains("diff_full_max_cells"), "{err}");
}

#[test]
fn confidence_outside_unit_interval_is_rejected() {
    let err = OrchestratorConfig::from_args(CliArgs {
        header_min_confidence: Some(1.5),
        ..CliArgs::default()
    })
    .unwrap_err();
    assert!(err.to_string().contains("header_min_confidence"), "{err}");
}

#[test]
fn zero_capacity_is_rejected() {
    let err = OrchestratorConfig::from_args(CliArgs {
        read_capacity: Some(0),
        ..CliArgs::default()
    })
    .unwrap_err();
    assert!(err.to_string().contains("capacities"), "{err}");
}

#[test]
fn unknown_keys_fail_to_parse() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "sheetops.yaml", "max_cell: 10\n");
    let err = OrchestratorConfig::from_args(with_file(path)).unwrap_err();
    assert!(format!("{err:#}").contains("max_cell"), "{err:#}");
}

#[test]
fn unsupported_extension_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "sheetops.toml", "max_cells = 10\n");
    let err = OrchestratorConfig::from_args(with_file(path)).unwrap_err();
    assert!(err.to_string().contains("toml"), "{err}");
}

#[test]
fn missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = OrchestratorConfig::from_args(with_file(dir.path().join("absent.yaml"))).unwrap_err();
    assert!(err.to_string().contains("does not exist"), "{err}");
}
