use crate::diff::{
    DEFAULT_FULL_MAX_CELLS, DEFAULT_SAMPLE_MAX_CELLS, DEFAULT_SAMPLE_ROWS, DiffThresholds,
};
use crate::policy::{
    DEFAULT_MAX_CELLS, DEFAULT_MAX_DELETE_COLUMNS, DEFAULT_MAX_DELETE_ROWS, Policy,
};
use crate::rate_limit::{BucketConfig, RateLimitConfig};
use crate::resolver::{DEFAULT_MIN_CONFIDENCE, ResolverConfig};
use crate::snapshot::DEFAULT_SNAPSHOT_MAX_BYTES;
use crate::transaction::{DEFAULT_COMPENSATION_MAX_CELLS, RollbackMode, TransactionConfig};
use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CAPACITY: u32 = 60;
const DEFAULT_REFILL_PER_SEC: f64 = 1.0;
const DEFAULT_THROTTLE_COOLDOWN_MS: u64 = 60_000;
const DEFAULT_RESOLVER_CACHE_CAPACITY: usize = 64;
const DEFAULT_RESOLVER_CACHE_TTL_MS: u64 = 30_000;
const DEFAULT_SNAPSHOT_RETENTION_SECS: u64 = 3_600;
const DEFAULT_TRANSACTION_GRACE_SECS: u64 = 600;
const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_BATCH_BYTES: u64 = 8 * 1024 * 1024;

/// Flat, validated settings for every component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorConfig {
    pub read_capacity: u32,
    pub read_refill_per_sec: f64,
    pub write_capacity: u32,
    pub write_refill_per_sec: f64,
    pub throttle_cooldown_ms: u64,
    pub max_cells: u64,
    pub max_delete_rows: u32,
    pub max_delete_columns: u32,
    pub single_destructive_class: bool,
    pub diff_full_max_cells: u64,
    pub diff_sample_max_cells: u64,
    pub diff_sample_rows: u32,
    pub resolver_cache_capacity: usize,
    pub resolver_cache_ttl_ms: u64,
    pub header_min_confidence: f64,
    pub snapshot_max_bytes: usize,
    pub snapshot_retention_secs: u64,
    pub transaction_grace_secs: u64,
    pub rollback_mode: RollbackMode,
    pub compensation_max_cells: u64,
    /// `None` disables the per-call deadline.
    pub call_timeout_ms: Option<u64>,
    /// `None` disables the serialized batch ceiling.
    pub max_batch_bytes: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            read_capacity: DEFAULT_CAPACITY,
            read_refill_per_sec: DEFAULT_REFILL_PER_SEC,
            write_capacity: DEFAULT_CAPACITY,
            write_refill_per_sec: DEFAULT_REFILL_PER_SEC,
            throttle_cooldown_ms: DEFAULT_THROTTLE_COOLDOWN_MS,
            max_cells: DEFAULT_MAX_CELLS,
            max_delete_rows: DEFAULT_MAX_DELETE_ROWS,
            max_delete_columns: DEFAULT_MAX_DELETE_COLUMNS,
            single_destructive_class: true,
            diff_full_max_cells: DEFAULT_FULL_MAX_CELLS,
            diff_sample_max_cells: DEFAULT_SAMPLE_MAX_CELLS,
            diff_sample_rows: DEFAULT_SAMPLE_ROWS,
            resolver_cache_capacity: DEFAULT_RESOLVER_CACHE_CAPACITY,
            resolver_cache_ttl_ms: DEFAULT_RESOLVER_CACHE_TTL_MS,
            header_min_confidence: DEFAULT_MIN_CONFIDENCE,
            snapshot_max_bytes: DEFAULT_SNAPSHOT_MAX_BYTES,
            snapshot_retention_secs: DEFAULT_SNAPSHOT_RETENTION_SECS,
            transaction_grace_secs: DEFAULT_TRANSACTION_GRACE_SECS,
            rollback_mode: RollbackMode::default(),
            compensation_max_cells: DEFAULT_COMPENSATION_MAX_CELLS,
            call_timeout_ms: Some(DEFAULT_CALL_TIMEOUT_MS),
            max_batch_bytes: Some(DEFAULT_MAX_BATCH_BYTES),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            read_capacity: cli_read_capacity,
            read_refill_per_sec: cli_read_refill_per_sec,
            write_capacity: cli_write_capacity,
            write_refill_per_sec: cli_write_refill_per_sec,
            throttle_cooldown_ms: cli_throttle_cooldown_ms,
            max_cells: cli_max_cells,
            max_delete_rows: cli_max_delete_rows,
            max_delete_columns: cli_max_delete_columns,
            allow_mixed_destructive: cli_allow_mixed_destructive,
            diff_full_max_cells: cli_diff_full_max_cells,
            diff_sample_max_cells: cli_diff_sample_max_cells,
            diff_sample_rows: cli_diff_sample_rows,
            resolver_cache_capacity: cli_resolver_cache_capacity,
            resolver_cache_ttl_ms: cli_resolver_cache_ttl_ms,
            header_min_confidence: cli_header_min_confidence,
            snapshot_max_bytes: cli_snapshot_max_bytes,
            snapshot_retention_secs: cli_snapshot_retention_secs,
            transaction_grace_secs: cli_transaction_grace_secs,
            rollback_mode: cli_rollback_mode,
            compensation_max_cells: cli_compensation_max_cells,
            call_timeout_ms: cli_call_timeout_ms,
            max_batch_bytes: cli_max_batch_bytes,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            read_capacity: file_read_capacity,
            read_refill_per_sec: file_read_refill_per_sec,
            write_capacity: file_write_capacity,
            write_refill_per_sec: file_write_refill_per_sec,
            throttle_cooldown_ms: file_throttle_cooldown_ms,
            max_cells: file_max_cells,
            max_delete_rows: file_max_delete_rows,
            max_delete_columns: file_max_delete_columns,
            single_destructive_class: file_single_destructive_class,
            diff_full_max_cells: file_diff_full_max_cells,
            diff_sample_max_cells: file_diff_sample_max_cells,
            diff_sample_rows: file_diff_sample_rows,
            resolver_cache_capacity: file_resolver_cache_capacity,
            resolver_cache_ttl_ms: file_resolver_cache_ttl_ms,
            header_min_confidence: file_header_min_confidence,
            snapshot_max_bytes: file_snapshot_max_bytes,
            snapshot_retention_secs: file_snapshot_retention_secs,
            transaction_grace_secs: file_transaction_grace_secs,
            rollback_mode: file_rollback_mode,
            compensation_max_cells: file_compensation_max_cells,
            call_timeout_ms: file_call_timeout_ms,
            max_batch_bytes: file_max_batch_bytes,
        } = file_config;

        let read_capacity = cli_read_capacity
            .or(file_read_capacity)
            .unwrap_or(DEFAULT_CAPACITY);
        let read_refill_per_sec = cli_read_refill_per_sec
            .or(file_read_refill_per_sec)
            .unwrap_or(DEFAULT_REFILL_PER_SEC);
        let write_capacity = cli_write_capacity
            .or(file_write_capacity)
            .unwrap_or(DEFAULT_CAPACITY);
        let write_refill_per_sec = cli_write_refill_per_sec
            .or(file_write_refill_per_sec)
            .unwrap_or(DEFAULT_REFILL_PER_SEC);
        anyhow::ensure!(
            read_capacity > 0 && write_capacity > 0,
            "rate limit capacities must be positive"
        );
        anyhow::ensure!(
            read_refill_per_sec > 0.0 && write_refill_per_sec > 0.0,
            "rate limit refill rates must be positive"
        );

        let throttle_cooldown_ms = cli_throttle_cooldown_ms
            .or(file_throttle_cooldown_ms)
            .unwrap_or(DEFAULT_THROTTLE_COOLDOWN_MS);

        let max_cells = cli_max_cells
            .or(file_max_cells)
            .unwrap_or(DEFAULT_MAX_CELLS);
        let max_delete_rows = cli_max_delete_rows
            .or(file_max_delete_rows)
            .unwrap_or(DEFAULT_MAX_DELETE_ROWS);
        let max_delete_columns = cli_max_delete_columns
            .or(file_max_delete_columns)
            .unwrap_or(DEFAULT_MAX_DELETE_COLUMNS);
        let single_destructive_class =
            !cli_allow_mixed_destructive && file_single_destructive_class.unwrap_or(true);

        let diff_full_max_cells = cli_diff_full_max_cells
            .or(file_diff_full_max_cells)
            .unwrap_or(DEFAULT_FULL_MAX_CELLS);
        let diff_sample_max_cells = cli_diff_sample_max_cells
            .or(file_diff_sample_max_cells)
            .unwrap_or(DEFAULT_SAMPLE_MAX_CELLS);
        let diff_sample_rows = cli_diff_sample_rows
            .or(file_diff_sample_rows)
            .unwrap_or(DEFAULT_SAMPLE_ROWS);
        anyhow::ensure!(
            diff_full_max_cells <= diff_sample_max_cells,
            "diff_full_max_cells ({diff_full_max_cells}) must not exceed diff_sample_max_cells ({diff_sample_max_cells})"
        );

        let resolver_cache_capacity = cli_resolver_cache_capacity
            .or(file_resolver_cache_capacity)
            .unwrap_or(DEFAULT_RESOLVER_CACHE_CAPACITY)
            .max(1);
        let resolver_cache_ttl_ms = cli_resolver_cache_ttl_ms
            .or(file_resolver_cache_ttl_ms)
            .unwrap_or(DEFAULT_RESOLVER_CACHE_TTL_MS);
        let header_min_confidence = cli_header_min_confidence
            .or(file_header_min_confidence)
            .unwrap_or(DEFAULT_MIN_CONFIDENCE);
        anyhow::ensure!(
            (0.0..=1.0).contains(&header_min_confidence),
            "header_min_confidence must be within [0, 1], got {header_min_confidence}"
        );

        let snapshot_max_bytes = cli_snapshot_max_bytes
            .or(file_snapshot_max_bytes)
            .unwrap_or(DEFAULT_SNAPSHOT_MAX_BYTES);
        anyhow::ensure!(snapshot_max_bytes > 0, "snapshot_max_bytes must be positive");
        let snapshot_retention_secs = cli_snapshot_retention_secs
            .or(file_snapshot_retention_secs)
            .unwrap_or(DEFAULT_SNAPSHOT_RETENTION_SECS);
        let transaction_grace_secs = cli_transaction_grace_secs
            .or(file_transaction_grace_secs)
            .unwrap_or(DEFAULT_TRANSACTION_GRACE_SECS);
        let rollback_mode = cli_rollback_mode
            .or(file_rollback_mode)
            .unwrap_or_default();
        let compensation_max_cells = cli_compensation_max_cells
            .or(file_compensation_max_cells)
            .unwrap_or(DEFAULT_COMPENSATION_MAX_CELLS);

        let call_timeout_ms = cli_call_timeout_ms
            .or(file_call_timeout_ms)
            .unwrap_or(DEFAULT_CALL_TIMEOUT_MS);
        let call_timeout_ms = if call_timeout_ms == 0 {
            None
        } else {
            Some(call_timeout_ms)
        };

        let max_batch_bytes = cli_max_batch_bytes
            .or(file_max_batch_bytes)
            .unwrap_or(DEFAULT_MAX_BATCH_BYTES);
        let max_batch_bytes = if max_batch_bytes == 0 {
            None
        } else {
            Some(max_batch_bytes)
        };

        Ok(Self {
            read_capacity,
            read_refill_per_sec,
            write_capacity,
            write_refill_per_sec,
            throttle_cooldown_ms,
            max_cells,
            max_delete_rows,
            max_delete_columns,
            single_destructive_class,
            diff_full_max_cells,
            diff_sample_max_cells,
            diff_sample_rows,
            resolver_cache_capacity,
            resolver_cache_ttl_ms,
            header_min_confidence,
            snapshot_max_bytes,
            snapshot_retention_secs,
            transaction_grace_secs,
            rollback_mode,
            compensation_max_cells,
            call_timeout_ms,
            max_batch_bytes,
        })
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            read: BucketConfig {
                capacity: self.read_capacity,
                refill_per_sec: self.read_refill_per_sec,
            },
            write: BucketConfig {
                capacity: self.write_capacity,
                refill_per_sec: self.write_refill_per_sec,
            },
            throttle_cooldown: Duration::from_millis(self.throttle_cooldown_ms),
        }
    }

    pub fn policy(&self) -> Policy {
        Policy {
            max_cells: self.max_cells,
            max_delete_rows: self.max_delete_rows,
            max_delete_columns: self.max_delete_columns,
            single_destructive_class: self.single_destructive_class,
        }
    }

    pub fn diff_thresholds(&self) -> DiffThresholds {
        DiffThresholds {
            full_max_cells: self.diff_full_max_cells,
            sample_max_cells: self.diff_sample_max_cells,
            sample_rows: self.diff_sample_rows,
        }
    }

    pub fn resolver(&self) -> ResolverConfig {
        ResolverConfig {
            cache_capacity: self.resolver_cache_capacity,
            cache_ttl: Duration::from_millis(self.resolver_cache_ttl_ms),
            min_confidence: self.header_min_confidence,
        }
    }

    pub fn transaction(&self) -> TransactionConfig {
        TransactionConfig {
            retention: Duration::from_secs(self.snapshot_retention_secs),
            grace: Duration::from_secs(self.transaction_grace_secs),
            rollback_mode: self.rollback_mode,
            compensation_max_cells: self.compensation_max_cells,
            max_batch_bytes: self.max_batch_bytes(),
        }
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn max_batch_bytes(&self) -> Option<usize> {
        self.max_batch_bytes.map(|bytes| bytes as usize)
    }
}

#[derive(Parser, Debug, Default, Clone)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "SHEETOPS_READ_CAPACITY",
        value_name = "N",
        help = "Read bucket capacity in tokens (default: 60)",
        global = true
    )]
    pub read_capacity: Option<u32>,

    #[arg(
        long,
        env = "SHEETOPS_READ_REFILL_PER_SEC",
        value_name = "RATE",
        help = "Read tokens refilled per second (default: 1.0)",
        global = true
    )]
    pub read_refill_per_sec: Option<f64>,

    #[arg(
        long,
        env = "SHEETOPS_WRITE_CAPACITY",
        value_name = "N",
        help = "Write bucket capacity in tokens (default: 60)",
        global = true
    )]
    pub write_capacity: Option<u32>,

    #[arg(
        long,
        env = "SHEETOPS_WRITE_REFILL_PER_SEC",
        value_name = "RATE",
        help = "Write tokens refilled per second (default: 1.0)",
        global = true
    )]
    pub write_refill_per_sec: Option<f64>,

    #[arg(
        long,
        env = "SHEETOPS_THROTTLE_COOLDOWN_MS",
        value_name = "MS",
        help = "How long refill stays halved after a provider throttle (default: 60000)",
        global = true
    )]
    pub throttle_cooldown_ms: Option<u64>,

    #[arg(
        long,
        env = "SHEETOPS_MAX_CELLS",
        value_name = "N",
        help = "Max estimated cells per batch (default: 50000)",
        global = true
    )]
    pub max_cells: Option<u64>,

    #[arg(
        long,
        env = "SHEETOPS_MAX_DELETE_ROWS",
        value_name = "N",
        help = "Max rows removed by a single delete (default: 10000)",
        global = true
    )]
    pub max_delete_rows: Option<u32>,

    #[arg(
        long,
        env = "SHEETOPS_MAX_DELETE_COLUMNS",
        value_name = "N",
        help = "Max columns removed by a single delete (default: 100)",
        global = true
    )]
    pub max_delete_columns: Option<u32>,

    #[arg(
        long,
        env = "SHEETOPS_ALLOW_MIXED_DESTRUCTIVE",
        help = "Allow several destructive classes in one batch",
        global = true
    )]
    pub allow_mixed_destructive: bool,

    #[arg(
        long,
        env = "SHEETOPS_DIFF_FULL_MAX_CELLS",
        value_name = "N",
        help = "Largest estimate diffed cell by cell (default: 1000)",
        global = true
    )]
    pub diff_full_max_cells: Option<u64>,

    #[arg(
        long,
        env = "SHEETOPS_DIFF_SAMPLE_MAX_CELLS",
        value_name = "N",
        help = "Largest estimate diffed with a sample window (default: 10000)",
        global = true
    )]
    pub diff_sample_max_cells: Option<u64>,

    #[arg(
        long,
        env = "SHEETOPS_DIFF_SAMPLE_ROWS",
        value_name = "N",
        help = "Rows sampled from each end of a changed rectangle (default: 5)",
        global = true
    )]
    pub diff_sample_rows: Option<u32>,

    #[arg(
        long,
        env = "SHEETOPS_RESOLVER_CACHE_CAPACITY",
        value_name = "N",
        help = "Sections kept in the metadata cache (default: 64)",
        global = true
    )]
    pub resolver_cache_capacity: Option<usize>,

    #[arg(
        long,
        env = "SHEETOPS_RESOLVER_CACHE_TTL_MS",
        value_name = "MS",
        help = "Metadata cache time-to-live (default: 30000)",
        global = true
    )]
    pub resolver_cache_ttl_ms: Option<u64>,

    #[arg(
        long,
        env = "SHEETOPS_HEADER_MIN_CONFIDENCE",
        value_name = "SCORE",
        help = "Minimum header match confidence, 0 to 1 (default: 0.75)",
        global = true
    )]
    pub header_min_confidence: Option<f64>,

    #[arg(
        long,
        env = "SHEETOPS_SNAPSHOT_MAX_BYTES",
        value_name = "BYTES",
        help = "Serialized snapshot ceiling (default: 32768)",
        global = true
    )]
    pub snapshot_max_bytes: Option<usize>,

    #[arg(
        long,
        env = "SHEETOPS_SNAPSHOT_RETENTION_SECS",
        value_name = "SECS",
        help = "Idle transactions expire after this long (default: 3600)",
        global = true
    )]
    pub snapshot_retention_secs: Option<u64>,

    #[arg(
        long,
        env = "SHEETOPS_TRANSACTION_GRACE_SECS",
        value_name = "SECS",
        help = "Finished transactions stay queryable this long (default: 600)",
        global = true
    )]
    pub transaction_grace_secs: Option<u64>,

    #[arg(
        long,
        env = "SHEETOPS_ROLLBACK_MODE",
        value_enum,
        value_name = "MODE",
        help = "How failed commits are undone: compensating or structural",
        global = true
    )]
    pub rollback_mode: Option<RollbackMode>,

    #[arg(
        long,
        env = "SHEETOPS_COMPENSATION_MAX_CELLS",
        value_name = "N",
        help = "Max cells captured for compensation per commit (default: 10000)",
        global = true
    )]
    pub compensation_max_cells: Option<u64>,

    #[arg(
        long,
        env = "SHEETOPS_CALL_TIMEOUT_MS",
        value_name = "MS",
        help = "Per-call deadline in milliseconds (default: 30000; 0 disables)",
        global = true
    )]
    pub call_timeout_ms: Option<u64>,

    #[arg(
        long,
        env = "SHEETOPS_MAX_BATCH_BYTES",
        value_name = "BYTES",
        help = "Serialized batch ceiling (default: 8388608; 0 disables)",
        global = true
    )]
    pub max_batch_bytes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    read_capacity: Option<u32>,
    read_refill_per_sec: Option<f64>,
    write_capacity: Option<u32>,
    write_refill_per_sec: Option<f64>,
    throttle_cooldown_ms: Option<u64>,
    max_cells: Option<u64>,
    max_delete_rows: Option<u32>,
    max_delete_columns: Option<u32>,
    single_destructive_class: Option<bool>,
    diff_full_max_cells: Option<u64>,
    diff_sample_max_cells: Option<u64>,
    diff_sample_rows: Option<u32>,
    resolver_cache_capacity: Option<usize>,
    resolver_cache_ttl_ms: Option<u64>,
    header_min_confidence: Option<f64>,
    snapshot_max_bytes: Option<usize>,
    snapshot_retention_secs: Option<u64>,
    transaction_grace_secs: Option<u64>,
    rollback_mode: Option<RollbackMode>,
    compensation_max_cells: Option<u64>,
    call_timeout_ms: Option<u64>,
    max_batch_bytes: Option<u64>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
