use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_BATCH_SIZE: u32 = 10; // due occurrences claimed per tick
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_SECS: u64 = 60;
pub const DEFAULT_RETRY_MAX_SECS: u64 = 3_600;
pub const DEFAULT_STALE_CLAIM_SECS: u64 = 900;
pub const DEFAULT_WINDOW_SIZE: u32 = 5; // non-terminal occurrences kept ahead
pub const DEFAULT_SCAN_LIMIT: usize = 1_000;

/// Top-level config (cadence.toml + CADENCE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub materializer: MaterializerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Execution engine knobs. Durations are plain seconds so they read well in
/// TOML and in `CADENCE_ENGINE__*` variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Upper bound on occurrences claimed in one tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Schedules executed in parallel within one tick.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// A delivery running longer than this counts as a failed attempt.
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,
    #[serde(default = "default_retry_max_secs")]
    pub retry_max_secs: u64,
    /// Claims older than this are treated as interrupted executions.
    #[serde(default = "default_stale_claim_secs")]
    pub stale_claim_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            delivery_timeout_secs: DEFAULT_DELIVERY_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_secs: DEFAULT_RETRY_BASE_SECS,
            retry_max_secs: DEFAULT_RETRY_MAX_SECS,
            stale_claim_secs: DEFAULT_STALE_CLAIM_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterializerConfig {
    /// Number of not-yet-finished occurrences kept materialized per schedule.
    #[serde(default = "default_window_size")]
    pub window_size: u32,
    /// Safety cap on candidate dates inspected per materialization pass.
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            scan_limit: DEFAULT_SCAN_LIMIT,
        }
    }
}

/// Outbound webhook used by the worker binary to hand occurrences to the
/// delivery subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// When unset the worker logs due occurrences instead of posting them.
    pub webhook_url: Option<String>,
    /// HMAC-SHA256 signing secret for the request body.
    pub secret: Option<String>,
    /// Per-request HTTP timeout; falls back to `engine.delivery_timeout_secs`.
    pub timeout_secs: Option<u64>,
}

fn default_tick_interval_secs() -> u64 {
    DEFAULT_TICK_INTERVAL_SECS
}
fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}
fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}
fn default_delivery_timeout_secs() -> u64 {
    DEFAULT_DELIVERY_TIMEOUT_SECS
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_retry_base_secs() -> u64 {
    DEFAULT_RETRY_BASE_SECS
}
fn default_retry_max_secs() -> u64 {
    DEFAULT_RETRY_MAX_SECS
}
fn default_stale_claim_secs() -> u64 {
    DEFAULT_STALE_CLAIM_SECS
}
fn default_window_size() -> u32 {
    DEFAULT_WINDOW_SIZE
}
fn default_scan_limit() -> usize {
    DEFAULT_SCAN_LIMIT
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.db", home)
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// Uses the explicit path when given, otherwise ~/.cadence/cadence.toml.
    /// A missing file is not an error: every section has defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CadenceConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CADENCE_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}
