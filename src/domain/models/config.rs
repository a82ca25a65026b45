use serde::{Deserialize, Serialize};

/// Main configuration structure for Echelon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// State store configuration
    #[serde(default)]
    pub state: StateConfig,

    /// Advisory-lock configuration
    #[serde(default)]
    pub lock: LockConfig,

    /// Token-budget defaults for new runs
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Result-aggregation configuration
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[allow(clippy::derivable_impls)]
impl Default for Config {
    fn default() -> Self {
        Self {
            state: StateConfig::default(),
            lock: LockConfig::default(),
            budget: BudgetConfig::default(),
            aggregation: AggregationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// State store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StateConfig {
    /// Directory holding execution-state documents
    #[serde(default = "default_state_dir")]
    pub dir: String,

    /// Project identifier; when set, the document lives one level deeper
    /// under `projects/<project>/`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

fn default_state_dir() -> String {
    ".echelon/state".to_string()
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
            project: None,
        }
    }
}

/// Advisory-lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LockConfig {
    /// Maximum time to wait for the lock before failing, in milliseconds
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,

    /// Age beyond which a held lock is presumed abandoned and evicted,
    /// in milliseconds
    #[serde(default = "default_lock_stale_ms")]
    pub stale_ms: u64,

    /// Polling interval while waiting, in milliseconds
    #[serde(default = "default_lock_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

const fn default_lock_timeout_ms() -> u64 {
    10_000
}

const fn default_lock_stale_ms() -> u64 {
    5_000
}

const fn default_lock_poll_interval_ms() -> u64 {
    50
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
            stale_ms: default_lock_stale_ms(),
            poll_interval_ms: default_lock_poll_interval_ms(),
        }
    }
}

/// Token-budget defaults applied when a run is initialized
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BudgetConfig {
    /// Total token allowance for a new run
    #[serde(default = "default_budget_total")]
    pub total: u64,

    /// Fraction of an allocation consumed before compaction is suggested
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f64,

    /// Whether tokens may be reallocated between children
    #[serde(default = "default_allow_reallocation")]
    pub allow_reallocation: bool,
}

const fn default_budget_total() -> u64 {
    200_000
}

const fn default_compaction_threshold() -> f64 {
    0.8
}

const fn default_allow_reallocation() -> bool {
    true
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            total: default_budget_total(),
            compaction_threshold: default_compaction_threshold(),
            allow_reallocation: default_allow_reallocation(),
        }
    }
}

/// Result-aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AggregationConfig {
    /// Wall-clock timeout for collecting worker results, in milliseconds
    #[serde(default = "default_aggregation_timeout_ms")]
    pub timeout_ms: u64,
}

const fn default_aggregation_timeout_ms() -> u64 {
    60_000
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_aggregation_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
