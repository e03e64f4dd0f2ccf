//! Application configuration management.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Prefix for environment variable overrides (`TALLY__LEDGER__LOCK_TIMEOUT_MS`).
const ENV_PREFIX: &str = "TALLY";

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Ledger runtime configuration.
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Balance limits and alert thresholds.
    #[serde(default)]
    pub limits: LimitsSettings,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Ledger runtime configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// How long a locked read waits for a contended balance row.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Capacity of the post-commit alert queue.
    #[serde(default = "default_alert_queue_capacity")]
    pub alert_queue_capacity: usize,
    /// Seconds between full balance reconciliation sweeps.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    /// Balance rows fetched per reconciliation page.
    #[serde(default = "default_reconcile_page_size")]
    pub reconcile_page_size: u32,
    /// Seconds a loaded limits snapshot stays cached.
    #[serde(default = "default_limits_ttl_secs")]
    pub limits_ttl_secs: u64,
}

fn default_lock_timeout_ms() -> u64 {
    3000
}

fn default_alert_queue_capacity() -> usize {
    1024
}

fn default_reconcile_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_reconcile_page_size() -> u32 {
    100
}

fn default_limits_ttl_secs() -> u64 {
    60
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            alert_queue_capacity: default_alert_queue_capacity(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            reconcile_page_size: default_reconcile_page_size(),
            limits_ttl_secs: default_limits_ttl_secs(),
        }
    }
}

/// Balance limits and alert thresholds as read from configuration.
///
/// Every field falls back to the documented default when absent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LimitsSettings {
    /// Smallest accepted single recharge.
    #[serde(default = "default_min_recharge")]
    pub min_recharge: Decimal,
    /// Largest accepted single recharge.
    #[serde(default = "default_max_recharge")]
    pub max_recharge: Decimal,
    /// Largest total recharge per user per UTC day.
    #[serde(default = "default_max_daily_recharge")]
    pub max_daily_recharge: Decimal,
    /// Ceiling for a user's available balance.
    #[serde(default = "default_max_balance")]
    pub max_balance: Decimal,
    /// Single recharge amount that raises a large-recharge alert.
    #[serde(default = "default_large_recharge_threshold")]
    pub large_recharge_threshold: Decimal,
    /// Single consume amount that raises a large-consume alert.
    #[serde(default = "default_large_consume_threshold")]
    pub large_consume_threshold: Decimal,
    /// Recharges per trailing hour that raise a frequent-recharge alert.
    #[serde(default = "default_frequent_recharge_count")]
    pub frequent_recharge_count: u32,
    /// Consumes per trailing hour that raise a frequent-consume alert.
    #[serde(default = "default_frequent_consume_count")]
    pub frequent_consume_count: u32,
    /// Admin adjustment or gift amount that raises an alert.
    #[serde(default = "default_large_admin_adjust_threshold")]
    pub large_admin_adjust_threshold: Decimal,
}

fn default_min_recharge() -> Decimal {
    Decimal::ONE
}

fn default_max_recharge() -> Decimal {
    Decimal::from(50_000)
}

fn default_max_daily_recharge() -> Decimal {
    Decimal::from(100_000)
}

fn default_max_balance() -> Decimal {
    Decimal::from(100_000)
}

fn default_large_recharge_threshold() -> Decimal {
    Decimal::from(1_000)
}

fn default_large_consume_threshold() -> Decimal {
    Decimal::from(500)
}

fn default_frequent_recharge_count() -> u32 {
    5
}

fn default_frequent_consume_count() -> u32 {
    10
}

fn default_large_admin_adjust_threshold() -> Decimal {
    Decimal::from(1_000)
}

impl Default for LimitsSettings {
    fn default() -> Self {
        Self {
            min_recharge: default_min_recharge(),
            max_recharge: default_max_recharge(),
            max_daily_recharge: default_max_daily_recharge(),
            max_balance: default_max_balance(),
            large_recharge_threshold: default_large_recharge_threshold(),
            large_consume_threshold: default_large_consume_threshold(),
            frequent_recharge_count: default_frequent_recharge_count(),
            frequent_consume_count: default_frequent_consume_count(),
            large_admin_adjust_threshold: default_large_admin_adjust_threshold(),
        }
    }
}

/// Wrapper used to read only the `limits` section.
#[derive(Debug, Deserialize)]
struct LimitsOnly {
    #[serde(default)]
    limits: LimitsSettings,
}

fn builder() -> config::ConfigBuilder<config::builder::DefaultState> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

    config::Config::builder()
        .add_source(config::File::with_name("config/default").required(false))
        .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        builder().build()?.try_deserialize()
    }
}

/// Loads only the balance limits section.
///
/// A missing section yields the defaults; a malformed one is an error so the
/// caller can decide to fall back.
///
/// # Errors
///
/// Returns an error if a config source cannot be read or a limit value is malformed.
pub fn load_limits() -> Result<LimitsSettings, config::ConfigError> {
    let wrapper: LimitsOnly = builder().build()?.try_deserialize()?;
    Ok(wrapper.limits)
}
