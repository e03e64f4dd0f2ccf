//! Balance limits and alert thresholds.
//!
//! The ledger reads a snapshot before every mutation. Loading never fails:
//! when the configured source is unavailable the documented defaults apply.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use thiserror::Error;
use tracing::warn;

pub use tally_shared::config::LimitsSettings as LimitsConfig;

/// Default time-to-live for a cached snapshot (1 minute).
const DEFAULT_TTL_SECS: u64 = 60;

/// The limits source could not produce a snapshot.
#[derive(Debug, Error)]
#[error("Limits configuration unavailable: {0}")]
pub struct LimitsUnavailable(pub String);

/// Something that can load the current limits.
pub trait LimitsSource: Send + Sync {
    /// Loads the current limits.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    fn load(&self) -> Result<LimitsConfig, LimitsUnavailable>;
}

/// Fixed limits, for tests and embedded use.
#[derive(Debug, Clone)]
pub struct StaticLimits(pub LimitsConfig);

impl LimitsSource for StaticLimits {
    fn load(&self) -> Result<LimitsConfig, LimitsUnavailable> {
        Ok(self.0.clone())
    }
}

/// Limits read from the `limits` section of the application config.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLimits;

impl LimitsSource for FileLimits {
    fn load(&self) -> Result<LimitsConfig, LimitsUnavailable> {
        tally_shared::config::load_limits().map_err(|e| LimitsUnavailable(e.to_string()))
    }
}

/// Cached, infallible access to the current limits.
#[derive(Clone)]
pub struct LimitsProvider {
    source: Arc<dyn LimitsSource>,
    cache: Cache<(), LimitsConfig>,
}

impl LimitsProvider {
    /// Creates a provider caching snapshots from `source` for `ttl`.
    #[must_use]
    pub fn new(source: impl LimitsSource + 'static, ttl: Duration) -> Self {
        let cache = Cache::builder().max_capacity(1).time_to_live(ttl).build();
        Self {
            source: Arc::new(source),
            cache,
        }
    }

    /// Creates a provider that always returns `limits`.
    #[must_use]
    pub fn fixed(limits: LimitsConfig) -> Self {
        Self::new(StaticLimits(limits), Duration::from_secs(DEFAULT_TTL_SECS))
    }

    /// Returns the current limits.
    ///
    /// Failed loads are not cached, so the next call retries the source.
    #[must_use]
    pub fn current(&self) -> LimitsConfig {
        if let Some(limits) = self.cache.get(&()) {
            return limits;
        }

        match self.source.load() {
            Ok(limits) => {
                self.cache.insert((), limits.clone());
                limits
            }
            Err(e) => {
                warn!(error = %e, "Falling back to default balance limits");
                LimitsConfig::default()
            }
        }
    }

    /// Drops the cached snapshot so the next read reloads.
    pub fn invalidate(&self) {
        self.cache.invalidate(&());
    }
}

impl Default for LimitsProvider {
    fn default() -> Self {
        Self::new(FileLimits, Duration::from_secs(DEFAULT_TTL_SECS))
    }
}

impl std::fmt::Debug for LimitsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimitsProvider")
            .field("cached", &self.cache.contains_key(&()))
            .finish_non_exhaustive()
    }
}
