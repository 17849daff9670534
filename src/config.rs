//! Store configuration with documented defaults and environment overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default per-owner node capacity.
pub const DEFAULT_CAPACITY: usize = 1000;
/// Default per-day relevance decay factor.
pub const DEFAULT_DECAY_RATE: f64 = 0.95;
/// Default age (days) after which weak, unused nodes are pruned.
pub const DEFAULT_PRUNE_HORIZON_DAYS: i64 = 30;
/// Default connection cap per node.
pub const DEFAULT_MAX_CONNECTIONS: usize = 5;
/// Default number of recent nodes scanned when linking a new node.
pub const DEFAULT_SCAN_WINDOW: usize = 200;
/// Default maintenance interval.
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Configuration for a [`MemoryStore`](crate::memory::MemoryStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum nodes retained per owner (Cmax)
    pub capacity: usize,
    /// Relevance multiplier per day without access, in (0, 1]
    pub decay_rate: f64,
    /// Minimum node age in days before pruning applies
    pub prune_horizon_days: i64,
    /// Maximum connections per node (K)
    pub max_connections: usize,
    /// Most recent nodes of the same owner considered when linking (W)
    pub scan_window: usize,
    /// Interval between scheduled maintenance cycles
    pub maintenance_interval: Duration,
    /// Days without activity before a thread is archived
    pub thread_archive_days: i64,
    /// Nodes processed per lock acquisition during maintenance
    pub maintenance_batch_size: usize,
    /// Number of key memories in an owner summary
    pub summary_key_memories: usize,
    /// Number of recent nodes considered for the emotional trend
    pub summary_recent_nodes: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            decay_rate: DEFAULT_DECAY_RATE,
            prune_horizon_days: DEFAULT_PRUNE_HORIZON_DAYS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            scan_window: DEFAULT_SCAN_WINDOW,
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
            thread_archive_days: 14,
            maintenance_batch_size: 256,
            summary_key_memories: 5,
            summary_recent_nodes: 20,
        }
    }
}

impl MemoryConfig {
    /// Create configuration from environment variables.
    ///
    /// Unset variables keep their defaults; set but unparsable ones are an error.
    /// The result is validated.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            capacity: env_or("RECALL_CAPACITY", defaults.capacity)?,
            decay_rate: env_or("RECALL_DECAY_RATE", defaults.decay_rate)?,
            prune_horizon_days: env_or("RECALL_PRUNE_HORIZON_DAYS", defaults.prune_horizon_days)?,
            max_connections: env_or("RECALL_MAX_CONNECTIONS", defaults.max_connections)?,
            scan_window: env_or("RECALL_SCAN_WINDOW", defaults.scan_window)?,
            maintenance_interval: Duration::from_secs(env_or(
                "RECALL_MAINTENANCE_INTERVAL_SECS",
                defaults.maintenance_interval.as_secs(),
            )?),
            thread_archive_days: env_or(
                "RECALL_THREAD_ARCHIVE_DAYS",
                defaults.thread_archive_days,
            )?,
            maintenance_batch_size: env_or(
                "RECALL_MAINTENANCE_BATCH_SIZE",
                defaults.maintenance_batch_size,
            )?,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every field against its documented range.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Config("capacity must be at least 1".into()));
        }
        if !(self.decay_rate > 0.0 && self.decay_rate <= 1.0) {
            return Err(Error::Config(format!(
                "decay_rate must be in (0, 1], got {}",
                self.decay_rate
            )));
        }
        if self.prune_horizon_days < 0 {
            return Err(Error::Config("prune_horizon_days must not be negative".into()));
        }
        if self.max_connections == 0 {
            return Err(Error::Config("max_connections must be at least 1".into()));
        }
        if self.scan_window == 0 {
            return Err(Error::Config("scan_window must be at least 1".into()));
        }
        if self.maintenance_interval.is_zero() {
            return Err(Error::Config("maintenance_interval must be non-zero".into()));
        }
        if self.thread_archive_days < 0 {
            return Err(Error::Config("thread_archive_days must not be negative".into()));
        }
        if self.maintenance_batch_size == 0 {
            return Err(Error::Config("maintenance_batch_size must be at least 1".into()));
        }
        Ok(())
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_decay_rate(mut self, rate: f64) -> Self {
        self.decay_rate = rate;
        self
    }

    pub fn with_prune_horizon_days(mut self, days: i64) -> Self {
        self.prune_horizon_days = days;
        self
    }

    pub fn with_max_connections(mut self, k: usize) -> Self {
        self.max_connections = k;
        self
    }

    pub fn with_scan_window(mut self, window: usize) -> Self {
        self.scan_window = window;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn with_thread_archive_days(mut self, days: i64) -> Self {
        self.thread_archive_days = days;
        self
    }

    pub fn with_maintenance_batch_size(mut self, size: usize) -> Self {
        self.maintenance_batch_size = size;
        self
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} has unparsable value {:?}", name, raw))),
        Err(_) => Ok(default),
    }
}
