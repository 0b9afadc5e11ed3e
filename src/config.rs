//! Queue configuration.

use crate::error::{QueueError, Result};
use crate::queue::pressure::CompactionTable;
use std::time::Duration;

/// Configuration for an [`ExpiryQueue`](crate::ExpiryQueue) and its sweeper.
///
/// # Example
///
/// ```
/// use expiryq::QueueConfig;
/// use std::time::Duration;
///
/// let config = QueueConfig::default()
///     .with_sweep_interval(Duration::from_millis(100))
///     .with_size_threshold(50_000);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Interval between background sweeps (default: 250ms)
    pub sweep_interval: Duration,

    /// Memory usage ratios separating the four pressure tiers (default: 0.50 / 0.75 / 0.90)
    pub pressure_thresholds: [f64; 3],

    /// Compaction fraction per pressure tier and queue size class
    pub compaction: CompactionTable,

    /// Live count above which the queue counts as "large" (default: 10 000)
    pub size_threshold: u64,

    /// Initial capacity hint for the entry store (default: 0)
    pub initial_capacity: usize,

    /// Shard count for the entry store; must be a power of two greater than 1
    /// (default: 64)
    pub shard_amount: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_millis(250),
            pressure_thresholds: [0.50, 0.75, 0.90],
            compaction: CompactionTable::default(),
            size_threshold: 10_000,
            initial_capacity: 0,
            shard_amount: 64,
        }
    }
}

impl QueueConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how often the background sweeper wakes.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the three memory usage thresholds separating pressure tiers.
    pub fn with_pressure_thresholds(mut self, thresholds: [f64; 3]) -> Self {
        self.pressure_thresholds = thresholds;
        self
    }

    /// Replaces the compaction table.
    pub fn with_compaction(mut self, table: CompactionTable) -> Self {
        self.compaction = table;
        self
    }

    /// Sets the live count above which the queue is considered large.
    pub fn with_size_threshold(mut self, threshold: u64) -> Self {
        self.size_threshold = threshold;
        self
    }

    /// Sets the initial entry store capacity.
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Sets the entry store shard count.
    pub fn with_shard_amount(mut self, shards: usize) -> Self {
        self.shard_amount = shards;
        self
    }

    /// Checks the configuration for values the queue can't run with.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval.is_zero() {
            return Err(QueueError::InvalidConfig(
                "sweep interval must be non-zero".to_string(),
            ));
        }

        let [low, high, critical] = self.pressure_thresholds;
        let in_range = |t: f64| t > 0.0 && t <= 1.0;
        if !(in_range(low) && in_range(high) && in_range(critical))
            || !(low < high && high < critical)
        {
            return Err(QueueError::InvalidConfig(format!(
                "pressure thresholds must be increasing within (0, 1], got {:?}",
                self.pressure_thresholds
            )));
        }

        if !self.compaction.is_valid() {
            return Err(QueueError::InvalidConfig(
                "compaction fractions must lie within (0, 1]".to_string(),
            ));
        }

        if self.shard_amount < 2 || !self.shard_amount.is_power_of_two() {
            return Err(QueueError::InvalidConfig(format!(
                "shard amount must be a power of two greater than 1, got {}",
                self.shard_amount
            )));
        }

        Ok(())
    }
}
