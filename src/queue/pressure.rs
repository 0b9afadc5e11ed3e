//! Memory Pressure Classification
//!
//! The background sweeper adapts how aggressively it compacts the entry
//! store to two inputs: how much memory the process is using, and how many
//! entries the queue currently holds.
//!
//! ```text
//!                 queue below size threshold   queue above size threshold
//!  Low            0.05                         0.10
//!  Moderate       0.10                         0.20
//!  High           0.25                         0.25
//!  Critical       0.50                         0.50
//! ```
//!
//! Memory usage is sampled through the [`MemoryProbe`] trait so callers can
//! plug in their own accounting (or a fixed value in tests).

use std::fmt;

/// Memory pressure tier, ordered from least to most constrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PressureTier {
    Low,
    Moderate,
    High,
    Critical,
}

impl PressureTier {
    /// Classifies a usage ratio (0.0 - 1.0) against three increasing thresholds.
    pub fn classify(usage: f64, thresholds: &[f64; 3]) -> Self {
        if usage >= thresholds[2] {
            PressureTier::Critical
        } else if usage >= thresholds[1] {
            PressureTier::High
        } else if usage >= thresholds[0] {
            PressureTier::Moderate
        } else {
            PressureTier::Low
        }
    }

    fn index(self) -> usize {
        match self {
            PressureTier::Low => 0,
            PressureTier::Moderate => 1,
            PressureTier::High => 2,
            PressureTier::Critical => 3,
        }
    }
}

impl fmt::Display for PressureTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PressureTier::Low => "low",
            PressureTier::Moderate => "moderate",
            PressureTier::High => "high",
            PressureTier::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Fixed lookup table mapping (tier, queue size class) to a compaction fraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactionTable {
    /// `rows[tier] = [small_queue_fraction, large_queue_fraction]`
    pub rows: [[f64; 2]; 4],
}

impl Default for CompactionTable {
    fn default() -> Self {
        Self {
            rows: [
                [0.05, 0.10], // Low
                [0.10, 0.20], // Moderate
                [0.25, 0.25], // High
                [0.50, 0.50], // Critical
            ],
        }
    }
}

impl CompactionTable {
    /// Returns the compaction fraction for a tier and queue size class.
    #[inline]
    pub fn fraction(&self, tier: PressureTier, large_queue: bool) -> f64 {
        self.rows[tier.index()][large_queue as usize]
    }

    /// Checks that every fraction lies in `(0.0, 1.0]`.
    pub fn is_valid(&self) -> bool {
        self.rows
            .iter()
            .flatten()
            .all(|f| *f > 0.0 && *f <= 1.0)
    }
}

/// Source of the process memory usage ratio.
pub trait MemoryProbe: Send + Sync + 'static {
    /// Returns memory in use as a fraction of what is available, in `0.0..=1.0`.
    fn usage_ratio(&self) -> f64;
}

/// Reports a constant usage ratio.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedProbe(pub f64);

impl MemoryProbe for FixedProbe {
    fn usage_ratio(&self) -> f64 {
        self.0.clamp(0.0, 1.0)
    }
}

/// Compares the process resident set size to total physical memory.
///
/// Reads `/proc/self/status` on every sample and `/proc/meminfo` once per
/// process on Linux. On other platforms, or if either file can't be parsed,
/// it reports no pressure.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMemoryProbe;

impl MemoryProbe for ProcessMemoryProbe {
    fn usage_ratio(&self) -> f64 {
        match (resident_kib(), total_kib()) {
            (Some(rss), Some(total)) if total > 0 => (rss as f64 / total as f64).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }
}

#[cfg(target_os = "linux")]
fn resident_kib() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    kib_field(&status, "VmRSS:")
}

/// Read once per process.
#[cfg(target_os = "linux")]
fn total_kib() -> Option<u64> {
    static TOTAL: std::sync::OnceLock<Option<u64>> = std::sync::OnceLock::new();
    *TOTAL.get_or_init(|| {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        kib_field(&meminfo, "MemTotal:")
    })
}

#[cfg(not(target_os = "linux"))]
fn resident_kib() -> Option<u64> {
    None
}

#[cfg(not(target_os = "linux"))]
fn total_kib() -> Option<u64> {
    None
}

/// Extracts the numeric value of a `Name:   1234 kB` line.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn kib_field(text: &str, name: &str) -> Option<u64> {
    text.lines()
        .find(|line| line.starts_with(name))
        .and_then(|line| line[name.len()..].split_whitespace().next())
        .and_then(|value| value.parse().ok())
}
