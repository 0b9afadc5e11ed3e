//! Background Expiry Sweeper
//!
//! Lazy reclamation in `try_dequeue` only reaches entries that sit at the
//! head of the queue. An item that expires behind a long-lived one would
//! keep its memory (and whatever resource its payload owns) until a consumer
//! got that far. The sweeper reclaims those entries proactively.
//!
//! ## Design
//!
//! The sweeper runs as a Tokio task owned by its queue and, on every tick:
//! 1. Samples memory pressure and picks a compaction fraction
//! 2. Skips the scan if the earliest-deadline watermark is still ahead
//! 3. Otherwise removes every expired entry from the store
//! 4. Shrinks the store if it is carrying more slack than the fraction allows
//!
//! It never touches the ordering sequence; the identifiers it orphans are
//! skipped by consumers later.

use crate::queue::engine::{QueueInner, NO_DEADLINE};
use crate::queue::item::{Disposer, Reclaim};
use crate::queue::pressure::PressureTier;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Stores smaller than this are never worth shrinking.
const MIN_COMPACT_CAPACITY: usize = 1024;

/// Outcome of a single sweep pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepReport {
    /// Memory pressure tier observed at the start of the pass
    pub tier: PressureTier,
    /// Compaction fraction chosen for this pass
    pub fraction: f64,
    /// True if the watermark showed nothing could have expired yet
    pub skipped: bool,
    /// Entries examined
    pub scanned: u64,
    /// Expired entries this pass removed
    pub expired: u64,
    /// Payloads that failed to release
    pub release_failures: u64,
    /// True if the entry store was shrunk
    pub compacted: bool,
}

/// A handle to a queue's running sweeper task.
///
/// When this handle is dropped, the sweeper task is told to stop.
#[derive(Debug)]
pub(crate) struct Sweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawns the sweeper on the current Tokio runtime.
    pub(crate) fn start<T, D>(inner: Arc<QueueInner<T, D>>) -> Self
    where
        T: Send + Sync + 'static,
        D: Disposer<T>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval_ms = inner.config.sweep_interval.as_millis() as u64;

        let task = tokio::spawn(sweeper_loop(inner, shutdown_rx));

        info!(interval_ms = interval_ms, "Background expiry sweeper started");

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Signals the sweeper to stop without waiting for it.
    pub(crate) fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Signals the sweeper to stop and waits for the task to exit.
    pub(crate) async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "Expiry sweeper task ended abnormally");
            }
        }
        info!("Background expiry sweeper stopped");
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main sweeper loop.
async fn sweeper_loop<T, D>(inner: Arc<QueueInner<T, D>>, mut shutdown_rx: watch::Receiver<bool>)
where
    T: Send + Sync + 'static,
    D: Disposer<T>,
{
    let mut ticker = tokio::time::interval(inner.config.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; wait a full interval before sweeping
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let report = inner.sweep();

        if report.expired > 0 {
            debug!(
                expired = report.expired,
                scanned = report.scanned,
                tier = %report.tier,
                live = inner.live.load(Ordering::Relaxed),
                "Expired entries cleaned up"
            );
        }
    }
}

impl<T, D> QueueInner<T, D>
where
    D: Disposer<T>,
{
    /// Runs one sweep pass.
    pub(crate) fn sweep(&self) -> SweepReport {
        self.sweeps.fetch_add(1, Ordering::Relaxed);

        let live = self.live.load(Ordering::Relaxed);
        let usage = self.probe.usage_ratio();
        let tier = PressureTier::classify(usage, &self.config.pressure_thresholds);
        let fraction = self
            .config
            .compaction
            .fraction(tier, live > self.config.size_threshold);

        let mut report = SweepReport {
            tier,
            fraction,
            skipped: false,
            scanned: 0,
            expired: 0,
            release_failures: 0,
            compacted: false,
        };

        let now = self.offset_of(Instant::now());
        if self.watermark.load(Ordering::Acquire) > now {
            trace!(live = live, tier = %tier, "No entry can have expired yet, skipping sweep");
            report.skipped = true;
            report.compacted = self.compact(fraction);
            return report;
        }

        // Entries inserted from here on lower the watermark themselves; the
        // scan accounts for everything inserted before.
        self.watermark.store(NO_DEADLINE, Ordering::Release);

        let mut earliest = NO_DEADLINE;
        let mut expired_ids = Vec::new();
        for entry in self.store.iter() {
            report.scanned += 1;
            if entry.is_expired() {
                expired_ids.push(*entry.key());
            } else {
                earliest = earliest.min(self.offset_of(entry.deadline()));
            }
        }

        for id in expired_ids {
            // A consumer may have taken it since the scan
            let Some((_, item)) = self.store.remove_if(&id, |_, item| item.is_expired()) else {
                continue;
            };
            self.release_slot();
            report.expired += 1;

            if let Err(err) = self.reclaim(item, Reclaim::Expired) {
                report.release_failures += 1;
                warn!(id = id, error = %err, "Failed to release expired payload");
            }
        }

        self.expired.fetch_add(report.expired, Ordering::Relaxed);
        self.watermark.fetch_min(earliest, Ordering::AcqRel);
        report.compacted = self.compact(fraction);

        report
    }

    /// Shrinks the entry store when its slack exceeds `1 - fraction`.
    fn compact(&self, fraction: f64) -> bool {
        let capacity = self.store.capacity();
        if capacity < MIN_COMPACT_CAPACITY {
            return false;
        }

        let slack = 1.0 - self.store.len() as f64 / capacity as f64;
        if slack <= 1.0 - fraction {
            return false;
        }

        self.store.shrink_to_fit();
        debug!(
            capacity_before = capacity,
            capacity_after = self.store.capacity(),
            fraction = fraction,
            "Compacted entry store"
        );
        true
    }
}
