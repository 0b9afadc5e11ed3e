//! Concurrent Expiring FIFO Queue
//!
//! This module implements the queue engine: a lock-free FIFO of identifiers
//! paired with a sharded map from identifier to [`Item`].
//!
//! ## Design Decisions
//!
//! 1. **Order and liveness are separate**: the ordering sequence only
//!    remembers *order*; the entry store alone decides whether an item is
//!    still live. Stale identifiers are skipped on the way out.
//! 2. **Single-owner removal**: dequeue, peek, sweep and flush all remove
//!    through `DashMap::remove`/`remove_if`. Whoever gets the entry owns the
//!    payload, so nothing is disposed twice.
//! 3. **Approximate count**: the live counter is a relaxed atomic. It is
//!    incremented before the entry becomes visible and saturates at zero, so
//!    it never underflows. A flush subtracts what it removed, which leaves
//!    exactly 0 when nothing races it.
//! 4. **Earliest-deadline watermark**: producers lower it with `fetch_min`,
//!    letting the sweeper skip whole passes while nothing can have expired.
//!
//! ## Data Flow
//!
//! ```text
//!  enqueue ──┬─> live += 1
//!            ├─> store.insert(id, item) ─────────────┐
//!            ├─> watermark.fetch_min(deadline)       │ remove / remove_if
//!            └─> sequence.push(id)                   │ (first caller wins)
//!                                                    │
//!  try_dequeue ──> sequence.pop() ──> store.remove ──┤
//!  sweeper ──────────────────────────> store.remove_if(expired)
//!  flush ──> sequence.clear() ───────> store.remove (all)
//! ```
//!
//! The identifier is published to the sequence only after the store insert,
//! so a consumer that pops an identifier can always resolve it.

use crate::config::QueueConfig;
use crate::error::{QueueError, ReleaseError, Result};
use crate::queue::item::{Disposer, Item, Reclaim, Retain};
use crate::queue::pressure::{MemoryProbe, ProcessMemoryProbe};
use crate::queue::sequence::OrderingSequence;
use crate::queue::sweeper::{SweepReport, Sweeper};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Watermark value meaning "no known deadline".
pub(crate) const NO_DEADLINE: u64 = u64::MAX;

/// State shared between the queue handle and its sweeper task.
pub(crate) struct QueueInner<T, D> {
    pub(crate) sequence: OrderingSequence,
    pub(crate) store: DashMap<u64, Item<T>>,
    pub(crate) config: QueueConfig,
    pub(crate) disposer: D,
    pub(crate) probe: Box<dyn MemoryProbe>,

    /// Next identifier to hand out (starts at 1)
    next_id: AtomicU64,

    /// Entries believed live
    pub(crate) live: AtomicU64,

    /// Earliest known deadline, in nanoseconds since `epoch`
    pub(crate) watermark: AtomicU64,

    /// Reference point for watermark offsets
    epoch: Instant,

    flushing: AtomicBool,
    disposed: AtomicBool,

    // Statistics
    enqueued: AtomicU64,
    dequeued: AtomicU64,
    pub(crate) expired: AtomicU64,
    flushed: AtomicU64,
    pub(crate) sweeps: AtomicU64,
    release_failures: AtomicU64,
}

impl<T, D: Disposer<T>> QueueInner<T, D> {
    /// Converts a monotonic instant into a watermark offset.
    #[inline]
    pub(crate) fn offset_of(&self, instant: Instant) -> u64 {
        let nanos = instant.saturating_duration_since(self.epoch).as_nanos();
        nanos.min(u128::from(NO_DEADLINE - 1)) as u64
    }

    /// Decrements the live counter, saturating at zero.
    #[inline]
    pub(crate) fn release_slot(&self) {
        let _ = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Disposes of an entry that left the queue undelivered.
    pub(crate) fn reclaim(
        &self,
        item: Item<T>,
        reason: Reclaim,
    ) -> std::result::Result<bool, ReleaseError> {
        item.reclaim(reason, &self.disposer).inspect_err(|_| {
            self.release_failures.fetch_add(1, Ordering::Relaxed);
        })
    }

    /// Claims the flush flag, or `None` if another flush holds it.
    fn try_begin_flush(&self) -> Option<FlushGuard<'_>> {
        self.flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlushGuard(&self.flushing))
    }

    /// Drains the sequence and the store. Only one flush runs at a time.
    fn flush(&self) -> Result<u64> {
        let Some(guard) = self.try_begin_flush() else {
            debug!("Flush already in progress, skipping");
            return Ok(0);
        };
        self.drain(guard)
    }

    fn drain(&self, _flushing: FlushGuard<'_>) -> Result<u64> {
        // Reset first: producers racing the drain lower it again themselves
        self.watermark.store(NO_DEADLINE, Ordering::Release);
        let stale_ids = self.sequence.clear();

        let ids: Vec<u64> = self.store.iter().map(|entry| *entry.key()).collect();
        let mut removed = 0u64;
        let mut failures = Vec::new();

        for id in ids {
            if let Some((_, item)) = self.store.remove(&id) {
                removed += 1;
                if let Err(err) = self.reclaim(item, Reclaim::Flushed) {
                    failures.push(err);
                }
            }
        }

        // Only entries this flush removed give up their slot; a producer that
        // inserted after the key scan keeps its own
        let _ = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(removed))
            });
        self.flushed.fetch_add(removed, Ordering::Relaxed);

        debug!(
            removed = removed,
            stale_ids = stale_ids,
            failures = failures.len(),
            "Queue flushed"
        );

        if failures.is_empty() {
            Ok(removed)
        } else {
            Err(QueueError::Flush { failures })
        }
    }
}

/// Clears the flush flag even if a disposer panics mid-flush.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A concurrent FIFO queue whose items expire at an absolute deadline.
///
/// Producers and consumers may call into the queue from any thread; none of
/// the hot-path operations take a global lock. A background Tokio task owned
/// by the queue reclaims expired items that nobody dequeues.
///
/// `D` decides how reclaimed payloads are disposed of; see [`Disposer`].
///
/// # Example
///
/// ```
/// use expiryq::{ExpiryQueue, Item, QueueConfig};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), expiryq::QueueError> {
///     let queue = ExpiryQueue::new(QueueConfig::default())?;
///
///     queue.enqueue(Item::with_ttl("first", Duration::from_secs(10))?)?;
///     queue.enqueue(Item::with_ttl("second", Duration::from_secs(30))?)?;
///     assert_eq!(queue.count(), 2);
///
///     assert_eq!(queue.try_dequeue()?, Some("first"));
///     assert_eq!(queue.count(), 1);
///
///     queue.dispose().await?;
///     Ok(())
/// }
/// ```
pub struct ExpiryQueue<T, D = Retain> {
    inner: Arc<QueueInner<T, D>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<T, D> std::fmt::Debug for ExpiryQueue<T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiryQueue")
            .field("live", &self.inner.live.load(Ordering::Relaxed))
            .field("pending_ids", &self.inner.sequence.len())
            .field("disposed", &self.inner.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> ExpiryQueue<T, Retain>
where
    T: Send + Sync + 'static,
{
    /// Creates a queue that drops reclaimed payloads without releasing them.
    ///
    /// # Errors
    ///
    /// Fails if `config` is invalid or no Tokio runtime is running.
    pub fn new(config: QueueConfig) -> Result<Self> {
        Self::with_disposer(config, Retain)
    }
}

impl<T, D> ExpiryQueue<T, D>
where
    T: Send + Sync + 'static,
    D: Disposer<T>,
{
    /// Creates a queue that hands reclaimed payloads to `disposer`.
    pub fn with_disposer(config: QueueConfig, disposer: D) -> Result<Self> {
        Self::with_probe(config, disposer, ProcessMemoryProbe)
    }

    /// Creates a queue with a custom memory pressure source for its sweeper.
    pub fn with_probe(
        config: QueueConfig,
        disposer: D,
        probe: impl MemoryProbe,
    ) -> Result<Self> {
        config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(QueueError::NoRuntime);
        }

        let store = DashMap::with_capacity_and_shard_amount(
            config.initial_capacity,
            config.shard_amount,
        );

        let inner = Arc::new(QueueInner {
            sequence: OrderingSequence::new(),
            store,
            config,
            disposer,
            probe: Box::new(probe),
            next_id: AtomicU64::new(1),
            live: AtomicU64::new(0),
            watermark: AtomicU64::new(NO_DEADLINE),
            epoch: Instant::now(),
            flushing: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            enqueued: AtomicU64::new(0),
            dequeued: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            sweeps: AtomicU64::new(0),
            release_failures: AtomicU64::new(0),
        });

        let sweeper = Sweeper::start(Arc::clone(&inner));

        Ok(Self {
            inner,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    #[inline]
    fn ensure_live(&self) -> Result<()> {
        if self.inner.disposed.load(Ordering::Acquire) {
            Err(QueueError::QueueDisposed)
        } else {
            Ok(())
        }
    }

    /// Appends an item at the tail and returns its identifier.
    ///
    /// # Errors
    ///
    /// - [`QueueError::QueueDisposed`] after [`dispose`](Self::dispose), or if
    ///   a dispose overtook this call; the item is then reclaimed as flushed
    /// - [`QueueError::ItemAlreadyExpired`] if the deadline passed since the
    ///   item was built
    pub fn enqueue(&self, item: Item<T>) -> Result<u64> {
        self.ensure_live()?;
        if item.is_expired() {
            return Err(QueueError::ItemAlreadyExpired);
        }

        let inner = &*self.inner;
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = inner.offset_of(item.deadline());

        inner.live.fetch_add(1, Ordering::AcqRel);
        inner.store.insert(id, item);
        inner.watermark.fetch_min(deadline, Ordering::AcqRel);
        inner.sequence.push(id);
        inner.enqueued.fetch_add(1, Ordering::Relaxed);

        // Dispose may have run its final flush before the insert landed
        if inner.disposed.load(Ordering::SeqCst) {
            if let Some((_, item)) = inner.store.remove(&id) {
                inner.release_slot();
                inner.flushed.fetch_add(1, Ordering::Relaxed);
                if let Err(err) = inner.reclaim(item, Reclaim::Flushed) {
                    warn!(id = id, error = %err, "Failed to release item enqueued during dispose");
                }
            }
            return Err(QueueError::QueueDisposed);
        }

        Ok(id)
    }

    /// Removes and returns the oldest live item.
    ///
    /// Identifiers whose entries are gone are skipped. Expired entries met on
    /// the way are reclaimed (and released if flagged) and skipped too.
    /// Returns `Ok(None)` once the queue holds nothing deliverable.
    ///
    /// # Errors
    ///
    /// - [`QueueError::QueueDisposed`] after [`dispose`](Self::dispose)
    /// - [`QueueError::Release`] if an expired payload fails to release; the
    ///   entry is removed regardless
    pub fn try_dequeue(&self) -> Result<Option<T>> {
        self.ensure_live()?;
        let inner = &*self.inner;

        while let Some(id) = inner.sequence.pop() {
            let Some((_, item)) = inner.store.remove(&id) else {
                continue;
            };
            inner.release_slot();

            if item.is_expired() {
                inner.expired.fetch_add(1, Ordering::Relaxed);
                inner
                    .reclaim(item, Reclaim::Expired)
                    .map_err(QueueError::Release)?;
                continue;
            }

            inner.dequeued.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(item.into_value()));
        }

        Ok(None)
    }

    /// Returns a clone of the oldest live item without removing it.
    ///
    /// Stale identifiers ahead of it are dropped and expired entries are
    /// reclaimed, exactly as [`try_dequeue`](Self::try_dequeue) would.
    pub fn try_peek(&self) -> Result<Option<T>>
    where
        T: Clone,
    {
        self.ensure_live()?;
        let inner = &*self.inner;
        let guard = inner.sequence.lock_peek();

        while let Some(id) = inner.sequence.front(&guard) {
            let head = inner
                .store
                .get(&id)
                .map(|entry| (!entry.is_expired()).then(|| entry.value().value().clone()));

            match head {
                Some(Some(value)) => return Ok(Some(value)),
                Some(None) => {
                    inner.sequence.discard(id, &guard);
                    if let Some((_, item)) = inner.store.remove_if(&id, |_, item| item.is_expired())
                    {
                        inner.release_slot();
                        inner.expired.fetch_add(1, Ordering::Relaxed);
                        inner
                            .reclaim(item, Reclaim::Expired)
                            .map_err(QueueError::Release)?;
                    }
                }
                None => inner.sequence.discard(id, &guard),
            }
        }

        Ok(None)
    }

    /// Returns the approximate number of live items.
    ///
    /// Exact only when no other thread is mutating the queue.
    pub fn count(&self) -> u64 {
        self.inner.live.load(Ordering::Relaxed)
    }

    /// Returns true if the queue is believed empty.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Removes every item, releasing payloads as their flags ask.
    ///
    /// If another flush is already running this returns `Ok(0)` right away.
    /// On a disposed queue it is a no-op.
    ///
    /// # Returns
    ///
    /// The number of entries removed.
    ///
    /// # Errors
    ///
    /// [`QueueError::Flush`] carrying every release failure. The flush still
    /// removes every entry it finds and gives up their slots in the count.
    pub fn flush(&self) -> Result<u64> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Ok(0);
        }
        self.inner.flush()
    }

    /// Runs one expiry sweep immediately, the same pass the background
    /// sweeper runs on every tick.
    pub fn sweep_expired(&self) -> Result<SweepReport> {
        self.ensure_live()?;
        Ok(self.inner.sweep())
    }

    /// Returns queue statistics.
    pub fn stats(&self) -> QueueStats {
        let inner = &*self.inner;
        QueueStats {
            live: inner.live.load(Ordering::Relaxed),
            enqueued: inner.enqueued.load(Ordering::Relaxed),
            dequeued: inner.dequeued.load(Ordering::Relaxed),
            expired: inner.expired.load(Ordering::Relaxed),
            flushed: inner.flushed.load(Ordering::Relaxed),
            sweeps: inner.sweeps.load(Ordering::Relaxed),
            release_failures: inner.release_failures.load(Ordering::Relaxed),
        }
    }

    /// Returns true once [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Flushes the queue, stops the sweeper and waits for it to finish.
    ///
    /// Calling this more than once is harmless; only the first call does
    /// anything. Every other operation fails with
    /// [`QueueError::QueueDisposed`] afterwards.
    ///
    /// # Errors
    ///
    /// [`QueueError::Flush`] if payloads failed to release during the final
    /// flush. The queue is disposed either way.
    pub async fn dispose(&self) -> Result<()> {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // The final drain must not be skipped for a user flush already running
        let guard = loop {
            match self.inner.try_begin_flush() {
                Some(guard) => break guard,
                None => tokio::task::yield_now().await,
            }
        };
        let flushed = self.inner.drain(guard);

        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(sweeper) = sweeper {
            sweeper.shutdown().await;
        }

        self.inner.store.shrink_to_fit();
        info!("Expiry queue disposed");

        flushed.map(|_| ())
    }
}

/// Queue statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Live items (approximate)
    pub live: u64,
    /// Total items enqueued
    pub enqueued: u64,
    /// Total items delivered to consumers
    pub dequeued: u64,
    /// Total expired items reclaimed by dequeue, peek or sweep
    pub expired: u64,
    /// Total items removed by flushes
    pub flushed: u64,
    /// Total sweep passes
    pub sweeps: u64,
    /// Total payload release failures
    pub release_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::item::{Release, Released};
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, SystemTime};
    use tokio_test::{assert_err, assert_ok};

    /// Payload that counts how often it is released.
    #[derive(Debug, Clone)]
    struct Tracked {
        id: u32,
        releases: Arc<AtomicUsize>,
    }

    impl Release for Tracked {
        fn release(self) -> std::result::Result<(), ReleaseError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Payload whose release always fails.
    struct Faulty;

    impl Release for Faulty {
        fn release(self) -> std::result::Result<(), ReleaseError> {
            Err("handle already closed".into())
        }
    }

    fn quiet_config() -> QueueConfig {
        // Keep the background sweeper out of the way of deterministic tests
        QueueConfig::default().with_sweep_interval(Duration::from_secs(3600))
    }

    fn far<T>(value: T) -> Item<T> {
        Item::with_ttl(value, Duration::from_secs(3600)).unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_dequeue_fifo() {
        let queue = ExpiryQueue::new(quiet_config()).unwrap();

        for i in 0..100 {
            queue.enqueue(far(i)).unwrap();
        }

        let drained: Vec<i32> = std::iter::from_fn(|| queue.try_dequeue().unwrap()).collect();
        assert_eq!(drained, (0..100).collect::<Vec<_>>());
        assert_eq!(queue.try_dequeue().unwrap(), None);
    }

    #[tokio::test]
    async fn test_count_tracks_enqueues() {
        let queue = ExpiryQueue::new(quiet_config()).unwrap();

        for i in 0..250 {
            queue.enqueue(far(i)).unwrap();
        }

        assert_eq!(queue.count(), 250);
        assert!(!queue.is_empty());
        assert_eq!(queue.stats().enqueued, 250);
    }

    #[tokio::test]
    async fn test_identifiers_increase() {
        let queue = ExpiryQueue::new(quiet_config()).unwrap();

        let first = queue.enqueue(far("a")).unwrap();
        let second = queue.enqueue(far("b")).unwrap();
        assert_eq!(first, 1);
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_item_expired_in_transit() {
        let queue = ExpiryQueue::new(quiet_config()).unwrap();

        let item = Item::with_ttl("late", Duration::from_millis(10)).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(matches!(
            queue.enqueue(item),
            Err(QueueError::ItemAlreadyExpired)
        ));
        assert_eq!(queue.count(), 0);
    }

    #[tokio::test]
    async fn test_dequeue_skips_expired_head() {
        let queue = ExpiryQueue::new(quiet_config()).unwrap();

        queue
            .enqueue(Item::with_ttl("short", Duration::from_millis(20)).unwrap())
            .unwrap();
        queue.enqueue(far("long")).unwrap();
        assert_eq!(queue.count(), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(queue.try_dequeue().unwrap(), Some("long"));
        assert_eq!(queue.count(), 0);
        assert_eq!(queue.stats().expired, 1);
        assert_eq!(queue.stats().dequeued, 1);
    }

    #[tokio::test]
    async fn test_expired_dequeue_releases_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let queue = ExpiryQueue::with_disposer(quiet_config(), Released).unwrap();

        let item = Item::with_ttl(
            Tracked {
                id: 1,
                releases: Arc::clone(&releases),
            },
            Duration::from_millis(20),
        )
        .unwrap()
        .dispose_on_expiry(true);
        queue.enqueue(item).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(queue.try_dequeue().unwrap().is_none());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(queue.count(), 0);

        // A second reclaim attempt finds nothing to release
        assert!(queue.try_dequeue().unwrap().is_none());
        assert_eq!(assert_ok!(queue.sweep_expired()).expired, 0);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_failure_propagates_from_dequeue() {
        let queue = ExpiryQueue::with_disposer(quiet_config(), Released).unwrap();

        queue
            .enqueue(
                Item::with_ttl(Faulty, Duration::from_millis(10))
                    .unwrap()
                    .dispose_on_expiry(true),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(matches!(queue.try_dequeue(), Err(QueueError::Release(_))));
        // The entry was still reclaimed
        assert_eq!(queue.count(), 0);
        assert_eq!(queue.stats().release_failures, 1);
        assert!(queue.try_dequeue().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_peek_does_not_consume() {
        let queue = ExpiryQueue::new(quiet_config()).unwrap();

        assert_eq!(queue.try_peek().unwrap(), None);

        queue.enqueue(far("a".to_string())).unwrap();
        queue.enqueue(far("b".to_string())).unwrap();

        assert_eq!(queue.try_peek().unwrap().as_deref(), Some("a"));
        assert_eq!(queue.try_peek().unwrap().as_deref(), Some("a"));
        assert_eq!(queue.count(), 2);

        assert_eq!(queue.try_dequeue().unwrap().as_deref(), Some("a"));
        assert_eq!(queue.try_peek().unwrap().as_deref(), Some("b"));
        assert_eq!(queue.try_dequeue().unwrap().as_deref(), Some("b"));
        assert_eq!(queue.try_peek().unwrap(), None);
    }

    #[tokio::test]
    async fn test_peek_reclaims_expired_head() {
        let releases = Arc::new(AtomicUsize::new(0));
        let queue = ExpiryQueue::with_disposer(quiet_config(), Released).unwrap();

        let short = Item::with_ttl(
            Tracked {
                id: 1,
                releases: Arc::clone(&releases),
            },
            Duration::from_millis(10),
        )
        .unwrap()
        .dispose_on_expiry(true);
        queue.enqueue(short).unwrap();
        queue
            .enqueue(far(Tracked {
                id: 2,
                releases: Arc::clone(&releases),
            }))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(queue.try_peek().unwrap().map(|t| t.id), Some(2));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(queue.count(), 1);

        assert_eq!(queue.try_dequeue().unwrap().map(|t| t.id), Some(2));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_peek_skips_expired_entries() {
        let queue = ExpiryQueue::new(quiet_config()).unwrap();

        queue
            .enqueue(Item::with_ttl(1u32, Duration::from_millis(10)).unwrap())
            .unwrap();
        queue.enqueue(far(2u32)).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(queue.try_peek().unwrap(), Some(2));
        assert_eq!(queue.count(), 1);
        assert_eq!(queue.stats().expired, 1);
    }

    #[tokio::test]
    async fn test_flush_empties_queue() {
        let releases = Arc::new(AtomicUsize::new(0));
        let queue = ExpiryQueue::with_disposer(quiet_config(), Released).unwrap();

        for id in 0..10 {
            let item = far(Tracked {
                id,
                releases: Arc::clone(&releases),
            })
            .dispose_on_flush(id % 2 == 0);
            queue.enqueue(item).unwrap();
        }
        assert_eq!(queue.count(), 10);

        assert_eq!(queue.flush().unwrap(), 10);
        assert_eq!(queue.count(), 0);
        assert_eq!(releases.load(Ordering::SeqCst), 5);
        assert!(queue.try_dequeue().unwrap().is_none());

        // Nothing left for a second flush to release
        assert_eq!(queue.flush().unwrap(), 0);
        assert_eq!(releases.load(Ordering::SeqCst), 5);

        // The queue keeps working after a flush
        queue
            .enqueue(far(Tracked {
                id: 42,
                releases: Arc::clone(&releases),
            }))
            .unwrap();
        assert_eq!(queue.try_dequeue().unwrap().map(|t| t.id), Some(42));
    }

    #[tokio::test]
    async fn test_flush_counts_expired_entries() {
        let queue = ExpiryQueue::new(quiet_config()).unwrap();

        for i in 0..5 {
            queue
                .enqueue(Item::with_ttl(i, Duration::from_millis(10)).unwrap())
                .unwrap();
        }
        queue.enqueue(far(99)).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(queue.flush().unwrap(), 6);
        assert_eq!(queue.count(), 0);
    }

    #[tokio::test]
    async fn test_flush_continues_past_release_failures() {
        let queue = ExpiryQueue::with_disposer(quiet_config(), Released).unwrap();

        for _ in 0..3 {
            queue.enqueue(far(Faulty).dispose_on_flush(true)).unwrap();
        }
        queue.enqueue(far(Faulty)).unwrap();

        match queue.flush() {
            Err(QueueError::Flush { failures }) => assert_eq!(failures.len(), 3),
            other => panic!("expected aggregate flush error, got {:?}", other.map(|_| ())),
        }
        assert_eq!(queue.count(), 0);
        assert_eq!(queue.stats().flushed, 4);
        assert!(queue.try_dequeue().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_flush_is_exclusive() {
        let queue = ExpiryQueue::<u32>::new(quiet_config()).unwrap();
        queue.enqueue(far(1)).unwrap();

        // Simulate a flush in progress
        queue.inner.flushing.store(true, Ordering::SeqCst);
        assert_eq!(queue.flush().unwrap(), 0);
        assert_eq!(queue.count(), 1);

        queue.inner.flushing.store(false, Ordering::SeqCst);
        assert_eq!(queue.flush().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_operations_fail_after_dispose() {
        let queue = ExpiryQueue::new(quiet_config()).unwrap();
        queue.enqueue(far(1)).unwrap();

        queue.dispose().await.unwrap();

        assert!(queue.is_disposed());
        assert!(matches!(
            queue.enqueue(far(2)),
            Err(QueueError::QueueDisposed)
        ));
        assert!(matches!(
            queue.try_dequeue(),
            Err(QueueError::QueueDisposed)
        ));
        assert!(matches!(queue.try_peek(), Err(QueueError::QueueDisposed)));
        assert_err!(queue.sweep_expired());
        assert_eq!(queue.flush().unwrap(), 0);
        assert_eq!(queue.count(), 0);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let releases = Arc::new(AtomicUsize::new(0));
        let queue = ExpiryQueue::with_disposer(quiet_config(), Released).unwrap();

        for id in 0..4 {
            queue
                .enqueue(
                    far(Tracked {
                        id,
                        releases: Arc::clone(&releases),
                    })
                    .dispose_on_flush(true),
                )
                .unwrap();
        }

        assert_ok!(queue.dispose().await);
        assert_ok!(queue.dispose().await);

        assert_eq!(releases.load(Ordering::SeqCst), 4);
        assert_eq!(queue.stats().flushed, 4);
    }

    #[tokio::test]
    async fn test_dispose_waits_for_running_flush() {
        let releases = Arc::new(AtomicUsize::new(0));
        let queue = ExpiryQueue::with_disposer(quiet_config(), Released).unwrap();
        queue
            .enqueue(
                far(Tracked {
                    id: 1,
                    releases: Arc::clone(&releases),
                })
                .dispose_on_flush(true),
            )
            .unwrap();

        // Simulate a flush in progress that finishes a little later
        queue.inner.flushing.store(true, Ordering::SeqCst);
        let (disposed, ()) = tokio::join!(queue.dispose(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            queue.inner.flushing.store(false, Ordering::SeqCst);
        });

        assert_ok!(disposed);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(queue.stats().flushed, 1);
        assert!(queue.inner.store.is_empty());
    }

    #[tokio::test]
    async fn test_wall_clock_scenario() {
        let queue = ExpiryQueue::new(quiet_config()).unwrap();
        let now = SystemTime::now();

        queue
            .enqueue(Item::new("A", now + Duration::from_millis(100)).unwrap())
            .unwrap();
        queue
            .enqueue(Item::new("B", now + Duration::from_millis(300)).unwrap())
            .unwrap();
        assert_eq!(queue.count(), 2);

        assert_eq!(queue.try_dequeue().unwrap(), Some("A"));
        assert_eq!(queue.count(), 1);

        tokio::time::sleep(Duration::from_millis(350)).await;

        assert_eq!(queue.try_dequeue().unwrap(), None);
        assert_eq!(queue.count(), 0);
    }

    #[test]
    fn test_new_requires_runtime() {
        let result = ExpiryQueue::<u32>::new(QueueConfig::default());
        assert!(matches!(result, Err(QueueError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = QueueConfig::default().with_shard_amount(3);
        let result = ExpiryQueue::<u32>::new(config);
        assert!(matches!(result, Err(QueueError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_counter_never_underflows() {
        let queue = ExpiryQueue::<u32>::new(quiet_config()).unwrap();

        queue.inner.release_slot();
        assert_eq!(queue.count(), 0);

        queue.enqueue(far(1)).unwrap();
        queue.inner.live.store(0, Ordering::SeqCst);
        assert_eq!(queue.try_dequeue().unwrap(), Some(1));
        assert_eq!(queue.count(), 0);
    }
}
