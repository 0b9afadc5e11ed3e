//! # expiryq - A Concurrent Time-Bounded FIFO Queue
//!
//! expiryq is an in-memory FIFO queue whose items carry an absolute expiry
//! deadline. Once the deadline passes an item is logically gone, whether or
//! not it has been physically removed yet.
//!
//! ## Features
//!
//! - **Concurrent**: any number of producers and consumers, no global lock
//! - **FIFO**: live items come out in the order they went in
//! - **Deadline Support**: wall-clock expiry, tracked on a monotonic clock
//! - **Exactly-once disposal**: payloads owning resources are released once
//! - **Adaptive sweeping**: a background Tokio task reclaims expired items,
//!   compacting harder under memory pressure
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              ExpiryQueue                                │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │  Producers  │───>│   enqueue   │───>│ id counter  │                  │
//! │  └─────────────┘    └──────┬──────┘    └─────────────┘                  │
//! │                            │                                            │
//! │                            ▼                                            │
//! │  ┌──────────────────┐    ┌──────────────────────────────────────────┐   │
//! │  │ OrderingSequence │    │              Entry store                 │   │
//! │  │ (SegQueue<u64>)  │───>│  ┌────────┐ ┌────────┐ ┌────────┐        │   │
//! │  │                  │    │  │Shard 0 │ │Shard 1 │ │...N    │        │   │
//! │  └──────────────────┘    │  └────────┘ └────────┘ └────────┘        │   │
//! │          ▲               └──────────────────────────────────────────┘   │
//! │          │                                    ▲                         │
//! │  ┌───────┴─────┐                              │                         │
//! │  │  Consumers  │          ┌───────────────────┴─────────────────────┐   │
//! │  │ try_dequeue │          │           Sweeper                       │   │
//! │  └─────────────┘          │      (Background Tokio Task)            │   │
//! │                           └─────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use expiryq::{ExpiryQueue, Item, QueueConfig};
//! use std::time::{Duration, SystemTime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), expiryq::QueueError> {
//!     let queue = ExpiryQueue::new(QueueConfig::default())?;
//!
//!     // Expires at an absolute wall-clock time
//!     let deadline = SystemTime::now() + Duration::from_secs(10);
//!     queue.enqueue(Item::new("A", deadline)?)?;
//!
//!     // Or after a relative TTL
//!     queue.enqueue(Item::with_ttl("B", Duration::from_secs(30))?)?;
//!
//!     assert_eq!(queue.count(), 2);
//!     assert_eq!(queue.try_dequeue()?, Some("A"));
//!
//!     // Flushes, stops the sweeper and waits for it
//!     queue.dispose().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Releasing Payloads
//!
//! Items that are never delivered (they expired, or were flushed) can have
//! their payload released. Implement [`Release`] for the payload, build the
//! queue with the [`Released`] disposer, and flag the items:
//!
//! ```
//! use expiryq::{ExpiryQueue, Item, QueueConfig, Release, ReleaseError, Released};
//! use std::time::Duration;
//!
//! struct Lease(u32);
//!
//! impl Release for Lease {
//!     fn release(self) -> Result<(), ReleaseError> {
//!         // return the lease to its pool
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), expiryq::QueueError> {
//! let queue = ExpiryQueue::with_disposer(QueueConfig::default(), Released)?;
//! queue.enqueue(
//!     Item::with_ttl(Lease(7), Duration::from_secs(5))?
//!         .dispose_on_expiry(true)
//!         .dispose_on_flush(true),
//! )?;
//! queue.flush()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`queue`]: the queue engine, items, sweeper and pressure heuristics
//! - [`config`]: queue and sweeper configuration
//! - [`error`]: error types
//!
//! ## Design Highlights
//!
//! ### Lazy + Active Expiry
//!
//! Items are expired in two ways:
//! 1. **Lazy**: a dequeue that meets an expired head reclaims and skips it
//! 2. **Active**: a background task periodically removes expired entries
//!
//! This ensures memory is reclaimed even for items behind a long-lived head.
//!
//! ### Approximate Count
//!
//! [`ExpiryQueue::count`] is a relaxed atomic read. It is exact whenever no
//! other thread is mutating the queue, and exactly zero after a flush.

pub mod config;
pub mod error;
pub mod queue;

// Re-export commonly used types for convenience
pub use config::QueueConfig;
pub use error::{QueueError, ReleaseError, Result};
pub use queue::{
    CompactionTable, Disposer, ExpiryQueue, FixedProbe, Item, MemoryProbe, PressureTier,
    ProcessMemoryProbe, QueueStats, Release, Released, Retain, SweepReport,
};

/// Version of expiryq
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
