//! Queue Engine Module
//!
//! This module provides the expiring FIFO queue: the item type, the
//! identifier sequence that fixes delivery order, the concurrent entry
//! store, and the background sweeper that reclaims expired entries.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ExpiryQueue                            │
//! │  ┌──────────────────────┐   ┌─────────────────────────────┐ │
//! │  │  OrderingSequence    │   │  Entry store (DashMap)      │ │
//! │  │  SegQueue<u64>       │──>│  u64 -> Item<T>             │ │
//! │  │  FIFO of ids         │   │  64 shards                  │ │
//! │  └──────────────────────┘   └─────────────────────────────┘ │
//! │       live counter · id counter · deadline watermark        │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ remove_if(expired)
//!              ┌─────────────┴─────────────┐
//!              │     Sweeper               │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Lock-free hot path**: enqueue and dequeue use atomics, a segmented
//!   queue and a sharded map; no global lock
//! - **Lazy Expiry**: expired heads are reclaimed and skipped on dequeue
//! - **Active Expiry**: the sweeper reclaims expired entries anywhere in the queue
//! - **Exactly-once disposal**: every payload has a single owner on removal
//!
//! ## Example
//!
//! ```
//! use expiryq::queue::{ExpiryQueue, Item};
//! use expiryq::QueueConfig;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), expiryq::QueueError> {
//! let queue = ExpiryQueue::new(QueueConfig::default())?;
//!
//! queue.enqueue(Item::with_ttl(String::from("job-1"), Duration::from_secs(60))?)?;
//! queue.enqueue(Item::with_ttl(String::from("job-2"), Duration::from_secs(60))?)?;
//!
//! assert_eq!(queue.try_peek()?.as_deref(), Some("job-1"));
//! assert_eq!(queue.try_dequeue()?.as_deref(), Some("job-1"));
//! assert_eq!(queue.count(), 1);
//!
//! queue.dispose().await?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod item;
pub mod pressure;
mod sequence;
pub mod sweeper;

// Re-export commonly used types
pub use engine::{ExpiryQueue, QueueStats};
pub use item::{Disposer, Item, Release, Released, Retain};
pub use pressure::{CompactionTable, FixedProbe, MemoryProbe, PressureTier, ProcessMemoryProbe};
pub use sweeper::SweepReport;
