//! Ordering Sequence
//!
//! The FIFO of identifiers that decides delivery order. It is deliberately
//! ignorant of expiry: identifiers whose entries were already dequeued,
//! swept, or flushed stay here until a consumer pops and skips them.
//!
//! ```text
//!           stash (peeked head)        SegQueue (lock-free)
//!          ┌──────────────┐       ┌────┬────┬────┬────┬────┐
//!  pop  <──│  id or EMPTY │ <──── │ 17 │ 18 │ 19 │ 20 │ 21 │ <── push
//!          └──────────────┘       └────┴────┴────┴────┴────┘
//! ```
//!
//! A `SegQueue` can't be inspected without popping, so a peek pops the head
//! into a one-slot stash. `pop` always drains the stash first, which keeps
//! the peeked identifier at the front.
//!
//! Moving the head into the stash takes two steps. Consumers hold the shared
//! side of `handoff` across their stash check and pop, and a peeker holds the
//! exclusive side across its pop and stash, so a consumer never sees the gap
//! between them. Consumers never block each other.

use crossbeam::queue::SegQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};

/// Stash value meaning "no peeked identifier". Identifiers start at 1.
pub(crate) const EMPTY: u64 = 0;

#[derive(Debug, Default)]
pub(crate) struct OrderingSequence {
    ids: SegQueue<u64>,
    stash: AtomicU64,
    /// Serializes peekers; only a peeker holding this may fill the stash
    peek_lock: Mutex<()>,
    /// Shared by consumers, exclusive while a peeker moves the head
    handoff: RwLock<()>,
}

impl OrderingSequence {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends an identifier at the tail.
    #[inline]
    pub(crate) fn push(&self, id: u64) {
        debug_assert_ne!(id, EMPTY);
        self.ids.push(id);
    }

    /// Removes and returns the head identifier.
    #[inline]
    pub(crate) fn pop(&self) -> Option<u64> {
        let _shared = self
            .handoff
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.stash.load(Ordering::Acquire) != EMPTY {
            let id = self.stash.swap(EMPTY, Ordering::AcqRel);
            if id != EMPTY {
                return Some(id);
            }
        }
        self.ids.pop()
    }

    /// Locks out other peekers for the duration of a peek.
    pub(crate) fn lock_peek(&self) -> MutexGuard<'_, ()> {
        self.peek_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the head identifier without consuming it.
    ///
    /// The caller must hold the guard from [`lock_peek`](Self::lock_peek).
    pub(crate) fn front(&self, _guard: &MutexGuard<'_, ()>) -> Option<u64> {
        let stashed = self.stash.load(Ordering::Acquire);
        if stashed != EMPTY {
            return Some(stashed);
        }

        let _exclusive = self
            .handoff
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let id = self.ids.pop()?;
        self.stash.store(id, Ordering::Release);
        Some(id)
    }

    /// Drops a peeked identifier that turned out to be stale.
    ///
    /// No-op if a consumer already took it.
    pub(crate) fn discard(&self, id: u64, _guard: &MutexGuard<'_, ()>) {
        let _ = self
            .stash
            .compare_exchange(id, EMPTY, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Empties the sequence, returning how many identifiers were dropped.
    pub(crate) fn clear(&self) -> usize {
        let _guard = self.lock_peek();
        let mut dropped = usize::from(self.stash.swap(EMPTY, Ordering::AcqRel) != EMPTY);
        while self.ids.pop().is_some() {
            dropped += 1;
        }
        dropped
    }

    /// Approximate number of identifiers, stale ones included.
    pub(crate) fn len(&self) -> usize {
        let stashed = usize::from(self.stash.load(Ordering::Relaxed) != EMPTY);
        self.ids.len() + stashed
    }
}
