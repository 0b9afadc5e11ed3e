//! Queue Items and Payload Disposal
//!
//! An [`Item`] wraps a payload with the moment it stops being deliverable.
//! The caller supplies a wall-clock expiry once; it is converted to a
//! monotonic [`Instant`] right away so clock adjustments can't resurrect or
//! prematurely kill an item.
//!
//! ## Disposal
//!
//! Payloads that own resources (sockets, file handles, pooled buffers) can be
//! released when the queue drops them instead of handing them to a consumer.
//! Whether that happens is decided by two flags on each item:
//!
//! - `dispose_on_expiry`: release the payload if it is reclaimed after its deadline
//! - `dispose_on_flush`: release the payload if it is removed by a flush
//!
//! *How* a payload is released is decided by the queue's [`Disposer`]:
//! [`Retain`] just drops it, [`Released`] calls [`Release::release`].

use crate::error::{QueueError, ReleaseError, Result};
use std::time::{Duration, Instant, SystemTime};

/// A payload that owns a resource needing explicit release.
pub trait Release {
    /// Releases the payload's resources, consuming it.
    fn release(self) -> std::result::Result<(), ReleaseError>;
}

/// Strategy the queue uses to dispose of payloads it reclaims.
pub trait Disposer<T>: Send + Sync + 'static {
    /// Disposes of a payload the queue owns and will not deliver.
    fn dispose(&self, value: T) -> std::result::Result<(), ReleaseError>;
}

/// Disposer that simply drops payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Retain;

impl<T> Disposer<T> for Retain {
    #[inline]
    fn dispose(&self, value: T) -> std::result::Result<(), ReleaseError> {
        drop(value);
        Ok(())
    }
}

/// Disposer that calls [`Release::release`] on payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Released;

impl<T: Release> Disposer<T> for Released {
    #[inline]
    fn dispose(&self, value: T) -> std::result::Result<(), ReleaseError> {
        value.release()
    }
}

/// Why an entry left the queue without being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reclaim {
    Expired,
    Flushed,
}

/// A value with an absolute expiry deadline.
///
/// # Example
///
/// ```
/// use expiryq::Item;
/// use std::time::{Duration, SystemTime};
///
/// let item = Item::new("job-1", SystemTime::now() + Duration::from_secs(30))
///     .unwrap()
///     .dispose_on_flush(true);
///
/// assert!(!item.is_expired());
/// assert!(item.flush_disposes());
/// ```
#[derive(Debug, Clone)]
pub struct Item<T> {
    value: T,
    deadline: Instant,
    dispose_on_expiry: bool,
    dispose_on_flush: bool,
}

impl<T> Item<T> {
    /// Creates an item that expires at the given wall-clock time.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ItemAlreadyExpired`] unless `expires_at` is
    /// strictly in the future.
    pub fn new(value: T, expires_at: SystemTime) -> Result<Self> {
        match expires_at.duration_since(SystemTime::now()) {
            Ok(remaining) if !remaining.is_zero() => Ok(Self::at(value, Instant::now() + remaining)),
            _ => Err(QueueError::ItemAlreadyExpired),
        }
    }

    /// Creates an item that expires after `ttl`.
    pub fn with_ttl(value: T, ttl: Duration) -> Result<Self> {
        if ttl.is_zero() {
            return Err(QueueError::ItemAlreadyExpired);
        }
        Ok(Self::at(value, Instant::now() + ttl))
    }

    fn at(value: T, deadline: Instant) -> Self {
        Self {
            value,
            deadline,
            dispose_on_expiry: false,
            dispose_on_flush: false,
        }
    }

    /// Sets whether the payload is released when reclaimed after expiry.
    #[must_use]
    pub fn dispose_on_expiry(mut self, enabled: bool) -> Self {
        self.dispose_on_expiry = enabled;
        self
    }

    /// Sets whether the payload is released when removed by a flush.
    #[must_use]
    pub fn dispose_on_flush(mut self, enabled: bool) -> Self {
        self.dispose_on_flush = enabled;
        self
    }

    /// Borrows the payload.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Unwraps the payload without releasing it.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Monotonic instant after which the item is no longer deliverable.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether the payload is released when the item expires.
    pub fn expiry_disposes(&self) -> bool {
        self.dispose_on_expiry
    }

    /// Whether the payload is released when the queue is flushed.
    pub fn flush_disposes(&self) -> bool {
        self.dispose_on_flush
    }

    /// Checks if this item has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Hands the payload to `disposer` if this reclaim reason calls for it,
    /// otherwise drops it.
    ///
    /// A flushed item that has genuinely expired is also released when it is
    /// flagged for expiry disposal.
    pub(crate) fn reclaim<D: Disposer<T>>(
        self,
        reason: Reclaim,
        disposer: &D,
    ) -> std::result::Result<bool, ReleaseError> {
        let release = match reason {
            Reclaim::Expired => self.dispose_on_expiry,
            Reclaim::Flushed => {
                self.dispose_on_flush || (self.dispose_on_expiry && self.is_expired())
            }
        };

        if release {
            disposer.dispose(self.value)?;
        }
        Ok(release)
    }
}
