//! Read-cache invalidation hook.
//!
//! The read cache itself lives outside this crate. After a drain pass that
//! applied at least one mutation, the engine calls
//! [`CacheInvalidator::invalidate_all`] exactly once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Marks cached reads stale.
pub trait CacheInvalidator: Send + Sync {
    /// Marks every cached read stale.
    fn invalidate_all(&self);
}

impl<T: CacheInvalidator + ?Sized> CacheInvalidator for Arc<T> {
    fn invalidate_all(&self) {
        (**self).invalidate_all();
    }
}

/// Invalidator that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate_all(&self) {}
}

/// Invalidator backed by a closure.
pub struct FnInvalidator<F>(F);

impl<F> FnInvalidator<F>
where
    F: Fn() + Send + Sync,
{
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> CacheInvalidator for FnInvalidator<F>
where
    F: Fn() + Send + Sync,
{
    fn invalidate_all(&self) {
        (self.0)();
    }
}

impl<F> std::fmt::Debug for FnInvalidator<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnInvalidator").finish_non_exhaustive()
    }
}

/// Monotonic cache epoch.
///
/// A read cache records the generation it fetched under and treats any
/// entry older than [`GenerationInvalidator::generation`] as stale.
#[derive(Debug, Default)]
pub struct GenerationInvalidator {
    generation: AtomicU64,
}

impl GenerationInvalidator {
    /// Creates an invalidator at generation zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl CacheInvalidator for GenerationInvalidator {
    fn invalidate_all(&self) {
        let next = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(generation = next, "invalidated read cache");
    }
}
