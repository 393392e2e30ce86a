//! Memoized sub-resource slots.
//!
//! Each entity client owns one [`LazyResource`] per sub-resource. The slot is
//! empty until the first read, which runs the fetch closure; a successful value
//! is kept for the lifetime of the slot, a failed fetch leaves it empty so the
//! next read tries again. There is no expiry.
//!
//! Slots use a `RefCell` and are therefore single-threaded: entity clients are
//! `!Sync` and must not be shared across threads.

use std::cell::RefCell;
use std::fmt;

use crate::error::Result;

pub(crate) struct LazyResource<T> {
    slot: RefCell<Option<T>>,
}

impl<T> LazyResource<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: RefCell::new(None),
        }
    }

    pub(crate) fn is_cached(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Runs `read` against the cached value, fetching it first if needed.
    ///
    /// `read` only sees a borrow, so callers pick what leaves the cache.
    pub(crate) fn with<F, R>(&self, fetch: F, read: impl FnOnce(&T) -> R) -> Result<R>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(value) = self.slot.borrow().as_ref() {
            return Ok(read(value));
        }

        let value = fetch()?;
        let out = read(&value);
        *self.slot.borrow_mut() = Some(value);
        Ok(out)
    }
}

impl<T: Clone> LazyResource<T> {
    /// Returns a copy of the cached value, fetching it on first use.
    pub(crate) fn get_or_fetch<F>(&self, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.with(fetch, T::clone)
    }
}

impl<T> Default for LazyResource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for LazyResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyResource")
            .field("cached", &self.is_cached())
            .finish()
    }
}
