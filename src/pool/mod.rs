// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interval allocator over key-scoped pools of free ranges
//!
//! A pool is the set of free ranges stored under one key.  Stored ranges for
//! a key are always pairwise disjoint and never adjacent: every operation
//! that grows a range coalesces it with its neighbours.  Allocating takes
//! the lowest value of one free range; reserving a value trims or splits the
//! range holding it.
//!
//! When a key has several disjoint ranges, which one [`RangePool::allocate`]
//! draws from is unspecified.  Callers must not assume lowest-value-first.

pub mod owned;
mod value;

pub use value::PoolRange;
pub use value::PoolValue;

use crate::error::CreateResult;
use crate::error::DeleteResult;
use crate::error::Error;
use crate::error::ListResultVec;
use crate::error::LookupResult;
use crate::error::ResourceType;
use crate::error::UpdateResult;
use crate::store::RangeStore;
use slog::debug;
use slog::info;
use slog::o;
use slog::Logger;
use std::marker::PhantomData;

/// Allocator for pools of `T`.
///
/// Holds no state of its own: every call reads and writes through the
/// transaction handle it is given.
pub struct RangePool<T> {
    log: Logger,
    _value: PhantomData<fn() -> T>,
}

impl<T: PoolValue> RangePool<T> {
    pub fn new(log: &Logger) -> Self {
        let log = log.new(o!(
            "component" => "RangePool",
            "kind" => T::KIND.as_str(),
        ));
        RangePool { log, _value: PhantomData }
    }

    /// Adds `range` to the pool for `key`, merging it with every stored
    /// range that overlaps or touches it.  Returns the merged range.
    pub fn create_pool<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
        range: PoolRange<T>,
    ) -> CreateResult<PoolRange<T>> {
        self.create_pool_excluding(store, key, range, &[])
    }

    /// Like [`RangePool::create_pool`], but leaves the ordinals in `holes`
    /// (ascending) out of the stored ranges.
    pub(crate) fn create_pool_excluding<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
        range: PoolRange<T>,
        holes: &[u128],
    ) -> CreateResult<PoolRange<T>> {
        let (start, end) = range.ordinals();
        let neighbours = store.query_ranges_overlapping(
            T::KIND,
            key,
            start.saturating_sub(1),
            end.saturating_add(1),
        )?;
        // Ordinals of different domains can be adjacent (the last IPv4
        // address sits right below ::1:0:0:0), but never overlap.
        let mut absorbed = Vec::with_capacity(neighbours.len());
        for r in neighbours {
            if self.same_domain_as(r.start, &range.start())? {
                absorbed.push(r);
            }
        }
        let merged_start =
            absorbed.iter().map(|r| r.start).fold(start, u128::min);
        let merged_end = absorbed.iter().map(|r| r.end).fold(end, u128::max);
        let merged = PoolRange::from_ordinals(merged_start, merged_end)?;

        for r in &absorbed {
            store.delete_range(r.id)?;
        }

        let mut next = Some(merged_start);
        for &hole in holes {
            let Some(n) = next else { break };
            if hole > merged_end {
                break;
            }
            if hole > n {
                store.insert_range(T::KIND, key, n, hole - 1)?;
            }
            if hole >= n {
                next = hole.checked_add(1);
            }
        }
        if let Some(n) = next {
            if n <= merged_end {
                store.insert_range(T::KIND, key, n, merged_end)?;
            }
        }

        info!(self.log, "created pool";
            "key" => key,
            "range" => %range,
            "merged" => %merged,
            "absorbed" => absorbed.len(),
            "excluded" => holes.len());
        Ok(merged)
    }

    /// Returns the free ranges for `key`.  The order is stable within one
    /// call and otherwise unspecified.
    pub fn get_pools<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
    ) -> ListResultVec<PoolRange<T>> {
        store
            .query_ranges(T::KIND, key)?
            .iter()
            .map(PoolRange::try_from)
            .collect()
    }

    /// Returns the number of free values for `key`.
    pub fn size_pool<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
    ) -> LookupResult<u128> {
        Ok(store
            .query_ranges(T::KIND, key)?
            .iter()
            .fold(0u128, |total, r| total.saturating_add(r.len())))
    }

    /// Returns whether `value` is inside one of the free ranges for `key`.
    pub fn is_free<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
        value: T,
    ) -> LookupResult<bool> {
        let ordinal = value.to_ordinal();
        Ok(!store
            .query_ranges_overlapping(T::KIND, key, ordinal, ordinal)?
            .is_empty())
    }

    /// Takes the next available value from the pool for `key`.
    ///
    /// Fails with [`Error::ObjectNotFound`] when the key has no free range
    /// left (never created, deleted, or exhausted).
    pub fn allocate<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
    ) -> CreateResult<T> {
        let ranges = store.query_ranges(T::KIND, key)?;
        let range = ranges.first().ok_or_else(|| {
            Error::not_found_by_key(ResourceType::RangePool, key)
        })?;
        let value = T::from_ordinal(range.start)?;
        if range.start == range.end {
            store.delete_range(range.id)?;
        } else {
            store.update_range_bounds(range.id, range.start + 1, range.end)?;
        }
        debug!(self.log, "allocated"; "key" => key, "value" => %value);
        Ok(value)
    }

    /// Takes the highest value of the highest free range for `key`.
    ///
    /// Fails like [`RangePool::allocate`] when nothing is left.
    pub fn allocate_from_end<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
    ) -> CreateResult<T> {
        let ranges = store.query_ranges(T::KIND, key)?;
        let range = ranges.iter().max_by_key(|r| r.start).ok_or_else(|| {
            Error::not_found_by_key(ResourceType::RangePool, key)
        })?;
        let value = T::from_ordinal(range.end)?;
        if range.start == range.end {
            store.delete_range(range.id)?;
        } else {
            store.update_range_bounds(range.id, range.start, range.end - 1)?;
        }
        debug!(self.log, "allocated from end"; "key" => key, "value" => %value);
        Ok(value)
    }

    /// Returns `value` to the pool for `key`.
    ///
    /// Freeing a value that is already free does nothing.  A value with free
    /// neighbours on both sides joins the two ranges into one.
    pub fn deallocate<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
        value: T,
    ) -> DeleteResult {
        let ordinal = value.to_ordinal();
        let neighbours = store.query_ranges_overlapping(
            T::KIND,
            key,
            ordinal.saturating_sub(1),
            ordinal.saturating_add(1),
        )?;
        if neighbours.iter().any(|r| r.contains(ordinal)) {
            debug!(self.log, "already free"; "key" => key, "value" => %value);
            return Ok(());
        }

        let mut below = None;
        let mut above = None;
        for r in &neighbours {
            if ordinal.checked_sub(1) == Some(r.end)
                && self.same_domain_as(r.end, &value)?
            {
                below = Some(r);
            }
            if ordinal.checked_add(1) == Some(r.start)
                && self.same_domain_as(r.start, &value)?
            {
                above = Some(r);
            }
        }
        match (below, above) {
            (Some(below), Some(above)) => {
                store.update_range_bounds(below.id, below.start, above.end)?;
                store.delete_range(above.id)?;
            }
            (Some(below), None) => {
                store.update_range_bounds(below.id, below.start, ordinal)?;
            }
            (None, Some(above)) => {
                store.update_range_bounds(above.id, ordinal, above.end)?;
            }
            (None, None) => {
                store.insert_range(T::KIND, key, ordinal, ordinal)?;
            }
        }
        debug!(self.log, "deallocated"; "key" => key, "value" => %value);
        Ok(())
    }

    /// Reserves the specific `value` in the pool for `key`.
    ///
    /// Fails with [`Error::Conflict`] if `value` is not free, i.e. it is
    /// already allocated or outside every configured range.
    pub fn set<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
        value: T,
    ) -> UpdateResult<()> {
        let ordinal = value.to_ordinal();
        let ranges =
            store.query_ranges_overlapping(T::KIND, key, ordinal, ordinal)?;
        let range = ranges.first().ok_or_else(|| {
            Error::conflict(&format!(
                "{} is not available in pool \"{}\"",
                value, key
            ))
        })?;

        match (ordinal == range.start, ordinal == range.end) {
            (true, true) => store.delete_range(range.id)?,
            (true, false) => {
                store.update_range_bounds(range.id, ordinal + 1, range.end)?
            }
            (false, true) => {
                store.update_range_bounds(range.id, range.start, ordinal - 1)?
            }
            (false, false) => {
                store.update_range_bounds(range.id, range.start, ordinal - 1)?;
                store.insert_range(T::KIND, key, ordinal + 1, range.end)?;
            }
        }
        debug!(self.log, "reserved"; "key" => key, "value" => %value);
        Ok(())
    }

    fn same_domain_as(&self, ordinal: u128, value: &T) -> Result<bool, Error> {
        Ok(T::from_ordinal(ordinal)?.same_domain(value))
    }

    /// Deletes every range for `key` that overlaps `range` at all, whole.
    /// Returns how many ranges were deleted.
    pub fn delete_pools<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
        range: PoolRange<T>,
    ) -> Result<usize, Error> {
        let (start, end) = range.ordinals();
        let deleted =
            store.delete_ranges_overlapping(T::KIND, key, start, end)?;
        info!(self.log, "deleted pools";
            "key" => key, "range" => %range, "count" => deleted);
        Ok(deleted)
    }

    /// Deletes every range for `key`.  Returns how many were deleted.
    pub fn delete_all<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
    ) -> Result<usize, Error> {
        let deleted =
            store.delete_ranges_overlapping(T::KIND, key, 0, u128::MAX)?;
        info!(self.log, "deleted all pools"; "key" => key, "count" => deleted);
        Ok(deleted)
    }
}
