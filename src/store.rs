// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The storage interface consumed by the range pools
//!
//! A [`RangeStore`] is a handle to an open transaction: every method runs
//! inside it, and none of them commit.  The pools perform read-then-write
//! sequences (merge, split, coalesce) through this interface, so the
//! implementation must keep concurrent transactions on the same key from
//! observing each other's intermediate state.  [`crate::db::PoolTxn`] does
//! this by running every transaction under SQLite's reserved lock.
//!
//! Values are passed as 128-bit ordinals (see [`crate::pool::PoolValue`]),
//! which keeps the store independent of the value type.

use crate::error::CreateResult;
use crate::error::DeleteResult;
use crate::error::Error;
use crate::error::ListResultVec;
use crate::error::LookupResult;
use crate::error::UpdateResult;
use std::fmt;

/// Separates address pools from integer pools that happen to share a key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PoolKind {
    Address,
    Integer,
}

impl PoolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolKind::Address => "ip_address",
            PoolKind::Integer => "integer",
        }
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted free range, bounds inclusive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StoredRange {
    /// Surrogate row id used by the update/delete operations.
    pub id: i64,
    pub start: u128,
    pub end: u128,
}

impl StoredRange {
    pub fn contains(&self, ordinal: u128) -> bool {
        self.start <= ordinal && ordinal <= self.end
    }

    pub fn len(&self) -> u128 {
        // A full 128-bit range does not fit; saturate rather than wrap.
        (self.end - self.start).saturating_add(1)
    }
}

pub trait RangeStore {
    fn insert_range(
        &mut self,
        kind: PoolKind,
        key: &str,
        start: u128,
        end: u128,
    ) -> CreateResult<()>;

    fn query_ranges(
        &mut self,
        kind: PoolKind,
        key: &str,
    ) -> ListResultVec<StoredRange>;

    /// Returns the ranges for `key` sharing at least one value with
    /// `start..=end`.
    fn query_ranges_overlapping(
        &mut self,
        kind: PoolKind,
        key: &str,
        start: u128,
        end: u128,
    ) -> ListResultVec<StoredRange>;

    fn update_range_bounds(
        &mut self,
        range_id: i64,
        start: u128,
        end: u128,
    ) -> UpdateResult<()>;

    fn delete_range(&mut self, range_id: i64) -> DeleteResult;

    /// Deletes every range for `key` sharing at least one value with
    /// `start..=end`, returning how many were deleted.
    fn delete_ranges_overlapping(
        &mut self,
        kind: PoolKind,
        key: &str,
        start: u128,
        end: u128,
    ) -> Result<usize, Error>;

    /// Fails with [`Error::ObjectAlreadyExists`] if `id` already has an
    /// owner under `key`.
    fn insert_owner(&mut self, key: &str, id: i64, owner: &str)
        -> CreateResult<()>;

    /// Fails with [`Error::ObjectNotFound`] if `id` has no owner.
    fn query_owner(&mut self, key: &str, id: i64) -> LookupResult<String>;

    /// Returns the owned ids in `start..=end`, ascending.
    fn query_owners_overlapping(
        &mut self,
        key: &str,
        start: i64,
        end: i64,
    ) -> ListResultVec<i64>;

    fn delete_owner(&mut self, key: &str, id: i64) -> Result<usize, Error>;

    fn delete_owners(&mut self, key: &str) -> Result<usize, Error>;
}
