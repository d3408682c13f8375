// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integer pools that remember who holds each allocated id

use super::PoolRange;
use super::PoolValue;
use super::RangePool;
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

/// An integer [`RangePool`] plus an owner record for every allocated id.
///
/// An id is either inside a free range or has exactly one owner, never both.
pub struct OwnedIntPool {
    log: Logger,
    ranges: RangePool<i64>,
}

impl OwnedIntPool {
    pub fn new(log: &Logger) -> Self {
        let log = log.new(o!("component" => "OwnedIntPool"));
        let ranges = RangePool::new(&log);
        OwnedIntPool { log, ranges }
    }

    /// Adds `range` to the pool for `key`.
    ///
    /// Unlike the plain pool, creating a range that is already stored
    /// verbatim fails with [`Error::ObjectAlreadyExists`].  Ids that are
    /// owned inside the merged span stay allocated.
    pub fn create_pool<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
        range: PoolRange<i64>,
    ) -> CreateResult<PoolRange<i64>> {
        let (start, end) = range.ordinals();
        let existing = store.query_ranges_overlapping(
            i64::KIND,
            key,
            start.saturating_sub(1),
            end.saturating_add(1),
        )?;
        if existing.iter().any(|r| r.start == start && r.end == end) {
            return Err(Error::ObjectAlreadyExists {
                type_name: ResourceType::RangePool,
                object_name: format!("{}:{}", key, range),
            });
        }

        // The merged span is at most the union of the new range and every
        // range it touches.
        let span_start =
            existing.iter().map(|r| r.start).fold(start, u128::min);
        let span_end = existing.iter().map(|r| r.end).fold(end, u128::max);
        let span = PoolRange::<i64>::from_ordinals(span_start, span_end)?;
        let holes: Vec<u128> = store
            .query_owners_overlapping(key, span.start(), span.end())?
            .iter()
            .map(|id| id.to_ordinal())
            .collect();
        self.ranges.create_pool_excluding(store, key, range, &holes)
    }

    pub fn get_pools<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
    ) -> ListResultVec<PoolRange<i64>> {
        self.ranges.get_pools(store, key)
    }

    pub fn size_pool<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
    ) -> LookupResult<u128> {
        self.ranges.size_pool(store, key)
    }

    /// Allocates an id from the pool for `key` and records `owner` for it.
    /// Nothing is taken when `owner` is empty.
    pub fn allocate<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
        owner: &str,
    ) -> CreateResult<i64> {
        check_owner(key, owner)?;
        let id = self.ranges.allocate(store, key)?;
        store.insert_owner(key, id, owner)?;
        debug!(self.log, "allocated";
            "key" => key, "id" => id, "owner" => owner);
        Ok(id)
    }

    /// Frees `id` and drops its owner record.  Freeing a free id is a no-op.
    pub fn deallocate<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
        id: i64,
    ) -> DeleteResult {
        self.ranges.deallocate(store, key, id)?;
        let removed = store.delete_owner(key, id)?;
        debug!(self.log, "deallocated";
            "key" => key, "id" => id, "owners_removed" => removed);
        Ok(())
    }

    /// Reserves `id` for `owner`.
    ///
    /// Repeating a reservation with the same owner succeeds without changes.
    /// An id held by someone else is a [`Error::Conflict`].
    pub fn set<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
        id: i64,
        owner: &str,
    ) -> UpdateResult<()> {
        check_owner(key, owner)?;
        match store.query_owner(key, id) {
            Ok(current) if current == owner => {
                debug!(self.log, "already reserved";
                    "key" => key, "id" => id, "owner" => owner);
                return Ok(());
            }
            Ok(current) => {
                return Err(Error::conflict(&format!(
                    "id {} in pool \"{}\" is owned by \"{}\"",
                    id, key, current
                )));
            }
            Err(e) if e.is_not_found() => (),
            Err(e) => return Err(e),
        }
        self.ranges.set(store, key, id)?;
        store.insert_owner(key, id, owner)?;
        debug!(self.log, "reserved";
            "key" => key, "id" => id, "owner" => owner);
        Ok(())
    }

    /// Returns the owner of `id`, or [`Error::ObjectNotFound`] if it has
    /// none.
    pub fn get_owner<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
        id: i64,
    ) -> LookupResult<String> {
        store.query_owner(key, id)
    }

    pub fn delete_pools<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
        range: PoolRange<i64>,
    ) -> Result<usize, Error> {
        self.ranges.delete_pools(store, key, range)
    }

    /// Deletes every range and every owner record for `key`.
    pub fn delete_pool<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        key: &str,
    ) -> Result<usize, Error> {
        let ranges = self.ranges.delete_all(store, key)?;
        let owners = store.delete_owners(key)?;
        info!(self.log, "deleted pool";
            "key" => key, "ranges" => ranges, "owners" => owners);
        Ok(ranges)
    }
}

fn check_owner(key: &str, owner: &str) -> Result<(), Error> {
    if owner.is_empty() {
        return Err(Error::invalid_request(&format!(
            "owner for pool \"{}\" must not be empty",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::Db;
    use crate::dev::test_setup_database;
    use crate::dev::test_setup_log;
    use crate::pool::test::assert_coalesced;
    use assert_matches::assert_matches;

    fn range(start: i64, end: i64) -> PoolRange<i64> {
        PoolRange::new(start, end).unwrap()
    }

    fn setup(name: &str) -> (crate::dev::LogContext, Db, OwnedIntPool) {
        let logctx = test_setup_log(name);
        let db = test_setup_database(&logctx.log);
        let pool = OwnedIntPool::new(&logctx.log);
        (logctx, db, pool)
    }

    #[test]
    fn test_reserve_splits_and_records_owner() {
        let (logctx, mut db, pool) =
            setup("test_reserve_splits_and_records_owner");

        db.transaction(|txn| {
            pool.create_pool(txn, "vxlan", range(1, 4094))?;
            pool.set(txn, "vxlan", 100, "x")?;
            let mut pools = pool.get_pools(txn, "vxlan")?;
            pools.sort_by_key(|r| r.start());
            assert_eq!(pools, vec![range(1, 99), range(101, 4094)]);
            assert_eq!(pool.get_owner(txn, "vxlan", 100)?, "x");
            assert_eq!(pool.size_pool(txn, "vxlan")?, 4093);

            // Same owner again: nothing changes.
            pool.set(txn, "vxlan", 100, "x")?;
            assert_eq!(pool.size_pool(txn, "vxlan")?, 4093);

            assert_matches!(
                pool.set(txn, "vxlan", 100, "y"),
                Err(Error::Conflict { .. })
            );
            assert_matches!(
                pool.set(txn, "vxlan", 101, ""),
                Err(Error::InvalidRequest { .. })
            );
            // Outside every range.
            assert_matches!(
                pool.set(txn, "vxlan", 5000, "x"),
                Err(Error::Conflict { .. })
            );
            Ok(())
        })
        .unwrap();
        logctx.cleanup_successful();
    }

    #[test]
    fn test_allocate_and_deallocate_track_owner() {
        let (logctx, mut db, pool) =
            setup("test_allocate_and_deallocate_track_owner");

        db.transaction(|txn| {
            pool.create_pool(txn, "k", range(7, 8))?;
            let a = pool.allocate(txn, "k", "vn-a")?;
            let b = pool.allocate(txn, "k", "vn-b")?;
            assert_ne!(a, b);
            assert_eq!(pool.get_owner(txn, "k", a)?, "vn-a");
            assert_eq!(pool.get_owner(txn, "k", b)?, "vn-b");
            let error = pool.allocate(txn, "k", "vn-c").unwrap_err();
            assert!(error.is_not_found());

            // An empty owner is refused before anything is taken.
            pool.deallocate(txn, "k", b)?;
            assert_matches!(
                pool.allocate(txn, "k", ""),
                Err(Error::InvalidRequest { .. })
            );
            assert_eq!(pool.size_pool(txn, "k")?, 1);
            assert!(pool.get_owner(txn, "k", b).unwrap_err().is_not_found());
            assert_eq!(pool.allocate(txn, "k", "vn-b")?, b);

            pool.deallocate(txn, "k", a)?;
            assert!(pool.get_owner(txn, "k", a).unwrap_err().is_not_found());
            // Freeing again is fine.
            pool.deallocate(txn, "k", a)?;
            assert_eq!(pool.size_pool(txn, "k")?, 1);

            // The freed id can be reserved by someone else now.
            pool.set(txn, "k", a, "vn-c")?;
            assert_eq!(pool.get_owner(txn, "k", a)?, "vn-c");
            Ok(())
        })
        .unwrap();
        logctx.cleanup_successful();
    }

    #[test]
    fn test_create_duplicate_range() {
        let (logctx, mut db, pool) = setup("test_create_duplicate_range");

        let error = db
            .transaction(|txn| {
                pool.create_pool(txn, "k", range(1, 10))?;
                pool.create_pool(txn, "k", range(1, 10))
            })
            .unwrap_err();
        assert_matches!(
            error,
            Error::ObjectAlreadyExists {
                type_name: ResourceType::RangePool,
                ..
            }
        );

        // A merely overlapping range still merges.
        db.transaction(|txn| {
            pool.create_pool(txn, "k", range(1, 10))?;
            let merged = pool.create_pool(txn, "k", range(5, 20))?;
            assert_eq!(merged, range(1, 20));
            Ok(())
        })
        .unwrap();
        logctx.cleanup_successful();
    }

    #[test]
    fn test_recreate_keeps_owned_ids_allocated() {
        let (logctx, mut db, pool) =
            setup("test_recreate_keeps_owned_ids_allocated");

        db.transaction(|txn| {
            pool.create_pool(txn, "k", range(1, 10))?;
            pool.set(txn, "k", 3, "a")?;
            pool.set(txn, "k", 4, "b")?;
            pool.set(txn, "k", 10, "c")?;

            // Re-adding a covering range must not free the owned ids.
            pool.create_pool(txn, "k", range(0, 12))?;
            let mut pools = pool.get_pools(txn, "k")?;
            pools.sort_by_key(|r| r.start());
            assert_coalesced(&pools);
            assert_eq!(pools, vec![range(0, 2), range(5, 9), range(11, 12)]);
            for id in [3, 4, 10] {
                assert!(pool.get_owner(txn, "k", id).is_ok());
            }
            Ok(())
        })
        .unwrap();
        logctx.cleanup_successful();
    }

    #[test]
    fn test_delete_pool_drops_owners() {
        let (logctx, mut db, pool) = setup("test_delete_pool_drops_owners");

        db.transaction(|txn| {
            pool.create_pool(txn, "k", range(1, 10))?;
            pool.create_pool(txn, "k", range(20, 30))?;
            pool.set(txn, "k", 5, "a")?;
            pool.create_pool(txn, "other", range(1, 1))?;

            assert_eq!(pool.delete_pool(txn, "k")?, 3);
            assert!(pool.get_pools(txn, "k")?.is_empty());
            assert!(pool.get_owner(txn, "k", 5).unwrap_err().is_not_found());
            assert_eq!(pool.size_pool(txn, "other")?, 1);

            // The id is reusable after the pool comes back.
            pool.create_pool(txn, "k", range(1, 10))?;
            pool.set(txn, "k", 5, "b")?;
            Ok(())
        })
        .unwrap();
        logctx.cleanup_successful();
    }

    #[test]
    fn test_failed_set_rolls_back() {
        let (logctx, mut db, pool) = setup("test_failed_set_rolls_back");

        db.transaction(|txn| pool.create_pool(txn, "k", range(1, 3)))
            .unwrap();
        let error = db
            .transaction(|txn| {
                pool.set(txn, "k", 2, "a")?;
                pool.set(txn, "k", 2, "b")
            })
            .unwrap_err();
        assert_matches!(error, Error::Conflict { .. });

        db.transaction(|txn| {
            assert_eq!(pool.size_pool(txn, "k")?, 3);
            assert!(pool.get_owner(txn, "k", 2).unwrap_err().is_not_found());
            Ok(())
        })
        .unwrap();
        logctx.cleanup_successful();
    }
}
