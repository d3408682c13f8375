// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SQLite-backed implementation of [`RangeStore`]
//!
//! [`Db::transaction`] runs a closure inside `BEGIN IMMEDIATE`.  SQLite grants
//! the reserved lock to one connection at a time, so two transactions that
//! could both write pool state never interleave: the read-then-write
//! sequences of the pools see a serial history.  Another writer waiting for
//! the lock gives up after the configured busy timeout with a retryable
//! [`Error::ServiceUnavailable`].  Returning an error from the closure rolls
//! the whole transaction back.

pub mod error;
mod models;
mod schema;

use crate::config::DatabaseConfig;
use crate::error::CreateResult;
use crate::error::DeleteResult;
use crate::error::Error;
use crate::error::ListResultVec;
use crate::error::LookupResult;
use crate::error::LookupType;
use crate::error::ResourceType;
use crate::error::UpdateResult;
use crate::store::PoolKind;
use crate::store::RangeStore;
use crate::store::StoredRange;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::SqliteConnection;
use error::public_error_from_diesel;
use error::ErrorHandler;
use models::ordinal_to_sql;
use models::IntOwner;
use models::NewPoolRange;
use models::PoolRange;
use slog::debug;
use slog::info;
use slog::o;
use slog::trace;
use slog::Logger;

const SCHEMA: &str = include_str!("./schema.sql");

pub struct Db {
    log: Logger,
    conn: SqliteConnection,
}

impl Db {
    pub fn open(
        log: &Logger,
        path: &str,
        busy_timeout_ms: u32,
    ) -> Result<Db, Error> {
        let log = log.new(o!("component" => "PoolDb"));
        info!(log, "opening database {:?}", path);
        let mut c = SqliteConnection::establish(path).map_err(|err| {
            Error::unavail(&format!(
                "Failed to open db connection to {}: {}",
                path, err
            ))
        })?;

        c.batch_execute(&format!(
            "PRAGMA foreign_keys = ON; \
             PRAGMA journal_mode = WAL; \
             PRAGMA busy_timeout = {};",
            busy_timeout_ms
        ))?;

        // Create tables
        c.batch_execute(SCHEMA)?;

        Ok(Db { log, conn: c })
    }

    pub fn from_config(
        log: &Logger,
        config: &DatabaseConfig,
    ) -> Result<Db, Error> {
        Self::open(log, &config.path, config.busy_timeout_ms)
    }

    /// Runs `f` inside one immediate transaction.
    ///
    /// The transaction commits if `f` returns `Ok` and rolls back otherwise.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut PoolTxn<'_>) -> Result<T, Error>,
    {
        let log = &self.log;
        self.conn
            .immediate_transaction(|conn| {
                let mut txn = PoolTxn { log, conn };
                f(&mut txn)
            })
            .map_err(|e| {
                debug!(log, "transaction rolled back"; "error" => %e);
                e
            })
    }
}

/// A [`RangeStore`] bound to an open transaction.
pub struct PoolTxn<'a> {
    log: &'a Logger,
    conn: &'a mut SqliteConnection,
}

fn range_lookup(range_id: i64) -> LookupType {
    LookupType::ByCompositeId(format!("range {}", range_id))
}

fn owner_lookup(key: &str, id: i64) -> LookupType {
    LookupType::ByCompositeId(format!("{}/{}", key, id))
}

impl RangeStore for PoolTxn<'_> {
    fn insert_range(
        &mut self,
        kind: PoolKind,
        key: &str,
        start: u128,
        end: u128,
    ) -> CreateResult<()> {
        use schema::pool_range::dsl;
        trace!(self.log, "insert range";
            "kind" => %kind, "key" => key, "start" => start, "end" => end);
        if start > end {
            return Err(Error::internal_error(&format!(
                "refusing to store inverted range {}-{}",
                start, end
            )));
        }
        diesel::insert_into(dsl::pool_range)
            .values(NewPoolRange {
                pool_key: key,
                kind: kind.as_str(),
                range_start: ordinal_to_sql(start),
                range_end: ordinal_to_sql(end),
            })
            .execute(self.conn)
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        Ok(())
    }

    fn query_ranges(
        &mut self,
        kind: PoolKind,
        key: &str,
    ) -> ListResultVec<StoredRange> {
        use schema::pool_range::dsl;
        dsl::pool_range
            .filter(dsl::kind.eq(kind.as_str()))
            .filter(dsl::pool_key.eq(key))
            .order(dsl::range_start.asc())
            .select(PoolRange::as_select())
            .load::<PoolRange>(self.conn)
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?
            .into_iter()
            .map(StoredRange::try_from)
            .collect()
    }

    fn query_ranges_overlapping(
        &mut self,
        kind: PoolKind,
        key: &str,
        start: u128,
        end: u128,
    ) -> ListResultVec<StoredRange> {
        use schema::pool_range::dsl;
        dsl::pool_range
            .filter(dsl::kind.eq(kind.as_str()))
            .filter(dsl::pool_key.eq(key))
            .filter(dsl::range_start.le(ordinal_to_sql(end)))
            .filter(dsl::range_end.ge(ordinal_to_sql(start)))
            .order(dsl::range_start.asc())
            .select(PoolRange::as_select())
            .load::<PoolRange>(self.conn)
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?
            .into_iter()
            .map(StoredRange::try_from)
            .collect()
    }

    fn update_range_bounds(
        &mut self,
        range_id: i64,
        start: u128,
        end: u128,
    ) -> UpdateResult<()> {
        use schema::pool_range::dsl;
        trace!(self.log, "update range";
            "id" => range_id, "start" => start, "end" => end);
        let updated = diesel::update(dsl::pool_range.find(range_id))
            .set((
                dsl::range_start.eq(ordinal_to_sql(start)),
                dsl::range_end.eq(ordinal_to_sql(end)),
            ))
            .execute(self.conn)
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        if updated == 0 {
            return Err(range_lookup(range_id)
                .into_not_found(ResourceType::RangePool));
        }
        Ok(())
    }

    fn delete_range(&mut self, range_id: i64) -> DeleteResult {
        use schema::pool_range::dsl;
        trace!(self.log, "delete range"; "id" => range_id);
        let deleted = diesel::delete(dsl::pool_range.find(range_id))
            .execute(self.conn)
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))?;
        if deleted == 0 {
            return Err(range_lookup(range_id)
                .into_not_found(ResourceType::RangePool));
        }
        Ok(())
    }

    fn delete_ranges_overlapping(
        &mut self,
        kind: PoolKind,
        key: &str,
        start: u128,
        end: u128,
    ) -> Result<usize, Error> {
        use schema::pool_range::dsl;
        trace!(self.log, "delete overlapping ranges";
            "kind" => %kind, "key" => key, "start" => start, "end" => end);
        diesel::delete(
            dsl::pool_range
                .filter(dsl::kind.eq(kind.as_str()))
                .filter(dsl::pool_key.eq(key))
                .filter(dsl::range_start.le(ordinal_to_sql(end)))
                .filter(dsl::range_end.ge(ordinal_to_sql(start))),
        )
        .execute(self.conn)
        .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))
    }

    fn insert_owner(
        &mut self,
        key: &str,
        id: i64,
        owner: &str,
    ) -> CreateResult<()> {
        use schema::int_owner::dsl;
        let object_name = format!("{}/{}", key, id);
        diesel::insert_into(dsl::int_owner)
            .values(IntOwner {
                pool_key: key.to_string(),
                id,
                owner: owner.to_string(),
            })
            .execute(self.conn)
            .map_err(|e| {
                public_error_from_diesel(
                    e,
                    ErrorHandler::Conflict(
                        ResourceType::PoolOwner,
                        &object_name,
                    ),
                )
            })?;
        Ok(())
    }

    fn query_owner(&mut self, key: &str, id: i64) -> LookupResult<String> {
        use schema::int_owner::dsl;
        dsl::int_owner
            .filter(dsl::pool_key.eq(key))
            .filter(dsl::id.eq(id))
            .select(dsl::owner)
            .first::<String>(self.conn)
            .map_err(|e| {
                public_error_from_diesel(
                    e,
                    ErrorHandler::NotFound(
                        ResourceType::PoolOwner,
                        owner_lookup(key, id),
                    ),
                )
            })
    }

    fn query_owners_overlapping(
        &mut self,
        key: &str,
        start: i64,
        end: i64,
    ) -> ListResultVec<i64> {
        use schema::int_owner::dsl;
        dsl::int_owner
            .filter(dsl::pool_key.eq(key))
            .filter(dsl::id.between(start, end))
            .order(dsl::id.asc())
            .select(dsl::id)
            .load::<i64>(self.conn)
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))
    }

    fn delete_owner(&mut self, key: &str, id: i64) -> Result<usize, Error> {
        use schema::int_owner::dsl;
        diesel::delete(
            dsl::int_owner.filter(dsl::pool_key.eq(key)).filter(dsl::id.eq(id)),
        )
        .execute(self.conn)
        .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))
    }

    fn delete_owners(&mut self, key: &str) -> Result<usize, Error> {
        use schema::int_owner::dsl;
        diesel::delete(dsl::int_owner.filter(dsl::pool_key.eq(key)))
            .execute(self.conn)
            .map_err(|e| public_error_from_diesel(e, ErrorHandler::Server))
    }
}
