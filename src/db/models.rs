// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! DB models

use super::schema::*;
use crate::error::Error;
use crate::store::StoredRange;
use diesel::prelude::*;

// The width of a stored ordinal
pub const ORDINAL_LEN: usize = 16;

/// A row of `pool_range`, as read back from the database.
#[derive(Clone, Debug, Queryable, Selectable)]
#[diesel(table_name = pool_range)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PoolRange {
    pub id: i64,
    pub pool_key: String,
    pub kind: String,
    pub range_start: Vec<u8>,
    pub range_end: Vec<u8>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = pool_range)]
pub struct NewPoolRange<'a> {
    pub pool_key: &'a str,
    pub kind: &'a str,
    pub range_start: Vec<u8>,
    pub range_end: Vec<u8>,
}

/// Records which caller owns an allocated integer id.
#[derive(Clone, Debug, Queryable, Insertable, Selectable)]
#[diesel(table_name = int_owner)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct IntOwner {
    pub pool_key: String,
    pub id: i64,
    pub owner: String,
}

pub fn ordinal_to_sql(ordinal: u128) -> Vec<u8> {
    ordinal.to_be_bytes().to_vec()
}

pub fn ordinal_from_sql(bytes: &[u8]) -> Result<u128, Error> {
    let bytes: [u8; ORDINAL_LEN] = bytes.try_into().map_err(|_| {
        Error::internal_error(&format!(
            "stored pool bound has {} bytes, expected {}",
            bytes.len(),
            ORDINAL_LEN
        ))
    })?;
    Ok(u128::from_be_bytes(bytes))
}

impl TryFrom<PoolRange> for StoredRange {
    type Error = Error;

    fn try_from(row: PoolRange) -> Result<Self, Self::Error> {
        Ok(StoredRange {
            id: row.id,
            start: ordinal_from_sql(&row.range_start)?,
            end: ordinal_from_sql(&row.range_end)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ordinal_bytes_preserve_order() {
        let values = [0u128, 1, 255, 256, u128::from(u64::MAX), u128::MAX];
        for pair in values.windows(2) {
            assert!(ordinal_to_sql(pair[0]) < ordinal_to_sql(pair[1]));
        }
        assert_eq!(
            ordinal_from_sql(&ordinal_to_sql(0xffff_0a00_0001)).unwrap(),
            0xffff_0a00_0001
        );
    }

    #[test]
    fn test_ordinal_wrong_width() {
        let error = ordinal_from_sql(&[1, 2, 3]).unwrap_err();
        assert_eq!(
            error,
            Error::internal_error("stored pool bound has 3 bytes, expected 16")
        );
    }
}
