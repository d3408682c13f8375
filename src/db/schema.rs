// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Diesel table definitions matching `schema.sql`

diesel::table! {
    pool_range (id) {
        id -> BigInt,
        pool_key -> Text,
        kind -> Text,
        range_start -> Binary,
        range_end -> Binary,
    }
}

diesel::table! {
    int_owner (pool_key, id) {
        pool_key -> Text,
        id -> BigInt,
        owner -> Text,
    }
}
