// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transactional range-pool allocator with an IPAM address manager
//!
//! [`pool::RangePool`] hands out values (IP addresses, integer ids) from
//! key-scoped pools of free ranges kept in a [`store::RangeStore`].
//! [`pool::owned::OwnedIntPool`] adds an owner to every allocated integer
//! id, and [`ipam::AddressManager`] maps IPAM subnets and virtual networks
//! onto address pools.  [`db::Db`] provides the SQLite-backed store.

pub mod config;
pub mod db;
pub mod dev;
pub mod error;
pub mod ipam;
pub mod pool;
pub mod store;
