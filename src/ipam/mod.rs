// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subnet-aware address management on top of [`RangePool`]
//!
//! Each IPAM subnet owns one address pool keyed by its UUID.  Creating a
//! subnet loads its allocation pools (or its CIDR) into that pool and
//! reserves the default gateway and DNS server addresses; virtual networks
//! then allocate addresses from the pools of their subnets.

mod types;

pub use types::AddressAllocation;
pub use types::AddressAllocationMode;
pub use types::AddressRequest;
pub use types::AllocationPool;
pub use types::IpFamily;
pub use types::IpamSubnet;
pub use types::VirtualNetwork;

use crate::error::CreateResult;
use crate::error::DeleteResult;
use crate::error::Error;
use crate::error::ListResultVec;
use crate::error::LookupResult;
use crate::error::LookupType;
use crate::error::ResourceType;
use crate::pool::PoolRange;
use crate::pool::RangePool;
use crate::store::RangeStore;
use slog::debug;
use slog::info;
use slog::o;
use slog::Logger;
use std::net::IpAddr;
use uuid::Uuid;

pub struct AddressManager {
    log: Logger,
    pool: RangePool<IpAddr>,
}

/// The pool key of a subnet that has been created.
fn subnet_key(subnet: &IpamSubnet) -> Result<Uuid, Error> {
    subnet.subnet_uuid.ok_or_else(|| {
        Error::invalid_request(&format!(
            "subnet {} has no uuid; it was never created",
            subnet.subnet
        ))
    })
}

fn address_not_found(address: IpAddr) -> Error {
    LookupType::ByAddress(address).into_not_found(ResourceType::IpAddress)
}

impl AddressManager {
    pub fn new(log: &Logger) -> Self {
        let log = log.new(o!("component" => "AddressManager"));
        let pool = RangePool::new(&log);
        AddressManager { log, pool }
    }

    /// Loads `subnet` into its address pool and reserves its gateway and DNS
    /// server addresses.
    ///
    /// Any ranges left under the subnet's UUID are replaced.  Returns the
    /// subnet with its UUID and the reserved addresses (if any) filled in.
    /// An address outside the CIDR or outside every pool is not reserved.
    pub fn create_subnet<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        subnet: &IpamSubnet,
    ) -> CreateResult<IpamSubnet> {
        let mut ranges = Vec::with_capacity(subnet.allocation_pools.len());
        for pool in &subnet.allocation_pools {
            let range = pool.to_range()?;
            if !subnet.subnet.contains(pool.start)
                || !subnet.subnet.contains(pool.end)
            {
                return Err(Error::invalid_request(&format!(
                    "allocation pool {} is not within subnet {}",
                    range, subnet.subnet
                )));
            }
            ranges.push(range);
        }
        if ranges.is_empty() {
            for (start, end) in subnet.usable_ranges() {
                ranges.push(PoolRange::new(start, end)?);
            }
        }

        let uuid = subnet.subnet_uuid.unwrap_or_else(Uuid::new_v4);
        let key = uuid.to_string();
        let stale = self.pool.delete_all(store, &key)?;
        for range in &ranges {
            self.pool.create_pool(store, &key, *range)?;
        }

        let reservable = |address: &IpAddr| {
            subnet.subnet.contains(*address)
                && ranges.iter().any(|range| range.contains(*address))
        };
        let gateway = subnet.effective_gateway().filter(|g| reservable(g));
        if let Some(gateway) = gateway {
            self.pool.set(store, &key, gateway)?;
        }
        let dns = subnet.effective_dns_server().filter(|d| reservable(d));
        if let Some(dns) = dns.filter(|dns| Some(*dns) != gateway) {
            self.pool.set(store, &key, dns)?;
        }

        info!(self.log, "created subnet";
            "subnet_uuid" => %uuid,
            "cidr" => %subnet.subnet,
            "ranges" => ranges.len(),
            "gateway" => ?gateway,
            "dns_server" => ?dns,
            "from_start" => subnet.addr_from_start,
            "replaced" => stale);
        Ok(IpamSubnet {
            subnet_uuid: Some(uuid),
            default_gateway: gateway,
            dns_server_address: dns,
            ..subnet.clone()
        })
    }

    /// Removes every range of the subnet.
    pub fn delete_subnet<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        subnet_uuid: Uuid,
    ) -> DeleteResult {
        let deleted = self.pool.delete_all(store, &subnet_uuid.to_string())?;
        if deleted == 0 {
            return Err(Error::not_found_by_id(
                ResourceType::Subnet,
                &subnet_uuid,
            ));
        }
        info!(self.log, "deleted subnet";
            "subnet_uuid" => %subnet_uuid, "ranges" => deleted);
        Ok(())
    }

    /// Whether the subnet has any free range left.  An exhausted subnet
    /// looks the same as one that was never created.
    pub fn subnet_exists<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        subnet_uuid: Uuid,
    ) -> LookupResult<bool> {
        Ok(!self.pool.get_pools(store, &subnet_uuid.to_string())?.is_empty())
    }

    /// Allocates one address for `vn`.
    ///
    /// Networks whose allocation mode is not network-scoped do not draw
    /// from subnet pools: the requested address (if any) is accepted as is
    /// and `None` is returned when no address was requested.
    pub fn allocate_address<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        vn: &VirtualNetwork,
        request: &AddressRequest,
    ) -> CreateResult<Option<AddressAllocation>> {
        if !vn.address_allocation_mode.is_network_scoped() {
            return Ok(request.address.map(|address| AddressAllocation {
                address,
                subnet_uuid: vn
                    .subnet_containing(address)
                    .and_then(|s| s.subnet_uuid),
            }));
        }

        let candidates: Vec<&IpamSubnet> = match request.subnet_uuid {
            Some(uuid) => {
                let subnet = vn
                    .subnets
                    .iter()
                    .find(|s| s.subnet_uuid == Some(uuid))
                    .ok_or_else(|| {
                        Error::not_found_by_id(ResourceType::Subnet, &uuid)
                    })?;
                vec![subnet]
            }
            None => vn.subnets.iter().collect(),
        };

        for subnet in candidates {
            if let Some(family) = request.family {
                if !family.matches(&subnet.subnet) {
                    continue;
                }
            }
            if let Some(address) = request.address {
                if !subnet.subnet.contains(address) {
                    continue;
                }
            }

            let uuid = subnet_key(subnet)?;
            let key = uuid.to_string();
            let result = match request.address {
                Some(address) => {
                    self.pool.set(store, &key, address).map(|()| address)
                }
                None if subnet.addr_from_start => {
                    self.pool.allocate(store, &key)
                }
                None => self.pool.allocate_from_end(store, &key),
            };
            match result {
                Ok(address) => {
                    debug!(self.log, "allocated address";
                        "vn" => vn.name(),
                        "subnet_uuid" => %uuid,
                        "address" => %address);
                    return Ok(Some(AddressAllocation {
                        address,
                        subnet_uuid: Some(uuid),
                    }));
                }
                Err(error) if error.is_not_found() => {
                    debug!(self.log, "subnet has no address, trying next";
                        "vn" => vn.name(), "subnet_uuid" => %uuid);
                }
                Err(error) => return Err(error),
            }
        }

        Err(match request.address {
            Some(address) => address_not_found(address),
            None => {
                Error::not_found_by_id(ResourceType::VirtualNetwork, &vn.uuid)
            }
        })
    }

    /// Allocates `count` addresses for `vn` from pools matching `request`.
    ///
    /// Fails as a whole if fewer than `count` are available; callers run
    /// this inside one transaction so that nothing is left allocated then.
    pub fn allocate_addresses<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        vn: &VirtualNetwork,
        request: &AddressRequest,
        count: usize,
    ) -> ListResultVec<AddressAllocation> {
        if request.address.is_some() && count > 1 {
            return Err(Error::invalid_request(
                "a specific address cannot be allocated more than once",
            ));
        }
        if count > 0 && !vn.address_allocation_mode.is_network_scoped() {
            return Err(Error::invalid_request(&format!(
                "virtual network {} does not allocate from subnet pools",
                vn.name()
            )));
        }
        let mut allocations = Vec::with_capacity(count);
        for _ in 0..count {
            match self.allocate_address(store, vn, request)? {
                Some(allocation) => allocations.push(allocation),
                None => {
                    return Err(Error::internal_error(
                        "network-scoped allocation returned no address",
                    ))
                }
            }
        }
        Ok(allocations)
    }

    /// Returns `address` to the pool of the subnet of `vn` containing it.
    pub fn deallocate_address<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        vn: &VirtualNetwork,
        address: IpAddr,
    ) -> DeleteResult {
        let subnet = vn
            .subnet_containing(address)
            .ok_or_else(|| address_not_found(address))?;
        let uuid = subnet_key(subnet)?;
        self.pool.deallocate(store, &uuid.to_string(), address)?;
        debug!(self.log, "deallocated address";
            "vn" => vn.name(), "subnet_uuid" => %uuid, "address" => %address);
        Ok(())
    }

    pub fn deallocate_addresses<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        vn: &VirtualNetwork,
        addresses: &[IpAddr],
    ) -> DeleteResult {
        for address in addresses {
            self.deallocate_address(store, vn, *address)?;
        }
        Ok(())
    }

    /// Whether `address` is currently taken in the subnet of `vn`
    /// containing it.
    pub fn is_address_allocated<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        vn: &VirtualNetwork,
        address: IpAddr,
    ) -> LookupResult<bool> {
        let subnet = vn
            .subnet_containing(address)
            .ok_or_else(|| address_not_found(address))?;
        let uuid = subnet_key(subnet)?;
        Ok(!self.pool.is_free(store, &uuid.to_string(), address)?)
    }

    /// Number of addresses in the subnet's CIDR that are not free, counting
    /// the network, broadcast and gateway addresses.
    pub fn subnet_allocated_count<S: RangeStore + ?Sized>(
        &self,
        store: &mut S,
        subnet: &IpamSubnet,
    ) -> LookupResult<u128> {
        let uuid = subnet_key(subnet)?;
        let free = self.pool.size_pool(store, &uuid.to_string())?;
        Ok(subnet.cidr_size().saturating_sub(free))
    }

    /// Rejects a virtual network with two subnets whose CIDRs overlap.
    pub fn validate_subnets(vn: &VirtualNetwork) -> Result<(), Error> {
        for (i, a) in vn.subnets.iter().enumerate() {
            for b in &vn.subnets[i + 1..] {
                if a.subnet.contains(b.subnet.network())
                    || b.subnet.contains(a.subnet.network())
                {
                    return Err(Error::invalid_request(&format!(
                        "overlapping subnets {} and {} in virtual network {}",
                        a.subnet,
                        b.subnet,
                        vn.name()
                    )));
                }
            }
        }
        Ok(())
    }
}
