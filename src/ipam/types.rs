// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Subnet and virtual network configuration consumed by the address manager

use crate::error::Error;
use crate::pool::PoolRange;
use crate::pool::PoolValue;
use ipnetwork::IpNetwork;
use serde::Deserialize;
use serde::Serialize;
use std::net::IpAddr;
use uuid::Uuid;

/// A configured sub-range of a subnet from which addresses are handed out.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AllocationPool {
    pub start: IpAddr,
    pub end: IpAddr,
}

/// An IPAM subnet: a CIDR, optional gateway and DNS server addresses, and
/// optional allocation pools.  With no allocation pools the whole CIDR
/// (minus its network and broadcast addresses) is allocatable.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct IpamSubnet {
    /// Key of the subnet's pool; assigned on creation when absent.
    #[serde(default)]
    pub subnet_uuid: Option<Uuid>,
    pub subnet: IpNetwork,
    /// An unspecified address (`0.0.0.0`, `::`) means no gateway was
    /// configured.
    #[serde(default)]
    pub default_gateway: Option<IpAddr>,
    /// Reserved like the gateway.  Unset or unspecified means none.
    #[serde(default)]
    pub dns_server_address: Option<IpAddr>,
    #[serde(default)]
    pub allocation_pools: Vec<AllocationPool>,
    /// Whether addresses are handed out lowest first.  When false they come
    /// from the high end, and so does the default gateway.
    #[serde(default = "IpamSubnet::default_addr_from_start")]
    pub addr_from_start: bool,
}

impl IpamSubnet {
    pub fn new(subnet: IpNetwork) -> Self {
        IpamSubnet {
            subnet_uuid: None,
            subnet,
            default_gateway: None,
            dns_server_address: None,
            allocation_pools: Vec::new(),
            addr_from_start: Self::default_addr_from_start(),
        }
    }

    fn default_addr_from_start() -> bool {
        true
    }

    /// First and last address of the CIDR, whatever host bits `subnet`
    /// carries.
    pub fn cidr_bounds(&self) -> (IpAddr, IpAddr) {
        let network = self.subnet.network();
        let width: u32 = if self.subnet.is_ipv4() { 32 } else { 128 };
        let host_bits = width - u32::from(self.subnet.prefix());
        let host_mask = u128::MAX.checked_shr(128 - host_bits).unwrap_or(0);
        // Host bits are the low bits of the ordinal for both families, so
        // setting them cannot leave the CIDR.
        let last = IpAddr::from_ordinal(network.to_ordinal() | host_mask)
            .unwrap_or(network);
        (network, last)
    }

    /// Number of addresses in the CIDR.
    pub fn cidr_size(&self) -> u128 {
        let (first, last) = self.cidr_bounds();
        first.distance(&last).saturating_add(1)
    }

    /// The address ranges this subnet hands out: the configured allocation
    /// pools, or the CIDR without its network address and, when the CIDR
    /// holds more than two addresses, without its last address.
    pub fn usable_ranges(&self) -> Vec<(IpAddr, IpAddr)> {
        if !self.allocation_pools.is_empty() {
            return self
                .allocation_pools
                .iter()
                .map(|pool| (pool.start, pool.end))
                .collect();
        }
        self.cidr_usable().into_iter().collect()
    }

    fn cidr_usable(&self) -> Option<(IpAddr, IpAddr)> {
        let (first, last) = self.cidr_bounds();
        let end =
            if self.cidr_size() > 2 { last.predecessor() } else { Some(last) };
        match (first.successor(), end) {
            (Some(start), Some(end))
                if start.to_ordinal() <= end.to_ordinal() =>
            {
                Some((start, end))
            }
            _ => None,
        }
    }

    /// The gateway to reserve: the configured one, or else the first usable
    /// address of the CIDR (the last one when allocating from the end).
    pub fn effective_gateway(&self) -> Option<IpAddr> {
        match self.default_gateway {
            Some(gateway) if !gateway.is_unspecified() => Some(gateway),
            _ => self.cidr_usable().map(|(first, last)| {
                if self.addr_from_start {
                    first
                } else {
                    last
                }
            }),
        }
    }

    /// The DNS server address to reserve, if one is configured.
    pub fn effective_dns_server(&self) -> Option<IpAddr> {
        self.dns_server_address.filter(|address| !address.is_unspecified())
    }
}

impl AllocationPool {
    pub fn to_range(&self) -> Result<PoolRange<IpAddr>, Error> {
        PoolRange::new(self.start, self.end)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressAllocationMode {
    UserDefinedSubnetOnly,
    UserDefinedSubnetPreferred,
    FlatSubnetOnly,
    FlatSubnetPreferred,
}

impl AddressAllocationMode {
    /// Whether addresses for the network come out of its subnets' pools.
    pub fn is_network_scoped(&self) -> bool {
        match self {
            AddressAllocationMode::UserDefinedSubnetOnly
            | AddressAllocationMode::FlatSubnetOnly => true,
            AddressAllocationMode::UserDefinedSubnetPreferred
            | AddressAllocationMode::FlatSubnetPreferred => false,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn matches(&self, network: &IpNetwork) -> bool {
        match self {
            IpFamily::V4 => network.is_ipv4(),
            IpFamily::V6 => network.is_ipv6(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct VirtualNetwork {
    pub uuid: Uuid,
    pub fq_name: Vec<String>,
    pub address_allocation_mode: AddressAllocationMode,
    #[serde(default)]
    pub subnets: Vec<IpamSubnet>,
}

impl VirtualNetwork {
    pub fn name(&self) -> String {
        self.fq_name.join(":")
    }

    /// The subnet whose CIDR contains `address`, if any.
    pub fn subnet_containing(&self, address: IpAddr) -> Option<&IpamSubnet> {
        self.subnets.iter().find(|s| s.subnet.contains(address))
    }
}

/// What the caller wants allocated.  Every field narrows the choice of
/// subnet; all of them unset means "any address from any subnet".
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct AddressRequest {
    #[serde(default)]
    pub subnet_uuid: Option<Uuid>,
    #[serde(default)]
    pub address: Option<IpAddr>,
    #[serde(default)]
    pub family: Option<IpFamily>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AddressAllocation {
    pub address: IpAddr,
    /// The subnet the address came from.  Unset for networks that do not
    /// allocate from subnet pools and whose subnets do not contain the
    /// address.
    pub subnet_uuid: Option<Uuid>,
}

#[cfg(test)]
mod test {
    use super::*;

    fn subnet(cidr: &str) -> IpamSubnet {
        IpamSubnet::new(cidr.parse().unwrap())
    }

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_cidr_math() {
        let s = subnet("10.0.0.0/24");
        assert_eq!(s.cidr_bounds(), (addr("10.0.0.0"), addr("10.0.0.255")));
        assert_eq!(s.cidr_size(), 256);
        assert_eq!(
            s.usable_ranges(),
            vec![(addr("10.0.0.1"), addr("10.0.0.254"))]
        );
        assert_eq!(s.effective_gateway(), Some(addr("10.0.0.1")));

        // Host bits in the configured CIDR do not matter.
        let s = subnet("10.0.0.77/30");
        assert_eq!(s.cidr_bounds(), (addr("10.0.0.76"), addr("10.0.0.79")));

        // Point-to-point links keep their last address.
        let s = subnet("10.0.0.0/31");
        assert_eq!(
            s.usable_ranges(),
            vec![(addr("10.0.0.1"), addr("10.0.0.1"))]
        );
        assert!(subnet("10.0.0.0/32").usable_ranges().is_empty());

        let s = subnet("fd00::/126");
        assert_eq!(s.cidr_size(), 4);
        assert_eq!(
            s.usable_ranges(),
            vec![(addr("fd00::1"), addr("fd00::2"))]
        );

        assert_eq!(subnet("::/0").cidr_size(), u128::MAX);
    }

    #[test]
    fn test_unspecified_gateway_means_default() {
        let mut s = subnet("192.168.1.0/24");
        s.default_gateway = Some(addr("0.0.0.0"));
        assert_eq!(s.effective_gateway(), Some(addr("192.168.1.1")));
        s.default_gateway = Some(addr("192.168.1.254"));
        assert_eq!(s.effective_gateway(), Some(addr("192.168.1.254")));
    }

    #[test]
    fn test_gateway_follows_allocation_direction() {
        let mut s = subnet("192.168.1.0/24");
        assert!(s.addr_from_start);
        s.addr_from_start = false;
        assert_eq!(s.effective_gateway(), Some(addr("192.168.1.254")));
        s.default_gateway = Some(addr("192.168.1.10"));
        assert_eq!(s.effective_gateway(), Some(addr("192.168.1.10")));

        let mut s = subnet("10.0.0.0/31");
        s.addr_from_start = false;
        assert_eq!(s.effective_gateway(), Some(addr("10.0.0.1")));
        assert_eq!(subnet("10.0.0.0/32").effective_gateway(), None);
    }

    #[test]
    fn test_dns_server_address() {
        let mut s = subnet("192.168.1.0/24");
        assert_eq!(s.effective_dns_server(), None);
        s.dns_server_address = Some(addr("0.0.0.0"));
        assert_eq!(s.effective_dns_server(), None);
        s.dns_server_address = Some(addr("192.168.1.2"));
        assert_eq!(s.effective_dns_server(), Some(addr("192.168.1.2")));
    }

    #[test]
    fn test_virtual_network_from_json() {
        let vn: VirtualNetwork = serde_json::from_str(
            r#"{
                "uuid": "5f9ae8e2-4a38-4a8d-9d4e-1d2c1d3c2b1a",
                "fq_name": ["default-domain", "admin", "vn1"],
                "address_allocation_mode": "flat-subnet-only",
                "subnets": [
                    { "subnet": "10.0.0.0/24" },
                    {
                        "subnet": "fd00::/64",
                        "dns_server_address": "fd00::53",
                        "addr_from_start": false,
                        "allocation_pools": [
                            { "start": "fd00::10", "end": "fd00::ff" }
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(vn.name(), "default-domain:admin:vn1");
        assert!(vn.address_allocation_mode.is_network_scoped());
        assert_eq!(vn.subnets.len(), 2);
        assert_eq!(vn.subnets[0].subnet_uuid, None);
        assert!(vn.subnets[0].addr_from_start);
        assert_eq!(vn.subnets[0].dns_server_address, None);
        assert!(!vn.subnets[1].addr_from_start);
        assert_eq!(
            vn.subnets[1].effective_dns_server(),
            Some(addr("fd00::53"))
        );
        assert_eq!(
            vn.subnet_containing(addr("fd00::1")).map(|s| s.subnet),
            Some("fd00::/64".parse().unwrap())
        );
        assert!(vn.subnet_containing(addr("10.0.1.1")).is_none());
        assert!(IpFamily::V6.matches(&vn.subnets[1].subnet));
        assert!(!IpFamily::V6.matches(&vn.subnets[0].subnet));

        let error = serde_json::from_str::<AddressAllocationMode>(
            "\"flat-subnet-sometimes\"",
        );
        assert!(error.is_err());
    }
}
