// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Values that can be handed out by a [`super::RangePool`]

use crate::error::Error;
use crate::store::PoolKind;
use crate::store::StoredRange;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::net::Ipv6Addr;

/// A totally ordered value with successor, predecessor and distance.
///
/// All three are expressed through an order-preserving 128-bit ordinal: the
/// successor of `v` is the value whose ordinal is one greater, and the
/// distance between two values is the difference of their ordinals.  The
/// pools and the store only ever do arithmetic on ordinals.
pub trait PoolValue:
    Copy + fmt::Debug + fmt::Display + PartialEq + Send + Sync + 'static
{
    /// Namespace of this value type in the store.
    const KIND: PoolKind;

    fn to_ordinal(&self) -> u128;

    /// Inverse of [`PoolValue::to_ordinal`]; fails for ordinals that no
    /// value maps to.
    fn from_ordinal(ordinal: u128) -> Result<Self, Error>;

    /// Whether `self` and `other` may bound the same range.
    fn same_domain(&self, _other: &Self) -> bool {
        true
    }

    fn successor(&self) -> Option<Self> {
        self.to_ordinal()
            .checked_add(1)
            .and_then(|ordinal| Self::from_ordinal(ordinal).ok())
    }

    fn predecessor(&self) -> Option<Self> {
        self.to_ordinal()
            .checked_sub(1)
            .and_then(|ordinal| Self::from_ordinal(ordinal).ok())
    }

    /// Number of steps between `self` and `other`, in either direction.
    fn distance(&self, other: &Self) -> u128 {
        self.to_ordinal().abs_diff(other.to_ordinal())
    }
}

/// IP addresses order as IPv6 addresses, with IPv4 mapped into
/// `::ffff:0:0/96`.  Ordinals in that block decode back to IPv4.
impl PoolValue for IpAddr {
    const KIND: PoolKind = PoolKind::Address;

    fn to_ordinal(&self) -> u128 {
        match self {
            IpAddr::V4(addr) => u128::from(addr.to_ipv6_mapped()),
            IpAddr::V6(addr) => u128::from(*addr),
        }
    }

    fn from_ordinal(ordinal: u128) -> Result<Self, Error> {
        let addr = Ipv6Addr::from(ordinal);
        Ok(match addr.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(addr),
        })
    }

    fn same_domain(&self, other: &Self) -> bool {
        self.is_ipv4() == other.is_ipv4()
    }
}

const I64_ORDINAL_OFFSET: i128 = -(i64::MIN as i128);

/// Signed ids are shifted by 2^63 so that negative values order first.
impl PoolValue for i64 {
    const KIND: PoolKind = PoolKind::Integer;

    fn to_ordinal(&self) -> u128 {
        // Always non-negative after the shift.
        (i128::from(*self) + I64_ORDINAL_OFFSET) as u128
    }

    fn from_ordinal(ordinal: u128) -> Result<Self, Error> {
        i128::try_from(ordinal)
            .ok()
            .and_then(|o| i64::try_from(o - I64_ORDINAL_OFFSET).ok())
            .ok_or_else(|| {
                Error::invalid_request(&format!(
                    "ordinal {} is outside the integer pool domain",
                    ordinal
                ))
            })
    }
}

/// A non-decreasing range of pool values, inclusive of both ends.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct PoolRange<T> {
    start: T,
    end: T,
}

impl<T: PoolValue> PoolRange<T> {
    pub fn new(start: T, end: T) -> Result<Self, Error> {
        if !start.same_domain(&end) {
            return Err(Error::invalid_request(&format!(
                "range {}-{} mixes address families",
                start, end
            )));
        }
        if start.to_ordinal() > end.to_ordinal() {
            return Err(Error::invalid_request(&format!(
                "range start {} is greater than range end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> T {
        self.start
    }

    pub fn end(&self) -> T {
        self.end
    }

    pub fn contains(&self, value: T) -> bool {
        let ordinal = value.to_ordinal();
        self.start.to_ordinal() <= ordinal && ordinal <= self.end.to_ordinal()
    }

    pub fn len(&self) -> u128 {
        self.start.distance(&self.end).saturating_add(1)
    }

    pub(crate) fn ordinals(&self) -> (u128, u128) {
        (self.start.to_ordinal(), self.end.to_ordinal())
    }

    pub(crate) fn from_ordinals(start: u128, end: u128) -> Result<Self, Error> {
        Self::new(T::from_ordinal(start)?, T::from_ordinal(end)?)
    }
}

impl<T: PoolValue> TryFrom<&StoredRange> for PoolRange<T> {
    type Error = Error;

    fn try_from(range: &StoredRange) -> Result<Self, Self::Error> {
        Self::from_ordinals(range.start, range.end).map_err(|e| {
            Error::internal_error(&format!(
                "stored {} range {} is not valid: {}",
                T::KIND,
                range.id,
                e
            ))
        })
    }
}

impl<T: PoolValue> fmt::Display for PoolRange<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_ip_ordinals() {
        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        assert_eq!(v4.to_ordinal(), 0xffff_0a00_0001);
        assert_eq!(IpAddr::from_ordinal(0xffff_0a00_0001).unwrap(), v4);

        let v6: IpAddr = "fd00::1".parse().unwrap();
        assert_eq!(IpAddr::from_ordinal(v6.to_ordinal()).unwrap(), v6);

        let last: IpAddr = "10.0.0.255".parse().unwrap();
        assert_eq!(
            last.successor(),
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 1, 0)))
        );
        assert_eq!(v4.distance(&last), 254);
    }

    #[test]
    fn test_i64_ordinals_preserve_order() {
        let values = [i64::MIN, -1, 0, 1, 4094, i64::MAX];
        for pair in values.windows(2) {
            assert!(pair[0].to_ordinal() < pair[1].to_ordinal());
        }
        for v in values {
            assert_eq!(i64::from_ordinal(v.to_ordinal()).unwrap(), v);
        }
        assert_eq!(i64::MAX.successor(), None);
        assert_eq!(i64::MIN.predecessor(), None);
        assert!(i64::from_ordinal(u128::from(u64::MAX) + 1).is_err());
    }

    #[test]
    fn test_range_validation() {
        assert!(PoolRange::new(5i64, 4).is_err());
        let range = PoolRange::new(4i64, 4).unwrap();
        assert_eq!(range.len(), 1);

        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        let v6: IpAddr = "fd00::1".parse().unwrap();
        assert!(PoolRange::new(v4, v6).is_err());
        let range =
            PoolRange::new(v4, "10.0.0.254".parse().unwrap()).unwrap();
        assert_eq!(range.len(), 254);
        assert!(range.contains("10.0.0.100".parse().unwrap()));
        assert!(!range.contains(v6));
        assert_eq!(range.to_string(), "10.0.0.1-10.0.0.254");
    }
}
