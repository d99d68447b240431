//! Range descriptor for an allocatable CIDR block
//!
//! Maps addresses to bitmap offsets and back. Offset 0 is the first address
//! after the network address; the IPv4 broadcast address is never part of
//! the range.

use crate::error::{AllocatorError, Result};
use ipnet::IpNet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Largest number of host bits a range may carry (IPv4 /12, IPv6 /108).
///
/// Bounds the persisted bitmap to 128 KiB.
pub const MAX_HOST_BITS: u8 = 20;

/// Immutable description of an allocatable CIDR block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    /// The network, with no host bits set
    net: IpNet,

    /// Numeric value of the address at offset 0
    base: u128,

    /// Number of usable offsets
    capacity: usize,
}

impl Range {
    /// Parse a CIDR string such as `192.168.1.0/24`
    ///
    /// # Errors
    ///
    /// Returns `InvalidRange` if the string does not parse, the base address
    /// has host bits set, or the block is larger than [`MAX_HOST_BITS`].
    pub fn parse(cidr: &str) -> Result<Self> {
        let net = IpNet::from_str(cidr.trim())
            .map_err(|e| AllocatorError::InvalidRange(format!("{}: {}", cidr, e)))?;
        Self::from_net(net)
    }

    /// Build a range from an already parsed network
    pub fn from_net(net: IpNet) -> Result<Self> {
        if net.addr() != net.network() {
            return Err(AllocatorError::InvalidRange(format!(
                "{}: base address has host bits set (network is {})",
                net,
                net.trunc()
            )));
        }

        let host_bits = net.max_prefix_len() - net.prefix_len();
        if host_bits > MAX_HOST_BITS {
            return Err(AllocatorError::InvalidRange(format!(
                "{}: range too large, at most {} host bits are supported",
                net, MAX_HOST_BITS
            )));
        }

        let size = 1u128 << host_bits;
        // IPv4 loses the network and broadcast addresses, IPv6 only the
        // subnet-router address.
        let reserved = match net {
            IpNet::V4(_) => 2,
            IpNet::V6(_) => 1,
        };
        let capacity = size.saturating_sub(reserved) as usize;

        // Empty blocks at the top of the address space have no offset 0;
        // lookups are bounded by `capacity`, so the saturated base is unused.
        Ok(Range {
            net,
            base: addr_to_u128(net.network()).saturating_add(1),
            capacity,
        })
    }

    /// The underlying network
    pub fn net(&self) -> IpNet {
        self.net
    }

    /// Number of allocatable addresses
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check whether `address` can be allocated from this range
    pub fn contains(&self, address: IpAddr) -> bool {
        self.checked_offset(address).is_some()
    }

    /// Offset of `address` within the range
    ///
    /// # Errors
    ///
    /// Returns `NotInRange` for addresses of another family, outside the
    /// block, or equal to the network or broadcast address.
    pub fn offset_of(&self, address: IpAddr) -> Result<usize> {
        self.checked_offset(address)
            .ok_or_else(|| AllocatorError::NotInRange {
                address,
                range: self.to_string(),
            })
    }

    /// Address stored at `offset`, or `None` past the end of the range
    pub fn address_at(&self, offset: usize) -> Option<IpAddr> {
        if offset >= self.capacity {
            return None;
        }

        let value = self.base + offset as u128;
        Some(match self.net {
            IpNet::V4(_) => IpAddr::V4(Ipv4Addr::from(value as u32)),
            IpNet::V6(_) => IpAddr::V6(Ipv6Addr::from(value)),
        })
    }

    fn checked_offset(&self, address: IpAddr) -> Option<usize> {
        let same_family = matches!(
            (self.net, address),
            (IpNet::V4(_), IpAddr::V4(_)) | (IpNet::V6(_), IpAddr::V6(_))
        );
        if !same_family {
            return None;
        }

        let value = addr_to_u128(address);
        if value < self.base {
            return None;
        }

        let offset = value - self.base;
        if offset >= self.capacity as u128 {
            return None;
        }
        Some(offset as usize)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.net)
    }
}

impl FromStr for Range {
    type Err = AllocatorError;

    fn from_str(s: &str) -> Result<Self> {
        Range::parse(s)
    }
}

fn addr_to_u128(address: IpAddr) -> u128 {
    match address {
        IpAddr::V4(v4) => u32::from(v4) as u128,
        IpAddr::V6(v6) => u128::from(v6),
    }
}
