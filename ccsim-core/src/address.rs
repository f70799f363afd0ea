//! IPv4 address allocation.
//!
//! An [`Ipv4AddressAllocator`] hands out successive, disjoint subnets of
//! the same size. It is an explicit object owned by whoever builds the
//! topology: two allocators never share state.

use std::{fmt, net::Ipv4Addr};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid network mask {0}")]
    InvalidMask(Ipv4Addr),
    #[error("Base address {base} is not aligned on mask {mask}")]
    Unaligned { base: Ipv4Addr, mask: Ipv4Addr },
    #[error("No subnet left after {last}/{prefix_len}")]
    Exhausted { last: Ipv4Addr, prefix_len: u8 },
    #[error("No host address left in subnet {0}")]
    SubnetFull(Subnet),
    #[error("Malformed address `{0}'")]
    Malformed(String),
}

/// A block of consecutive IPv4 addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    network: u32,
    prefix_len: u8,
    next_host: u32,
}

impl Subnet {
    #[inline]
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    #[inline]
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn mask(&self) -> Ipv4Addr {
        Ipv4Addr::from(mask_bits(self.prefix_len))
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & mask_bits(self.prefix_len) == self.network
    }

    fn size(&self) -> u64 {
        1u64 << (32 - self.prefix_len as u32)
    }

    /// Assign the next host address of the subnet (`.1`, `.2`, ...).
    ///
    /// The network and broadcast addresses are never handed out.
    pub fn assign(&mut self) -> Result<Ipv4Addr, AddressError> {
        let host = self.next_host as u64;
        if host + 1 >= self.size() {
            return Err(AddressError::SubnetFull(*self));
        }
        self.next_host += 1;
        Ok(Ipv4Addr::from(self.network + host as u32))
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix_len)
    }
}

fn mask_bits(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len as u32)
    }
}

/// Allocates successive disjoint subnets.
///
/// # Example
///
/// ```
/// use ccsim_core::address::Ipv4AddressAllocator;
/// use std::net::Ipv4Addr;
///
/// let mut allocator = Ipv4AddressAllocator::default();
///
/// let mut first = allocator.allocate().unwrap();
/// assert_eq!(first.assign().unwrap(), Ipv4Addr::new(10, 0, 0, 1));
/// assert_eq!(first.assign().unwrap(), Ipv4Addr::new(10, 0, 0, 2));
///
/// let mut second = allocator.allocate().unwrap();
/// assert_eq!(second.assign().unwrap(), Ipv4Addr::new(10, 0, 1, 1));
/// ```
#[derive(Debug, Clone)]
pub struct Ipv4AddressAllocator {
    next_network: Option<u32>,
    prefix_len: u8,
}

impl Ipv4AddressAllocator {
    /// Create an allocator whose first subnet is `base`/`mask`.
    pub fn new(base: Ipv4Addr, mask: Ipv4Addr) -> Result<Self, AddressError> {
        let bits = u32::from(mask);
        let prefix_len = bits.leading_ones() as u8;
        // contiguous mask with room for at least two hosts
        if bits.count_ones() as u8 != prefix_len || prefix_len > 30 {
            return Err(AddressError::InvalidMask(mask));
        }
        if u32::from(base) & !bits != 0 {
            return Err(AddressError::Unaligned { base, mask });
        }

        Ok(Self {
            next_network: Some(u32::from(base)),
            prefix_len,
        })
    }

    /// Hand out the next subnet. A subnet is never handed out twice.
    pub fn allocate(&mut self) -> Result<Subnet, AddressError> {
        let Some(network) = self.next_network else {
            return Err(AddressError::Exhausted {
                last: Ipv4Addr::from(mask_bits(self.prefix_len)),
                prefix_len: self.prefix_len,
            });
        };
        let size = 1u64 << (32 - self.prefix_len as u32);
        self.next_network = u32::try_from(network as u64 + size).ok();

        Ok(Subnet {
            network,
            prefix_len: self.prefix_len,
            next_host: 1,
        })
    }
}

impl Default for Ipv4AddressAllocator {
    /// `10.0.0.0/24`, then `10.0.1.0/24`, ...
    fn default() -> Self {
        Self {
            next_network: Some(u32::from(Ipv4Addr::new(10, 0, 0, 0))),
            prefix_len: 24,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnets_are_disjoint() {
        let mut allocator = Ipv4AddressAllocator::default();
        let subnets: Vec<Subnet> = (0..10).map(|_| allocator.allocate().unwrap()).collect();

        for (i, a) in subnets.iter().enumerate() {
            for b in subnets.iter().skip(i + 1) {
                assert!(!a.contains(b.network()));
                assert!(!b.contains(a.network()));
            }
        }
        assert_eq!(subnets[9].network(), Ipv4Addr::new(10, 0, 9, 0));
    }

    #[test]
    fn subnet_full() {
        let mut allocator =
            Ipv4AddressAllocator::new(Ipv4Addr::new(192, 168, 0, 0), Ipv4Addr::new(255, 255, 255, 252))
                .unwrap();
        let mut subnet = allocator.allocate().unwrap();
        assert_eq!(subnet.assign().unwrap(), Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(subnet.assign().unwrap(), Ipv4Addr::new(192, 168, 0, 2));
        assert!(matches!(subnet.assign(), Err(AddressError::SubnetFull(_))));
    }

    #[test]
    fn exhausted() {
        let mut allocator = Ipv4AddressAllocator::new(
            Ipv4Addr::new(255, 255, 255, 0),
            Ipv4Addr::new(255, 255, 255, 0),
        )
        .unwrap();
        allocator.allocate().unwrap();
        assert!(matches!(
            allocator.allocate(),
            Err(AddressError::Exhausted { .. })
        ));
    }

    #[test]
    fn invalid_masks() {
        let base = Ipv4Addr::new(10, 0, 0, 0);
        assert!(Ipv4AddressAllocator::new(base, Ipv4Addr::new(255, 0, 255, 0)).is_err());
        assert!(Ipv4AddressAllocator::new(base, Ipv4Addr::new(255, 255, 255, 255)).is_err());
        assert!(
            Ipv4AddressAllocator::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(255, 255, 255, 0))
                .is_err()
        );
    }

    #[test]
    fn contains() {
        let mut allocator = Ipv4AddressAllocator::default();
        let subnet = allocator.allocate().unwrap();
        assert!(subnet.contains(Ipv4Addr::new(10, 0, 0, 200)));
        assert!(!subnet.contains(Ipv4Addr::new(10, 0, 1, 1)));
        assert_eq!(subnet.to_string(), "10.0.0.0/24");
        assert_eq!(subnet.mask(), Ipv4Addr::new(255, 255, 255, 0));
    }
}
