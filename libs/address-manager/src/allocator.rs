// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! An IP address allocator over a set of pools.

use std::net::IpAddr;

use ipnet::IpNet;
use rand::Rng as _;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::{
    IpVersion,
    allocator::addr_set::{AddrSet, AddrSetError},
};

mod addr_set;
mod free_ranges;

/// An allocator of IP addresses.
// Impl Note:
// The AddrSets contain all free addresses.
// On Allocation - Address is removed from the Set
// On Free       - Address is added to the Set.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct AddressAllocator {
    /// One set per pool, in pool order.
    sets: Vec<AddrSet>,
    /// RNG for random address allocation.
    rng: ChaCha8Rng,
}

/// Address allocator creation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocatorCreationError {
    /// Two pools share addresses.
    #[error("pools {0} and {1} overlap")]
    OverlappingPools(IpNet, IpNet),
    /// Pool cannot be represented.
    #[error("pool {0} is too large")]
    PoolTooLarge(IpNet),
}

impl AddressAllocator {
    /// Creates a new AddressAllocator.
    ///
    /// # Arguments
    /// * `pools` - A list of non-overlapping pools to allocate from.
    /// * `rng` - A random number generator for random address allocation.
    pub fn new(pools: &[IpNet], rng: ChaCha8Rng) -> Result<Self, AllocatorCreationError> {
        for (i, a) in pools.iter().enumerate() {
            for b in &pools[i + 1..] {
                if a.contains(b) || b.contains(a) {
                    return Err(AllocatorCreationError::OverlappingPools(*a, *b));
                }
            }
        }

        let sets = pools
            .iter()
            .map(|pool| {
                AddrSet::new(*pool).map_err(|_| AllocatorCreationError::PoolTooLarge(*pool))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { sets, rng })
    }

    fn mut_address_set(&mut self, address: &IpAddr) -> Result<&mut AddrSet, AddressAllocatorError> {
        self.sets
            .iter_mut()
            .find(|set| set.prefix.contains(address))
            .ok_or(AddressAllocatorError::AddressNotInPool(*address))
    }

    /// Frees a certain address.
    ///
    /// Returns an error if the address is already free or not in any pool.
    pub fn free(&mut self, address: IpAddr) -> Result<(), AddressAllocatorError> {
        self.mut_address_set(&address)?.insert(address)?;
        Ok(())
    }

    /// Allocates a specific address.
    ///
    /// Returns an error if the address is already allocated or not in any pool.
    pub fn allocate_specific(&mut self, address: IpAddr) -> Result<(), AddressAllocatorError> {
        self.mut_address_set(&address)?.remove(address)?;
        Ok(())
    }

    /// Allocates a random free address of the given family. With `within`, only that
    /// pool is considered.
    pub fn allocate_any(
        &mut self,
        version: IpVersion,
        within: Option<&IpNet>,
    ) -> Result<IpAddr, AddressAllocatorError> {
        let available: u128 = self
            .sets
            .iter()
            .filter(|set| set.serves(version, within))
            .map(|set| set.len())
            .sum();
        if available == 0 {
            return Err(AddressAllocatorError::NoAddressesAvailable(version));
        }

        let mut n = self.rng.random_range(0..available);
        for set in self.sets.iter_mut().filter(|set| set.serves(version, within)) {
            if n < set.len() {
                let addr = set
                    .nth_free(n)
                    .ok_or(AddressAllocatorError::NoAddressesAvailable(version))?;
                set.remove(addr)?;
                return Ok(addr);
            }
            n -= set.len();
        }
        Err(AddressAllocatorError::NoAddressesAvailable(version))
    }

    /// Check if an address is free.
    pub fn is_free(&self, address: IpAddr) -> bool {
        self.sets.iter().any(|set| set.contains(address))
    }

    /// Number of free addresses of the given family.
    pub fn free_count(&self, version: IpVersion) -> u128 {
        self.sets
            .iter()
            .filter(|set| IpVersion::of_net(&set.prefix) == version)
            .map(|set| set.len())
            .sum()
    }

    /// Pools this allocator allocates from, in configuration order.
    pub fn pools(&self) -> impl Iterator<Item = &IpNet> {
        self.sets.iter().map(|set| &set.prefix)
    }
}

/// Address allocation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressAllocatorError {
    /// Address not in any pool.
    #[error("requested address {0} not in any pool")]
    AddressNotInPool(IpAddr),
    /// Address already allocated.
    #[error("address {0} already allocated")]
    AddressAlreadyAllocated(IpAddr),
    /// Address is already free.
    #[error("address {0} is already free")]
    AddressAlreadyFree(IpAddr),
    /// All addresses of a family are allocated.
    #[error("no {0} addresses available")]
    NoAddressesAvailable(IpVersion),
}

impl From<AddrSetError> for AddressAllocatorError {
    fn from(err: AddrSetError) -> Self {
        match err {
            AddrSetError::AddressNotInPrefix(addr) => AddressAllocatorError::AddressNotInPool(addr),
            AddrSetError::AddressAlreadyFree(addr) => {
                AddressAllocatorError::AddressAlreadyFree(addr)
            }
            AddrSetError::AddressNotFree(addr) => {
                AddressAllocatorError::AddressAlreadyAllocated(addr)
            }
            // Sets are validated on creation.
            AddrSetError::PrefixTooLarge(prefix) => {
                unreachable!("allocator holds an unrepresentable pool {prefix}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeSet,
        net::{IpAddr, Ipv4Addr},
        str::FromStr,
    };

    use rand::SeedableRng;

    use super::*;

    fn check_allocator_invariants(allocator: &AddressAllocator) {
        for set in &allocator.sets {
            for pair in set.free.spans().windows(2) {
                assert!(
                    pair[0].end < pair[1].start,
                    "{} spans not ordered or not merged: {:?} and {:?}",
                    set.prefix,
                    pair[0],
                    pair[1]
                );
            }
        }
    }

    fn allocator(pools: &[&str]) -> AddressAllocator {
        let pools: Vec<IpNet> = pools.iter().map(|p| p.parse().unwrap()).collect();
        AddressAllocator::new(&pools, ChaCha8Rng::seed_from_u64(42)).unwrap()
    }

    #[test]
    fn test_allocate_random() {
        let mut allocator = allocator(&["192.168.0.0/24", "10.0.0.0/16", "2001:db8::/64"]);
        let mut expected_v4 = 2u128.pow(8) + 2u128.pow(16);
        let mut allocated = BTreeSet::new();

        for _ in 0..1000 {
            let addr = allocator
                .allocate_any(IpVersion::V4, None)
                .expect("Failed to allocate");
            check_allocator_invariants(&allocator);
            assert!(!allocator.is_free(addr));
            assert!(addr.is_ipv4());
            assert!(allocated.insert(addr), "{addr} allocated twice");
            expected_v4 -= 1;
            assert_eq!(allocator.free_count(IpVersion::V4), expected_v4);
        }

        let v6 = allocator
            .allocate_any(IpVersion::V6, None)
            .expect("Failed to allocate");
        assert!(v6.is_ipv6());

        for addr in allocated {
            allocator.free(addr).unwrap();
            check_allocator_invariants(&allocator);
            assert!(allocator.is_free(addr));
        }

        for set in allocator.sets.iter().filter(|s| s.prefix.addr().is_ipv4()) {
            assert_eq!(1, set.free.spans().len());
        }
    }

    #[test]
    fn test_allocate_within_pool() {
        let mut allocator = allocator(&["192.168.0.0/24", "10.0.0.0/16"]);
        let pool: IpNet = "192.168.0.0/24".parse().unwrap();

        for _ in 0..50 {
            let addr = allocator
                .allocate_any(IpVersion::V4, Some(&pool))
                .expect("Failed to allocate");
            assert!(pool.contains(&addr), "{addr} outside {pool}");
        }
    }

    #[test]
    fn test_allocate_boundary() {
        let testcases = vec![
            (
                "192.168.0.0/24",
                IpAddr::from_str("192.167.255.255").unwrap(),
                IpAddr::from_str("192.168.1.0").unwrap(),
            ),
            (
                "2001:db8::/64",
                IpAddr::from_str("2001:db7:ffff:ffff:ffff:ffff:ffff:ffff").unwrap(),
                IpAddr::from_str("2001:db9::0").unwrap(),
            ),
        ];

        for (prefix, lower, upper) in testcases {
            let mut allocator = allocator(&[prefix]);
            let prefix: IpNet = prefix.parse().unwrap();

            assert_eq!(
                allocator.allocate_specific(lower),
                Err(AddressAllocatorError::AddressNotInPool(lower))
            );
            assert_eq!(
                allocator.allocate_specific(upper),
                Err(AddressAllocatorError::AddressNotInPool(upper))
            );

            for edge in [prefix.network(), prefix.broadcast()] {
                allocator.allocate_specific(edge).expect("Failed to allocate");
                assert!(!allocator.is_free(edge));
                assert_eq!(
                    allocator.allocate_specific(edge),
                    Err(AddressAllocatorError::AddressAlreadyAllocated(edge))
                );
            }
        }
    }

    #[test]
    fn test_allocate_full() {
        let mut allocator = allocator(&["192.168.0.0/31", "192.168.0.2/31"]);
        for _ in 0..4 {
            let addr = allocator
                .allocate_any(IpVersion::V4, None)
                .expect("Failed to allocate");
            assert!(addr.is_ipv4());
            check_allocator_invariants(&allocator);
        }
        assert_eq!(allocator.free_count(IpVersion::V4), 0);
        assert_eq!(
            allocator.allocate_any(IpVersion::V4, None),
            Err(AddressAllocatorError::NoAddressesAvailable(IpVersion::V4))
        );
    }

    #[test]
    fn test_double_free() {
        let mut allocator = allocator(&["10.0.0.0/30"]);
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        allocator.allocate_specific(addr).unwrap();
        allocator.free(addr).unwrap();
        assert_eq!(
            allocator.free(addr),
            Err(AddressAllocatorError::AddressAlreadyFree(addr))
        );
    }

    #[test]
    fn test_reject_overlapping_pools() {
        let pools: Vec<IpNet> = vec!["10.0.0.0/8".parse().unwrap(), "10.1.0.0/16".parse().unwrap()];
        assert_eq!(
            AddressAllocator::new(&pools, ChaCha8Rng::seed_from_u64(1)),
            Err(AllocatorCreationError::OverlappingPools(pools[0], pools[1]))
        );
    }
}
