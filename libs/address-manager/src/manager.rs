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
//! IP address registry.

use std::{collections::BTreeMap, net::IpAddr};

use ipnet::IpNet;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    IpVersion,
    allocator::{AddressAllocator, AddressAllocatorError, AllocatorCreationError},
};

pub mod dto;

/// A configured range addresses are assigned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPool {
    /// The pool prefix, host bits cleared.
    pub cidr: IpNet,
}

impl IpPool {
    /// IP version of the pool.
    pub fn version(&self) -> IpVersion {
        IpVersion::of_net(&self.cidr)
    }

    /// Returns true if the address lies inside the pool.
    pub fn contains(&self, address: &IpAddr) -> bool {
        self.cidr.contains(address)
    }
}

/// Where an address should be taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSelector {
    /// Any configured pool of the given version.
    AnyPool(IpVersion),
    /// Exactly the configured pool with this prefix.
    Pool(IpNet),
}

/// Pool set creation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolSetError {
    /// The same pool is configured twice.
    #[error("pool {0} configured more than once")]
    DuplicatePool(IpNet),
    /// Pools overlap or cannot be represented.
    #[error(transparent)]
    InvalidPools(#[from] AllocatorCreationError),
}

/// Address assignment errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressManagerError {
    /// The selected pool is not configured.
    #[error("pool {0} not found")]
    PoolNotFound(IpNet),
    /// Address is outside of all (or the selected) pools.
    #[error("address {0} is not in a configured pool")]
    AddressNotInPool(IpAddr),
    /// Address already has an owner.
    #[error("address {address} is already assigned to {owner}")]
    AddressAlreadyAssigned {
        /// The requested address.
        address: IpAddr,
        /// Its current owner.
        owner: String,
    },
    /// Address has no owner.
    #[error("address {0} is not assigned")]
    AddressNotAssigned(IpAddr),
    /// Every pool of the version is exhausted.
    #[error("no {0} addresses available")]
    NoAddressesAvailable(IpVersion),
    /// Requested address does not match the version of the selected pool.
    #[error("address {address} is not an {expected} address")]
    WrongIpVersion {
        /// The requested address.
        address: IpAddr,
        /// Version of the selected pool.
        expected: IpVersion,
    },
    /// Free list and assignments disagree.
    #[error("address bookkeeping is inconsistent: {0}")]
    Inconsistent(AddressAllocatorError),
}

impl From<AddressAllocatorError> for AddressManagerError {
    fn from(err: AddressAllocatorError) -> Self {
        match err {
            AddressAllocatorError::AddressNotInPool(address) => {
                AddressManagerError::AddressNotInPool(address)
            }
            AddressAllocatorError::NoAddressesAvailable(version) => {
                AddressManagerError::NoAddressesAvailable(version)
            }
            e @ (AddressAllocatorError::AddressAlreadyAllocated(_)
            | AddressAllocatorError::AddressAlreadyFree(_)) => AddressManagerError::Inconsistent(e),
        }
    }
}

/// Address registry over a fixed set of pools.
///
/// Every assigned address is owned by exactly one handle. The plugin uses the host name
/// as handle, so all addresses of one host can be listed and counted.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AddressManager {
    pools: Vec<IpPool>,
    /// Map between address and owning handle
    assignments: BTreeMap<IpAddr, String>,
    free_ips: AddressAllocator,
}

impl AddressManager {
    /// Create a new address registry for the given pools.
    pub fn new(pools: Vec<IpNet>, rng: ChaCha8Rng) -> Result<Self, PoolSetError> {
        let pools: Vec<IpPool> = pools
            .into_iter()
            .map(|cidr| IpPool { cidr: cidr.trunc() })
            .collect();

        for (i, pool) in pools.iter().enumerate() {
            if pools[..i].contains(pool) {
                return Err(PoolSetError::DuplicatePool(pool.cidr));
            }
        }

        let prefixes: Vec<IpNet> = pools.iter().map(|p| p.cidr).collect();
        let free_ips = AddressAllocator::new(&prefixes, rng)?;

        Ok(Self {
            pools,
            assignments: Default::default(),
            free_ips,
        })
    }

    /// Assigns an address to `handle`.
    ///
    /// ### Parameters
    /// - `handle`: The owner of the address.
    /// - `selector`: The pool, or pool family, to assign from.
    /// - `requested`: A specific address to assign. `None` picks a random free address.
    pub fn assign(
        &mut self,
        handle: &str,
        selector: PoolSelector,
        requested: Option<IpAddr>,
    ) -> Result<IpAddr, AddressManagerError> {
        let (version, within) = match selector {
            PoolSelector::AnyPool(version) => (version, None),
            PoolSelector::Pool(cidr) => {
                let pool = self
                    .pool(&cidr)
                    .ok_or(AddressManagerError::PoolNotFound(cidr))?;
                (pool.version(), Some(*pool))
            }
        };

        let Some(address) = requested else {
            let address = self
                .free_ips
                .allocate_any(version, within.as_ref().map(|p| &p.cidr))?;
            self.assignments.insert(address, handle.to_string());
            return Ok(address);
        };

        if IpVersion::of(&address) != version {
            return Err(AddressManagerError::WrongIpVersion {
                address,
                expected: version,
            });
        }
        if within.is_some_and(|pool| !pool.contains(&address)) {
            return Err(AddressManagerError::AddressNotInPool(address));
        }
        if let Some(owner) = self.assignments.get(&address) {
            return Err(AddressManagerError::AddressAlreadyAssigned {
                address,
                owner: owner.clone(),
            });
        }

        self.free_ips.allocate_specific(address)?;
        self.assignments.insert(address, handle.to_string());
        Ok(address)
    }

    /// Releases an assigned address, returning its former owner.
    pub fn release(&mut self, address: IpAddr) -> Result<String, AddressManagerError> {
        let Some(owner) = self.assignments.remove(&address) else {
            if self.pools.iter().any(|p| p.contains(&address)) {
                return Err(AddressManagerError::AddressNotAssigned(address));
            }
            return Err(AddressManagerError::AddressNotInPool(address));
        };

        if let Err(e) = self.free_ips.free(address) {
            tracing::error!(
                %address,
                "Address allocator did not contain an assigned address - this should never happen: {e}"
            );
        }
        Ok(owner)
    }

    /// All configured pools, in configuration order.
    pub fn pools(&self) -> &[IpPool] {
        &self.pools
    }

    /// Configured pools of one version.
    pub fn pools_for(&self, version: IpVersion) -> Vec<IpPool> {
        self.pools
            .iter()
            .filter(|p| p.version() == version)
            .copied()
            .collect()
    }

    /// The configured pool with exactly this prefix, host bits ignored.
    pub fn pool(&self, cidr: &IpNet) -> Option<&IpPool> {
        let cidr = cidr.trunc();
        self.pools.iter().find(|p| p.cidr == cidr)
    }

    /// Returns true if the address currently has an owner.
    pub fn is_assigned(&self, address: &IpAddr) -> bool {
        self.assignments.contains_key(address)
    }

    /// Owner of an assigned address.
    pub fn owner(&self, address: &IpAddr) -> Option<&str> {
        self.assignments.get(address).map(String::as_str)
    }

    /// Addresses owned by `handle`, in ascending order.
    pub fn assigned_to(&self, handle: &str) -> Vec<IpAddr> {
        self.assignments
            .iter()
            .filter(|(_, owner)| owner.as_str() == handle)
            .map(|(address, _)| *address)
            .collect()
    }

    /// Number of free addresses of one version.
    pub fn free_count(&self, version: IpVersion) -> u128 {
        self.free_ips.free_count(version)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::{Ipv4Addr, Ipv6Addr},
        str::FromStr,
    };

    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    const HOST: &str = "host1";
    const OTHER_HOST: &str = "host2";

    fn get_registry() -> AddressManager {
        AddressManager::new(
            vec![
                IpNet::from_str("192.168.0.0/24").unwrap(),
                IpNet::from_str("2001:db8::/64").unwrap(),
            ],
            ChaCha8Rng::seed_from_u64(42),
        )
        .unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        IpAddr::from_str(s).unwrap()
    }

    #[test]
    fn should_reject_duplicate_and_overlapping_pools() {
        let pool: IpNet = "10.0.0.0/24".parse().unwrap();
        assert_eq!(
            AddressManager::new(vec![pool, pool], ChaCha8Rng::seed_from_u64(1)),
            Err(PoolSetError::DuplicatePool(pool))
        );

        let inner: IpNet = "10.0.0.128/25".parse().unwrap();
        assert_eq!(
            AddressManager::new(vec![pool, inner], ChaCha8Rng::seed_from_u64(1)),
            Err(PoolSetError::InvalidPools(
                AllocatorCreationError::OverlappingPools(pool, inner)
            ))
        );
    }

    #[test]
    fn should_assign_specific_ip() {
        let mut registry = get_registry();

        let v4 = ip("192.168.0.101");
        let result = registry.assign(HOST, PoolSelector::AnyPool(IpVersion::V4), Some(v4));
        assert_eq!(result, Ok(v4), "Expected specific assignment");
        assert_eq!(registry.owner(&v4), Some(HOST));

        let v6 = ip("2001:db8::1");
        let result = registry.assign(HOST, PoolSelector::AnyPool(IpVersion::V6), Some(v6));
        assert_eq!(result, Ok(v6), "Expected specific assignment");

        assert_eq!(registry.assigned_to(HOST), vec![v4, v6]);
        assert!(registry.assigned_to(OTHER_HOST).is_empty());
    }

    #[test]
    fn should_fail_to_assign_owned_ip() {
        let mut registry = get_registry();
        let v4 = ip("192.168.0.1");
        registry
            .assign(HOST, PoolSelector::AnyPool(IpVersion::V4), Some(v4))
            .expect("Should succeed");

        for handle in [HOST, OTHER_HOST] {
            let result = registry.assign(handle, PoolSelector::AnyPool(IpVersion::V4), Some(v4));
            assert_eq!(
                result,
                Err(AddressManagerError::AddressAlreadyAssigned {
                    address: v4,
                    owner: HOST.to_string()
                }),
                "got {result:?}"
            );
        }
        assert_eq!(registry.owner(&v4), Some(HOST));
    }

    #[test]
    fn should_fail_if_ip_is_outside_pools() {
        let mut registry = get_registry();

        let outside = ip("192.168.1.0");
        assert_eq!(
            registry.assign(HOST, PoolSelector::AnyPool(IpVersion::V4), Some(outside)),
            Err(AddressManagerError::AddressNotInPool(outside))
        );

        let outside = ip("2001:db9::");
        assert_eq!(
            registry.assign(HOST, PoolSelector::AnyPool(IpVersion::V6), Some(outside)),
            Err(AddressManagerError::AddressNotInPool(outside))
        );
    }

    #[test]
    fn should_fail_on_version_mismatch() {
        let mut registry = get_registry();
        let v6 = ip("2001:db8::5");
        assert_eq!(
            registry.assign(HOST, PoolSelector::AnyPool(IpVersion::V4), Some(v6)),
            Err(AddressManagerError::WrongIpVersion {
                address: v6,
                expected: IpVersion::V4
            })
        );
        assert!(!registry.is_assigned(&v6));
    }

    #[test]
    fn should_assign_within_selected_pool() {
        let mut registry = AddressManager::new(
            vec!["10.0.0.0/30".parse().unwrap(), "10.1.0.0/30".parse().unwrap()],
            ChaCha8Rng::seed_from_u64(7),
        )
        .unwrap();
        let pool: IpNet = "10.1.0.0/30".parse().unwrap();

        for _ in 0..4 {
            let addr = registry
                .assign(HOST, PoolSelector::Pool(pool), None)
                .expect("Should succeed");
            assert!(pool.contains(&addr), "{addr} outside {pool}");
        }
        assert_eq!(
            registry.assign(HOST, PoolSelector::Pool(pool), None),
            Err(AddressManagerError::NoAddressesAvailable(IpVersion::V4))
        );
        assert_eq!(
            registry.assign(HOST, PoolSelector::Pool(pool), Some(ip("10.0.0.1"))),
            Err(AddressManagerError::AddressNotInPool(ip("10.0.0.1")))
        );

        let unknown: IpNet = "10.2.0.0/30".parse().unwrap();
        assert_eq!(
            registry.assign(HOST, PoolSelector::Pool(unknown), None),
            Err(AddressManagerError::PoolNotFound(unknown))
        );
    }

    #[test]
    fn should_fail_if_no_address_is_available() {
        let mut registry = AddressManager::new(vec![], ChaCha8Rng::seed_from_u64(42)).unwrap();
        assert_eq!(
            registry.assign(HOST, PoolSelector::AnyPool(IpVersion::V4), None),
            Err(AddressManagerError::NoAddressesAvailable(IpVersion::V4))
        );
        assert_eq!(
            registry.assign(HOST, PoolSelector::AnyPool(IpVersion::V6), None),
            Err(AddressManagerError::NoAddressesAvailable(IpVersion::V6))
        );
    }

    #[test]
    fn should_release_and_reassign() {
        let mut registry = get_registry();
        let free_before = registry.free_count(IpVersion::V4);

        let addr = registry
            .assign(HOST, PoolSelector::AnyPool(IpVersion::V4), None)
            .expect("Should succeed");
        assert_eq!(registry.free_count(IpVersion::V4), free_before - 1);

        assert_eq!(registry.release(addr), Ok(HOST.to_string()));
        assert!(!registry.is_assigned(&addr));
        assert_eq!(registry.free_count(IpVersion::V4), free_before);

        // Released addresses can be handed out again, also to another owner.
        assert_eq!(
            registry.assign(OTHER_HOST, PoolSelector::AnyPool(IpVersion::V4), Some(addr)),
            Ok(addr)
        );
    }

    #[test]
    fn should_report_release_of_unassigned_ip() {
        let mut registry = get_registry();

        let unassigned = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 7));
        assert_eq!(
            registry.release(unassigned),
            Err(AddressManagerError::AddressNotAssigned(unassigned))
        );

        let outside = IpAddr::V6(Ipv6Addr::LOCALHOST);
        assert_eq!(
            registry.release(outside),
            Err(AddressManagerError::AddressNotInPool(outside))
        );

        // Double release
        let addr = registry
            .assign(HOST, PoolSelector::AnyPool(IpVersion::V6), None)
            .unwrap();
        registry.release(addr).unwrap();
        assert_eq!(
            registry.release(addr),
            Err(AddressManagerError::AddressNotAssigned(addr))
        );
    }

    #[test]
    fn should_list_pools_per_version() {
        let registry = get_registry();
        assert_eq!(
            registry.pools_for(IpVersion::V4),
            vec![IpPool {
                cidr: "192.168.0.0/24".parse().unwrap()
            }]
        );
        assert_eq!(registry.pools_for(IpVersion::V6).len(), 1);
        assert!(
            registry
                .pool(&"192.168.0.17/24".parse().unwrap())
                .is_some()
        );
        assert!(registry.pool(&"192.168.0.0/25".parse().unwrap()).is_none());
    }
}
