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
//! Data transfer objects (DTOs) for the address registry.

use std::net::IpAddr;

use anyhow::Context;
use ipnet::IpNet;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::{
    IpVersion,
    manager::{AddressManager, PoolSelector},
};

/// Snapshot of an address registry.
///
/// Free addresses are not stored, they are derived from the assignments on load.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AddressManagerDto {
    /// Prefixes this AddressManager is responsible for.
    pub pools: Vec<IpNet>,
    /// The list of assigned addresses.
    pub assignments: Vec<AssignmentDto>,
}

/// An assigned address.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AssignmentDto {
    /// The assigned address.
    pub address: IpAddr,
    /// The owner of the address.
    pub handle: String,
}

impl From<&AddressManager> for AddressManagerDto {
    fn from(state: &AddressManager) -> Self {
        AddressManagerDto {
            pools: state.pools.iter().map(|p| p.cidr).collect(),
            assignments: state
                .assignments
                .iter()
                .map(|(address, handle)| {
                    AssignmentDto {
                        address: *address,
                        handle: handle.clone(),
                    }
                })
                .collect(),
        }
    }
}

impl AddressManagerDto {
    /// Rebuilds the registry. Fails if the pools are invalid or an assignment is outside
    /// the pools or duplicated.
    pub fn into_manager(self, rng: ChaCha8Rng) -> anyhow::Result<AddressManager> {
        let mut manager = AddressManager::new(self.pools, rng).context("invalid pool set")?;

        for assignment in self.assignments {
            let selector = PoolSelector::AnyPool(IpVersion::of(&assignment.address));
            manager
                .assign(&assignment.handle, selector, Some(assignment.address))
                .with_context(|| format!("invalid assignment of {}", assignment.address))?;
        }

        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn registry() -> AddressManager {
        let mut manager = AddressManager::new(
            vec!["10.0.0.0/24".parse().unwrap(), "fd00::/120".parse().unwrap()],
            ChaCha8Rng::seed_from_u64(3),
        )
        .unwrap();
        manager
            .assign("host1", PoolSelector::AnyPool(IpVersion::V4), None)
            .unwrap();
        manager
            .assign(
                "host2",
                PoolSelector::AnyPool(IpVersion::V6),
                Some("fd00::9".parse().unwrap()),
            )
            .unwrap();
        manager
    }

    #[test]
    fn snapshot_restores_assignments_and_free_addresses() {
        let manager = registry();
        let dto = AddressManagerDto::from(&manager);

        let json = serde_json::to_string(&dto).unwrap();
        let dto: AddressManagerDto = serde_json::from_str(&json).unwrap();
        let restored = dto.into_manager(ChaCha8Rng::seed_from_u64(3)).unwrap();

        assert_eq!(restored.assignments, manager.assignments);
        assert_eq!(restored.pools(), manager.pools());
        assert_eq!(
            restored.free_count(IpVersion::V4),
            manager.free_count(IpVersion::V4)
        );
        assert_eq!(
            restored.free_count(IpVersion::V6),
            manager.free_count(IpVersion::V6)
        );
    }

    #[test]
    fn snapshot_with_duplicate_assignment_is_rejected() {
        let mut dto = AddressManagerDto::from(&registry());
        let first = dto.assignments[0].clone();
        dto.assignments.push(AssignmentDto {
            address: first.address,
            handle: "host3".to_string(),
        });

        let err = dto.into_manager(ChaCha8Rng::seed_from_u64(3)).unwrap_err();
        assert!(
            err.to_string().starts_with("invalid assignment of"),
            "got {err}"
        );
    }
}
