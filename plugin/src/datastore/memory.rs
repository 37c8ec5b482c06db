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
//! In-memory datastore.

use std::{
    collections::BTreeMap,
    net::IpAddr,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use anyhow::Context;
use ipnet::IpNet;
use libnetwork_address_manager::{
    IpVersion,
    manager::{AddressManager, IpPool, PoolSelector, PoolSetError},
};
use rand_chacha::ChaCha8Rng;

use crate::datastore::{
    DatastoreError, Endpoint, EndpointStore, IpamStore, Network, NetworkStore, NetworkWrite,
    dto::DatastoreDto,
};

/// Datastore shared by all handlers, and by several plugin instances in tests.
#[derive(Clone)]
pub struct SharedDatastore {
    state: Arc<RwLock<DatastoreState>>,
}

struct DatastoreState {
    addresses: AddressManager,
    /// Keyed by host and endpoint id.
    endpoints: BTreeMap<(String, String), Endpoint>,
    networks: BTreeMap<String, Network>,
}

// General
impl SharedDatastore {
    /// Creates an empty datastore assigning addresses from `pools`.
    pub fn new(pools: Vec<IpNet>, rng: ChaCha8Rng) -> Result<Self, PoolSetError> {
        Ok(Self::from_state(DatastoreState {
            addresses: AddressManager::new(pools, rng)?,
            endpoints: Default::default(),
            networks: Default::default(),
        }))
    }

    fn from_state(state: DatastoreState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Restores a datastore from a snapshot.
    pub fn from_dto(dto: DatastoreDto, rng: ChaCha8Rng) -> anyhow::Result<Self> {
        let addresses = dto
            .addresses
            .into_manager(rng)
            .context("invalid address state")?;

        let mut endpoints = BTreeMap::new();
        for endpoint in dto.endpoints {
            for address in endpoint.addresses() {
                let owner = addresses.owner(&address);
                anyhow::ensure!(
                    owner == Some(endpoint.host.as_str()),
                    "address {address} of endpoint {} is not assigned to {}",
                    endpoint.endpoint_id,
                    endpoint.host
                );
            }
            let key = (endpoint.host.clone(), endpoint.endpoint_id.clone());
            anyhow::ensure!(
                !endpoints.contains_key(&key),
                "duplicate endpoint {} on {}",
                key.1,
                key.0
            );
            endpoints.insert(key, endpoint);
        }

        let networks = dto
            .networks
            .into_iter()
            .map(|network| (network.network_id.clone(), network))
            .collect();

        Ok(Self::from_state(DatastoreState {
            addresses,
            endpoints,
            networks,
        }))
    }

    /// Takes a snapshot of the datastore.
    pub fn to_dto(&self) -> Result<DatastoreDto, DatastoreError> {
        let state = self.read()?;
        Ok(DatastoreDto {
            addresses: (&state.addresses).into(),
            endpoints: state.endpoints.values().cloned().collect(),
            networks: state.networks.values().cloned().collect(),
        })
    }

    /// Owner of an address, if it is assigned.
    pub fn address_owner(&self, address: &IpAddr) -> Result<Option<String>, DatastoreError> {
        Ok(self.read()?.addresses.owner(address).map(str::to_string))
    }

    /// Addresses owned by a host.
    pub fn addresses_of(&self, host: &str) -> Result<Vec<IpAddr>, DatastoreError> {
        Ok(self.read()?.addresses.assigned_to(host))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, DatastoreState>, DatastoreError> {
        self.state
            .read()
            .map_err(|e| DatastoreError::Unavailable(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, DatastoreState>, DatastoreError> {
        self.state
            .write()
            .map_err(|e| DatastoreError::Unavailable(e.to_string()))
    }
}

impl IpamStore for SharedDatastore {
    fn assign(
        &self,
        handle: &str,
        selector: PoolSelector,
        requested: Option<IpAddr>,
    ) -> Result<IpAddr, DatastoreError> {
        Ok(self.write()?.addresses.assign(handle, selector, requested)?)
    }

    fn release(&self, address: IpAddr) -> Result<String, DatastoreError> {
        Ok(self.write()?.addresses.release(address)?)
    }

    fn release_owned(&self, handle: &str, address: IpAddr) -> Result<bool, DatastoreError> {
        let mut state = self.write()?;
        if state.addresses.owner(&address) != Some(handle) {
            return Ok(false);
        }
        state.addresses.release(address)?;
        Ok(true)
    }

    fn pools_for(&self, version: IpVersion) -> Result<Vec<IpPool>, DatastoreError> {
        Ok(self.read()?.addresses.pools_for(version))
    }

    fn pool(&self, cidr: &IpNet) -> Result<Option<IpPool>, DatastoreError> {
        Ok(self.read()?.addresses.pool(cidr).copied())
    }
}

impl EndpointStore for SharedDatastore {
    fn create_endpoint(&self, endpoint: Endpoint) -> Result<(), DatastoreError> {
        let mut state = self.write()?;
        let key = (endpoint.host.clone(), endpoint.endpoint_id.clone());
        if state.endpoints.contains_key(&key) {
            return Err(DatastoreError::EndpointExists(endpoint.endpoint_id));
        }
        if !state.networks.contains_key(&endpoint.network_id) {
            return Err(DatastoreError::NetworkNotFound(endpoint.network_id));
        }
        let addresses = endpoint.addresses();
        for other in state.endpoints.values() {
            if let Some(address) = other
                .addresses()
                .into_iter()
                .find(|address| addresses.contains(address))
            {
                return Err(DatastoreError::AddressInUse {
                    address,
                    endpoint_id: other.endpoint_id.clone(),
                    host: other.host.clone(),
                });
            }
        }
        state.endpoints.insert(key, endpoint);
        Ok(())
    }

    fn lookup_endpoint(
        &self,
        host: &str,
        endpoint_id: &str,
    ) -> Result<Option<Endpoint>, DatastoreError> {
        Ok(self
            .read()?
            .endpoints
            .get(&(host.to_string(), endpoint_id.to_string()))
            .cloned())
    }

    fn update_endpoint(&self, endpoint: Endpoint) -> Result<(), DatastoreError> {
        let mut state = self.write()?;
        match state
            .endpoints
            .get_mut(&(endpoint.host.clone(), endpoint.endpoint_id.clone()))
        {
            Some(stored) => {
                *stored = endpoint;
                Ok(())
            }
            None => Err(DatastoreError::EndpointNotFound(endpoint.endpoint_id)),
        }
    }

    fn delete_endpoint(&self, host: &str, endpoint_id: &str) -> Result<Endpoint, DatastoreError> {
        self.write()?
            .endpoints
            .remove(&(host.to_string(), endpoint_id.to_string()))
            .ok_or_else(|| DatastoreError::EndpointNotFound(endpoint_id.to_string()))
    }

    fn count_endpoints(&self, host: &str) -> Result<usize, DatastoreError> {
        Ok(self
            .read()?
            .endpoints
            .keys()
            .filter(|(endpoint_host, _)| endpoint_host == host)
            .count())
    }

    fn count_in_network(&self, network_id: &str) -> Result<usize, DatastoreError> {
        Ok(self
            .read()?
            .endpoints
            .values()
            .filter(|endpoint| endpoint.network_id == network_id)
            .count())
    }
}

impl NetworkStore for SharedDatastore {
    fn get_network(&self, network_id: &str) -> Result<Option<Network>, DatastoreError> {
        Ok(self.read()?.networks.get(network_id).cloned())
    }

    fn write_network(&self, network: Network) -> Result<NetworkWrite, DatastoreError> {
        let mut state = self.write()?;
        match state.networks.get(&network.network_id) {
            Some(existing) if *existing == network => Ok(NetworkWrite::Unchanged),
            Some(_) => Err(DatastoreError::NetworkConflict(network.network_id)),
            None => {
                state.networks.insert(network.network_id.clone(), network);
                Ok(NetworkWrite::Created)
            }
        }
    }

    fn remove_unused_network(&self, network_id: &str) -> Result<Option<Network>, DatastoreError> {
        let mut state = self.write()?;
        let endpoints = state
            .endpoints
            .values()
            .filter(|endpoint| endpoint.network_id == network_id)
            .count();
        if endpoints > 0 {
            return Err(DatastoreError::NetworkInUse {
                network_id: network_id.to_string(),
                endpoints,
            });
        }
        Ok(state.networks.remove(network_id))
    }
}

#[cfg(test)]
mod tests {
    use libnetwork_address_manager::manager::AddressManagerError;
    use rand::SeedableRng;

    use super::*;
    use crate::datastore::EndpointState;

    fn datastore() -> SharedDatastore {
        let store = SharedDatastore::new(
            vec!["10.0.0.0/24".parse().unwrap(), "fd00::/120".parse().unwrap()],
            ChaCha8Rng::seed_from_u64(5),
        )
        .unwrap();
        store.write_network(network("net", 1500)).unwrap();
        store
    }

    fn endpoint(host: &str, id: &str, ipv4: Option<&str>) -> Endpoint {
        Endpoint {
            host: host.to_string(),
            endpoint_id: id.to_string(),
            network_id: "net".to_string(),
            interface_name: format!("cali{id}"),
            mac: "EE:EE:EE:EE:EE:EE".to_string(),
            ipv4: ipv4.map(|ip| ip.parse().unwrap()),
            ipv6: None,
            state: EndpointState::Created,
        }
    }

    fn network(id: &str, mtu: u32) -> Network {
        Network {
            network_id: id.to_string(),
            options: [("mtu".to_string(), serde_json::json!(mtu))].into(),
            ipv4_data: vec![],
            ipv6_data: vec![],
        }
    }

    #[test]
    fn release_owned_only_releases_own_addresses() {
        let store = datastore();
        let address: IpAddr = "10.0.0.9".parse().unwrap();
        store
            .assign("host1", PoolSelector::AnyPool(IpVersion::V4), Some(address))
            .unwrap();

        assert_eq!(store.release_owned("host2", address), Ok(false));
        assert_eq!(store.address_owner(&address).unwrap().as_deref(), Some("host1"));
        assert_eq!(store.release_owned("host1", address), Ok(true));
        assert_eq!(store.release_owned("host1", address), Ok(false));
        assert_eq!(
            store.release(address),
            Err(DatastoreError::Address(AddressManagerError::AddressNotAssigned(address)))
        );
    }

    #[test]
    fn endpoints_are_scoped_per_host() {
        let store = datastore();
        store.create_endpoint(endpoint("host1", "ep", None)).unwrap();
        store.create_endpoint(endpoint("host2", "ep", None)).unwrap();
        assert_eq!(
            store.create_endpoint(endpoint("host1", "ep", None)),
            Err(DatastoreError::EndpointExists("ep".to_string()))
        );

        assert_eq!(store.count_endpoints("host1"), Ok(1));
        assert_eq!(store.count_in_network("net"), Ok(2));

        let removed = store.delete_endpoint("host1", "ep").unwrap();
        assert_eq!(removed.host, "host1");
        assert_eq!(store.count_endpoints("host1"), Ok(0));
        assert!(store.lookup_endpoint("host2", "ep").unwrap().is_some());
        assert_eq!(
            store.delete_endpoint("host1", "ep"),
            Err(DatastoreError::EndpointNotFound("ep".to_string()))
        );
    }

    #[test]
    fn update_requires_existing_endpoint() {
        let store = datastore();
        let mut ep = endpoint("host1", "ep", None);
        assert_eq!(
            store.update_endpoint(ep.clone()),
            Err(DatastoreError::EndpointNotFound("ep".to_string()))
        );

        store.create_endpoint(ep.clone()).unwrap();
        ep.state = EndpointState::Joined {
            sandbox_key: "/var/run/docker/netns/1".to_string(),
            gateway_ipv6: None,
        };
        store.update_endpoint(ep.clone()).unwrap();
        assert_eq!(store.lookup_endpoint("host1", "ep"), Ok(Some(ep)));
    }

    #[test]
    fn network_write_detects_conflicts() {
        let store = datastore();
        assert_eq!(store.write_network(network("n", 1500)), Ok(NetworkWrite::Created));
        assert_eq!(
            store.write_network(network("n", 1500)),
            Ok(NetworkWrite::Unchanged)
        );
        assert_eq!(
            store.write_network(network("n", 9000)),
            Err(DatastoreError::NetworkConflict("n".to_string()))
        );
        assert_eq!(store.remove_unused_network("n"), Ok(Some(network("n", 1500))));
        assert_eq!(store.remove_unused_network("n"), Ok(None));
    }

    #[test]
    fn network_with_endpoints_is_kept() {
        let store = datastore();
        store.create_endpoint(endpoint("host1", "ep1", None)).unwrap();
        store.create_endpoint(endpoint("host2", "ep2", None)).unwrap();

        assert_eq!(
            store.remove_unused_network("net"),
            Err(DatastoreError::NetworkInUse {
                network_id: "net".to_string(),
                endpoints: 2
            })
        );
        assert!(store.get_network("net").unwrap().is_some());

        store.delete_endpoint("host1", "ep1").unwrap();
        store.delete_endpoint("host2", "ep2").unwrap();
        assert_eq!(
            store.remove_unused_network("net"),
            Ok(Some(network("net", 1500)))
        );
    }

    #[test]
    fn endpoint_needs_existing_network() {
        let store = datastore();
        let mut ep = endpoint("host1", "ep", None);
        ep.network_id = "gone".to_string();
        assert_eq!(
            store.create_endpoint(ep),
            Err(DatastoreError::NetworkNotFound("gone".to_string()))
        );
        assert_eq!(store.count_endpoints("host1"), Ok(0));
    }

    #[test]
    fn live_endpoints_never_share_an_address() {
        let store = datastore();
        let address: IpAddr = "10.0.0.1".parse().unwrap();
        store
            .create_endpoint(endpoint("host1", "ep1", Some("10.0.0.1")))
            .unwrap();

        for host in ["host1", "host2"] {
            assert_eq!(
                store.create_endpoint(endpoint(host, "ep2", Some("10.0.0.1"))),
                Err(DatastoreError::AddressInUse {
                    address,
                    endpoint_id: "ep1".to_string(),
                    host: "host1".to_string()
                })
            );
        }

        store.delete_endpoint("host1", "ep1").unwrap();
        store
            .create_endpoint(endpoint("host1", "ep2", Some("10.0.0.1")))
            .unwrap();
    }

    #[test]
    fn snapshot_restores_records() {
        let store = datastore();
        let address: IpAddr = "10.0.0.3".parse().unwrap();
        store
            .assign("host1", PoolSelector::AnyPool(IpVersion::V4), Some(address))
            .unwrap();
        store
            .create_endpoint(endpoint("host1", "ep", Some("10.0.0.3")))
            .unwrap();
        store.write_network(network("net", 1500)).unwrap();

        let dto = store.to_dto().unwrap();
        let restored = SharedDatastore::from_dto(dto.clone(), ChaCha8Rng::seed_from_u64(5)).unwrap();
        assert_eq!(restored.to_dto().unwrap(), dto);
        assert_eq!(restored.count_endpoints("host1"), Ok(1));
        assert_eq!(restored.addresses_of("host1"), Ok(vec![address]));
    }

    #[test]
    fn snapshot_with_unowned_endpoint_address_is_rejected() {
        let store = datastore();
        store
            .create_endpoint(endpoint("host1", "ep", Some("10.0.0.3")))
            .unwrap();

        let dto = store.to_dto().unwrap();
        let Err(err) = SharedDatastore::from_dto(dto, ChaCha8Rng::seed_from_u64(5)) else {
            panic!("snapshot should be rejected");
        };
        assert!(err.to_string().contains("not assigned"), "got {err}");
    }
}
